//! Record store and secret store collaborators.
//!
//! The engine reads and writes connection descriptors and sort destinations through
//! [`RecordStore`], and fetches secrets through [`SecretStore`] at session start. It never
//! writes a secret anywhere else.
//!
//! [`FileRecordStore`] keeps everything in one JSON file and rewrites it after each mutation.
//! [`KeyringSecretStore`] uses the OS secret service.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use crate::destinations;
use crate::error::StoreError;
use crate::ignore_poison::{IgnorePoison, IgnoreRwPoison};
use crate::model::{ConnectionDescriptor, Credentials, DescriptorId, SortDestination};

const LAST_CONNECTION_FILE_NAME: &str = "last_connection.json";

/// Something the record store can hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoredRecord {
    Connection(ConnectionDescriptor),
    Destination(SortDestination),
}

impl StoredRecord {
    pub fn descriptor(&self) -> &ConnectionDescriptor {
        match self {
            Self::Connection(descriptor) => descriptor,
            Self::Destination(destination) => &destination.descriptor,
        }
    }

    pub fn id(&self) -> &DescriptorId {
        &self.descriptor().id
    }
}

/// Persistence of descriptors and ranked sort destinations, keyed by identity.
pub trait RecordStore: Send + Sync {
    fn get(&self, id: &DescriptorId) -> Result<Option<StoredRecord>, StoreError>;

    /// Looks up a remote descriptor. The address is compared case-insensitively.
    fn get_by_address_and_path(&self, address: &str, path: &str) -> Result<Option<StoredRecord>, StoreError>;

    /// Inserts or replaces a record. Inserting a destination shifts later ranks down.
    fn upsert(&self, record: StoredRecord) -> Result<(), StoreError>;

    /// Deletes a record. Removing a destination re-packs the remaining ranks.
    fn delete(&self, id: &DescriptorId) -> Result<(), StoreError>;

    /// Sort destinations in rank order.
    fn list_sort_destinations(&self) -> Result<Vec<SortDestination>, StoreError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RecordsFile {
    #[serde(default)]
    connections: Vec<ConnectionDescriptor>,
    #[serde(default)]
    destinations: Vec<SortDestination>,
}

/// JSON-file record store. `in_memory()` skips the file.
pub struct FileRecordStore {
    records: RwLock<RecordsFile>,
    file_path: Option<PathBuf>,
}

impl FileRecordStore {
    /// Opens the store at `path`, loading it if the file exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let file_path = path.into();
        let mut records = if file_path.exists() {
            let content = fs::read_to_string(&file_path)?;
            serde_json::from_str::<RecordsFile>(&content)?
        } else {
            RecordsFile::default()
        };

        if destinations::validate_ranks(&records.destinations).is_err() {
            warn!(
                "Sort destinations in {} had broken ranks, re-packing",
                file_path.display()
            );
            destinations::repack(&mut records.destinations);
            records.destinations.truncate(crate::config::MAX_SORT_DESTINATIONS);
        }

        debug!(
            "Loaded {} connections and {} destinations from {}",
            records.connections.len(),
            records.destinations.len(),
            file_path.display()
        );

        Ok(Self {
            records: RwLock::new(records),
            file_path: Some(file_path),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            records: RwLock::new(RecordsFile::default()),
            file_path: None,
        }
    }

    fn persist(&self) -> Result<(), StoreError> {
        let Some(path) = &self.file_path else {
            return Ok(());
        };
        let content = {
            let records = self.records.read_ignore_poison();
            serde_json::to_string_pretty(&*records)?
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }
}

impl RecordStore for FileRecordStore {
    fn get(&self, id: &DescriptorId) -> Result<Option<StoredRecord>, StoreError> {
        let records = self.records.read_ignore_poison();
        if let Some(dest) = records.destinations.iter().find(|d| &d.descriptor.id == id) {
            return Ok(Some(StoredRecord::Destination(dest.clone())));
        }
        Ok(records
            .connections
            .iter()
            .find(|c| &c.id == id)
            .cloned()
            .map(StoredRecord::Connection))
    }

    fn get_by_address_and_path(&self, address: &str, path: &str) -> Result<Option<StoredRecord>, StoreError> {
        let path = path.trim_matches('/');
        let matches = |d: &ConnectionDescriptor| d.address.eq_ignore_ascii_case(address) && d.base_path.trim_matches('/') == path;

        let records = self.records.read_ignore_poison();
        if let Some(conn) = records.connections.iter().find(|c| matches(c)) {
            return Ok(Some(StoredRecord::Connection(conn.clone())));
        }
        Ok(records
            .destinations
            .iter()
            .find(|d| matches(&d.descriptor))
            .cloned()
            .map(StoredRecord::Destination))
    }

    fn upsert(&self, record: StoredRecord) -> Result<(), StoreError> {
        if !record.id().is_persisted() {
            return Err(StoreError::NotPersistable(record.id().to_string()));
        }

        {
            let mut records = self.records.write_ignore_poison();
            match record {
                StoredRecord::Connection(descriptor) => {
                    match records.connections.iter_mut().find(|c| c.id == descriptor.id) {
                        Some(existing) => *existing = descriptor,
                        None => records.connections.push(descriptor),
                    }
                }
                StoredRecord::Destination(destination) => {
                    let existing = records
                        .destinations
                        .iter()
                        .position(|d| d.descriptor.id == destination.descriptor.id);
                    match existing {
                        Some(index) if records.destinations[index].rank == destination.rank => {
                            records.destinations[index] = destination;
                        }
                        Some(index) => {
                            let old_rank = records.destinations[index].rank;
                            let new_rank = destination.rank.min(records.destinations.len() as u8 - 1);
                            records.destinations[index] = SortDestination {
                                rank: old_rank,
                                ..destination
                            };
                            destinations::reorder(&mut records.destinations, old_rank, new_rank)?;
                        }
                        None => destinations::insert(&mut records.destinations, destination)?,
                    }
                }
            }
        }

        self.persist()
    }

    fn delete(&self, id: &DescriptorId) -> Result<(), StoreError> {
        {
            let mut records = self.records.write_ignore_poison();
            if let Some(dest) = records.destinations.iter().find(|d| &d.descriptor.id == id) {
                let rank = dest.rank;
                destinations::remove_and_repack(&mut records.destinations, rank)?;
            } else {
                let before = records.connections.len();
                records.connections.retain(|c| &c.id != id);
                if records.connections.len() == before {
                    return Err(StoreError::NotFound(id.to_string()));
                }
            }
        }

        self.persist()
    }

    fn list_sort_destinations(&self) -> Result<Vec<SortDestination>, StoreError> {
        let mut list = self.records.read_ignore_poison().destinations.clone();
        list.sort_by_key(|d| d.rank);
        Ok(list)
    }
}

// ============================================================================
// Secrets
// ============================================================================

/// Holds share secrets, keyed by account (usually `user@server`).
pub trait SecretStore: Send + Sync {
    fn load_secret(&self, account: &str) -> Result<Option<String>, StoreError>;
    fn store_secret(&self, account: &str, secret: &str) -> Result<(), StoreError>;
    fn clear_secret(&self, account: &str) -> Result<(), StoreError>;
}

/// Secret store on the OS keyring (Secret Service, Keychain, Credential Manager).
pub struct KeyringSecretStore {
    service: String,
}

impl KeyringSecretStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self { service: service.into() }
    }

    fn entry(&self, account: &str) -> Result<keyring::Entry, StoreError> {
        keyring::Entry::new(&self.service, account).map_err(|e| StoreError::Secret(e.to_string()))
    }
}

impl Default for KeyringSecretStore {
    fn default() -> Self {
        Self::new("mediasort")
    }
}

impl SecretStore for KeyringSecretStore {
    fn load_secret(&self, account: &str) -> Result<Option<String>, StoreError> {
        match self.entry(account)?.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(StoreError::Secret(e.to_string())),
        }
    }

    fn store_secret(&self, account: &str, secret: &str) -> Result<(), StoreError> {
        self.entry(account)?
            .set_password(secret)
            .map_err(|e| StoreError::Secret(e.to_string()))
    }

    fn clear_secret(&self, account: &str) -> Result<(), StoreError> {
        match self.entry(account)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(StoreError::Secret(e.to_string())),
        }
    }
}

/// Process-local secret store.
#[derive(Default)]
pub struct MemorySecretStore {
    secrets: Mutex<HashMap<String, String>>,
}

impl SecretStore for MemorySecretStore {
    fn load_secret(&self, account: &str) -> Result<Option<String>, StoreError> {
        Ok(self.secrets.lock_ignore_poison().get(account).cloned())
    }

    fn store_secret(&self, account: &str, secret: &str) -> Result<(), StoreError> {
        self.secrets
            .lock_ignore_poison()
            .insert(account.to_string(), secret.to_string());
        Ok(())
    }

    fn clear_secret(&self, account: &str) -> Result<(), StoreError> {
        self.secrets.lock_ignore_poison().remove(account);
        Ok(())
    }
}

// ============================================================================
// Last-used connection
// ============================================================================

/// Connection parameters remembered between sessions. The secret is kept in a [`SecretStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastConnection {
    pub address: String,
    pub username: String,
    pub base_path: String,
}

impl LastConnection {
    /// Secret store account name.
    pub fn account(&self) -> String {
        format!("{}@{}", self.username, self.address.to_lowercase())
    }

    /// Builds credentials from the secret store. A missing secret yields an empty one.
    pub fn credentials(&self, secrets: &dyn SecretStore) -> Result<Credentials, StoreError> {
        let secret = secrets.load_secret(&self.account())?.unwrap_or_default();
        Ok(Credentials::new(self.username.clone(), secret))
    }

    /// Remembers the connection and its secret.
    pub fn remember(&self, dir: &Path, secret: &str, secrets: &dyn SecretStore) -> Result<(), StoreError> {
        secrets.store_secret(&self.account(), secret)?;
        save_last_connection(dir, self)
    }
}

pub fn load_last_connection(dir: &Path) -> Option<LastConnection> {
    let path = dir.join(LAST_CONNECTION_FILE_NAME);
    let content = fs::read_to_string(&path).ok()?;
    match serde_json::from_str(&content) {
        Ok(last) => Some(last),
        Err(e) => {
            warn!("Ignoring unreadable {}: {}", path.display(), e);
            None
        }
    }
}

pub fn save_last_connection(dir: &Path, last: &LastConnection) -> Result<(), StoreError> {
    fs::create_dir_all(dir)?;
    fs::write(dir.join(LAST_CONNECTION_FILE_NAME), serde_json::to_string_pretty(last)?)?;
    Ok(())
}
