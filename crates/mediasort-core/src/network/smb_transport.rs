//! SMB2/3 transport on the `smb` crate (smb-rs, pure Rust).
//!
//! One `smb::Client` per session. Shares are tree-connected lazily, the first time a path on
//! them is touched. Library errors are flattened to strings and classified with
//! [`classify_transport_error`], as smb-rs reports NT status codes in its messages.

use futures_util::StreamExt;
use log::debug;
use smb::packets::fscc::{FileAttributes, FileBasicInformation, FileDirectoryInformation, FileDispositionInformation};
use smb::resource::{Directory, File, Resource};
use smb::{Client, ClientConfig, CreateOptions, Dialect as WireDialect, FileAccessMask, FileCreateArgs, UncPath};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use super::share_path::SharePath;
use super::transport::{RangeRead, RangeWrite, RemoteEntry, ShareSession, ShareTransport};
use crate::config::{Dialect, DialectRange};
use crate::error::{TransportError, classify_transport_error};
use crate::ignore_poison::IgnorePoison;
use crate::model::Credentials;

/// Seconds between 1601-01-01 and 1970-01-01.
const FILETIME_UNIX_OFFSET_SECS: i64 = 11_644_473_600;

fn wire_dialect(dialect: Dialect) -> WireDialect {
    match dialect {
        Dialect::Smb202 => WireDialect::Smb0202,
        Dialect::Smb210 => WireDialect::Smb021,
        Dialect::Smb300 => WireDialect::Smb030,
        Dialect::Smb302 => WireDialect::Smb0302,
        Dialect::Smb311 => WireDialect::Smb0311,
    }
}

fn wire_err(context: &str, err: impl std::fmt::Display) -> TransportError {
    classify_transport_error(&format!("{}: {}", context, err))
}

fn unc(path: &SharePath) -> Result<UncPath, TransportError> {
    UncPath::from_str(&path.to_unc()).map_err(|e| wire_err("bad path", e))
}

fn filetime_to_unix(filetime: u64) -> Option<i64> {
    let secs = (filetime / 10_000_000) as i64 - FILETIME_UNIX_OFFSET_SECS;
    (secs > 0).then_some(secs)
}

/// Connects with smb-rs.
#[derive(Debug, Clone, Default)]
pub struct SmbTransport;

impl ShareTransport for SmbTransport {
    type Session = SmbSession;

    async fn connect(
        &self,
        server: &str,
        credentials: &Credentials,
        dialects: DialectRange,
    ) -> Result<SmbSession, TransportError> {
        let mut config = ClientConfig::default();
        // Samba guests often don't sign
        config.connection.allow_unsigned_guest_access = credentials.is_guest();
        config.connection.min_dialect = Some(wire_dialect(dialects.min));
        config.connection.max_dialect = Some(wire_dialect(dialects.max));
        let client = Client::new(config);

        debug!("smb: ipc_connect to {} as {}", server, credentials.username);
        client
            .ipc_connect(server, &credentials.username, credentials.secret.clone())
            .await
            .map_err(|e| wire_err("IPC connect failed", e))?;

        Ok(SmbSession {
            client,
            server: server.to_string(),
            credentials: credentials.clone(),
            connected_shares: Mutex::new(HashSet::new()),
        })
    }
}

pub struct SmbSession {
    client: Client,
    server: String,
    credentials: Credentials,
    connected_shares: Mutex<HashSet<String>>,
}

impl SmbSession {
    async fn ensure_share(&self, path: &SharePath) -> Result<(), TransportError> {
        let share = path.share.to_lowercase();
        if self.connected_shares.lock_ignore_poison().contains(&share) {
            return Ok(());
        }
        let root = SharePath {
            server: self.server.clone(),
            share: path.share.clone(),
            path: String::new(),
        };
        self.client
            .share_connect(&unc(&root)?, &self.credentials.username, self.credentials.secret.clone())
            .await
            .map_err(|e| wire_err("share connect failed", e))?;
        self.connected_shares.lock_ignore_poison().insert(share);
        Ok(())
    }

    async fn open_file(&self, path: &SharePath, access: FileAccessMask) -> Result<File, TransportError> {
        self.ensure_share(path).await?;
        let resource = self
            .client
            .create_file(&unc(path)?, &FileCreateArgs::make_open_existing(access))
            .await
            .map_err(|e| wire_err("open failed", e))?;
        match resource {
            Resource::File(file) => Ok(file),
            _ => Err(TransportError::Io(format!("{} is not a regular file", path))),
        }
    }
}

impl ShareSession for SmbSession {
    type Reader = SmbReader;
    type Writer = SmbWriter;

    async fn list_directory(&self, dir: &SharePath) -> Result<Vec<RemoteEntry>, TransportError> {
        self.ensure_share(dir).await?;
        let resource = self
            .client
            .create_file(
                &unc(dir)?,
                &FileCreateArgs::make_open_existing(FileAccessMask::new().with_generic_read(true)),
            )
            .await
            .map_err(|e| wire_err("open directory failed", e))?;
        let Resource::Directory(directory) = resource else {
            return Err(TransportError::NotADirectory(dir.to_locator()));
        };
        let directory = Arc::new(directory);

        let mut entries = Vec::new();
        {
            let mut stream = Directory::query::<FileDirectoryInformation>(&directory, "*")
                .await
                .map_err(|e| wire_err("query directory failed", e))?;
            while let Some(item) = stream.next().await {
                let info = item.map_err(|e| wire_err("query directory failed", e))?;
                let name = info.file_name.to_string();
                if name == "." || name == ".." {
                    continue;
                }
                entries.push(RemoteEntry {
                    name,
                    is_directory: info.file_attributes.directory(),
                    size: info.end_of_file,
                    modified_at: filetime_to_unix(*info.last_write_time),
                });
            }
        }
        if let Err(e) = directory.close().await {
            debug!("smb: closing {} after listing failed: {}", dir, e);
        }
        Ok(entries)
    }

    async fn stat(&self, path: &SharePath) -> Result<RemoteEntry, TransportError> {
        self.ensure_share(path).await?;
        let resource = self
            .client
            .create_file(
                &unc(path)?,
                &FileCreateArgs::make_open_existing(FileAccessMask::new().with_file_read_attributes(true)),
            )
            .await
            .map_err(|e| wire_err("stat failed", e))?;
        let entry = match resource {
            Resource::File(file) => {
                let size = file.get_len().await.map_err(|e| wire_err("stat failed", e))?;
                let basic = file
                    .query_info::<FileBasicInformation>()
                    .await
                    .map_err(|e| wire_err("stat failed", e))?;
                if let Err(e) = file.close().await {
                    debug!("smb: closing {} after stat failed: {}", path, e);
                }
                RemoteEntry {
                    name: path.file_name().to_string(),
                    is_directory: false,
                    size,
                    modified_at: filetime_to_unix(*basic.last_write_time),
                }
            }
            Resource::Directory(directory) => {
                let modified_at = match directory.query_info::<FileBasicInformation>().await {
                    Ok(basic) => filetime_to_unix(*basic.last_write_time),
                    Err(e) => {
                        debug!("smb: no timestamps for {}: {}", path, e);
                        None
                    }
                };
                if let Err(e) = directory.close().await {
                    debug!("smb: closing {} after stat failed: {}", path, e);
                }
                RemoteEntry {
                    name: path.file_name().to_string(),
                    is_directory: true,
                    size: 0,
                    modified_at,
                }
            }
            _ => RemoteEntry {
                name: path.file_name().to_string(),
                is_directory: true,
                size: 0,
                modified_at: None,
            },
        };
        Ok(entry)
    }

    async fn read_file(&self, path: &SharePath) -> Result<Vec<u8>, TransportError> {
        let mut reader = self.open_reader(path).await?;
        let len = reader.total_len() as usize;
        let mut bytes = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            let n = reader.read_at(filled as u64, &mut bytes[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        bytes.truncate(filled);
        reader.close().await;
        Ok(bytes)
    }

    async fn open_reader(&self, path: &SharePath) -> Result<SmbReader, TransportError> {
        let file = self
            .open_file(path, FileAccessMask::new().with_generic_read(true))
            .await?;
        let len = file.get_len().await.map_err(|e| wire_err("size query failed", e))?;
        Ok(SmbReader { file, len })
    }

    async fn create_new(&self, path: &SharePath) -> Result<SmbWriter, TransportError> {
        self.ensure_share(path).await?;
        let resource = self
            .client
            .create_file(
                &unc(path)?,
                &FileCreateArgs::make_create_new(FileAttributes::new().with_archive(true), CreateOptions::new()),
            )
            .await
            .map_err(|e| wire_err("create failed", e))?;
        let Resource::File(file) = resource else {
            return Err(TransportError::Protocol(format!("{} was created as a directory", path)));
        };
        Ok(SmbWriter { file })
    }

    async fn delete_file(&self, path: &SharePath) -> Result<(), TransportError> {
        let file = self
            .open_file(path, FileAccessMask::new().with_delete(true))
            .await?;
        file.set_info(FileDispositionInformation {
            delete_pending: true.into(),
        })
        .await
        .map_err(|e| wire_err("delete failed", e))?;
        file.close().await.map_err(|e| wire_err("close after delete failed", e))?;
        Ok(())
    }

    async fn close(&self) {
        if let Err(e) = self.client.close().await {
            debug!("smb: close {} failed: {}", self.server, e);
        }
    }
}

pub struct SmbReader {
    file: File,
    len: u64,
}

impl RangeRead for SmbReader {
    fn total_len(&self) -> u64 {
        self.len
    }

    async fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, TransportError> {
        if offset >= self.len || buf.is_empty() {
            return Ok(0);
        }
        self.file
            .read_block(buf, offset, false)
            .await
            .map_err(|e| wire_err("read failed", e))
    }

    async fn close(self) {
        if let Err(e) = self.file.close().await {
            debug!("smb: closing reader failed: {}", e);
        }
    }
}

pub struct SmbWriter {
    file: File,
}

impl RangeWrite for SmbWriter {
    async fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<usize, TransportError> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.file
            .write_block(buf, offset)
            .await
            .map_err(|e| wire_err("write failed", e))
    }

    async fn close(self) -> Result<(), TransportError> {
        self.file.close().await.map_err(|e| wire_err("close after write failed", e))
    }
}
