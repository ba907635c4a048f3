//! The OS media index, as seen by the local storage client.
//!
//! Platforms with a media catalog (Android MediaStore, the Photos library) plug in through
//! [`MediaIndex`]. [`FsMediaIndex`] maps bucket names to plain folders.

use log::debug;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::TransportError;
use crate::ignore_poison::IgnorePoison;

/// One entry of a bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub id: u64,
    pub name: String,
    pub size: u64,
    /// Unix timestamp in seconds.
    pub modified_at: Option<i64>,
}

/// What a delete request turned into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexDeletion {
    Deleted,
    /// The platform wants the user to confirm. Call [`MediaIndex::delete_confirmed`] after a grant.
    NeedsConfirmation,
}

pub trait MediaIndex: Send + Sync + 'static {
    /// Number of entries in `bucket`. Also pins the snapshot that `query_page` pages through.
    fn count(&self, bucket: &str) -> impl Future<Output = Result<usize, TransportError>> + Send;

    fn query_page(
        &self,
        bucket: &str,
        offset: usize,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<IndexEntry>, TransportError>> + Send;

    fn stat(&self, bucket: &str, id: u64) -> impl Future<Output = Result<IndexEntry, TransportError>> + Send;

    fn read(&self, bucket: &str, id: u64) -> impl Future<Output = Result<Vec<u8>, TransportError>> + Send;

    fn request_delete(&self, bucket: &str, id: u64)
    -> impl Future<Output = Result<IndexDeletion, TransportError>> + Send;

    fn delete_confirmed(&self, bucket: &str, id: u64) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Media index over plain folders.
///
/// A file gets an id the first time a count sees it and keeps it for the life of the index, so
/// a locator from an older listing never points at a different file. Ids are never reused.
pub struct FsMediaIndex {
    buckets: HashMap<String, PathBuf>,
    registry: Mutex<HashMap<String, BucketIds>>,
    confirm_deletes: bool,
}

#[derive(Default)]
struct BucketIds {
    /// Indexed by id. Only ever appended to.
    paths: Vec<PathBuf>,
    ids: HashMap<PathBuf, u64>,
    /// Ids of the last count, ordered by path.
    snapshot: Vec<u64>,
}

impl BucketIds {
    fn id_for(&mut self, path: PathBuf) -> u64 {
        if let Some(id) = self.ids.get(&path) {
            return *id;
        }
        let id = self.paths.len() as u64;
        self.paths.push(path.clone());
        self.ids.insert(path, id);
        id
    }
}

impl FsMediaIndex {
    pub fn new() -> Self {
        Self {
            buckets: HashMap::new(),
            registry: Mutex::new(HashMap::new()),
            confirm_deletes: false,
        }
    }

    /// Buckets for the user's standard folders: `Pictures`, `Videos` and `Downloads`.
    pub fn with_standard_buckets() -> Self {
        let mut index = Self::new();
        for (name, dir) in [
            ("Pictures", dirs::picture_dir()),
            ("Videos", dirs::video_dir()),
            ("Downloads", dirs::download_dir()),
        ] {
            if let Some(dir) = dir {
                index.buckets.insert(name.to_string(), dir);
            }
        }
        index
    }

    pub fn with_bucket(mut self, name: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        self.buckets.insert(name.into(), dir.into());
        self
    }

    /// Makes every delete ask for confirmation first, like scoped storage does.
    pub fn confirm_deletes(mut self, confirm: bool) -> Self {
        self.confirm_deletes = confirm;
        self
    }

    pub fn bucket_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.buckets.keys().cloned().collect();
        names.sort();
        names
    }

    fn bucket_dir(&self, bucket: &str) -> Result<&Path, TransportError> {
        self.buckets
            .get(bucket)
            .map(PathBuf::as_path)
            .ok_or_else(|| TransportError::NotFound(format!("No media bucket named {}", bucket)))
    }

    fn path_for(&self, bucket: &str, id: u64) -> Result<PathBuf, TransportError> {
        self.registry
            .lock_ignore_poison()
            .get(bucket)
            .and_then(|ids| ids.paths.get(id as usize))
            .cloned()
            .ok_or_else(|| TransportError::NotFound(format!("media://{}/{}", bucket, id)))
    }

    async fn entry_for(&self, id: u64, path: &Path) -> Result<IndexEntry, TransportError> {
        let metadata = tokio::fs::metadata(path).await?;
        let modified_at = modified_secs(&metadata);
        Ok(IndexEntry {
            id,
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            size: metadata.len(),
            modified_at,
        })
    }
}

/// Modification time as a Unix timestamp, when the platform reports one.
pub(crate) fn modified_secs(metadata: &std::fs::Metadata) -> Option<i64> {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
}

impl Default for FsMediaIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaIndex for FsMediaIndex {
    async fn count(&self, bucket: &str) -> Result<usize, TransportError> {
        let dir = self.bucket_dir(bucket)?;
        let mut reader = tokio::fs::read_dir(dir).await?;
        let mut files = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            if entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
                files.push(entry.path());
            }
        }
        files.sort();
        let count = files.len();
        debug!("Media bucket {} has {} files", bucket, count);

        let mut registry = self.registry.lock_ignore_poison();
        let ids = registry.entry(bucket.to_string()).or_default();
        let snapshot = files.into_iter().map(|path| ids.id_for(path)).collect();
        ids.snapshot = snapshot;
        Ok(count)
    }

    async fn query_page(&self, bucket: &str, offset: usize, limit: usize) -> Result<Vec<IndexEntry>, TransportError> {
        let page: Vec<(u64, PathBuf)> = {
            let registry = self.registry.lock_ignore_poison();
            let ids = registry
                .get(bucket)
                .ok_or_else(|| TransportError::NotFound(format!("Media bucket {} wasn't counted", bucket)))?;
            ids.snapshot
                .iter()
                .skip(offset)
                .take(limit)
                .map(|&id| (id, ids.paths[id as usize].clone()))
                .collect()
        };

        let mut entries = Vec::with_capacity(page.len());
        for (id, path) in page {
            match self.entry_for(id, &path).await {
                Ok(entry) => entries.push(entry),
                // Removed since the snapshot was taken
                Err(TransportError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(entries)
    }

    async fn stat(&self, bucket: &str, id: u64) -> Result<IndexEntry, TransportError> {
        let path = self.path_for(bucket, id)?;
        self.entry_for(id, &path).await
    }

    async fn read(&self, bucket: &str, id: u64) -> Result<Vec<u8>, TransportError> {
        let path = self.path_for(bucket, id)?;
        Ok(tokio::fs::read(&path).await?)
    }

    async fn request_delete(&self, bucket: &str, id: u64) -> Result<IndexDeletion, TransportError> {
        let path = self.path_for(bucket, id)?;
        if self.confirm_deletes {
            if !tokio::fs::try_exists(&path).await? {
                return Err(TransportError::NotFound(path.display().to_string()));
            }
            return Ok(IndexDeletion::NeedsConfirmation);
        }
        tokio::fs::remove_file(&path).await?;
        Ok(IndexDeletion::Deleted)
    }

    async fn delete_confirmed(&self, bucket: &str, id: u64) -> Result<(), TransportError> {
        let path = self.path_for(bucket, id)?;
        tokio::fs::remove_file(&path).await?;
        Ok(())
    }
}
