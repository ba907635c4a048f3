//! Local storage client.
//!
//! Same result shapes as the remote share client, over two lookup modes: a user-granted folder
//! or a bucket of the OS media index. Scans run in batches, report progress after each one,
//! check the cancel token between batches, and yield to the runtime so a folder with thousands
//! of entries never hogs a worker.

use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use super::confirmation::{ConfirmationBroker, DeleteResolution};
use super::locator::LocalLocator;
use super::media_index::{IndexDeletion, MediaIndex, modified_secs};
use crate::config::CoreSettings;
use crate::error::{CoreError, TransportError};
use crate::media::kind::MediaFilter;
use crate::model::{ConnectionDescriptor, FileInfo, ListingResult, MediaFileHandle, TransferOutcome};

/// Where a local listing comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalSource {
    Directory(PathBuf),
    Bucket(String),
}

impl LocalSource {
    /// Picks the lookup mode of a local descriptor. The directory wins when both are set.
    pub fn from_descriptor(descriptor: &ConnectionDescriptor) -> Option<Self> {
        if let Some(dir) = &descriptor.directory {
            return Some(Self::Directory(dir.clone()));
        }
        descriptor
            .bucket
            .as_ref()
            .filter(|b| !b.is_empty())
            .map(|b| Self::Bucket(b.clone()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOptions {
    /// Entries per batch. Smaller batches report and yield more often; larger ones finish sooner.
    pub batch_size: usize,
    pub filter: MediaFilter,
    pub max_results: usize,
}

impl ScanOptions {
    pub fn from_settings(settings: &CoreSettings) -> Self {
        Self {
            batch_size: settings.effective_batch_size(),
            filter: settings.media_filter(),
            max_results: settings.max_results,
        }
    }
}

/// Receives scan progress. Both methods default to doing nothing.
pub trait ScanObserver: Send + Sync {
    /// Called after each batch. `batch` holds the media files accepted from that batch.
    fn on_progress(&self, _scanned: usize, _total: usize, _batch: &[MediaFileHandle]) {}
    fn on_complete(&self, _total: usize, _duration_ms: u64) {}
}

impl ScanObserver for () {}

enum ScanError {
    Cancelled,
    Transport(TransportError),
}

impl From<TransportError> for ScanError {
    fn from(err: TransportError) -> Self {
        Self::Transport(err)
    }
}

impl From<std::io::Error> for ScanError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.into())
    }
}

struct Scan {
    files: Vec<MediaFileHandle>,
    unreadable: usize,
}

pub struct LocalStorageClient<I: MediaIndex> {
    index: Arc<I>,
    broker: Arc<ConfirmationBroker>,
    settings: CoreSettings,
}

impl<I: MediaIndex> LocalStorageClient<I> {
    pub fn new(index: I, settings: CoreSettings) -> Self {
        Self {
            index: Arc::new(index),
            broker: Arc::new(ConfirmationBroker::new()),
            settings,
        }
    }

    pub fn settings(&self) -> &CoreSettings {
        &self.settings
    }

    /// The broker that carries delete confirmations for this client.
    pub fn confirmations(&self) -> &Arc<ConfirmationBroker> {
        &self.broker
    }

    /// Lists media files in `source`, ordered by locator.
    ///
    /// Failures to open the source come back as a listing with `error_message` set. The only
    /// `Err` is [`CoreError::Cancelled`].
    pub async fn list_media_files(
        &self,
        source: &LocalSource,
        options: &ScanOptions,
        observer: &dyn ScanObserver,
        cancel: &CancellationToken,
    ) -> Result<ListingResult, CoreError> {
        let started = Instant::now();
        let batch_size = options.batch_size.max(1);
        let scan = match source {
            LocalSource::Directory(dir) => self.scan_directory(dir, batch_size, &options.filter, observer, cancel).await,
            LocalSource::Bucket(bucket) => self.scan_bucket(bucket, batch_size, &options.filter, observer, cancel).await,
        };

        let Scan { mut files, unreadable } = match scan {
            Ok(scan) => scan,
            Err(ScanError::Cancelled) => {
                debug!("Scan of {:?} cancelled", source);
                return Err(CoreError::Cancelled);
            }
            Err(ScanError::Transport(e)) => {
                warn!("Scan of {:?} failed: {}", source, e);
                return Ok(ListingResult::failed(e.to_string()));
            }
        };

        files.sort_by(|a, b| a.locator.cmp(&b.locator));
        let mut warning_message = None;
        if files.len() > options.max_results {
            warning_message = Some(format!(
                "Showing the first {} of {} media files in this folder",
                options.max_results,
                files.len()
            ));
            files.truncate(options.max_results);
        } else if unreadable > 0 {
            warning_message = Some(format!("{} entries couldn't be read and were skipped", unreadable));
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        info!("Scanned {:?}: {} media files in {} ms", source, files.len(), duration_ms);
        observer.on_complete(files.len(), duration_ms);
        Ok(ListingResult {
            files,
            error_message: None,
            warning_message,
        })
    }

    async fn scan_directory(
        &self,
        dir: &Path,
        batch_size: usize,
        filter: &MediaFilter,
        observer: &dyn ScanObserver,
        cancel: &CancellationToken,
    ) -> Result<Scan, ScanError> {
        let mut reader = tokio::fs::read_dir(dir).await?;
        let mut paths = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            paths.push(entry.path());
            if paths.len() % batch_size == 0 {
                if cancel.is_cancelled() {
                    return Err(ScanError::Cancelled);
                }
                tokio::task::yield_now().await;
            }
        }

        let total = paths.len();
        let mut scan = Scan {
            files: Vec::new(),
            unreadable: 0,
        };
        let mut scanned = 0;
        for chunk in paths.chunks(batch_size) {
            if cancel.is_cancelled() {
                return Err(ScanError::Cancelled);
            }
            let mut batch = Vec::new();
            for path in chunk {
                // A lossy locator would point at a different path
                let Some(utf8_path) = path.to_str() else {
                    warn!("Skipping {}: the name isn't valid UTF-8", path.display());
                    scan.unreadable += 1;
                    continue;
                };
                let metadata = match tokio::fs::metadata(path).await {
                    Ok(metadata) => metadata,
                    Err(e) => {
                        debug!("Skipping {}: {}", path.display(), e);
                        scan.unreadable += 1;
                        continue;
                    }
                };
                if !metadata.is_file() {
                    continue;
                }
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                if !filter.accepts(&name, metadata.len()) {
                    continue;
                }
                batch.push(MediaFileHandle {
                    locator: LocalLocator::file(utf8_path).to_string(),
                    name,
                    size: metadata.len(),
                    modified_at: modified_secs(&metadata),
                });
            }
            scanned += chunk.len();
            observer.on_progress(scanned, total, &batch);
            scan.files.extend(batch);
            tokio::task::yield_now().await;
        }
        Ok(scan)
    }

    async fn scan_bucket(
        &self,
        bucket: &str,
        batch_size: usize,
        filter: &MediaFilter,
        observer: &dyn ScanObserver,
        cancel: &CancellationToken,
    ) -> Result<Scan, ScanError> {
        let total = self.index.count(bucket).await?;
        let mut scan = Scan {
            files: Vec::new(),
            unreadable: 0,
        };
        let mut offset = 0;
        while offset < total {
            if cancel.is_cancelled() {
                return Err(ScanError::Cancelled);
            }
            let page = self.index.query_page(bucket, offset, batch_size).await?;
            let batch: Vec<MediaFileHandle> = page
                .into_iter()
                .filter(|e| filter.accepts(&e.name, e.size))
                .map(|e| MediaFileHandle {
                    locator: LocalLocator::indexed(bucket, e.id).to_string(),
                    name: e.name,
                    size: e.size,
                    modified_at: e.modified_at,
                })
                .collect();
            offset = (offset + batch_size).min(total);
            observer.on_progress(offset, total, &batch);
            scan.files.extend(batch);
            tokio::task::yield_now().await;
        }
        Ok(scan)
    }

    /// Reads a whole file. Returns `None` on any failure.
    pub async fn download_file(&self, locator: &str) -> Option<Vec<u8>> {
        match self.fetch(locator).await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!("Reading {} failed: {}", locator, e);
                None
            }
        }
    }

    pub(crate) async fn fetch(&self, locator: &str) -> Result<Vec<u8>, TransportError> {
        match LocalLocator::parse(locator)? {
            LocalLocator::File(path) => Ok(tokio::fs::read(&path).await?),
            LocalLocator::Indexed { bucket, id } => self.index.read(&bucket, id).await,
        }
    }

    pub async fn get_file_info(&self, locator: &str) -> Option<FileInfo> {
        let result = match LocalLocator::parse(locator) {
            Ok(LocalLocator::File(path)) => tokio::fs::metadata(&path)
                .await
                .map(|m| {
                    let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
                    FileInfo::new(name, m.len(), modified_secs(&m))
                })
                .map_err(TransportError::from),
            Ok(LocalLocator::Indexed { bucket, id }) => self
                .index
                .stat(&bucket, id)
                .await
                .map(|e| FileInfo::new(e.name, e.size, e.modified_at)),
            Err(e) => Err(e),
        };
        result.map_err(|e| debug!("No info for {}: {}", locator, e)).ok()
    }

    /// Deletes a file.
    ///
    /// Media-index entries may need the user's consent. Then this returns
    /// [`TransferOutcome::PendingConfirmation`] and the real outcome arrives later on
    /// [`ConfirmationBroker::subscribe_resolutions`]. A decline resolves as `Cancelled`. While one
    /// confirmation is outstanding, the next delete that needs one waits here.
    pub async fn delete_file(&self, locator: &str) -> TransferOutcome {
        let outcome = match LocalLocator::parse(locator) {
            Ok(LocalLocator::File(path)) => match tokio::fs::remove_file(&path).await {
                Ok(()) => TransferOutcome::Success,
                Err(e) => TransferOutcome::from_transport_error(e.into()),
            },
            Ok(LocalLocator::Indexed { bucket, id }) => self.delete_indexed(locator, &bucket, id).await,
            Err(e) => TransferOutcome::from_transport_error(e),
        };
        debug!("delete {}: {:?}", locator, outcome);
        outcome
    }

    async fn delete_indexed(&self, locator: &str, bucket: &str, id: u64) -> TransferOutcome {
        match self.index.request_delete(bucket, id).await {
            Ok(IndexDeletion::Deleted) => TransferOutcome::Success,
            Ok(IndexDeletion::NeedsConfirmation) => {
                let mut pending = self.broker.begin(locator).await;
                let token = pending.token;
                let index = Arc::clone(&self.index);
                let broker = Arc::clone(&self.broker);
                let bucket = bucket.to_string();
                tokio::spawn(async move {
                    let outcome = if pending.granted().await {
                        match index.delete_confirmed(&bucket, id).await {
                            Ok(()) => TransferOutcome::Success,
                            Err(e) => TransferOutcome::from_transport_error(e),
                        }
                    } else {
                        TransferOutcome::Cancelled
                    };
                    broker.publish(DeleteResolution {
                        token,
                        locator: pending.locator.clone(),
                        outcome,
                    });
                    // Frees the slot for the next confirmation
                    drop(pending);
                });
                TransferOutcome::PendingConfirmation(token)
            }
            Err(e) => TransferOutcome::from_transport_error(e),
        }
    }
}
