//! Remote share client.
//!
//! Lists, reads and transfers media on a network share. Every call that touches the network is
//! wrapped in a timeout, and no transport error leaves this module unconverted: callers get a
//! [`TransferOutcome`], a [`ListingResult`] with `error_message` set, `None` or `false`.
//!
//! Two kinds of sessions exist:
//! - the *browse* session, opened by [`RemoteShareClient::connect`] and used for listing,
//!   downloads, streaming and deleting in the source folder
//! - *destination* sessions, one per destination server and username, pooled and each guarded by
//!   an async mutex so a session never carries two transfers at once

use log::{debug, info, warn};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::share_path::SharePath;
use super::transport::{RangeWrite, ShareSession, ShareTransport};
use crate::config::CoreSettings;
use crate::error::TransportError;
use crate::ignore_poison::IgnorePoison;
use crate::media::kind::MediaFilter;
use crate::model::{ConnectionDescriptor, Credentials, FileInfo, ListingResult, MediaFileHandle, TransferOutcome};

/// Hidden file created and removed by [`RemoteShareClient::check_write_permission`].
const WRITE_CHECK_PREFIX: &str = ".mediasort-write-check-";
/// Bytes per write request. Each request gets the full operation timeout.
const WRITE_CHUNK: usize = 1024 * 1024;

/// A destination folder on a share plus the credentials to reach it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareTarget {
    pub address: String,
    /// `share/dir/...`
    pub path: String,
    /// `None` reuses the browse session's credentials when the server matches, else guest.
    pub credentials: Option<Credentials>,
}

impl ShareTarget {
    pub fn new(address: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            path: path.into(),
            credentials: None,
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn from_descriptor(descriptor: &ConnectionDescriptor) -> Self {
        Self {
            address: descriptor.address.clone(),
            path: descriptor.base_path.clone(),
            credentials: descriptor.credentials.clone(),
        }
    }
}

struct BrowseSession<S> {
    server: String,
    credentials: Credentials,
    session: Arc<S>,
}

/// One pooled destination connection. `None` until first use or after a connection loss.
type DestinationSlot<S> = Arc<tokio::sync::Mutex<Option<Arc<S>>>>;

pub struct RemoteShareClient<T: ShareTransport> {
    transport: T,
    settings: CoreSettings,
    browse: tokio::sync::Mutex<Option<BrowseSession<T::Session>>>,
    destinations: Mutex<HashMap<String, DestinationSlot<T::Session>>>,
}

impl<T: ShareTransport> RemoteShareClient<T> {
    pub fn new(transport: T, settings: CoreSettings) -> Self {
        Self {
            transport,
            settings,
            browse: tokio::sync::Mutex::new(None),
            destinations: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &CoreSettings {
        &self.settings
    }

    /// Opens the browse session. Any previous session is closed first.
    ///
    /// Never fails: returns `false` and logs the cause when the server can't be reached or
    /// rejects the credentials.
    pub async fn connect(&self, address: &str, username: &str, secret: &str) -> bool {
        let server = address.trim().trim_start_matches("smb://").trim_matches('/').to_string();
        if server.is_empty() {
            warn!("connect: empty server address");
            return false;
        }

        self.disconnect_browse().await;

        let credentials = if username.is_empty() {
            Credentials::guest()
        } else {
            Credentials::new(username, secret)
        };
        debug!(
            "connect: server={}, user={}, dialects={:?}",
            server,
            credentials.username,
            self.settings.dialects()
        );

        let attempt = self.transport.connect(&server, &credentials, self.settings.dialects());
        match with_timeout(self.settings.connect_timeout(), "connect", attempt).await {
            Ok(session) => {
                info!("Connected to {} as {}", server, credentials.username);
                *self.browse.lock().await = Some(BrowseSession {
                    server,
                    credentials,
                    session: Arc::new(session),
                });
                true
            }
            Err(e) => {
                warn!("Couldn't connect to {}: {}", server, e);
                false
            }
        }
    }

    /// Whether a browse session to `address` is open.
    pub async fn is_connected_to(&self, address: &str) -> bool {
        self.browse
            .lock()
            .await
            .as_ref()
            .is_some_and(|b| b.server.eq_ignore_ascii_case(address.trim()))
    }

    /// Lists media files in one directory, non-recursively, ordered by locator.
    pub async fn list_media_files(
        &self,
        address: &str,
        path: &str,
        include_video: bool,
        max_video_size_mb: u64,
        max_results: usize,
    ) -> ListingResult {
        let dir = match SharePath::from_address_and_path(address, path) {
            Ok(dir) => dir,
            Err(e) => return ListingResult::failed(e.to_string()),
        };
        let session = match self.browse_session(&dir.server).await {
            Ok(session) => session,
            Err(e) => return ListingResult::failed(e.to_string()),
        };

        let entries = match self.timed("list", session.list_directory(&dir)).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Listing {} failed: {}", dir, e);
                return ListingResult::failed(e.to_string());
            }
        };

        let filter = MediaFilter {
            include_video,
            max_video_size_mb,
        };
        let scanned = entries.len();
        let mut files: Vec<MediaFileHandle> = entries
            .into_iter()
            .filter(|e| !e.is_directory && filter.accepts(&e.name, e.size))
            .map(|e| MediaFileHandle {
                locator: dir.join(&e.name).to_locator(),
                name: e.name,
                size: e.size,
                modified_at: e.modified_at,
            })
            .collect();
        files.sort_by(|a, b| a.locator.cmp(&b.locator));

        let mut warning_message = None;
        if files.len() > max_results {
            warning_message = Some(format!(
                "Showing the first {} of {} media files in this folder",
                max_results,
                files.len()
            ));
            files.truncate(max_results);
        }

        debug!("Listed {}: {} media files of {} entries", dir, files.len(), scanned);
        ListingResult {
            files,
            error_message: None,
            warning_message,
        }
    }

    /// Reads a whole file. Returns `None` on any failure.
    pub async fn download_file(&self, locator: &str) -> Option<Vec<u8>> {
        match self.fetch(locator).await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!("Download of {} failed: {}", locator, e);
                None
            }
        }
    }

    /// Like [`download_file`](Self::download_file), keeping the cause of a failure.
    pub(crate) async fn fetch(&self, locator: &str) -> Result<Vec<u8>, TransportError> {
        let path = SharePath::from_locator(locator)?;
        let session = self.browse_session(&path.server).await?;
        self.timed("download", session.read_file(&path)).await
    }

    /// Opens a random-access reader for streaming.
    pub async fn open_range_reader(
        &self,
        locator: &str,
    ) -> Result<<T::Session as ShareSession>::Reader, TransportError> {
        let path = SharePath::from_locator(locator)?;
        let session = self.browse_session(&path.server).await?;
        self.timed("open reader", session.open_reader(&path)).await
    }

    /// Reports whether files can be created in `target`, by creating and removing a hidden
    /// file. Returns `false` if either step fails, including when the file can't be removed.
    pub async fn check_write_permission(&self, target: &ShareTarget) -> bool {
        let dir = match SharePath::from_address_and_path(&target.address, &target.path) {
            Ok(dir) => dir,
            Err(e) => {
                warn!("Write check: bad target {}/{}: {}", target.address, target.path, e);
                return false;
            }
        };
        let marker = dir.join(&format!("{}{}", WRITE_CHECK_PREFIX, uuid::Uuid::new_v4()));

        let result = self
            .with_destination(target, &dir, |session| async move {
                self.write_new_file(&session, &marker, &[]).await?;
                self.timed("remove write check file", session.delete_file(&marker))
                    .await
                    .inspect_err(|e| warn!("Write check file {} was left behind: {}", marker, e))
            })
            .await;

        match result {
            Ok(()) => true,
            Err(e) => {
                debug!("Write check on {} failed: {}", dir, e);
                false
            }
        }
    }

    /// Copies a file into `target`. Never overwrites.
    pub async fn copy_file(&self, locator: &str, target: &ShareTarget) -> TransferOutcome {
        self.copy_file_with_cancel(locator, target, &CancellationToken::new()).await
    }

    /// Like [`copy_file`](Self::copy_file), checking `cancel` between I/O calls. Once the
    /// destination write has started, the copy runs to completion.
    pub async fn copy_file_with_cancel(
        &self,
        locator: &str,
        target: &ShareTarget,
        cancel: &CancellationToken,
    ) -> TransferOutcome {
        let (source, dest_dir) = match resolve_transfer(locator, target) {
            Ok(pair) => pair,
            Err(outcome) => return outcome,
        };
        if source.is_in_directory(&dest_dir) {
            debug!("copy: {} is already in {}", source, dest_dir);
            return TransferOutcome::SameLocation;
        }
        if cancel.is_cancelled() {
            return TransferOutcome::Cancelled;
        }

        let dest_file = dest_dir.join(source.file_name());
        let result = self
            .with_destination(target, &dest_dir, |dest| async move {
                if self.timed("stat destination", dest.stat(&dest_file)).await.is_ok() {
                    return Err(TransportError::AlreadyExists(dest_file.file_name().to_string()));
                }
                if cancel.is_cancelled() {
                    return Ok(TransferOutcome::Cancelled);
                }

                let source_session = self.browse_session(&source.server).await?;
                let bytes = self.timed("read source", source_session.read_file(&source)).await?;
                if cancel.is_cancelled() {
                    return Ok(TransferOutcome::Cancelled);
                }

                self.write_new_file(&dest, &dest_file, &bytes).await?;
                info!("Copied {} to {} ({} bytes)", source, dest_file, bytes.len());
                Ok(TransferOutcome::Success)
            })
            .await;

        result.unwrap_or_else(|e| {
            debug!("copy {} -> {}: {}", locator, dest_dir, e);
            TransferOutcome::from_transport_error(e)
        })
    }

    /// Copies, then deletes the source. If the delete fails the copy stays and the outcome is
    /// `DeleteError`.
    pub async fn move_file(&self, locator: &str, target: &ShareTarget) -> TransferOutcome {
        self.move_file_with_cancel(locator, target, &CancellationToken::new()).await
    }

    pub async fn move_file_with_cancel(
        &self,
        locator: &str,
        target: &ShareTarget,
        cancel: &CancellationToken,
    ) -> TransferOutcome {
        let outcome = self.copy_file_with_cancel(locator, target, cancel).await;
        if !outcome.is_success() {
            return outcome;
        }

        match self.try_delete(locator).await {
            Ok(()) => TransferOutcome::Success,
            Err(e) => {
                warn!("Moved copy of {} landed, but the source couldn't be removed: {}", locator, e);
                TransferOutcome::DeleteError(e.to_string())
            }
        }
    }

    /// Deletes a file through the browse session.
    pub async fn delete_file(&self, locator: &str) -> bool {
        match self.try_delete(locator).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Delete of {} failed: {}", locator, e);
                false
            }
        }
    }

    async fn try_delete(&self, locator: &str) -> Result<(), TransportError> {
        let path = SharePath::from_locator(locator)?;
        let session = self.browse_session(&path.server).await?;
        self.timed("delete", session.delete_file(&path)).await
    }

    /// Writes `bytes` as a new file `name` in `address`/`path`. Never overwrites.
    pub async fn write_file(&self, address: &str, path: &str, name: &str, bytes: &[u8]) -> TransferOutcome {
        let target = ShareTarget::new(address, path);
        let dir = match SharePath::from_address_and_path(address, path) {
            Ok(dir) => dir,
            Err(e) => return TransferOutcome::UnknownError(e.to_string()),
        };
        let file = dir.join(name);

        let result = self
            .with_destination(&target, &dir, |session| async move {
                self.write_new_file(&session, &file, bytes).await
            })
            .await;

        match result {
            Ok(()) => TransferOutcome::Success,
            Err(e) => TransferOutcome::from_transport_error(e),
        }
    }

    pub async fn get_file_info(&self, locator: &str) -> Option<FileInfo> {
        let path = SharePath::from_locator(locator).ok()?;
        let session = self.browse_session(&path.server).await.ok()?;
        match self.timed("stat", session.stat(&path)).await {
            Ok(entry) => Some(FileInfo::new(entry.name, entry.size, entry.modified_at)),
            Err(e) => {
                debug!("get_file_info {}: {}", locator, e);
                None
            }
        }
    }

    /// Releases every session. Safe to call repeatedly and after failures.
    pub async fn disconnect(&self) {
        self.disconnect_browse().await;

        let slots: Vec<_> = self.destinations.lock_ignore_poison().drain().map(|(_, slot)| slot).collect();
        for slot in slots {
            if let Some(session) = slot.lock().await.take() {
                session.close().await;
            }
        }
    }

    async fn disconnect_browse(&self) {
        let previous = self.browse.lock().await.take();
        if let Some(browse) = previous {
            debug!("Closing session to {}", browse.server);
            browse.session.close().await;
        }
    }

    async fn browse_session(&self, server: &str) -> Result<Arc<T::Session>, TransportError> {
        match self.browse.lock().await.as_ref() {
            Some(browse) if browse.server.eq_ignore_ascii_case(server) => Ok(Arc::clone(&browse.session)),
            Some(browse) => Err(TransportError::ConnectionFailed(format!(
                "Connected to {}, not {}",
                browse.server, server
            ))),
            None => Err(TransportError::ConnectionFailed(format!("Not connected to {}", server))),
        }
    }

    async fn credentials_for(&self, target: &ShareTarget, server: &str) -> Credentials {
        if let Some(credentials) = &target.credentials {
            return credentials.clone();
        }
        match self.browse.lock().await.as_ref() {
            Some(browse) if browse.server.eq_ignore_ascii_case(server) => browse.credentials.clone(),
            _ => Credentials::guest(),
        }
    }

    /// Runs `op` on the pooled destination session for `dir`'s server, connecting if needed.
    /// The slot stays locked for the whole operation. A connection loss empties the slot so the
    /// next transfer reconnects.
    async fn with_destination<R, F, Fut>(&self, target: &ShareTarget, dir: &SharePath, op: F) -> Result<R, TransportError>
    where
        F: FnOnce(Arc<T::Session>) -> Fut,
        Fut: Future<Output = Result<R, TransportError>>,
    {
        let credentials = self.credentials_for(target, &dir.server).await;
        let pool_key = format!("{}|{}", dir.server.to_lowercase(), credentials.username);
        let slot = Arc::clone(
            self.destinations
                .lock_ignore_poison()
                .entry(pool_key)
                .or_default(),
        );

        let mut guard = slot.lock().await;
        let session = match guard.as_ref() {
            Some(session) => Arc::clone(session),
            None => {
                debug!("Opening destination session to {}", dir.server);
                let attempt = self.transport.connect(&dir.server, &credentials, self.settings.dialects());
                let session = Arc::new(with_timeout(self.settings.connect_timeout(), "connect destination", attempt).await?);
                *guard = Some(Arc::clone(&session));
                session
            }
        };

        let result = op(session).await;

        if let Err(e) = &result
            && e.is_connection_loss()
            && let Some(session) = guard.take()
        {
            debug!("Dropping destination session to {} after: {}", dir.server, e);
            session.close().await;
        }
        result
    }

    /// Creates `path` and writes `bytes` in [`WRITE_CHUNK`] pieces, each under its own timeout.
    /// Once the file exists, any failure removes it again so no partial file is left behind.
    async fn write_new_file(&self, session: &T::Session, path: &SharePath, bytes: &[u8]) -> Result<(), TransportError> {
        let mut writer = self.timed("create", session.create_new(path)).await?;
        let result = match self.write_chunks(&mut writer, bytes).await {
            Ok(()) => self.timed("close after write", writer.close()).await,
            Err(e) => {
                if let Err(close_err) = self.timed("close after failed write", writer.close()).await {
                    debug!("Closing {} after a failed write: {}", path, close_err);
                }
                Err(e)
            }
        };

        if let Err(e) = &result {
            warn!("Writing {} failed, removing the partial file: {}", path, e);
            if let Err(cleanup) = self.timed("remove partial file", session.delete_file(path)).await {
                warn!("Partial file {} couldn't be removed: {}", path, cleanup);
            }
        }
        result
    }

    async fn write_chunks(
        &self,
        writer: &mut <T::Session as ShareSession>::Writer,
        bytes: &[u8],
    ) -> Result<(), TransportError> {
        let mut offset = 0;
        while offset < bytes.len() {
            let end = (offset + WRITE_CHUNK).min(bytes.len());
            let written = self.timed("write", writer.write_at(offset as u64, &bytes[offset..end])).await?;
            if written == 0 {
                return Err(TransportError::Io(format!("Write stalled at byte {}", offset)));
            }
            offset += written;
        }
        Ok(())
    }

    async fn timed<R>(
        &self,
        what: &str,
        fut: impl Future<Output = Result<R, TransportError>>,
    ) -> Result<R, TransportError> {
        with_timeout(self.settings.operation_timeout(), what, fut).await
    }
}

/// Applies `limit` to a transport call.
pub(crate) async fn with_timeout<R>(
    limit: Duration,
    what: &str,
    fut: impl Future<Output = Result<R, TransportError>>,
) -> Result<R, TransportError> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout(format!(
            "{} timed out after {}s",
            what,
            limit.as_secs_f32()
        ))),
    }
}

fn resolve_transfer(locator: &str, target: &ShareTarget) -> Result<(SharePath, SharePath), TransferOutcome> {
    let source = SharePath::from_locator(locator).map_err(|e| TransferOutcome::UnknownError(e.to_string()))?;
    let dest_dir = SharePath::from_address_and_path(&target.address, &target.path)
        .map_err(|e| TransferOutcome::UnknownError(e.to_string()))?;
    Ok((source, dest_dir))
}
