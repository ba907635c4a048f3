//! Transfer orchestrator: the browsing cursor over one source, one-ahead preloading, and the
//! copy, move and delete actions on the current file.
//!
//! The state lock is only held for short snapshots and updates, never across I/O. A refresh
//! lists without it and swaps the new listing in afterwards, unless the source changed in the
//! meantime. Loads and transfers snapshot the current entry and update the listing by locator
//! when they finish, so transfers to different destinations can overlap.
//!
//! Preloading keeps a single slot: the bytes of the file after the current one. Navigating
//! aborts an unfinished preload. A finished one stays cached until a different file is
//! preloaded, and only counts as a hit when both its index and locator match.

use log::{debug, info, warn};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backend::MediaBackend;
use crate::config::{CoreSettings, MAX_SORT_DESTINATIONS};
use crate::error::CoreError;
use crate::ignore_poison::IgnorePoison;
use crate::local::client::LocalStorageClient;
use crate::local::media_index::MediaIndex;
use crate::media::validate_bytes;
use crate::model::{ConnectionDescriptor, ConnectionKind, ListingResult, MediaFileHandle, SortDestination, TransferOutcome};
use crate::network::smb_client::{RemoteShareClient, ShareTarget};
use crate::network::transport::ShareTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Next,
    Previous,
}

/// Moves `index` one step in a listing of `len` entries, wrapping at both ends.
fn step(index: usize, len: usize, direction: Direction) -> usize {
    match direction {
        Direction::Next => (index + 1) % len,
        Direction::Previous if index == 0 => len - 1,
        Direction::Previous => index - 1,
    }
}

/// Bytes of the current file, ready to decode.
#[derive(Debug, Clone)]
pub struct LoadedMedia {
    pub file: MediaFileHandle,
    pub bytes: Vec<u8>,
    /// Served from the preload slot instead of a fresh download.
    pub from_preload: bool,
}

struct BrowseState<T: ShareTransport, I: MediaIndex> {
    descriptor: Option<ConnectionDescriptor>,
    backend: Option<MediaBackend<T, I>>,
    listing: Vec<MediaFileHandle>,
    current_index: usize,
    /// Bumped whenever the source changes.
    generation: u64,
}

struct Preloaded {
    index: usize,
    locator: String,
    bytes: Vec<u8>,
}

#[derive(Default)]
struct PreloadSlot {
    cached: Option<Preloaded>,
    task: Option<JoinHandle<()>>,
}

impl PreloadSlot {
    fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

pub struct TransferOrchestrator<T: ShareTransport, I: MediaIndex> {
    remote: Arc<RemoteShareClient<T>>,
    local: Arc<LocalStorageClient<I>>,
    settings: CoreSettings,
    state: tokio::sync::Mutex<BrowseState<T, I>>,
    preload: Arc<Mutex<PreloadSlot>>,
    /// Replaced with a fresh token on every [`cancel`](Self::cancel).
    cancel: Mutex<CancellationToken>,
}

impl<T: ShareTransport, I: MediaIndex> TransferOrchestrator<T, I> {
    pub fn new(transport: T, index: I, settings: CoreSettings) -> Self {
        Self {
            remote: Arc::new(RemoteShareClient::new(transport, settings.clone())),
            local: Arc::new(LocalStorageClient::new(index, settings.clone())),
            settings,
            state: tokio::sync::Mutex::new(BrowseState {
                descriptor: None,
                backend: None,
                listing: Vec::new(),
                current_index: 0,
                generation: 0,
            }),
            preload: Arc::new(Mutex::new(PreloadSlot::default())),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// The remote client, for range streaming and one-off share calls.
    pub fn remote_client(&self) -> &Arc<RemoteShareClient<T>> {
        &self.remote
    }

    /// The local client, whose broker carries delete confirmations.
    pub fn local_client(&self) -> &Arc<LocalStorageClient<I>> {
        &self.local
    }

    fn token(&self) -> CancellationToken {
        self.cancel.lock_ignore_poison().clone()
    }

    // ========================================================================
    // Source and listing
    // ========================================================================

    /// Makes `descriptor` the active source. Clears the listing.
    pub async fn connect(&self, descriptor: ConnectionDescriptor) -> Result<(), CoreError> {
        let backend = MediaBackend::for_descriptor(&descriptor, &self.remote, &self.local)
            .map_err(|e| CoreError::UnknownError { message: e.to_string() })?;

        if !backend.connect().await {
            return Err(CoreError::ConnectionFailure {
                message: format!("Couldn't connect to {}", descriptor.address),
            });
        }
        let mut state = self.state.lock().await;
        info!("Active source is now {} ({:?})", descriptor.id, descriptor.kind);
        state.descriptor = Some(descriptor);
        state.backend = Some(backend);
        state.listing.clear();
        state.current_index = 0;
        state.generation += 1;
        self.clear_preload();
        Ok(())
    }

    pub async fn active_descriptor(&self) -> Option<ConnectionDescriptor> {
        self.state.lock().await.descriptor.clone()
    }

    /// Re-lists the active source and moves the cursor to the first file.
    ///
    /// A listing with `error_message` set becomes an error. A warning doesn't. If the source
    /// changes while listing, the result is dropped and this returns `Cancelled`.
    pub async fn refresh_listing(&self) -> Result<ListingResult, CoreError> {
        let (backend, generation) = {
            let state = self.state.lock().await;
            (state.backend.clone().ok_or_else(not_connected)?, state.generation)
        };

        let mut listing = backend.list(&self.token()).await?;
        if let Some(message) = &listing.error_message {
            warn!("Listing failed: {}", message);
            return Err(CoreError::UnknownError {
                message: message.clone(),
            });
        }
        if let Some(warning) = &listing.warning_message {
            info!("Listing warning: {}", warning);
        }

        listing.files.sort_by(|a, b| a.locator.cmp(&b.locator));
        let mut state = self.state.lock().await;
        if state.generation != generation {
            debug!("Source changed while listing, dropping the result");
            return Err(CoreError::Cancelled);
        }
        state.listing = listing.files.clone();
        state.current_index = 0;
        self.clear_preload();
        debug!("Listing has {} files", state.listing.len());
        Ok(listing)
    }

    pub async fn current(&self) -> Option<MediaFileHandle> {
        let state = self.state.lock().await;
        state.listing.get(state.current_index).cloned()
    }

    /// `None` when the listing is empty.
    pub async fn current_index(&self) -> Option<usize> {
        let state = self.state.lock().await;
        (!state.listing.is_empty()).then_some(state.current_index)
    }

    pub async fn listing(&self) -> Vec<MediaFileHandle> {
        self.state.lock().await.listing.clone()
    }

    // ========================================================================
    // Navigation and loading
    // ========================================================================

    /// Moves the cursor, wrapping at both ends. Does nothing on an empty listing.
    pub async fn advance(&self, direction: Direction) -> Option<MediaFileHandle> {
        let mut state = self.state.lock().await;
        let len = state.listing.len();
        if len == 0 {
            return None;
        }
        self.preload.lock_ignore_poison().abort();
        state.current_index = step(state.current_index, len, direction);
        state.listing.get(state.current_index).cloned()
    }

    /// Returns the current file's bytes, from the preload slot when it holds them.
    ///
    /// Always starts a preload of the following file afterwards, hit or miss. With
    /// `validate_before_display` on, a damaged header fails with `ValidationFailure`.
    pub async fn load_current(&self) -> Result<LoadedMedia, CoreError> {
        let (index, file, next, backend) = {
            let state = self.state.lock().await;
            let backend = state.backend.clone().ok_or_else(not_connected)?;
            let len = state.listing.len();
            let file = state
                .listing
                .get(state.current_index)
                .cloned()
                .ok_or(CoreError::EmptyListing)?;
            let next = (len > 1).then(|| {
                let next_index = step(state.current_index, len, Direction::Next);
                (next_index, state.listing[next_index].clone())
            });
            (state.current_index, file, next, backend)
        };
        let cancel = self.token();

        let (bytes, from_preload) = match self.take_preloaded(index, &file.locator) {
            Some(bytes) => {
                debug!("Preload hit for {}", file.locator);
                (bytes, true)
            }
            None => {
                let fetched = tokio::select! {
                    fetched = backend.download(&file.locator) => fetched,
                    _ = cancel.cancelled() => return Err(CoreError::Cancelled),
                };
                match fetched {
                    Ok(bytes) => (bytes, false),
                    Err(e) => {
                        warn!("Loading {} failed: {}", file.locator, e);
                        self.schedule_preload(backend, next, cancel);
                        return Err(e.into());
                    }
                }
            }
        };
        self.schedule_preload(backend, next, cancel);

        if self.settings.validate_before_display {
            let result = validate_bytes(&file.name, &bytes);
            if !result.is_valid {
                warn!("{} failed validation: {:?}", file.name, result.error_type);
                return Err(CoreError::ValidationFailure { result });
            }
        }
        Ok(LoadedMedia {
            file,
            bytes,
            from_preload,
        })
    }

    fn take_preloaded(&self, index: usize, locator: &str) -> Option<Vec<u8>> {
        let mut slot = self.preload.lock_ignore_poison();
        if slot
            .cached
            .as_ref()
            .is_some_and(|c| c.index == index && c.locator == locator)
        {
            return slot.cached.take().map(|c| c.bytes);
        }
        None
    }

    fn schedule_preload(&self, backend: MediaBackend<T, I>, next: Option<(usize, MediaFileHandle)>, cancel: CancellationToken) {
        if !self.settings.preload_next {
            return;
        }
        let Some((index, file)) = next else {
            return;
        };

        let mut slot = self.preload.lock_ignore_poison();
        if slot
            .cached
            .as_ref()
            .is_some_and(|c| c.index == index && c.locator == file.locator)
        {
            return;
        }
        slot.abort();
        slot.cached = None;

        let preload = Arc::clone(&self.preload);
        slot.task = Some(tokio::spawn(async move {
            if cancel.is_cancelled() {
                return;
            }
            match backend.download(&file.locator).await {
                Ok(bytes) => {
                    debug!("Preloaded {} ({} bytes)", file.locator, bytes.len());
                    preload.lock_ignore_poison().cached = Some(Preloaded {
                        index,
                        locator: file.locator,
                        bytes,
                    });
                }
                // A miss just means the next load downloads
                Err(e) => debug!("Preload of {} missed: {}", file.locator, e),
            }
        }));
    }

    fn clear_preload(&self) {
        let mut slot = self.preload.lock_ignore_poison();
        slot.abort();
        slot.cached = None;
    }

    #[cfg(test)]
    pub(crate) fn preloaded_index(&self) -> Option<usize> {
        self.preload.lock_ignore_poison().cached.as_ref().map(|c| c.index)
    }

    #[cfg(test)]
    pub(crate) fn state_is_locked(&self) -> bool {
        self.state.try_lock().is_err()
    }

    // ========================================================================
    // Transfers
    // ========================================================================

    /// Copies the current file to `destination`, then moves the cursor on.
    pub async fn copy_current_to(&self, destination: &SortDestination) -> Result<TransferOutcome, CoreError> {
        let target = transfer_target(destination)?;
        let (file, backend) = self.snapshot_current().await?;

        let outcome = backend.copy_to(&file.locator, &target, &self.token()).await;
        let result = into_result(outcome, &file, &target);
        if result.is_ok() {
            let mut state = self.state.lock().await;
            if state.listing.get(state.current_index).is_some_and(|f| f.locator == file.locator) {
                self.preload.lock_ignore_poison().abort();
                let len = state.listing.len();
                state.current_index = step(state.current_index, len, Direction::Next);
            }
        }
        result
    }

    /// Moves the current file to `destination` and drops it from the listing.
    pub async fn move_current_to(&self, destination: &SortDestination) -> Result<TransferOutcome, CoreError> {
        let target = transfer_target(destination)?;
        let (file, backend) = self.snapshot_current().await?;

        let outcome = backend.move_to(&file.locator, &target, &self.token()).await;
        let result = into_result(outcome, &file, &target);
        if result.is_ok() {
            self.forget_entry(&file.locator).await;
        }
        result
    }

    /// Deletes the current file and drops it from the listing.
    ///
    /// A delete waiting for the user's consent comes back as `PendingConfirmation` and leaves
    /// the listing alone. Call [`forget_entry`](Self::forget_entry) once it resolves.
    pub async fn delete_current(&self) -> Result<TransferOutcome, CoreError> {
        let (file, backend) = self.snapshot_current().await?;
        if self.token().is_cancelled() {
            return Err(CoreError::Cancelled);
        }

        let outcome = backend.delete(&file.locator).await;
        let result = into_result(outcome, &file, &ShareTarget::new("", ""));
        if matches!(result, Ok(TransferOutcome::Success)) {
            self.forget_entry(&file.locator).await;
        }
        result
    }

    /// Removes `locator` from the listing and clamps the cursor. Returns whether it was there.
    pub async fn forget_entry(&self, locator: &str) -> bool {
        let mut state = self.state.lock().await;
        let Some(position) = state.listing.iter().position(|f| f.locator == locator) else {
            return false;
        };
        state.listing.remove(position);
        if position < state.current_index {
            state.current_index -= 1;
        }
        state.current_index = state.current_index.min(state.listing.len().saturating_sub(1));

        let mut slot = self.preload.lock_ignore_poison();
        if let Some(cached) = slot.cached.as_mut()
            && cached.index > position
        {
            cached.index -= 1;
        }
        if state.listing.is_empty() {
            info!("Listing is now empty");
        }
        true
    }

    async fn snapshot_current(&self) -> Result<(MediaFileHandle, MediaBackend<T, I>), CoreError> {
        let state = self.state.lock().await;
        let backend = state.backend.clone().ok_or_else(not_connected)?;
        let file = state
            .listing
            .get(state.current_index)
            .cloned()
            .ok_or(CoreError::EmptyListing)?;
        Ok((file, backend))
    }

    /// Filters `destinations` down to the ones worth offering: network shares that accept
    /// writes, in rank order, at most [`MAX_SORT_DESTINATIONS`].
    pub async fn eligible_destinations(&self, destinations: &[SortDestination]) -> Vec<SortDestination> {
        let mut candidates: Vec<&SortDestination> = destinations
            .iter()
            .filter(|d| d.descriptor.kind == ConnectionKind::RemoteShare && d.descriptor.validate().is_ok())
            .collect();
        candidates.sort_by_key(|d| d.rank);

        let mut eligible = Vec::new();
        for destination in candidates {
            if eligible.len() == MAX_SORT_DESTINATIONS {
                break;
            }
            let target = ShareTarget::from_descriptor(&destination.descriptor);
            if self.remote.check_write_permission(&target).await {
                eligible.push(destination.clone());
            } else {
                info!("Hiding destination \"{}\": not writable", destination.label);
            }
        }
        eligible
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Cancels the running transfer and any preload. Later calls get a fresh token.
    pub fn cancel(&self) {
        let previous = std::mem::take(&mut *self.cancel.lock_ignore_poison());
        previous.cancel();
        self.preload.lock_ignore_poison().abort();
        debug!("Orchestrator work cancelled");
    }

    /// Cancels work, closes remote sessions and forgets the source.
    pub async fn disconnect(&self) {
        self.cancel();
        let previous = {
            let mut state = self.state.lock().await;
            state.descriptor = None;
            state.listing.clear();
            state.current_index = 0;
            state.generation += 1;
            self.clear_preload();
            state.backend.take()
        };
        if let Some(backend) = previous {
            backend.disconnect().await;
        }
    }
}

impl<T: ShareTransport, I: MediaIndex> Drop for TransferOrchestrator<T, I> {
    fn drop(&mut self) {
        self.cancel.lock_ignore_poison().cancel();
        self.preload.lock_ignore_poison().abort();
    }
}

fn not_connected() -> CoreError {
    CoreError::ConnectionFailure {
        message: "No source is connected".to_string(),
    }
}

/// Copy and move only go to network shares.
fn transfer_target(destination: &SortDestination) -> Result<ShareTarget, CoreError> {
    if destination.descriptor.kind.is_local() {
        return Err(CoreError::PermissionDenied {
            message: format!("\"{}\" is on this device; copy and move only go to network shares", destination.label),
        });
    }
    destination
        .descriptor
        .validate()
        .map_err(|e| CoreError::UnknownError { message: e.to_string() })?;
    Ok(ShareTarget::from_descriptor(&destination.descriptor))
}

/// `Success` and `PendingConfirmation` pass through; everything else becomes a [`CoreError`].
fn into_result(outcome: TransferOutcome, file: &MediaFileHandle, target: &ShareTarget) -> Result<TransferOutcome, CoreError> {
    match outcome {
        TransferOutcome::Success | TransferOutcome::PendingConfirmation(_) => Ok(outcome),
        TransferOutcome::AlreadyExists => Err(CoreError::AlreadyExists {
            name: file.name.clone(),
        }),
        TransferOutcome::SameLocation => Err(CoreError::SameLocation {
            path: target.path.clone(),
        }),
        TransferOutcome::NetworkError(message) => Err(CoreError::ConnectionFailure { message }),
        TransferOutcome::SecurityError(message) => Err(CoreError::PermissionDenied { message }),
        TransferOutcome::DeleteError(message) => Err(CoreError::DeleteError { message }),
        TransferOutcome::UnknownError(message) => Err(CoreError::UnknownError { message }),
        TransferOutcome::Cancelled => Err(CoreError::Cancelled),
    }
}
