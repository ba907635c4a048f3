//! Hand-off between deletes that need the user's consent and whoever shows the prompt.
//!
//! Only one confirmation is outstanding at a time. A second delete waits in [`ConfirmationBroker::begin`]
//! until the first is resolved.

use log::{debug, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, broadcast, oneshot};

use crate::ignore_poison::IgnorePoison;
use crate::model::{ConfirmationToken, TransferOutcome};

const CHANNEL_CAPACITY: usize = 16;

/// A delete waiting for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationRequest {
    pub token: ConfirmationToken,
    pub locator: String,
}

/// How a confirmed (or declined) delete ended.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteResolution {
    pub token: ConfirmationToken,
    pub locator: String,
    pub outcome: TransferOutcome,
}

struct Pending {
    token: ConfirmationToken,
    reply: oneshot::Sender<bool>,
}

/// Held by the task that owns the outstanding confirmation. Dropping it lets the next one start.
pub struct PendingConfirmation {
    pub token: ConfirmationToken,
    pub locator: String,
    reply: oneshot::Receiver<bool>,
    _permit: Option<OwnedSemaphorePermit>,
}

impl PendingConfirmation {
    /// Waits for the user's answer. A dropped broker counts as a refusal.
    pub async fn granted(&mut self) -> bool {
        (&mut self.reply).await.unwrap_or(false)
    }
}

pub struct ConfirmationBroker {
    gate: Arc<Semaphore>,
    next_token: AtomicU64,
    pending: Mutex<Option<Pending>>,
    requests: broadcast::Sender<ConfirmationRequest>,
    resolutions: broadcast::Sender<DeleteResolution>,
}

impl ConfirmationBroker {
    pub fn new() -> Self {
        let (requests, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (resolutions, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            gate: Arc::new(Semaphore::new(1)),
            next_token: AtomicU64::new(1),
            pending: Mutex::new(None),
            requests,
            resolutions,
        }
    }

    /// Registers a confirmation for `locator`, waiting for any outstanding one to resolve first.
    pub async fn begin(&self, locator: &str) -> PendingConfirmation {
        // Only fails once closed, and the gate never is
        let permit = self.gate.clone().acquire_owned().await.ok();
        let token = ConfirmationToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        *self.pending.lock_ignore_poison() = Some(Pending { token, reply: tx });

        debug!("Delete of {} needs confirmation (token {})", locator, token.0);
        if self
            .requests
            .send(ConfirmationRequest {
                token,
                locator: locator.to_string(),
            })
            .is_err()
        {
            warn!("Nobody is listening for delete confirmations, {} will wait", locator);
        }

        PendingConfirmation {
            token,
            locator: locator.to_string(),
            reply: rx,
            _permit: permit,
        }
    }

    /// Delivers the user's answer. Returns false if `token` isn't the outstanding confirmation.
    pub fn resolve(&self, token: ConfirmationToken, granted: bool) -> bool {
        let mut pending = self.pending.lock_ignore_poison();
        match pending.take() {
            Some(p) if p.token == token => {
                debug!("Confirmation {} resolved: granted={}", token.0, granted);
                // The waiter may have gone away; nothing to do then
                let _ = p.reply.send(granted);
                true
            }
            other => {
                *pending = other;
                false
            }
        }
    }

    /// The token waiting for an answer, if any.
    pub fn outstanding(&self) -> Option<ConfirmationToken> {
        self.pending.lock_ignore_poison().as_ref().map(|p| p.token)
    }

    pub fn subscribe_requests(&self) -> broadcast::Receiver<ConfirmationRequest> {
        self.requests.subscribe()
    }

    pub fn subscribe_resolutions(&self) -> broadcast::Receiver<DeleteResolution> {
        self.resolutions.subscribe()
    }

    pub(crate) fn publish(&self, resolution: DeleteResolution) {
        if self.resolutions.send(resolution).is_err() {
            debug!("No subscribers for delete resolutions");
        }
    }
}

impl Default for ConfirmationBroker {
    fn default() -> Self {
        Self::new()
    }
}
