//! Backend dispatch by `ConnectionDescriptor::kind`.
//!
//! One tagged enum instead of a trait object: the orchestrator matches on the variant, and
//! each arm calls the concrete client.

use log::{debug, warn};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::{CoreError, DescriptorError, TransportError};
use crate::local::client::{LocalSource, LocalStorageClient, ScanOptions};
use crate::local::media_index::MediaIndex;
use crate::model::{ConnectionDescriptor, ConnectionKind, FileInfo, ListingResult, TransferOutcome};
use crate::network::smb_client::{RemoteShareClient, ShareTarget};
use crate::network::transport::ShareTransport;

/// A source bound to the client that serves it.
pub enum MediaBackend<T: ShareTransport, I: MediaIndex> {
    RemoteShare {
        client: Arc<RemoteShareClient<T>>,
        target: ShareTarget,
    },
    Local {
        client: Arc<LocalStorageClient<I>>,
        source: LocalSource,
    },
}

// Manual impl: deriving would demand `T: Clone` and `I: Clone`
impl<T: ShareTransport, I: MediaIndex> Clone for MediaBackend<T, I> {
    fn clone(&self) -> Self {
        match self {
            Self::RemoteShare { client, target } => Self::RemoteShare {
                client: Arc::clone(client),
                target: target.clone(),
            },
            Self::Local { client, source } => Self::Local {
                client: Arc::clone(client),
                source: source.clone(),
            },
        }
    }
}

impl<T: ShareTransport, I: MediaIndex> MediaBackend<T, I> {
    /// Picks the backend for `descriptor` after checking its kind's invariant.
    pub fn for_descriptor(
        descriptor: &ConnectionDescriptor,
        remote: &Arc<RemoteShareClient<T>>,
        local: &Arc<LocalStorageClient<I>>,
    ) -> Result<Self, DescriptorError> {
        descriptor.validate()?;
        match descriptor.kind {
            ConnectionKind::RemoteShare => Ok(Self::RemoteShare {
                client: Arc::clone(remote),
                target: ShareTarget::from_descriptor(descriptor),
            }),
            ConnectionKind::LocalStandard | ConnectionKind::LocalCustom => {
                let source = LocalSource::from_descriptor(descriptor).ok_or(DescriptorError::MissingLocalSource)?;
                Ok(Self::Local {
                    client: Arc::clone(local),
                    source,
                })
            }
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Self::RemoteShare { .. })
    }

    /// Opens the browse session for remote sources. Local sources are always reachable.
    pub async fn connect(&self) -> bool {
        match self {
            Self::RemoteShare { client, target } => {
                let (username, secret) = match &target.credentials {
                    Some(c) if !c.is_guest() => (c.username.as_str(), c.secret.as_str()),
                    _ => ("", ""),
                };
                client.connect(&target.address, username, secret).await
            }
            Self::Local { .. } => true,
        }
    }

    /// Lists the source. `Err` only for cancellation.
    pub async fn list(&self, cancel: &CancellationToken) -> Result<ListingResult, CoreError> {
        match self {
            Self::RemoteShare { client, target } => {
                let settings = client.settings();
                let listing = client
                    .list_media_files(
                        &target.address,
                        &target.path,
                        settings.include_video,
                        settings.max_video_size_mb,
                        settings.max_results,
                    )
                    .await;
                if cancel.is_cancelled() {
                    return Err(CoreError::Cancelled);
                }
                Ok(listing)
            }
            Self::Local { client, source } => {
                let options = ScanOptions::from_settings(client.settings());
                client.list_media_files(source, &options, &(), cancel).await
            }
        }
    }

    pub async fn download(&self, locator: &str) -> Result<Vec<u8>, TransportError> {
        match self {
            Self::RemoteShare { client, .. } => client.fetch(locator).await,
            Self::Local { client, .. } => client.fetch(locator).await,
        }
    }

    pub async fn file_info(&self, locator: &str) -> Option<FileInfo> {
        match self {
            Self::RemoteShare { client, .. } => client.get_file_info(locator).await,
            Self::Local { client, .. } => client.get_file_info(locator).await,
        }
    }

    pub async fn delete(&self, locator: &str) -> TransferOutcome {
        match self {
            Self::RemoteShare { client, .. } => {
                if client.delete_file(locator).await {
                    TransferOutcome::Success
                } else {
                    TransferOutcome::UnknownError(format!("Couldn't delete {}", locator))
                }
            }
            Self::Local { client, .. } => client.delete_file(locator).await,
        }
    }

    /// Copies to a share folder. Only remote sources can be copied.
    pub async fn copy_to(&self, locator: &str, destination: &ShareTarget, cancel: &CancellationToken) -> TransferOutcome {
        match self {
            Self::RemoteShare { client, .. } => client.copy_file_with_cancel(locator, destination, cancel).await,
            Self::Local { .. } => local_transfer_rejected("copy", locator),
        }
    }

    pub async fn move_to(&self, locator: &str, destination: &ShareTarget, cancel: &CancellationToken) -> TransferOutcome {
        match self {
            Self::RemoteShare { client, .. } => client.move_file_with_cancel(locator, destination, cancel).await,
            Self::Local { .. } => local_transfer_rejected("move", locator),
        }
    }

    /// Releases remote sessions. Safe to call more than once.
    pub async fn disconnect(&self) {
        if let Self::RemoteShare { client, .. } = self {
            debug!("Disconnecting remote backend");
            client.disconnect().await;
        }
    }
}

fn local_transfer_rejected(what: &str, locator: &str) -> TransferOutcome {
    warn!("Refusing to {} {}: transfers only run between shares", what, locator);
    TransferOutcome::SecurityError(format!("Can't {} files from device storage", what))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreSettings;
    use crate::local::media_index::FsMediaIndex;
    use crate::model::Credentials;
    use crate::network::in_memory::InMemoryShare;

    type Backend = MediaBackend<InMemoryShare, FsMediaIndex>;

    fn clients(share: &InMemoryShare) -> (Arc<RemoteShareClient<InMemoryShare>>, Arc<LocalStorageClient<FsMediaIndex>>) {
        (
            Arc::new(RemoteShareClient::new(share.clone(), CoreSettings::default())),
            Arc::new(LocalStorageClient::new(FsMediaIndex::new(), CoreSettings::default())),
        )
    }

    #[test]
    fn picks_backend_by_kind() {
        let share = InMemoryShare::new();
        let (remote, local) = clients(&share);

        let descriptor = ConnectionDescriptor::remote(1, "nas", "Photos", None);
        assert!(Backend::for_descriptor(&descriptor, &remote, &local).unwrap().is_remote());

        let descriptor = ConnectionDescriptor::standard_bucket("Camera");
        assert!(!Backend::for_descriptor(&descriptor, &remote, &local).unwrap().is_remote());

        let descriptor = ConnectionDescriptor::remote(2, "", "Photos", None);
        assert_eq!(
            Backend::for_descriptor(&descriptor, &remote, &local).err(),
            Some(DescriptorError::MissingAddress)
        );
    }

    #[tokio::test]
    async fn remote_backend_uses_descriptor_credentials() {
        let share = InMemoryShare::new();
        share.add_file("smb://nas/Photos/a.jpg", &[0xFF, 0xD8]);
        share.require_credentials("nas", "alice", "pw");
        let (remote, local) = clients(&share);

        let descriptor = ConnectionDescriptor::remote(1, "nas", "Photos", Some(Credentials::new("alice", "pw")));
        let backend = Backend::for_descriptor(&descriptor, &remote, &local).unwrap();
        assert!(backend.connect().await);
        let listing = backend.list(&CancellationToken::new()).await.unwrap();
        assert_eq!(listing.files.len(), 1);
    }

    #[tokio::test]
    async fn local_backend_rejects_transfers() {
        let share = InMemoryShare::new();
        let (remote, local) = clients(&share);
        let dir = tempfile::tempdir().unwrap();
        let descriptor = ConnectionDescriptor::custom_directory(3, dir.path());
        let backend = Backend::for_descriptor(&descriptor, &remote, &local).unwrap();

        let outcome = backend
            .copy_to("file:///tmp/a.jpg", &ShareTarget::new("nas", "Photos"), &CancellationToken::new())
            .await;
        assert!(matches!(outcome, TransferOutcome::SecurityError(_)));
    }
}
