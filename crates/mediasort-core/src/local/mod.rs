//! Device-local media: user-granted folders and the OS media index.

pub mod client;
pub mod confirmation;
pub mod locator;
pub mod media_index;

pub use client::{LocalSource, LocalStorageClient, ScanObserver, ScanOptions};
pub use confirmation::{ConfirmationBroker, ConfirmationRequest, DeleteResolution, PendingConfirmation};
pub use locator::LocalLocator;
pub use media_index::{FsMediaIndex, IndexDeletion, IndexEntry, MediaIndex};
