//! Remote-share and local-storage media transfer engine.
//!
//! The engine lists media on a network share or on device storage, streams and downloads file
//! bytes, validates headers before decoding, and copies, moves or deletes files with conflict
//! handling. Presentation (views, dialogs, settings screens) lives elsewhere and talks to
//! [`orchestrator::TransferOrchestrator`].

// Catch dead code and stale imports early
#![warn(unused)]
// Warn on unused dependencies to catch feature-gate mismatches
#![warn(unused_crate_dependencies)]
// Warn on redundant path prefixes (e.g., std::path::Path when Path is imported)
#![warn(unused_qualifications)]
// Use log::* macros instead of println!/eprintln! for proper log level control
#![deny(clippy::print_stdout, clippy::print_stderr)]

//noinspection RsUnusedImport
// env_logger is initialized by the probe binary, not by the library
use env_logger as _;

pub mod backend;
pub mod config;
pub mod destinations;
pub mod error;
pub mod ignore_poison;
pub mod local;
pub mod media;
pub mod model;
pub mod network;
pub mod orchestrator;
pub mod store;

pub use backend::MediaBackend;
pub use config::CoreSettings;
pub use error::{CoreError, StoreError, StreamError, TransportError};
pub use model::{
    ConnectionDescriptor, ConnectionKind, Credentials, DescriptorId, FileInfo, ListingResult, MediaFileHandle,
    SortDestination, TransferOutcome, ValidationResult,
};
pub use orchestrator::{Direction, TransferOrchestrator};
pub use tokio_util::sync::CancellationToken;

#[cfg(test)]
mod orchestrator_test;
