//! Error types shared across the engine.
//!
//! `TransportError` is what a protocol session or platform index reports. Clients never let it
//! escape: they convert it into a [`TransferOutcome`](crate::model::TransferOutcome), an empty
//! listing, `None`/`false`, or a [`CoreError`] for the orchestrator.

use serde::{Deserialize, Serialize};

use crate::model::ValidationResult;

// ============================================================================
// Transport errors
// ============================================================================

/// Errors reported by a share session, a local media index, or the local filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "message")]
pub enum TransportError {
    NotFound(String),
    AlreadyExists(String),
    PermissionDenied(String),
    NotADirectory(String),
    /// Host unreachable, connection reset, or authentication rejected.
    ConnectionFailed(String),
    Timeout(String),
    Protocol(String),
    Io(String),
}

impl TransportError {
    pub fn message(&self) -> &str {
        match self {
            Self::NotFound(msg)
            | Self::AlreadyExists(msg)
            | Self::PermissionDenied(msg)
            | Self::NotADirectory(msg)
            | Self::ConnectionFailed(msg)
            | Self::Timeout(msg)
            | Self::Protocol(msg)
            | Self::Io(msg) => msg,
        }
    }

    /// True when the session itself is probably gone and should be re-established.
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, Self::ConnectionFailed(_) | Self::Timeout(_))
    }
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(msg) => write!(f, "Not found: {}", msg),
            Self::AlreadyExists(msg) => write!(f, "Already exists: {}", msg),
            Self::PermissionDenied(msg) => write!(f, "Permission denied: {}", msg),
            Self::NotADirectory(msg) => write!(f, "Not a directory: {}", msg),
            Self::ConnectionFailed(msg) => write!(f, "Connection failed: {}", msg),
            Self::Timeout(msg) => write!(f, "Timeout: {}", msg),
            Self::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(err.to_string()),
            std::io::ErrorKind::AlreadyExists => Self::AlreadyExists(err.to_string()),
            std::io::ErrorKind::NotADirectory => Self::NotADirectory(err.to_string()),
            std::io::ErrorKind::TimedOut => Self::Timeout(err.to_string()),
            std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe => Self::ConnectionFailed(err.to_string()),
            _ => Self::Io(err.to_string()),
        }
    }
}

/// Classifies an error string from the wire library into a `TransportError`.
///
/// The protocol library reports NT status codes inside its messages, so matching on both the
/// status text and the hex code covers servers that only send one of them.
pub fn classify_transport_error(err: &str) -> TransportError {
    let lower = err.to_lowercase();

    if lower.contains("timeout") || lower.contains("timed out") {
        TransportError::Timeout(err.to_string())
    } else if lower.contains("logon failure")
        || lower.contains("0xc000006d")
        || lower.contains("no route")
        || lower.contains("unreachable")
        || lower.contains("connection refused")
        || lower.contains("connection reset")
        || lower.contains("broken pipe")
    {
        TransportError::ConnectionFailed(err.to_string())
    } else if lower.contains("name collision") || lower.contains("0xc0000035") || lower.contains("already exists") {
        TransportError::AlreadyExists(err.to_string())
    } else if lower.contains("not a directory") || lower.contains("0xc0000103") {
        TransportError::NotADirectory(err.to_string())
    } else if lower.contains("not found")
        || lower.contains("0xc0000034") // STATUS_OBJECT_NAME_NOT_FOUND
        || lower.contains("0xc000003a") // STATUS_OBJECT_PATH_NOT_FOUND
        || lower.contains("0xc00000cc") // STATUS_BAD_NETWORK_NAME
        || lower.contains("no such file")
    {
        TransportError::NotFound(err.to_string())
    } else if lower.contains("access denied") || lower.contains("0xc0000022") || lower.contains("read-only") {
        TransportError::PermissionDenied(err.to_string())
    } else {
        TransportError::Protocol(err.to_string())
    }
}

// ============================================================================
// Core errors (what the orchestrator surfaces)
// ============================================================================

/// Errors surfaced by the orchestrator to the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoreError {
    /// Authentication or network failure. Recoverable by retrying or re-entering credentials.
    ConnectionFailure { message: String },
    NotFound { locator: String },
    PermissionDenied { message: String },
    AlreadyExists { name: String },
    SameLocation { path: String },
    /// The copy landed but the source could not be removed.
    DeleteError { message: String },
    /// Corrupt media detected before decode.
    ValidationFailure { result: ValidationResult },
    /// The user navigated away. Never shown.
    Cancelled,
    /// No file is selected because the listing is empty.
    EmptyListing,
    UnknownError { message: String },
}

impl CoreError {
    /// Whether the error should be dropped without telling the user.
    pub fn is_silent(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns a user-facing message, including a remediation hint where there is one.
    pub fn user_message(&self) -> String {
        match self {
            Self::ConnectionFailure { message } => {
                format!("Couldn't reach the share ({}). Check the address and credentials, then try again.", message)
            }
            Self::NotFound { locator } => format!("\"{}\" no longer exists. It may have been moved or deleted.", locator),
            Self::PermissionDenied { message } => {
                format!("{}. Grant write access to the folder or pick another destination.", message)
            }
            Self::AlreadyExists { name } => format!("\"{}\" already exists at the destination.", name),
            Self::SameLocation { path } => format!("\"{}\" is already in this folder.", path),
            Self::DeleteError { message } => format!("Copied, but the original couldn't be removed: {}", message),
            Self::ValidationFailure { result } => {
                let details = result.error_details.as_deref().unwrap_or("the file header is damaged");
                match &result.recommendation {
                    Some(hint) => format!("This file looks corrupt: {}. {}", details, hint),
                    None => format!("This file looks corrupt: {}.", details),
                }
            }
            Self::Cancelled => "Operation was cancelled.".to_string(),
            Self::EmptyListing => "There are no media files in this folder.".to_string(),
            Self::UnknownError { message } => format!("An error occurred: {}", message),
        }
    }
}

impl std::fmt::Display for CoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionFailure { message } => write!(f, "Connection failure: {}", message),
            Self::NotFound { locator } => write!(f, "Not found: {}", locator),
            Self::PermissionDenied { message } => write!(f, "Permission denied: {}", message),
            Self::AlreadyExists { name } => write!(f, "Already exists: {}", name),
            Self::SameLocation { path } => write!(f, "Same location: {}", path),
            Self::DeleteError { message } => write!(f, "Delete failed after copy: {}", message),
            Self::ValidationFailure { result } => write!(
                f,
                "Validation failed: {}",
                result.error_details.as_deref().unwrap_or("invalid media header")
            ),
            Self::Cancelled => write!(f, "Cancelled"),
            Self::EmptyListing => write!(f, "Listing is empty"),
            Self::UnknownError { message } => write!(f, "Unknown error: {}", message),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<TransportError> for CoreError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::NotFound(locator) => Self::NotFound { locator },
            TransportError::AlreadyExists(name) => Self::AlreadyExists { name },
            TransportError::PermissionDenied(message) => Self::PermissionDenied { message },
            TransportError::ConnectionFailed(message) | TransportError::Timeout(message) => {
                Self::ConnectionFailure { message }
            }
            TransportError::NotADirectory(message) | TransportError::Protocol(message) | TransportError::Io(message) => {
                Self::UnknownError { message }
            }
        }
    }
}

// ============================================================================
// Range stream errors
// ============================================================================

/// Errors from the range-streaming adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// `read` was called without a successful `open`.
    NotOpen,
    NotFound(String),
    Io(String),
}

impl std::fmt::Display for StreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotOpen => write!(f, "Stream is not open"),
            Self::NotFound(locator) => write!(f, "File not found: {}", locator),
            Self::Io(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for StreamError {}

impl From<TransportError> for StreamError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::NotFound(locator) => Self::NotFound(locator),
            other => Self::Io(other.to_string()),
        }
    }
}

// ============================================================================
// Store and descriptor errors
// ============================================================================

/// Errors from the record store, the secret store, and settings persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    Io(String),
    Serialization(String),
    NotFound(String),
    /// Built-in local buckets are never written to the record store.
    NotPersistable(String),
    RankOutOfRange { rank: u8, len: usize },
    TooManyDestinations { max: usize },
    Secret(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(msg) => write!(f, "Store I/O error: {}", msg),
            Self::Serialization(msg) => write!(f, "Store serialization error: {}", msg),
            Self::NotFound(id) => write!(f, "Record not found: {}", id),
            Self::NotPersistable(id) => write!(f, "Record can't be persisted: {}", id),
            Self::RankOutOfRange { rank, len } => write!(f, "Rank {} is out of range for {} destinations", rank, len),
            Self::TooManyDestinations { max } => write!(f, "At most {} sort destinations are allowed", max),
            Self::Secret(msg) => write!(f, "Secret store error: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// A `ConnectionDescriptor` that breaks its kind's invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorError {
    MissingAddress,
    MissingBasePath,
    /// A local descriptor with neither a bucket name nor a directory handle.
    MissingLocalSource,
}

impl std::fmt::Display for DescriptorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingAddress => write!(f, "Network share descriptor has no address"),
            Self::MissingBasePath => write!(f, "Network share descriptor has no base path"),
            Self::MissingLocalSource => write!(f, "Local descriptor has neither a bucket nor a folder"),
        }
    }
}

impl std::error::Error for DescriptorError {}
