//! Data model shared by the clients, the orchestrator and the record store.

use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

use crate::error::{DescriptorError, TransportError};

// ============================================================================
// Connection descriptors
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionKind {
    RemoteShare,
    LocalStandard,
    LocalCustom,
}

impl ConnectionKind {
    pub fn is_local(self) -> bool {
        !matches!(self, Self::RemoteShare)
    }
}

/// Identity of a descriptor.
///
/// Built-in local buckets are never written to the record store, so they're named instead of
/// numbered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type", content = "value")]
pub enum DescriptorId {
    Persisted(i64),
    StandardBucket(String),
}

impl DescriptorId {
    pub fn is_persisted(&self) -> bool {
        matches!(self, Self::Persisted(_))
    }
}

impl std::fmt::Display for DescriptorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Persisted(id) => write!(f, "#{}", id),
            Self::StandardBucket(name) => write!(f, "bucket:{}", name),
        }
    }
}

/// Username and secret for a share. The secret is never serialized.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub username: String,
    #[serde(skip)]
    pub secret: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
        }
    }

    pub fn guest() -> Self {
        Self::new("Guest", "")
    }

    pub fn is_guest(&self) -> bool {
        self.username.is_empty() || self.username.eq_ignore_ascii_case("guest")
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// How to reach a source or destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDescriptor {
    pub id: DescriptorId,
    pub kind: ConnectionKind,
    /// Server host or IP. Empty for local kinds.
    #[serde(default)]
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
    /// `share/dir/...` for remote shares. Empty for local kinds.
    #[serde(default)]
    pub base_path: String,
    /// OS media-index bucket name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    /// User-granted folder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
}

impl ConnectionDescriptor {
    pub fn remote(
        id: i64,
        address: impl Into<String>,
        base_path: impl Into<String>,
        credentials: Option<Credentials>,
    ) -> Self {
        Self {
            id: DescriptorId::Persisted(id),
            kind: ConnectionKind::RemoteShare,
            address: address.into(),
            credentials,
            base_path: base_path.into(),
            bucket: None,
            directory: None,
        }
    }

    pub fn standard_bucket(bucket: impl Into<String>) -> Self {
        let bucket = bucket.into();
        Self {
            id: DescriptorId::StandardBucket(bucket.clone()),
            kind: ConnectionKind::LocalStandard,
            address: String::new(),
            credentials: None,
            base_path: String::new(),
            bucket: Some(bucket),
            directory: None,
        }
    }

    pub fn custom_directory(id: i64, directory: impl Into<PathBuf>) -> Self {
        Self {
            id: DescriptorId::Persisted(id),
            kind: ConnectionKind::LocalCustom,
            address: String::new(),
            credentials: None,
            base_path: String::new(),
            bucket: None,
            directory: Some(directory.into()),
        }
    }

    /// Checks the per-kind invariant.
    pub fn validate(&self) -> Result<(), DescriptorError> {
        match self.kind {
            ConnectionKind::RemoteShare => {
                if self.address.trim().is_empty() {
                    return Err(DescriptorError::MissingAddress);
                }
                if self.base_path.trim_matches('/').is_empty() {
                    return Err(DescriptorError::MissingBasePath);
                }
                Ok(())
            }
            ConnectionKind::LocalStandard | ConnectionKind::LocalCustom => {
                let has_bucket = self.bucket.as_deref().is_some_and(|b| !b.is_empty());
                if has_bucket || self.directory.is_some() {
                    Ok(())
                } else {
                    Err(DescriptorError::MissingLocalSource)
                }
            }
        }
    }

    /// Whether the descriptor lives only in memory.
    pub fn is_ephemeral(&self) -> bool {
        !self.id.is_persisted()
    }
}

// ============================================================================
// Files and listings
// ============================================================================

/// One media file from a listing. Two handles are equal when their locators are.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFileHandle {
    pub locator: String,
    pub name: String,
    pub size: u64,
    /// Unix timestamp in seconds.
    pub modified_at: Option<i64>,
}

impl PartialEq for MediaFileHandle {
    fn eq(&self, other: &Self) -> bool {
        self.locator == other.locator
    }
}

impl Eq for MediaFileHandle {}

impl Hash for MediaFileHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.locator.hash(state);
    }
}

/// Result of a listing call. `warning_message` is advisory and never makes the listing a failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingResult {
    pub files: Vec<MediaFileHandle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning_message: Option<String>,
}

impl ListingResult {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            files: Vec::new(),
            error_message: Some(message.into()),
            warning_message: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error_message.is_some()
    }
}

/// Summary shown in a file-info panel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub name: String,
    #[serde(rename = "sizeKB")]
    pub size_kb: u64,
    pub modified_date: Option<String>,
}

impl FileInfo {
    pub fn new(name: impl Into<String>, size: u64, modified_at: Option<i64>) -> Self {
        Self {
            name: name.into(),
            size_kb: size.div_ceil(1024),
            modified_date: modified_at.and_then(format_timestamp),
        }
    }
}

fn format_timestamp(secs: i64) -> Option<String> {
    use chrono::TimeZone;
    chrono::Local
        .timestamp_opt(secs, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
}

// ============================================================================
// Sort destinations
// ============================================================================

/// A ranked copy/move target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortDestination {
    pub descriptor: ConnectionDescriptor,
    pub label: String,
    /// Position in `0..MAX_SORT_DESTINATIONS`, contiguous from zero.
    pub rank: u8,
}

impl SortDestination {
    pub fn new(descriptor: ConnectionDescriptor, label: impl Into<String>, rank: u8) -> Self {
        Self {
            descriptor,
            label: label.into(),
            rank,
        }
    }
}

// ============================================================================
// Outcomes
// ============================================================================

/// Correlates a `PendingConfirmation` with its later resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfirmationToken(pub u64);

/// Result of a single copy, move, write or delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "message", rename_all = "snake_case")]
pub enum TransferOutcome {
    Success,
    AlreadyExists,
    SameLocation,
    NetworkError(String),
    SecurityError(String),
    /// The copy landed but the source couldn't be removed. The copy stays.
    DeleteError(String),
    /// Waiting on an out-of-band user grant; the resolution arrives on the confirmation broker.
    PendingConfirmation(ConfirmationToken),
    UnknownError(String),
    Cancelled,
}

impl TransferOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn from_transport_error(err: TransportError) -> Self {
        match err {
            TransportError::AlreadyExists(_) => Self::AlreadyExists,
            TransportError::PermissionDenied(msg) => Self::SecurityError(msg),
            TransportError::ConnectionFailed(msg) | TransportError::Timeout(msg) | TransportError::Protocol(msg) => {
                Self::NetworkError(msg)
            }
            other @ (TransportError::NotFound(_) | TransportError::Io(_) | TransportError::NotADirectory(_)) => {
                Self::UnknownError(other.to_string())
            }
        }
    }
}

// ============================================================================
// Validation
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationErrorType {
    EmptyFile,
    Truncated,
    InvalidSignature,
    SizeMismatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub is_valid: bool,
    pub error_type: Option<ValidationErrorType>,
    pub error_details: Option<String>,
    pub recommendation: Option<String>,
}

impl ValidationResult {
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            error_type: None,
            error_details: None,
            recommendation: None,
        }
    }

    pub fn invalid(error_type: ValidationErrorType, details: impl Into<String>, recommendation: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            error_type: Some(error_type),
            error_details: Some(details.into()),
            recommendation: Some(recommendation.into()),
        }
    }
}
