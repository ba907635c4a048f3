//! Locators for local media: `file://<path>` and `media://<bucket>/<id>`.

use std::fmt;
use std::path::PathBuf;

use crate::error::TransportError;

const FILE_SCHEME: &str = "file://";
const MEDIA_SCHEME: &str = "media://";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LocalLocator {
    /// A file in a user-granted folder.
    File(PathBuf),
    /// An entry of the OS media index.
    Indexed { bucket: String, id: u64 },
}

impl LocalLocator {
    pub fn parse(locator: &str) -> Result<Self, TransportError> {
        if let Some(path) = locator.strip_prefix(FILE_SCHEME) {
            if path.is_empty() {
                return Err(TransportError::Protocol(format!("Empty file locator: {}", locator)));
            }
            return Ok(Self::File(PathBuf::from(path)));
        }
        if let Some(rest) = locator.strip_prefix(MEDIA_SCHEME) {
            let (bucket, id) = rest
                .rsplit_once('/')
                .ok_or_else(|| TransportError::Protocol(format!("Media locator has no id: {}", locator)))?;
            let id = id
                .parse()
                .map_err(|_| TransportError::Protocol(format!("Bad media id in {}", locator)))?;
            if bucket.is_empty() {
                return Err(TransportError::Protocol(format!("Media locator has no bucket: {}", locator)));
            }
            return Ok(Self::Indexed {
                bucket: bucket.to_string(),
                id,
            });
        }
        Err(TransportError::Protocol(format!("Not a local locator: {}", locator)))
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }

    pub fn indexed(bucket: impl Into<String>, id: u64) -> Self {
        Self::Indexed {
            bucket: bucket.into(),
            id,
        }
    }
}

impl fmt::Display for LocalLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}{}", FILE_SCHEME, path.display()),
            Self::Indexed { bucket, id } => write!(f, "{}{}/{}", MEDIA_SCHEME, bucket, id),
        }
    }
}
