//! `server/share/path` triples and their `smb://` locators.

use std::fmt;

use crate::error::TransportError;

const SCHEME: &str = "smb://";

/// A location on a share. `path` is relative to the share root, `/`-separated, with no leading
/// or trailing slash. An empty `path` is the share root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SharePath {
    pub server: String,
    pub share: String,
    pub path: String,
}

impl SharePath {
    /// Parses `smb://server/share/dir/file.jpg`.
    pub fn from_locator(locator: &str) -> Result<Self, TransportError> {
        let rest = locator
            .strip_prefix(SCHEME)
            .ok_or_else(|| TransportError::Protocol(format!("Not an smb:// locator: {}", locator)))?;
        let (server, share_and_path) = rest
            .split_once('/')
            .ok_or_else(|| TransportError::Protocol(format!("Locator has no share: {}", locator)))?;
        Self::from_address_and_path(server, share_and_path)
    }

    /// Builds a path from a server address and a `share/dir/...` path.
    pub fn from_address_and_path(address: &str, path: &str) -> Result<Self, TransportError> {
        let server = address.trim().trim_start_matches(SCHEME).trim_matches('/');
        if server.is_empty() {
            return Err(TransportError::Protocol("Empty server address".to_string()));
        }
        let normalized = normalize(path);
        let (share, path) = match normalized.split_once('/') {
            Some((share, rest)) => (share.to_string(), rest.to_string()),
            None => (normalized, String::new()),
        };
        if share.is_empty() {
            return Err(TransportError::Protocol(format!("No share name in path for {}", server)));
        }
        Ok(Self {
            server: server.to_string(),
            share,
            path,
        })
    }

    pub fn to_locator(&self) -> String {
        if self.path.is_empty() {
            format!("{}{}/{}", SCHEME, self.server, self.share)
        } else {
            format!("{}{}/{}/{}", SCHEME, self.server, self.share, self.path)
        }
    }

    /// `\\server\share\dir\file`, as the wire library expects it.
    pub fn to_unc(&self) -> String {
        let mut unc = format!(r"\\{}\{}", self.server, self.share);
        if !self.path.is_empty() {
            unc.push('\\');
            unc.push_str(&self.path.replace('/', "\\"));
        }
        unc
    }

    pub fn join(&self, name: &str) -> Self {
        let name = name.trim_matches('/');
        let path = if self.path.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.path, name)
        };
        Self {
            server: self.server.clone(),
            share: self.share.clone(),
            path,
        }
    }

    /// The containing directory. The share root is its own parent.
    pub fn parent(&self) -> Self {
        let path = match self.path.rsplit_once('/') {
            Some((parent, _)) => parent.to_string(),
            None => String::new(),
        };
        Self {
            server: self.server.clone(),
            share: self.share.clone(),
            path,
        }
    }

    pub fn file_name(&self) -> &str {
        match self.path.rsplit_once('/') {
            Some((_, name)) => name,
            None => &self.path,
        }
    }

    /// Whether `self` and `other` are on the same server and share. Both names compare
    /// case-insensitively, as SMB does.
    pub fn same_share(&self, other: &SharePath) -> bool {
        self.server.eq_ignore_ascii_case(&other.server) && self.share.eq_ignore_ascii_case(&other.share)
    }

    /// Whether the file at `self` already lives in directory `dir`.
    pub fn is_in_directory(&self, dir: &SharePath) -> bool {
        self.same_share(dir) && self.parent().path.eq_ignore_ascii_case(&dir.path)
    }
}

impl fmt::Display for SharePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_locator())
    }
}

fn normalize(path: &str) -> String {
    path.replace('\\', "/")
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}
