//! In-memory share server for tests and demos.
//!
//! Holds any number of servers and shares in one map. Supports fault injection: read-only
//! directories, failing deletes, unreachable hosts, required credentials, slow reads and writes,
//! and a disk that fills up. Written bytes land in the file as they arrive, so a failed write
//! leaves a visible partial file unless the writer's caller removes it.

use log::warn;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use super::share_path::SharePath;
use super::transport::{RangeRead, RangeWrite, RemoteEntry, ShareSession, ShareTransport};
use crate::config::DialectRange;
use crate::error::TransportError;
use crate::ignore_poison::IgnoreRwPoison;
use crate::model::Credentials;

#[derive(Debug, Clone)]
enum Node {
    Directory,
    File {
        data: Arc<Vec<u8>>,
        /// Reported size; may differ from `data.len()` for large fixtures.
        size: u64,
        modified_at: Option<i64>,
    },
}

#[derive(Debug, Default)]
struct ShareState {
    nodes: BTreeMap<String, Node>,
    read_only: HashSet<String>,
    failing_deletes: HashSet<String>,
    /// Directories where every delete fails.
    failing_delete_dirs: HashSet<String>,
    unreachable: HashSet<String>,
    required_credentials: HashMap<String, (String, String)>,
    read_delay: Option<Duration>,
    write_delay: Option<Duration>,
    /// Largest file size a write may produce.
    write_limit: Option<u64>,
}

/// Counts reads in flight and remembers the highest count seen.
#[derive(Debug, Default)]
struct ReadGauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ReadGauge {
    fn enter(self: &Arc<Self>) -> ReadGuard {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        ReadGuard(Arc::clone(self))
    }
}

struct ReadGuard(Arc<ReadGauge>);

impl Drop for ReadGuard {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Key for a path: lowercased server, then share and path as given.
fn key(path: &SharePath) -> String {
    if path.path.is_empty() {
        format!("{}/{}", path.server.to_lowercase(), path.share)
    } else {
        format!("{}/{}/{}", path.server.to_lowercase(), path.share, path.path)
    }
}

fn parse(locator: &str) -> Option<SharePath> {
    match SharePath::from_locator(locator) {
        Ok(path) => Some(path),
        Err(e) => {
            warn!("InMemoryShare: ignoring fixture path {}: {}", locator, e);
            None
        }
    }
}

/// A fake share server.
#[derive(Clone, Default)]
pub struct InMemoryShare {
    state: Arc<RwLock<ShareState>>,
    connections: Arc<AtomicUsize>,
    reads: Arc<ReadGauge>,
}

impl InMemoryShare {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a directory and its ancestors. Takes an `smb://server/share/dir` locator.
    pub fn add_dir(&self, locator: &str) -> &Self {
        let Some(path) = parse(locator) else {
            return self;
        };
        let mut state = self.state.write_ignore_poison();
        let mut current = SharePath {
            path: String::new(),
            ..path.clone()
        };
        state.nodes.insert(key(&current), Node::Directory);
        for segment in path.path.split('/').filter(|s| !s.is_empty()) {
            current = current.join(segment);
            state.nodes.insert(key(&current), Node::Directory);
        }
        self
    }

    pub fn add_file(&self, locator: &str, contents: &[u8]) -> &Self {
        self.insert_file(locator, contents.to_vec(), contents.len() as u64)
    }

    /// Adds a file that reports `size` bytes without allocating them.
    pub fn add_file_with_size(&self, locator: &str, size: u64) -> &Self {
        self.insert_file(locator, Vec::new(), size)
    }

    fn insert_file(&self, locator: &str, data: Vec<u8>, size: u64) -> &Self {
        let Some(path) = parse(locator) else {
            return self;
        };
        self.add_dir(&path.parent().to_locator());
        self.state.write_ignore_poison().nodes.insert(
            key(&path),
            Node::File {
                data: Arc::new(data),
                size,
                modified_at: Some(1_700_000_000),
            },
        );
        self
    }

    pub fn contains(&self, locator: &str) -> bool {
        parse(locator).is_some_and(|path| self.state.read_ignore_poison().nodes.contains_key(&key(&path)))
    }

    pub fn file_contents(&self, locator: &str) -> Option<Vec<u8>> {
        let path = parse(locator)?;
        match self.state.read_ignore_poison().nodes.get(&key(&path)) {
            Some(Node::File { data, .. }) => Some(data.as_ref().clone()),
            _ => None,
        }
    }

    /// Rejects new files in this directory with `PermissionDenied`.
    pub fn set_read_only(&self, dir_locator: &str) {
        if let Some(dir) = parse(dir_locator) {
            self.state.write_ignore_poison().read_only.insert(key(&dir));
        }
    }

    /// Makes deleting this file fail with `PermissionDenied`.
    pub fn fail_delete(&self, locator: &str) {
        if let Some(path) = parse(locator) {
            self.state.write_ignore_poison().failing_deletes.insert(key(&path));
        }
    }

    /// Makes deleting any file directly inside this directory fail with `PermissionDenied`.
    pub fn fail_deletes_in(&self, dir_locator: &str) {
        if let Some(dir) = parse(dir_locator) {
            self.state.write_ignore_poison().failing_delete_dirs.insert(key(&dir));
        }
    }

    /// Makes the server refuse connections and fail operations on existing sessions.
    pub fn set_unreachable(&self, server: &str, unreachable: bool) {
        let mut state = self.state.write_ignore_poison();
        if unreachable {
            state.unreachable.insert(server.to_lowercase());
        } else {
            state.unreachable.remove(&server.to_lowercase());
        }
    }

    pub fn require_credentials(&self, server: &str, username: &str, secret: &str) {
        self.state
            .write_ignore_poison()
            .required_credentials
            .insert(server.to_lowercase(), (username.to_string(), secret.to_string()));
    }

    /// Delays each file read, to give tests time to cancel.
    pub fn set_read_delay(&self, delay: Duration) {
        self.state.write_ignore_poison().read_delay = Some(delay);
    }

    /// Delays each write request.
    pub fn set_write_delay(&self, delay: Duration) {
        self.state.write_ignore_poison().write_delay = Some(delay);
    }

    /// Caps file size: writes past `limit` bytes fail with "No space left on device".
    pub fn set_write_limit(&self, limit: Option<u64>) {
        self.state.write_ignore_poison().write_limit = limit;
    }

    /// Most whole-file reads that were ever in flight at once.
    pub fn peak_concurrent_reads(&self) -> usize {
        self.reads.peak.load(Ordering::SeqCst)
    }

    /// Names directly inside a directory, including hidden ones.
    pub fn entries_in(&self, dir_locator: &str) -> Vec<String> {
        let Some(dir) = parse(dir_locator) else {
            return Vec::new();
        };
        let prefix = format!("{}/", key(&dir));
        self.state
            .read_ignore_poison()
            .nodes
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter(|(k, _)| !k[prefix.len()..].contains('/'))
            .map(|(k, _)| k[prefix.len()..].to_string())
            .collect()
    }

    /// Sessions opened so far.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl ShareTransport for InMemoryShare {
    type Session = InMemorySession;

    async fn connect(
        &self,
        server: &str,
        credentials: &Credentials,
        _dialects: DialectRange,
    ) -> Result<InMemorySession, TransportError> {
        let server = server.to_lowercase();
        {
            let state = self.state.read_ignore_poison();
            if state.unreachable.contains(&server) {
                return Err(TransportError::ConnectionFailed(format!("No route to host {}", server)));
            }
            if let Some((user, secret)) = state.required_credentials.get(&server)
                && (user != &credentials.username || secret != &credentials.secret)
            {
                return Err(TransportError::ConnectionFailed("Logon failure (0xc000006d)".to_string()));
            }
        }
        self.connections.fetch_add(1, Ordering::SeqCst);
        Ok(InMemorySession {
            state: Arc::clone(&self.state),
            reads: Arc::clone(&self.reads),
            server,
            closed: AtomicBool::new(false),
        })
    }
}

/// Session on an [`InMemoryShare`].
pub struct InMemorySession {
    state: Arc<RwLock<ShareState>>,
    reads: Arc<ReadGauge>,
    server: String,
    closed: AtomicBool,
}

impl InMemorySession {
    fn check_alive(&self, path: &SharePath) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionFailed("Session is closed".to_string()));
        }
        if !path.server.eq_ignore_ascii_case(&self.server) {
            return Err(TransportError::Protocol(format!(
                "Session for {} used for {}",
                self.server, path.server
            )));
        }
        if self.state.read_ignore_poison().unreachable.contains(&self.server) {
            return Err(TransportError::ConnectionFailed("Connection reset by peer".to_string()));
        }
        Ok(())
    }

    fn read_delay(&self) -> Option<Duration> {
        self.state.read_ignore_poison().read_delay
    }

    fn file_node(&self, path: &SharePath) -> Result<(Arc<Vec<u8>>, u64, Option<i64>), TransportError> {
        match self.state.read_ignore_poison().nodes.get(&key(path)) {
            Some(Node::File { data, size, modified_at }) => Ok((Arc::clone(data), *size, *modified_at)),
            Some(Node::Directory) => Err(TransportError::Io(format!("{} is a directory", path))),
            None => Err(TransportError::NotFound(path.to_locator())),
        }
    }
}

impl ShareSession for InMemorySession {
    type Reader = InMemoryReader;
    type Writer = InMemoryWriter;

    async fn list_directory(&self, dir: &SharePath) -> Result<Vec<RemoteEntry>, TransportError> {
        self.check_alive(dir)?;
        let state = self.state.read_ignore_poison();
        let dir_key = key(dir);
        match state.nodes.get(&dir_key) {
            Some(Node::Directory) => {}
            Some(Node::File { .. }) => return Err(TransportError::NotADirectory(dir.to_locator())),
            None => return Err(TransportError::NotFound(dir.to_locator())),
        }

        let prefix = format!("{}/", dir_key);
        let entries = state
            .nodes
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter(|(k, _)| !k[prefix.len()..].contains('/'))
            .map(|(k, node)| {
                let name = k[prefix.len()..].to_string();
                match node {
                    Node::Directory => RemoteEntry {
                        name,
                        is_directory: true,
                        size: 0,
                        modified_at: None,
                    },
                    Node::File { size, modified_at, .. } => RemoteEntry {
                        name,
                        is_directory: false,
                        size: *size,
                        modified_at: *modified_at,
                    },
                }
            })
            .collect();
        Ok(entries)
    }

    async fn stat(&self, path: &SharePath) -> Result<RemoteEntry, TransportError> {
        self.check_alive(path)?;
        let name = path.file_name().to_string();
        match self.state.read_ignore_poison().nodes.get(&key(path)) {
            Some(Node::Directory) => Ok(RemoteEntry {
                name,
                is_directory: true,
                size: 0,
                modified_at: None,
            }),
            Some(Node::File { size, modified_at, .. }) => Ok(RemoteEntry {
                name,
                is_directory: false,
                size: *size,
                modified_at: *modified_at,
            }),
            None => Err(TransportError::NotFound(path.to_locator())),
        }
    }

    async fn read_file(&self, path: &SharePath) -> Result<Vec<u8>, TransportError> {
        self.check_alive(path)?;
        let _in_flight = self.reads.enter();
        if let Some(delay) = self.read_delay() {
            tokio::time::sleep(delay).await;
        }
        let (data, _, _) = self.file_node(path)?;
        Ok(data.as_ref().clone())
    }

    async fn open_reader(&self, path: &SharePath) -> Result<InMemoryReader, TransportError> {
        self.check_alive(path)?;
        let (data, _, _) = self.file_node(path)?;
        Ok(InMemoryReader { data })
    }

    async fn create_new(&self, path: &SharePath) -> Result<InMemoryWriter, TransportError> {
        self.check_alive(path)?;
        let mut state = self.state.write_ignore_poison();
        let parent_key = key(&path.parent());
        match state.nodes.get(&parent_key) {
            Some(Node::Directory) => {}
            Some(Node::File { .. }) => return Err(TransportError::NotADirectory(path.parent().to_locator())),
            None => return Err(TransportError::NotFound(path.parent().to_locator())),
        }
        if state.read_only.contains(&parent_key) {
            return Err(TransportError::PermissionDenied(format!(
                "Access denied: {} is read-only",
                path.parent()
            )));
        }
        let file_key = key(path);
        if state.nodes.contains_key(&file_key) {
            return Err(TransportError::AlreadyExists(path.file_name().to_string()));
        }
        state.nodes.insert(
            file_key.clone(),
            Node::File {
                data: Arc::new(Vec::new()),
                size: 0,
                modified_at: Some(chrono::Utc::now().timestamp()),
            },
        );
        Ok(InMemoryWriter {
            state: Arc::clone(&self.state),
            server: self.server.clone(),
            key: file_key,
        })
    }

    async fn delete_file(&self, path: &SharePath) -> Result<(), TransportError> {
        self.check_alive(path)?;
        let mut state = self.state.write_ignore_poison();
        let file_key = key(path);
        if state.failing_deletes.contains(&file_key) || state.failing_delete_dirs.contains(&key(&path.parent())) {
            return Err(TransportError::PermissionDenied(format!("Access denied: can't delete {}", path)));
        }
        match state.nodes.get(&file_key) {
            Some(Node::File { .. }) => {
                state.nodes.remove(&file_key);
                Ok(())
            }
            Some(Node::Directory) => Err(TransportError::Io(format!("{} is a directory", path))),
            None => Err(TransportError::NotFound(path.to_locator())),
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Reader over an in-memory file.
pub struct InMemoryReader {
    data: Arc<Vec<u8>>,
}

impl RangeRead for InMemoryReader {
    fn total_len(&self) -> u64 {
        self.data.len() as u64
    }

    async fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, TransportError> {
        let len = self.data.len() as u64;
        if offset >= len {
            return Ok(0);
        }
        let start = offset as usize;
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        Ok(n)
    }

    async fn close(self) {}
}

/// Writer into an in-memory file.
pub struct InMemoryWriter {
    state: Arc<RwLock<ShareState>>,
    server: String,
    key: String,
}

impl RangeWrite for InMemoryWriter {
    async fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<usize, TransportError> {
        let delay = self.state.read_ignore_poison().write_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.write_ignore_poison();
        if state.unreachable.contains(&self.server) {
            return Err(TransportError::ConnectionFailed("Connection reset by peer".to_string()));
        }
        let limit = state.write_limit;
        let Some(Node::File { data, size, .. }) = state.nodes.get_mut(&self.key) else {
            return Err(TransportError::NotFound(self.key.clone()));
        };

        let start = offset as usize;
        let allowed = match limit {
            Some(limit) => buf.len().min((limit as usize).saturating_sub(start)),
            None => buf.len(),
        };
        if allowed == 0 && !buf.is_empty() {
            return Err(TransportError::Io("No space left on device".to_string()));
        }
        let bytes = Arc::make_mut(data);
        if bytes.len() < start + allowed {
            bytes.resize(start + allowed, 0);
        }
        bytes[start..start + allowed].copy_from_slice(&buf[..allowed]);
        *size = bytes.len() as u64;
        Ok(allowed)
    }

    async fn close(self) -> Result<(), TransportError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(locator: &str) -> SharePath {
        SharePath::from_locator(locator).unwrap()
    }

    #[tokio::test]
    async fn lists_direct_children_only() {
        let share = InMemoryShare::new();
        share
            .add_file("smb://nas/p/in/a.jpg", b"a")
            .add_file("smb://nas/p/in/sub/deep.jpg", b"d")
            .add_file("smb://nas/p/other/x.jpg", b"x");

        let session = share.connect("NAS", &Credentials::guest(), DialectRange::WIDEST).await.unwrap();
        let mut names: Vec<_> = session
            .list_directory(&path("smb://nas/p/in"))
            .await
            .unwrap()
            .into_iter()
            .map(|e| (e.name, e.is_directory))
            .collect();
        names.sort();
        assert_eq!(names, vec![("a.jpg".to_string(), false), ("sub".to_string(), true)]);
    }

    #[tokio::test]
    async fn create_new_never_overwrites() {
        let share = InMemoryShare::new();
        share.add_file("smb://nas/p/a.jpg", b"old");
        let session = share.connect("nas", &Credentials::guest(), DialectRange::WIDEST).await.unwrap();

        let err = match session.create_new(&path("smb://nas/p/a.jpg")).await {
            Ok(_) => panic!("existing file was reopened"),
            Err(e) => e,
        };
        assert!(matches!(err, TransportError::AlreadyExists(_)));
        assert_eq!(share.file_contents("smb://nas/p/a.jpg").unwrap(), b"old");
    }

    #[tokio::test]
    async fn full_disk_keeps_the_partial_file() {
        let share = InMemoryShare::new();
        share.add_dir("smb://nas/p");
        share.set_write_limit(Some(4));
        let session = share.connect("nas", &Credentials::guest(), DialectRange::WIDEST).await.unwrap();

        let mut writer = session.create_new(&path("smb://nas/p/a.jpg")).await.unwrap();
        assert_eq!(writer.write_at(0, b"abcdef").await.unwrap(), 4);
        assert!(matches!(writer.write_at(4, b"ef").await, Err(TransportError::Io(_))));
        assert_eq!(share.file_contents("smb://nas/p/a.jpg").unwrap(), b"abcd");
    }

    #[tokio::test]
    async fn required_credentials_are_checked() {
        let share = InMemoryShare::new();
        share.require_credentials("nas", "alice", "pw");
        assert!(share.connect("nas", &Credentials::guest(), DialectRange::WIDEST).await.is_err());
        assert!(
            share
                .connect("nas", &Credentials::new("alice", "pw"), DialectRange::WIDEST)
                .await
                .is_ok()
        );
        assert_eq!(share.connection_count(), 1);
    }

    #[tokio::test]
    async fn closed_session_fails() {
        let share = InMemoryShare::new();
        share.add_dir("smb://nas/p");
        let session = share.connect("nas", &Credentials::guest(), DialectRange::WIDEST).await.unwrap();
        session.close().await;
        assert!(matches!(
            session.list_directory(&path("smb://nas/p")).await,
            Err(TransportError::ConnectionFailed(_))
        ));
    }
}
