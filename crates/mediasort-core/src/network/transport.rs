//! Capability interface for a share protocol.
//!
//! [`RemoteShareClient`](super::smb_client::RemoteShareClient) only talks to these traits. The
//! SMB implementation lives in `smb_transport` behind the `smb` feature. Tests use
//! [`InMemoryShare`](super::in_memory::InMemoryShare).

use std::future::Future;

use super::share_path::SharePath;
use crate::config::DialectRange;
use crate::error::TransportError;
use crate::model::Credentials;

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub is_directory: bool,
    pub size: u64,
    /// Unix timestamp in seconds.
    pub modified_at: Option<i64>,
}

/// Opens authenticated sessions to a server.
pub trait ShareTransport: Send + Sync + 'static {
    type Session: ShareSession;

    /// Negotiates a session. The dialect is picked from `dialects`.
    fn connect(
        &self,
        server: &str,
        credentials: &Credentials,
        dialects: DialectRange,
    ) -> impl Future<Output = Result<Self::Session, TransportError>> + Send;
}

/// An authenticated session on one server. Paths may point at any share on that server.
pub trait ShareSession: Send + Sync + 'static {
    type Reader: RangeRead;
    type Writer: RangeWrite;

    /// Lists a directory, non-recursively.
    fn list_directory(&self, dir: &SharePath) -> impl Future<Output = Result<Vec<RemoteEntry>, TransportError>> + Send;

    fn stat(&self, path: &SharePath) -> impl Future<Output = Result<RemoteEntry, TransportError>> + Send;

    fn read_file(&self, path: &SharePath) -> impl Future<Output = Result<Vec<u8>, TransportError>> + Send;

    fn open_reader(&self, path: &SharePath) -> impl Future<Output = Result<Self::Reader, TransportError>> + Send;

    /// Creates an empty file and opens it for writing. Fails with `AlreadyExists` instead of
    /// overwriting.
    fn create_new(&self, path: &SharePath) -> impl Future<Output = Result<Self::Writer, TransportError>> + Send;

    fn delete_file(&self, path: &SharePath) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Logs off. Errors are ignored: the session is gone either way.
    fn close(&self) -> impl Future<Output = ()> + Send;
}

/// Random-access read handle on one file.
pub trait RangeRead: Send + 'static {
    fn total_len(&self) -> u64;

    /// Reads up to `buf.len()` bytes at `offset`. Returns 0 at end of file.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> impl Future<Output = Result<usize, TransportError>> + Send;

    fn close(self) -> impl Future<Output = ()> + Send
    where
        Self: Sized;
}

/// Write handle on a newly created file. Bytes written before a failure stay on the share.
pub trait RangeWrite: Send + 'static {
    /// Writes up to `buf.len()` bytes at `offset` and returns how many were written.
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> impl Future<Output = Result<usize, TransportError>> + Send;

    /// Flushes and releases the handle.
    fn close(self) -> impl Future<Output = Result<(), TransportError>> + Send
    where
        Self: Sized;
}
