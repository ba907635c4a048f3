//! Network share access: locators, the transport capability interface, the remote share client,
//! and range streaming.

pub mod in_memory;
pub mod range_stream;
pub mod share_path;
pub mod smb_client;
#[cfg(feature = "smb")]
pub mod smb_transport;
pub mod transport;

pub use in_memory::InMemoryShare;
pub use range_stream::{RangeStream, ReadOutcome, TransferListener};
pub use share_path::SharePath;
pub use smb_client::{RemoteShareClient, ShareTarget};
#[cfg(feature = "smb")]
pub use smb_transport::SmbTransport;
pub use transport::{RangeRead, RemoteEntry, ShareSession, ShareTransport};

#[cfg(test)]
mod smb_client_test;
