//! Pull-based byte-range reads over a share, for progressive media playback.
//!
//! A player opens a range, pulls bytes until [`ReadOutcome::EndOfInput`], then closes. States
//! go `Closed -> Opened -> Closed`; reopening releases the previous handle first.

use log::{debug, warn};
use std::sync::Arc;

use super::smb_client::RemoteShareClient;
use super::transport::{RangeRead, ShareSession, ShareTransport};
use crate::error::StreamError;

/// Result of one [`RangeStream::read`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    Bytes(usize),
    /// The requested range is exhausted.
    EndOfInput,
}

/// Observes a stream's transfers, for bandwidth meters and the like.
pub trait TransferListener: Send + Sync {
    fn on_open(&self, _locator: &str, _length: u64) {}
    fn on_bytes(&self, _count: usize) {}
    fn on_close(&self, _locator: &str, _transferred: u64) {}
}

type ReaderOf<T> = <<T as ShareTransport>::Session as ShareSession>::Reader;

enum StreamState<R> {
    Closed,
    Opened {
        reader: R,
        locator: String,
        position: u64,
        remaining: u64,
    },
}

pub struct RangeStream<T: ShareTransport> {
    client: Arc<RemoteShareClient<T>>,
    state: StreamState<ReaderOf<T>>,
    listener: Option<Arc<dyn TransferListener>>,
    bytes_transferred: u64,
}

impl<T: ShareTransport> RangeStream<T> {
    pub fn new(client: Arc<RemoteShareClient<T>>) -> Self {
        Self {
            client,
            state: StreamState::Closed,
            listener: None,
            bytes_transferred: 0,
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn TransferListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Opens `locator` at `range_start`. Returns how many bytes the range holds: `range_length`
    /// capped at the file end, or everything after `range_start` when no length is given.
    pub async fn open(&mut self, locator: &str, range_start: u64, range_length: Option<u64>) -> Result<u64, StreamError> {
        self.close().await;

        let reader = self.client.open_range_reader(locator).await.map_err(|e| {
            warn!("Couldn't open {} for streaming: {}", locator, e);
            StreamError::from(e)
        })?;

        let total = reader.total_len();
        if range_start > total {
            reader.close().await;
            return Err(StreamError::Io(format!(
                "Range start {} is past the end of {} ({} bytes)",
                range_start, locator, total
            )));
        }
        let available = total - range_start;
        let remaining = range_length.map_or(available, |len| len.min(available));

        debug!(
            "Streaming {} from {} ({} of {} bytes)",
            locator, range_start, remaining, total
        );
        if let Some(listener) = &self.listener {
            listener.on_open(locator, remaining);
        }
        self.state = StreamState::Opened {
            reader,
            locator: locator.to_string(),
            position: range_start,
            remaining,
        };
        Ok(remaining)
    }

    /// Reads up to `max_len` bytes into `buf[offset..]`, capped at what's left of the range.
    pub async fn read(&mut self, buf: &mut [u8], offset: usize, max_len: usize) -> Result<ReadOutcome, StreamError> {
        let StreamState::Opened {
            reader,
            position,
            remaining,
            ..
        } = &mut self.state
        else {
            return Err(StreamError::NotOpen);
        };

        if *remaining == 0 {
            return Ok(ReadOutcome::EndOfInput);
        }
        let room = buf.len().saturating_sub(offset);
        let want = (max_len.min(room) as u64).min(*remaining) as usize;
        if want == 0 {
            return Ok(ReadOutcome::Bytes(0));
        }

        let n = reader
            .read_at(*position, &mut buf[offset..offset + want])
            .await
            .map_err(StreamError::from)?;
        if n == 0 {
            // The file shrank under us
            *remaining = 0;
            return Ok(ReadOutcome::EndOfInput);
        }

        *position += n as u64;
        *remaining -= n as u64;
        self.bytes_transferred += n as u64;
        if let Some(listener) = &self.listener {
            listener.on_bytes(n);
        }
        Ok(ReadOutcome::Bytes(n))
    }

    /// Releases the handle. Safe to call when nothing is open.
    pub async fn close(&mut self) {
        if let StreamState::Opened { reader, locator, .. } = std::mem::replace(&mut self.state, StreamState::Closed) {
            reader.close().await;
            if let Some(listener) = &self.listener {
                listener.on_close(&locator, self.bytes_transferred);
            }
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, StreamState::Opened { .. })
    }

    /// Current read offset in the file, if open.
    pub fn position(&self) -> Option<u64> {
        match &self.state {
            StreamState::Opened { position, .. } => Some(*position),
            StreamState::Closed => None,
        }
    }

    /// Total bytes read over this stream's lifetime.
    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }
}
