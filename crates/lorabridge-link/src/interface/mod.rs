//! Link interfaces to the LoRaWAN modem
//!
//! The modem speaks a line-oriented protocol towards the host (tokens, time
//! values, commands) and accepts raw binary frames in the other direction.
//!
//! - [`SerialInterface`] - serial port communication (requires `serial` feature)

#[cfg(feature = "serial")]
mod serial;

#[cfg(feature = "serial")]
pub use serial::SerialInterface;

use crate::error::Result;
use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use tracing::warn;

/// Longest inbound line kept before the partial line is discarded
pub const MAX_LINE_LENGTH: usize = 1024;

/// Trait for modem link interfaces
#[async_trait]
pub trait LinkInterface: Send + Sync {
    /// Open the link
    async fn connect(&mut self) -> Result<()>;

    /// Close the link and release the device
    async fn disconnect(&mut self) -> Result<()>;

    /// Check if currently connected
    fn is_connected(&self) -> bool;

    /// Read the next complete line, without its terminator.
    ///
    /// Returns `None` if no complete line is available yet.
    async fn read_line(&mut self) -> Result<Option<Bytes>>;

    /// Send one encoded frame, discarding any unsent output first
    async fn write_frame(&mut self, frame: &[u8]) -> Result<()>;

    /// Get the interface name (for logging)
    fn name(&self) -> &str;
}

/// Connection state for interfaces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected
    Disconnected,
    /// Connection in progress
    Connecting,
    /// Successfully connected
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// Accumulates raw bytes and splits them into `\n`-terminated lines
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: BytesMut,
}

impl LineBuffer {
    /// Empty buffer
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(MAX_LINE_LENGTH),
        }
    }

    /// Append received bytes
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Take the next complete line, with `\n` and a trailing `\r` removed
    pub fn next_line(&mut self) -> Option<Bytes> {
        loop {
            match self.buf.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    let mut line = self.buf.split_to(pos + 1);
                    line.truncate(pos);
                    if line.last() == Some(&b'\r') {
                        line.truncate(pos - 1);
                    }
                    if line.len() > MAX_LINE_LENGTH {
                        warn!(length = line.len(), "Discarding oversized line");
                        continue;
                    }
                    return Some(line.freeze());
                }
                None => {
                    if self.buf.len() > MAX_LINE_LENGTH {
                        warn!(discarded = self.buf.len(), "Discarding unterminated line");
                        let len = self.buf.len();
                        self.buf.advance(len);
                    }
                    return None;
                }
            }
        }
    }

    /// Bytes buffered but not yet returned
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True when nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Drop everything buffered
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}
