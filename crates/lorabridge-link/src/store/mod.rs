//! Queue store adapter
//!
//! The link core only needs a handful of store primitives: FIFO list pops and
//! pushes, a device index snapshot, a pop-minimum on each device's scored
//! queue and a get-and-delete on payload blobs. [`QueueStore`] captures exactly
//! that set so the multiplexer and router never see the backing store.
//!
//! Every read returns a three-way [`StoreOutcome`]: a connection problem is
//! [`StoreOutcome::Failed`], never confused with a legitimately empty queue.
//!
//! - [`RedisStore`] - the production backend
//! - [`MemoryStore`] - in-process backend with the same semantics

mod memory;
mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::error::Result;

/// Errors reported by a queue store backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached (connection refused, dropped, timed out)
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store answered but rejected the command
    #[error("store command failed: {0}")]
    Command(String),
}

impl StoreError {
    /// True when the failure is a transport problem rather than a bad command
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Outcome of a single store read
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOutcome<T> {
    /// A value was returned
    Found(T),
    /// The queue, set or key is empty or absent
    Empty,
    /// The round trip failed
    Failed(StoreError),
}

impl<T> StoreOutcome<T> {
    /// Build from an optional value
    pub fn from_option(value: Option<T>) -> Self {
        match value {
            Some(v) => StoreOutcome::Found(v),
            None => StoreOutcome::Empty,
        }
    }

    /// Discard the distinction between empty and failed
    pub fn ok(self) -> Option<T> {
        match self {
            StoreOutcome::Found(v) => Some(v),
            _ => None,
        }
    }

    /// True for [`StoreOutcome::Found`]
    pub fn is_found(&self) -> bool {
        matches!(self, StoreOutcome::Found(_))
    }

    /// True for [`StoreOutcome::Failed`]
    pub fn is_failed(&self) -> bool {
        matches!(self, StoreOutcome::Failed(_))
    }

    /// Map the found value
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> StoreOutcome<U> {
        match self {
            StoreOutcome::Found(v) => StoreOutcome::Found(f(v)),
            StoreOutcome::Empty => StoreOutcome::Empty,
            StoreOutcome::Failed(e) => StoreOutcome::Failed(e),
        }
    }
}

/// Radio node identifier (device EUI)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub String);

impl DeviceId {
    /// Create a device id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow as str
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// An entry popped from a device's scored queue
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRef {
    /// Reference (hash) of the payload blob
    pub reference: String,
    /// Queue score; lower was served first
    pub score: f64,
}

/// Store primitives needed by the link core.
///
/// Each method is a single round trip and atomic on its own; no multi-key
/// transaction is assumed.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Pop the head of a FIFO list
    async fn pop_front(&self, queue: &str) -> StoreOutcome<Bytes>;

    /// Snapshot the members of a set. An empty set is [`StoreOutcome::Empty`].
    async fn enumerate_set(&self, set: &str) -> StoreOutcome<Vec<DeviceId>>;

    /// Remove and return the lowest-score entry of a device's queue
    async fn pop_min(&self, device: &DeviceId) -> StoreOutcome<ScoredRef>;

    /// Read and delete a payload blob
    async fn take_blob(&self, device: &DeviceId, reference: &str) -> StoreOutcome<Bytes>;

    /// Append to the tail of a FIFO list
    async fn push_back(&self, queue: &str, payload: &[u8]) -> Result<()>;

    /// Backend name (for logging)
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_from_option() {
        assert_eq!(StoreOutcome::from_option(Some(3)), StoreOutcome::Found(3));
        assert_eq!(StoreOutcome::<u8>::from_option(None), StoreOutcome::Empty);
    }

    #[test]
    fn test_outcome_ok_drops_failure() {
        let failed: StoreOutcome<u8> = StoreOutcome::Failed(StoreError::Unavailable("x".into()));
        assert!(failed.is_failed());
        assert_eq!(failed.ok(), None);
        assert_eq!(StoreOutcome::Found(1).map(|v| v + 1), StoreOutcome::Found(2));
    }

    #[test]
    fn test_store_error_kind() {
        assert!(StoreError::Unavailable("eof".into()).is_unavailable());
        assert!(!StoreError::Command("WRONGTYPE".into()).is_unavailable());
    }

    #[test]
    fn test_device_id_display() {
        let id = DeviceId::from("0x00158d0001a2b3c4");
        assert_eq!(id.to_string(), "0x00158d0001a2b3c4");
        assert_eq!(id.as_str(), "0x00158d0001a2b3c4");
    }
}
