//! In-process queue store
//!
//! Mirrors the Redis semantics used by the bridge (FIFO lists, sets, scored
//! per-device queues, get-and-delete blobs) behind a mutex. Besides the
//! [`QueueStore`] primitives it offers seeding and inspection helpers, and
//! can be switched into an "unavailable" mode to exercise failure paths.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use super::{DeviceId, QueueStore, ScoredRef, StoreError, StoreOutcome};
use crate::error::Result;

#[derive(Debug, Default)]
struct Inner {
    lists: HashMap<String, VecDeque<Bytes>>,
    sets: HashMap<String, BTreeSet<DeviceId>>,
    scored: HashMap<DeviceId, Vec<ScoredRef>>,
    blobs: HashMap<(DeviceId, String), Bytes>,
}

/// In-memory [`QueueStore`]
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    unavailable: AtomicBool,
    set_enumerations: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a payload to a list
    pub fn push_list(&self, queue: &str, payload: impl Into<Bytes>) {
        self.inner
            .lock()
            .lists
            .entry(queue.to_string())
            .or_default()
            .push_back(payload.into());
    }

    /// Add a member to a set
    pub fn add_to_set(&self, set: &str, device: impl Into<DeviceId>) {
        self.inner
            .lock()
            .sets
            .entry(set.to_string())
            .or_default()
            .insert(device.into());
    }

    /// Add a scored reference to a device queue, with its blob if given
    pub fn insert_scored(
        &self,
        device: impl Into<DeviceId>,
        reference: &str,
        score: f64,
        blob: Option<Bytes>,
    ) {
        let device = device.into();
        let mut inner = self.inner.lock();
        inner.scored.entry(device.clone()).or_default().push(ScoredRef {
            reference: reference.to_string(),
            score,
        });
        if let Some(blob) = blob {
            inner.blobs.insert((device, reference.to_string()), blob);
        }
    }

    /// Contents of a list, head first
    pub fn list(&self, queue: &str) -> Vec<Bytes> {
        self.inner
            .lock()
            .lists
            .get(queue)
            .map(|l| l.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of entries still queued for a device
    pub fn scored_len(&self, device: &DeviceId) -> usize {
        self.inner.lock().scored.get(device).map_or(0, Vec::len)
    }

    /// Number of blobs still stored
    pub fn blob_count(&self) -> usize {
        self.inner.lock().blobs.len()
    }

    /// How many times a set has been enumerated
    pub fn set_enumerations(&self) -> u64 {
        self.set_enumerations.load(Ordering::Relaxed)
    }

    /// Make every primitive fail as if the connection was lost
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    fn check_available(&self) -> std::result::Result<(), StoreError> {
        if self.unavailable.load(Ordering::Relaxed) {
            Err(StoreError::Unavailable("memory store offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn pop_front(&self, queue: &str) -> StoreOutcome<Bytes> {
        if let Err(e) = self.check_available() {
            return StoreOutcome::Failed(e);
        }
        let value = self
            .inner
            .lock()
            .lists
            .get_mut(queue)
            .and_then(VecDeque::pop_front);
        StoreOutcome::from_option(value)
    }

    async fn enumerate_set(&self, set: &str) -> StoreOutcome<Vec<DeviceId>> {
        if let Err(e) = self.check_available() {
            return StoreOutcome::Failed(e);
        }
        self.set_enumerations.fetch_add(1, Ordering::Relaxed);
        let members: Vec<DeviceId> = self
            .inner
            .lock()
            .sets
            .get(set)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        if members.is_empty() {
            StoreOutcome::Empty
        } else {
            StoreOutcome::Found(members)
        }
    }

    async fn pop_min(&self, device: &DeviceId) -> StoreOutcome<ScoredRef> {
        if let Err(e) = self.check_available() {
            return StoreOutcome::Failed(e);
        }
        let mut inner = self.inner.lock();
        let Some(entries) = inner.scored.get_mut(device) else {
            return StoreOutcome::Empty;
        };
        let lowest = entries
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.score.total_cmp(&b.score))
            .map(|(i, _)| i);
        StoreOutcome::from_option(lowest.map(|i| entries.remove(i)))
    }

    async fn take_blob(&self, device: &DeviceId, reference: &str) -> StoreOutcome<Bytes> {
        if let Err(e) = self.check_available() {
            return StoreOutcome::Failed(e);
        }
        let value = self
            .inner
            .lock()
            .blobs
            .remove(&(device.clone(), reference.to_string()));
        StoreOutcome::from_option(value)
    }

    async fn push_back(&self, queue: &str, payload: &[u8]) -> Result<()> {
        self.check_available()?;
        self.push_list(queue, Bytes::copy_from_slice(payload));
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_is_fifo() {
        let store = MemoryStore::new();
        store.push_back("q", b"first").await.unwrap();
        store.push_back("q", b"second").await.unwrap();

        assert_eq!(store.pop_front("q").await, StoreOutcome::Found(Bytes::from_static(b"first")));
        assert_eq!(store.pop_front("q").await, StoreOutcome::Found(Bytes::from_static(b"second")));
        assert_eq!(store.pop_front("q").await, StoreOutcome::Empty);
    }

    #[tokio::test]
    async fn test_pop_min_takes_lowest_score() {
        let store = MemoryStore::new();
        let device = DeviceId::from("d1");
        store.insert_scored("d1", "late", 9.0, None);
        store.insert_scored("d1", "early", 1.5, None);

        let first = store.pop_min(&device).await.ok().unwrap();
        assert_eq!(first.reference, "early");
        assert_eq!(first.score, 1.5);
        assert_eq!(store.pop_min(&device).await.ok().unwrap().reference, "late");
        assert_eq!(store.pop_min(&device).await, StoreOutcome::Empty);
    }

    #[tokio::test]
    async fn test_take_blob_deletes() {
        let store = MemoryStore::new();
        let device = DeviceId::from("d1");
        store.insert_scored("d1", "r1", 1.0, Some(Bytes::from_static(b"blob")));

        assert!(store.take_blob(&device, "r1").await.is_found());
        assert_eq!(store.take_blob(&device, "r1").await, StoreOutcome::Empty);
        assert_eq!(store.blob_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_set_is_empty() {
        let store = MemoryStore::new();
        assert_eq!(store.enumerate_set("index").await, StoreOutcome::Empty);
        store.add_to_set("index", "d1");
        store.add_to_set("index", "d1");
        assert_eq!(
            store.enumerate_set("index").await,
            StoreOutcome::Found(vec![DeviceId::from("d1")])
        );
        assert_eq!(store.set_enumerations(), 2);
    }

    #[tokio::test]
    async fn test_unavailable_fails_every_primitive() {
        let store = MemoryStore::new();
        store.push_list("q", Bytes::from_static(b"x"));
        store.set_unavailable(true);

        assert!(store.pop_front("q").await.is_failed());
        assert!(store.enumerate_set("index").await.is_failed());
        assert!(store.pop_min(&DeviceId::from("d1")).await.is_failed());
        assert!(store.take_blob(&DeviceId::from("d1"), "r").await.is_failed());
        assert!(store.push_back("q", b"y").await.is_err());

        store.set_unavailable(false);
        assert!(store.pop_front("q").await.is_found());
    }
}
