//! Uplink multiplexer
//!
//! Picks the single frame to send when the modem hands out a token. Queue
//! classes are checked in a fixed order and the first non-empty one wins:
//!
//! 1. system events
//! 2. user events
//! 3. flow digests
//! 4. device names
//! 5. device joins
//! 6. staging buffer of sensor data
//!
//! There is no fairness between classes. The control classes are low volume,
//! so sensor data only waits behind a short burst at most.
//!
//! When the staging buffer runs dry it is refilled once per call by scanning
//! the device index and moving queued sensor payloads into it. Refill never
//! waits for new data and visits each device at most once per pass.

use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::codec::{Frame, FrameType};
use crate::config::QueueKeys;
use crate::error::LinkError;
use crate::store::{DeviceId, QueueStore, StoreError, StoreOutcome};

/// Multiplexer statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MultiplexerStats {
    /// Frames selected per class
    pub system_events: u64,
    /// User event frames
    pub user_events: u64,
    /// Flow digest frames
    pub flow_digests: u64,
    /// Device name frames
    pub device_names: u64,
    /// Device join frames
    pub device_joins: u64,
    /// Sensor data frames
    pub sensor_data: u64,
    /// Staging refill passes
    pub refills: u64,
    /// Blobs moved into the staging buffer
    pub blobs_staged: u64,
    /// References whose blob was already gone
    pub blobs_missing: u64,
    /// Store round trips that failed
    pub store_failures: u64,
}

impl MultiplexerStats {
    fn record(&mut self, frame_type: FrameType) {
        match frame_type {
            FrameType::SystemEvent => self.system_events += 1,
            FrameType::UserEvent => self.user_events += 1,
            FrameType::FlowDigest => self.flow_digests += 1,
            FrameType::DeviceName => self.device_names += 1,
            FrameType::DeviceJoin => self.device_joins += 1,
            FrameType::SensorData => self.sensor_data += 1,
            FrameType::TimesyncRequest | FrameType::Heartbeat => {}
        }
    }
}

/// Store failure that ends the current selection
#[derive(Debug)]
struct Abort(StoreError);

/// Selects the next outbound frame across all queue classes
pub struct UplinkMultiplexer {
    store: Arc<dyn QueueStore>,
    keys: QueueKeys,
    refill_batch: usize,
    stats: MultiplexerStats,
}

impl UplinkMultiplexer {
    /// Create a multiplexer over a store
    pub fn new(store: Arc<dyn QueueStore>, keys: QueueKeys, refill_batch: usize) -> Self {
        Self {
            store,
            keys,
            refill_batch: refill_batch.max(1),
            stats: MultiplexerStats::default(),
        }
    }

    /// Current statistics
    pub fn stats(&self) -> &MultiplexerStats {
        &self.stats
    }

    /// Simple queues in priority order
    fn simple_queues(&self) -> [(&str, FrameType); 5] {
        [
            (self.keys.system_events.as_str(), FrameType::SystemEvent),
            (self.keys.user_events.as_str(), FrameType::UserEvent),
            (self.keys.flow_digests.as_str(), FrameType::FlowDigest),
            (self.keys.device_names.as_str(), FrameType::DeviceName),
            (self.keys.device_joins.as_str(), FrameType::DeviceJoin),
        ]
    }

    /// Select the highest-priority pending frame.
    ///
    /// Returns `None` when every class is empty, or when the store failed
    /// during this call; failures are logged and counted, never raised.
    pub async fn select_next(&mut self) -> Option<Frame> {
        match self.try_select().await {
            Ok(Some(frame)) => {
                self.stats.record(frame.frame_type);
                debug!(
                    frame_type = %frame.frame_type,
                    size = frame.payload.len(),
                    "Selected uplink frame"
                );
                Some(frame)
            }
            Ok(None) => None,
            Err(Abort(e)) => {
                self.stats.store_failures += 1;
                warn!(error = %e, store = self.store.name(), "Queue store failure, nothing sent this cycle");
                None
            }
        }
    }

    async fn try_select(&mut self) -> Result<Option<Frame>, Abort> {
        for (queue, frame_type) in self.simple_queues() {
            if let Some(payload) = pop(self.store.as_ref(), queue).await? {
                return Ok(Some(Frame::new(frame_type, payload)));
            }
        }

        let staging = self.keys.staging.clone();
        if let Some(payload) = pop(self.store.as_ref(), &staging).await? {
            return Ok(Some(Frame::new(FrameType::SensorData, payload)));
        }

        self.refill().await?;

        Ok(pop(self.store.as_ref(), &staging)
            .await?
            .map(|payload| Frame::new(FrameType::SensorData, payload)))
    }

    /// Move queued sensor payloads from every device into the staging buffer
    async fn refill(&mut self) -> Result<(), Abort> {
        self.stats.refills += 1;

        let devices = match self.store.enumerate_set(&self.keys.device_index).await {
            StoreOutcome::Found(devices) => devices,
            StoreOutcome::Empty => {
                trace!("Device index empty, nothing to stage");
                return Ok(());
            }
            StoreOutcome::Failed(e) => return Err(Abort(e)),
        };

        let mut staged = 0usize;
        for device in &devices {
            staged += self.stage_device(device).await?;
        }

        debug!(devices = devices.len(), staged, "Staging refill complete");
        Ok(())
    }

    /// Stage up to `refill_batch` entries of one device, lowest score first
    async fn stage_device(&mut self, device: &DeviceId) -> Result<usize, Abort> {
        let mut staged = 0;
        for _ in 0..self.refill_batch {
            let entry = match self.store.pop_min(device).await {
                StoreOutcome::Found(entry) => entry,
                StoreOutcome::Empty => break,
                StoreOutcome::Failed(e) => return Err(Abort(e)),
            };

            let blob = match self.store.take_blob(device, &entry.reference).await {
                StoreOutcome::Found(blob) => blob,
                StoreOutcome::Empty => {
                    // Consumed elsewhere; at-most-once delivery
                    debug!(device = %device, reference = %entry.reference, "Blob already consumed");
                    self.stats.blobs_missing += 1;
                    continue;
                }
                StoreOutcome::Failed(e) => return Err(Abort(e)),
            };

            trace!(device = %device, reference = %entry.reference, score = entry.score, "Staging blob");
            self.store
                .push_back(&self.keys.staging, &blob)
                .await
                .map_err(|e| match e {
                    LinkError::Store(s) => Abort(s),
                    other => Abort(StoreError::Command(other.to_string())),
                })?;
            self.stats.blobs_staged += 1;
            staged += 1;
        }
        Ok(staged)
    }
}

async fn pop(store: &dyn QueueStore, queue: &str) -> Result<Option<Bytes>, Abort> {
    match store.pop_front(queue).await {
        StoreOutcome::Found(payload) => Ok(Some(payload)),
        StoreOutcome::Empty => Ok(None),
        StoreOutcome::Failed(e) => Err(Abort(e)),
    }
}

impl std::fmt::Debug for UplinkMultiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UplinkMultiplexer")
            .field("store", &self.store.name())
            .field("refill_batch", &self.refill_batch)
            .field("stats", &self.stats)
            .finish()
    }
}
