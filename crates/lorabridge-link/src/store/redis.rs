//! Redis-backed queue store
//!
//! Lists follow the convention of the rest of the lorabridge stack:
//! producers `LPUSH` and consumers `RPOP`, so the head of a queue is its
//! right end. Per-device queues are sorted sets popped with `ZPOPMIN`, and
//! payload blobs are plain keys consumed with `GETDEL` (Redis 6.2+).

use ::redis::aio::ConnectionManager;
use ::redis::{ErrorKind, FromRedisValue, RedisError};
use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info, trace, warn};

use super::{DeviceId, QueueStore, ScoredRef, StoreError, StoreOutcome};
use crate::config::{QueueKeys, StoreConfig};
use crate::error::{LinkError, Result};

/// Queue store over a managed Redis connection
#[derive(Clone)]
pub struct RedisStore {
    /// Auto-reconnecting connection
    conn: ConnectionManager,
    /// Key layout for device queues and blobs
    keys: QueueKeys,
    /// Name for logging
    name: String,
}

impl RedisStore {
    /// Connect to Redis
    pub async fn connect(config: &StoreConfig, keys: QueueKeys) -> Result<Self> {
        let url = config.url();
        info!(url = %url, "Connecting to queue store");

        let client = ::redis::Client::open(url.as_str())
            .map_err(|e| LinkError::InvalidConfig(format!("redis url {}: {}", url, e)))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(StoreError::from)?;

        Ok(Self {
            conn,
            keys,
            name: format!("redis:{}:{}/{}", config.host, config.port, config.db),
        })
    }

    /// Run one command and fold the reply into a [`StoreOutcome`]
    async fn query<T: FromRedisValue>(&self, cmd: &::redis::Cmd) -> StoreOutcome<T>
    where
        Option<T>: FromRedisValue,
    {
        let mut conn = self.conn.clone();
        match cmd.query_async::<_, Option<T>>(&mut conn).await {
            Ok(value) => StoreOutcome::from_option(value),
            Err(e) => StoreOutcome::Failed(e.into()),
        }
    }
}

/// Decode set members into device ids; members that are not UTF-8 cannot
/// name a device queue and are skipped
fn device_ids(set: &str, members: Vec<Vec<u8>>) -> Vec<DeviceId> {
    members
        .into_iter()
        .filter_map(|member| match String::from_utf8(member) {
            Ok(id) => Some(DeviceId(id)),
            Err(e) => {
                warn!(set, member = ?e.as_bytes(), "Skipping non-UTF-8 device id");
                None
            }
        })
        .collect()
}

impl From<RedisError> for StoreError {
    fn from(err: RedisError) -> Self {
        if err.is_connection_dropped()
            || err.is_connection_refusal()
            || err.is_timeout()
            || err.is_io_error()
            || matches!(err.kind(), ErrorKind::TryAgain | ErrorKind::ClusterDown)
        {
            StoreError::Unavailable(err.to_string())
        } else {
            StoreError::Command(err.to_string())
        }
    }
}

#[async_trait]
impl QueueStore for RedisStore {
    async fn pop_front(&self, queue: &str) -> StoreOutcome<Bytes> {
        let mut cmd = ::redis::cmd("RPOP");
        cmd.arg(queue);
        let outcome = self.query::<Vec<u8>>(&cmd).await.map(Bytes::from);
        trace!(queue, found = outcome.is_found(), "RPOP");
        outcome
    }

    async fn enumerate_set(&self, set: &str) -> StoreOutcome<Vec<DeviceId>> {
        let mut cmd = ::redis::cmd("SMEMBERS");
        cmd.arg(set);
        let mut conn = self.conn.clone();
        match cmd.query_async::<_, Vec<Vec<u8>>>(&mut conn).await {
            Ok(members) => {
                let devices = device_ids(set, members);
                if devices.is_empty() {
                    StoreOutcome::Empty
                } else {
                    StoreOutcome::Found(devices)
                }
            }
            Err(e) => StoreOutcome::Failed(e.into()),
        }
    }

    async fn pop_min(&self, device: &DeviceId) -> StoreOutcome<ScoredRef> {
        let key = self.keys.device_queue(device);
        let mut cmd = ::redis::cmd("ZPOPMIN");
        cmd.arg(&key);
        let mut conn = self.conn.clone();
        match cmd.query_async::<_, Vec<(String, f64)>>(&mut conn).await {
            Ok(mut entries) => match entries.pop() {
                Some((reference, score)) => {
                    trace!(key = %key, reference = %reference, score, "ZPOPMIN");
                    StoreOutcome::Found(ScoredRef { reference, score })
                }
                None => StoreOutcome::Empty,
            },
            Err(e) => StoreOutcome::Failed(e.into()),
        }
    }

    async fn take_blob(&self, device: &DeviceId, reference: &str) -> StoreOutcome<Bytes> {
        let key = self.keys.blob(device, reference);
        let mut cmd = ::redis::cmd("GETDEL");
        cmd.arg(&key);
        let outcome = self.query::<Vec<u8>>(&cmd).await.map(Bytes::from);
        debug!(key = %key, found = outcome.is_found(), "GETDEL");
        outcome
    }

    async fn push_back(&self, queue: &str, payload: &[u8]) -> Result<()> {
        let mut conn = self.conn.clone();
        ::redis::cmd("LPUSH")
            .arg(queue)
            .arg(payload)
            .query_async::<_, i64>(&mut conn)
            .await
            .map_err(StoreError::from)?;
        trace!(queue, size = payload.len(), "LPUSH");
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").field("name", &self.name).finish()
    }
}
