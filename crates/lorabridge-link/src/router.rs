//! Downlink router
//!
//! Classifies every inbound line from the modem and dispatches it: commands
//! are pushed verbatim onto the downstream command queue, time values are
//! parsed and handed back to the caller, tokens are passed through, and
//! anything else is dropped.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::codec::{decode_inbound, Inbound};
use crate::store::QueueStore;

/// Result of routing one inbound line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Command body pushed onto the command queue
    CommandForwarded,
    /// Command body lost because the store push failed
    CommandDropped,
    /// A valid time value
    TimeValue(DateTime<Utc>),
    /// Time value line with an unparseable body
    InvalidTime(String),
    /// Transmit token
    Token,
    /// Unrecognized line
    Ignored,
}

/// Router statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RouterStats {
    /// Commands pushed to the command queue
    pub commands_forwarded: u64,
    /// Commands lost to store failures
    pub commands_dropped: u64,
    /// Valid time values
    pub time_values: u64,
    /// Unparseable time values
    pub invalid_times: u64,
    /// Tokens seen
    pub tokens: u64,
    /// Unrecognized lines
    pub ignored: u64,
}

/// Routes inbound lines from the link
pub struct DownlinkRouter {
    store: Arc<dyn QueueStore>,
    command_queue: String,
    stats: RouterStats,
}

impl DownlinkRouter {
    /// Create a router pushing commands to `command_queue`
    pub fn new(store: Arc<dyn QueueStore>, command_queue: impl Into<String>) -> Self {
        Self {
            store,
            command_queue: command_queue.into(),
            stats: RouterStats::default(),
        }
    }

    /// Current statistics
    pub fn stats(&self) -> &RouterStats {
        &self.stats
    }

    /// Classify a line and perform its side effect
    pub async fn classify_and_dispatch(&mut self, line: &[u8]) -> Dispatch {
        match decode_inbound(line) {
            Inbound::Command(body) => self.forward_command(body).await,
            Inbound::TimeValue(text) => match parse_epoch(&text) {
                Some(time) => {
                    debug!(epoch = time.timestamp(), "Received time value");
                    self.stats.time_values += 1;
                    Dispatch::TimeValue(time)
                }
                None => {
                    warn!(value = %text, "Unparseable time value, staying in handshake");
                    self.stats.invalid_times += 1;
                    Dispatch::InvalidTime(text)
                }
            },
            Inbound::Token => {
                self.stats.tokens += 1;
                Dispatch::Token
            }
            Inbound::Unrecognized => {
                trace!(line = %String::from_utf8_lossy(line), "Ignoring line");
                self.stats.ignored += 1;
                Dispatch::Ignored
            }
        }
    }

    async fn forward_command(&mut self, body: Bytes) -> Dispatch {
        match self.store.push_back(&self.command_queue, &body).await {
            Ok(()) => {
                debug!(queue = %self.command_queue, size = body.len(), "Forwarded command");
                self.stats.commands_forwarded += 1;
                Dispatch::CommandForwarded
            }
            Err(e) => {
                warn!(error = %e, queue = %self.command_queue, "Dropping command, store push failed");
                self.stats.commands_dropped += 1;
                Dispatch::CommandDropped
            }
        }
    }
}

impl std::fmt::Debug for DownlinkRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownlinkRouter")
            .field("store", &self.store.name())
            .field("command_queue", &self.command_queue)
            .field("stats", &self.stats)
            .finish()
    }
}

/// Parse decimal epoch seconds
fn parse_epoch(text: &str) -> Option<DateTime<Utc>> {
    let secs: i64 = text.trim().parse().ok()?;
    DateTime::from_timestamp(secs, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn setup() -> (Arc<MemoryStore>, DownlinkRouter) {
        let store = Arc::new(MemoryStore::new());
        let router = DownlinkRouter::new(store.clone(), "lbcommands");
        (store, router)
    }

    #[tokio::test]
    async fn test_command_pushed_verbatim() {
        let (store, mut router) = setup();
        let dispatch = router.classify_and_dispatch(b"LBDATA: 01ff7a\r\n").await;
        assert_eq!(dispatch, Dispatch::CommandForwarded);
        assert_eq!(store.list("lbcommands"), vec![Bytes::from_static(b"01ff7a")]);
    }

    #[tokio::test]
    async fn test_time_value_parsed() {
        let (_, mut router) = setup();
        let dispatch = router.classify_and_dispatch(b"LBTIME: 1700000000").await;
        let expected = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        assert_eq!(dispatch, Dispatch::TimeValue(expected));
        assert_eq!(router.stats().time_values, 1);
    }

    #[tokio::test]
    async fn test_bad_time_value() {
        let (_, mut router) = setup();
        let dispatch = router.classify_and_dispatch(b"LBTIME: yesterday").await;
        assert_eq!(dispatch, Dispatch::InvalidTime("yesterday".to_string()));
        assert_eq!(router.stats().invalid_times, 1);
    }

    #[tokio::test]
    async fn test_token_and_noise() {
        let (store, mut router) = setup();
        assert_eq!(router.classify_and_dispatch(b"tx_token").await, Dispatch::Token);
        assert_eq!(router.classify_and_dispatch(b"AT+OK").await, Dispatch::Ignored);
        assert!(store.list("lbcommands").is_empty());
    }

    #[tokio::test]
    async fn test_command_dropped_when_store_down() {
        let (store, mut router) = setup();
        store.set_unavailable(true);
        let dispatch = router.classify_and_dispatch(b"LBDATA: 00").await;
        assert_eq!(dispatch, Dispatch::CommandDropped);
        assert_eq!(router.stats().commands_dropped, 1);
    }

    #[test]
    fn test_parse_epoch() {
        assert_eq!(parse_epoch("0"), DateTime::from_timestamp(0, 0));
        assert_eq!(parse_epoch("-"), None);
        assert_eq!(parse_epoch("1.5"), None);
    }
}
