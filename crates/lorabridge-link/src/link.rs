//! Link state machine
//!
//! The link starts in [`LinkState::Handshaking`]: the first token is used to
//! ask for the current time, and nothing else is sent until a time value
//! arrives. The time value moves the link to [`LinkState::Normal`] for the
//! rest of the process lifetime. In `Normal`, each token carries the next
//! multiplexed frame, or a heartbeat once the link has been idle for the
//! heartbeat interval.
//!
//! ```text
//!   ┌─────────────┐   time value    ┌────────┐
//!   │ Handshaking │ ──────────────► │ Normal │
//!   └─────────────┘                 └────────┘
//!    token: timesync_request once    token: frame | heartbeat | nothing
//! ```
//!
//! The state itself lives in a [`LinkStateCell`]: the state machine is its
//! only writer, while the status responder holds [`LinkStateReader`]s.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::codec::{Frame, FrameType};
use crate::config::{LinkConfig, ResyncPolicy};
use crate::multiplexer::UplinkMultiplexer;

/// Handshake state of the link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    /// Waiting for the time synchronization exchange
    Handshaking,
    /// Carrying ordinary traffic
    Normal,
}

impl LinkState {
    fn from_u8(value: u8) -> Self {
        if value == 1 {
            LinkState::Normal
        } else {
            LinkState::Handshaking
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            LinkState::Handshaking => 0,
            LinkState::Normal => 1,
        }
    }
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkState::Handshaking => write!(f, "handshaking"),
            LinkState::Normal => write!(f, "normal"),
        }
    }
}

/// Runtime state reported to the automation runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeState {
    /// Runtime should be stopped
    Stop,
    /// Runtime may run
    Start,
}

impl From<LinkState> for RuntimeState {
    fn from(state: LinkState) -> Self {
        match state {
            LinkState::Handshaking => RuntimeState::Stop,
            LinkState::Normal => RuntimeState::Start,
        }
    }
}

/// Body of the status query: `{"state": "stop"}` or `{"state": "start"}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    /// Runtime state derived from the link state
    pub state: RuntimeState,
}

impl From<LinkState> for StatusReport {
    fn from(state: LinkState) -> Self {
        Self {
            state: state.into(),
        }
    }
}

/// Single-writer cell holding the link state
#[derive(Debug)]
pub struct LinkStateCell {
    value: Arc<AtomicU8>,
}

impl LinkStateCell {
    /// New cell in `Handshaking`
    pub fn new() -> Self {
        Self {
            value: Arc::new(AtomicU8::new(LinkState::Handshaking.as_u8())),
        }
    }

    /// Current state
    pub fn get(&self) -> LinkState {
        LinkState::from_u8(self.value.load(Ordering::Acquire))
    }

    fn set(&self, state: LinkState) {
        self.value.store(state.as_u8(), Ordering::Release);
    }

    /// Read-only handle for other tasks
    pub fn reader(&self) -> LinkStateReader {
        LinkStateReader {
            value: self.value.clone(),
        }
    }
}

impl Default for LinkStateCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only view of a [`LinkStateCell`]
#[derive(Debug, Clone)]
pub struct LinkStateReader {
    value: Arc<AtomicU8>,
}

impl LinkStateReader {
    /// Current state
    pub fn get(&self) -> LinkState {
        LinkState::from_u8(self.value.load(Ordering::Acquire))
    }

    /// Status report for the current state
    pub fn report(&self) -> StatusReport {
        self.get().into()
    }
}

/// Token-driven link protocol
#[derive(Debug)]
pub struct LinkStateMachine {
    state: LinkStateCell,
    timesync_requested: bool,
    runtime_started: bool,
    last_transmission: Instant,
    heartbeat_interval: Duration,
    resync_policy: ResyncPolicy,
}

impl LinkStateMachine {
    /// Create a state machine in `Handshaking`; the heartbeat timer starts now
    pub fn new(config: &LinkConfig) -> Self {
        Self::starting_at(config, Instant::now())
    }

    /// Create with an explicit timer origin
    pub fn starting_at(config: &LinkConfig, now: Instant) -> Self {
        Self {
            state: LinkStateCell::new(),
            timesync_requested: false,
            runtime_started: false,
            last_transmission: now,
            heartbeat_interval: config.heartbeat_interval,
            resync_policy: config.resync_policy,
        }
    }

    /// Current state
    pub fn state(&self) -> LinkState {
        self.state.get()
    }

    /// Read-only state handle for the status responder
    pub fn reader(&self) -> LinkStateReader {
        self.state.reader()
    }

    /// Whether the time sync request went out this session
    pub fn timesync_requested(&self) -> bool {
        self.timesync_requested
    }

    /// Decide what to send for one token.
    ///
    /// Nothing is recorded here. The caller reports a successful write
    /// through [`on_frame_sent`](Self::on_frame_sent), so a frame that never
    /// reached the modem is offered again on the next token.
    pub async fn on_token(
        &mut self,
        mux: &mut UplinkMultiplexer,
        now: Instant,
    ) -> Option<Frame> {
        match self.state.get() {
            LinkState::Handshaking if !self.timesync_requested => {
                info!("Requesting time sync from network");
                Some(Frame::empty(FrameType::TimesyncRequest))
            }
            LinkState::Handshaking => {
                debug!("Token during handshake, waiting for time value");
                None
            }
            LinkState::Normal => {
                if let Some(frame) = mux.select_next().await {
                    return Some(frame);
                }
                self.heartbeat_due(now)
            }
        }
    }

    fn heartbeat_due(&self, now: Instant) -> Option<Frame> {
        let idle = now.saturating_duration_since(self.last_transmission);
        if idle >= self.heartbeat_interval {
            debug!(idle_secs = idle.as_secs(), "Sending heartbeat");
            Some(Frame::empty(FrameType::Heartbeat))
        } else {
            None
        }
    }

    /// Record a frame the modem accepted; resets the heartbeat timer
    pub fn on_frame_sent(&mut self, frame: &Frame, now: Instant) {
        if frame.frame_type == FrameType::TimesyncRequest {
            self.timesync_requested = true;
        }
        self.last_transmission = now;
    }

    /// Apply a received time value.
    ///
    /// Moves the link to `Normal` and returns whether the downstream runtime
    /// must be started now.
    pub fn on_time_synced(&mut self) -> bool {
        if self.state.get() == LinkState::Handshaking {
            info!("Time sync complete, link is now carrying traffic");
            self.state.set(LinkState::Normal);
        }

        let start = match self.resync_policy {
            ResyncPolicy::Once => !self.runtime_started,
            ResyncPolicy::EveryTimeValue => true,
        };
        self.runtime_started = true;
        start
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueKeys;
    use crate::store::MemoryStore;
    use bytes::Bytes;

    fn config(interval_secs: u64, policy: ResyncPolicy) -> LinkConfig {
        LinkConfig {
            heartbeat_interval: Duration::from_secs(interval_secs),
            resync_policy: policy,
            ..LinkConfig::default()
        }
    }

    /// One token whose frame, if any, is written successfully
    async fn token(
        link: &mut LinkStateMachine,
        mux: &mut UplinkMultiplexer,
        now: Instant,
    ) -> Option<Frame> {
        let frame = link.on_token(mux, now).await;
        if let Some(frame) = &frame {
            link.on_frame_sent(frame, now);
        }
        frame
    }

    fn empty_mux() -> (Arc<MemoryStore>, UplinkMultiplexer) {
        let store = Arc::new(MemoryStore::new());
        let mux = UplinkMultiplexer::new(store.clone(), QueueKeys::default(), 16);
        (store, mux)
    }

    #[tokio::test]
    async fn test_first_token_requests_timesync_once() {
        let t0 = Instant::now();
        let mut link = LinkStateMachine::starting_at(&config(60, ResyncPolicy::Once), t0);
        let (_store, mut mux) = empty_mux();

        let frame = token(&mut link, &mut mux, t0).await;
        assert_eq!(frame, Some(Frame::empty(FrameType::TimesyncRequest)));
        assert!(link.timesync_requested());

        // Even long after, no second request and no heartbeat while handshaking
        let later = t0 + Duration::from_secs(600);
        assert_eq!(token(&mut link, &mut mux, later).await, None);
        assert_eq!(link.state(), LinkState::Handshaking);
    }

    #[tokio::test]
    async fn test_handshake_ignores_pending_traffic() {
        let t0 = Instant::now();
        let mut link = LinkStateMachine::starting_at(&config(60, ResyncPolicy::Once), t0);
        let (store, mut mux) = empty_mux();
        store.push_list(&QueueKeys::default().system_events, Bytes::from_static(b"evt"));

        token(&mut link, &mut mux, t0).await;
        assert_eq!(token(&mut link, &mut mux, t0).await, None);
        assert_eq!(store.list(&QueueKeys::default().system_events).len(), 1);
    }

    #[test]
    fn test_time_value_starts_runtime_once() {
        let mut link = LinkStateMachine::new(&config(60, ResyncPolicy::Once));
        assert!(link.on_time_synced());
        assert_eq!(link.state(), LinkState::Normal);
        assert!(!link.on_time_synced());
        assert!(!link.on_time_synced());
        assert_eq!(link.state(), LinkState::Normal);
    }

    #[test]
    fn test_every_time_value_policy() {
        let mut link = LinkStateMachine::new(&config(60, ResyncPolicy::EveryTimeValue));
        assert!(link.on_time_synced());
        assert!(link.on_time_synced());
    }

    #[tokio::test]
    async fn test_normal_sends_multiplexed_frame() {
        let t0 = Instant::now();
        let mut link = LinkStateMachine::starting_at(&config(60, ResyncPolicy::Once), t0);
        link.on_time_synced();
        let (store, mut mux) = empty_mux();
        store.push_list(&QueueKeys::default().user_events, Bytes::from_static(b"u"));

        let frame = token(&mut link, &mut mux, t0).await.unwrap();
        assert_eq!(frame.frame_type, FrameType::UserEvent);
    }

    #[tokio::test]
    async fn test_heartbeat_after_interval() {
        let t0 = Instant::now();
        let mut link = LinkStateMachine::starting_at(&config(60, ResyncPolicy::Once), t0);
        link.on_time_synced();
        let (_store, mut mux) = empty_mux();

        assert_eq!(token(&mut link, &mut mux, t0 + Duration::from_secs(59)).await, None);

        let at = t0 + Duration::from_secs(60);
        assert_eq!(
            token(&mut link, &mut mux, at).await,
            Some(Frame::empty(FrameType::Heartbeat))
        );

        // Timer was reset by the heartbeat
        assert_eq!(token(&mut link, &mut mux, at + Duration::from_secs(30)).await, None);
        assert_eq!(
            token(&mut link, &mut mux, at + Duration::from_secs(61)).await,
            Some(Frame::empty(FrameType::Heartbeat))
        );
    }

    #[tokio::test]
    async fn test_data_frame_resets_heartbeat_timer() {
        let t0 = Instant::now();
        let mut link = LinkStateMachine::starting_at(&config(60, ResyncPolicy::Once), t0);
        link.on_time_synced();
        let (store, mut mux) = empty_mux();
        store.push_list(&QueueKeys::default().device_joins, Bytes::from_static(b"j"));

        let sent_at = t0 + Duration::from_secs(50);
        assert!(token(&mut link, &mut mux, sent_at).await.is_some());
        assert_eq!(token(&mut link, &mut mux, t0 + Duration::from_secs(70)).await, None);
    }

    #[tokio::test]
    async fn test_unsent_timesync_request_is_offered_again() {
        let t0 = Instant::now();
        let mut link = LinkStateMachine::starting_at(&config(60, ResyncPolicy::Once), t0);
        let (_store, mut mux) = empty_mux();

        let request = Some(Frame::empty(FrameType::TimesyncRequest));
        assert_eq!(link.on_token(&mut mux, t0).await, request);
        assert!(!link.timesync_requested());

        assert_eq!(token(&mut link, &mut mux, t0).await, request);
        assert!(link.timesync_requested());
        assert_eq!(link.on_token(&mut mux, t0).await, None);
    }

    #[tokio::test]
    async fn test_unsent_heartbeat_keeps_timer() {
        let t0 = Instant::now();
        let mut link = LinkStateMachine::starting_at(&config(60, ResyncPolicy::Once), t0);
        link.on_time_synced();
        let (_store, mut mux) = empty_mux();

        let at = t0 + Duration::from_secs(60);
        let heartbeat = Some(Frame::empty(FrameType::Heartbeat));
        assert_eq!(link.on_token(&mut mux, at).await, heartbeat);
        assert_eq!(link.on_token(&mut mux, at + Duration::from_secs(1)).await, heartbeat);
    }

    #[test]
    fn test_reader_tracks_writer() {
        let mut link = LinkStateMachine::new(&LinkConfig::default());
        let reader = link.reader();
        assert_eq!(reader.get(), LinkState::Handshaking);
        assert_eq!(reader.report().state, RuntimeState::Stop);

        link.on_time_synced();
        assert_eq!(reader.get(), LinkState::Normal);
        assert_eq!(reader.report().state, RuntimeState::Start);
    }

    #[test]
    fn test_status_report_json() {
        let stop = serde_json::to_value(StatusReport::from(LinkState::Handshaking)).unwrap();
        assert_eq!(stop, serde_json::json!({ "state": "stop" }));
        let start = serde_json::to_value(StatusReport::from(LinkState::Normal)).unwrap();
        assert_eq!(start, serde_json::json!({ "state": "start" }));
    }
}
