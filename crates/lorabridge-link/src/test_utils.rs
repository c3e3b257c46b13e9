//! Test utilities for driving the bridge without a modem
//!
//! This module provides a scripted [`MockInterface`], recording stand-ins for
//! the runtime and clock collaborators, and a [`TestFixture`] that wires them
//! to a [`MemoryStore`]. All handles are cheap clones sharing state, so a test
//! can keep one copy while the bridge owns another.
//!
//! # Example
//!
//! ```rust,ignore
//! use lorabridge_link::test_utils::TestFixture;
//!
//! let fixture = TestFixture::new();
//! let (bridge, handle) = fixture.bridge();
//! tokio::spawn(bridge.run());
//!
//! fixture.interface.push_line("tx_token");
//! assert!(fixture.interface.wait_for_frames(1).await);
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use crate::bridge::{BridgeHandle, LoraBridge};
use crate::config::{BridgeConfig, BridgeConfigBuilder};
use crate::error::{LinkError, Result};
use crate::interface::LinkInterface;
use crate::runtime::{ClockSync, RuntimeControl};
use crate::store::MemoryStore;

/// Polls made by [`MockInterface::wait_for_frames`] before giving up
const WAIT_ATTEMPTS: usize = 400;

/// One scripted read
#[derive(Debug)]
enum ScriptedRead {
    Line(Bytes),
    Error,
}

#[derive(Debug, Default)]
struct MockState {
    connected: bool,
    connects: usize,
    fail_connect: bool,
    fail_writes: bool,
    incoming: VecDeque<ScriptedRead>,
    outgoing: Vec<Bytes>,
}

/// Mock modem interface for testing without hardware
///
/// Reads return scripted lines in order and then wait for more, like an idle
/// modem. Written frames are captured.
#[derive(Debug, Clone, Default)]
pub struct MockInterface {
    state: Arc<Mutex<MockState>>,
    readable: Arc<Notify>,
}

impl MockInterface {
    /// Create a new mock interface
    pub fn new() -> Self {
        Self::default()
    }

    /// Script an inbound line (without terminator)
    pub fn push_line(&self, line: impl AsRef<[u8]>) {
        let line = Bytes::copy_from_slice(line.as_ref());
        self.state.lock().incoming.push_back(ScriptedRead::Line(line));
        self.readable.notify_one();
    }

    /// Script several inbound lines
    pub fn push_lines<L: AsRef<[u8]>>(&self, lines: impl IntoIterator<Item = L>) {
        for line in lines {
            self.push_line(line);
        }
    }

    /// Script a read failure
    pub fn push_read_error(&self) {
        self.state.lock().incoming.push_back(ScriptedRead::Error);
        self.readable.notify_one();
    }

    /// Frames written so far
    pub fn frames(&self) -> Vec<Bytes> {
        self.state.lock().outgoing.clone()
    }

    /// Remove and return the frames written so far
    pub fn take_frames(&self) -> Vec<Bytes> {
        std::mem::take(&mut self.state.lock().outgoing)
    }

    /// Number of successful connects
    pub fn connect_count(&self) -> usize {
        self.state.lock().connects
    }

    /// Make `connect` fail
    pub fn set_fail_connect(&self, fail: bool) {
        self.state.lock().fail_connect = fail;
    }

    /// Make `write_frame` fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    /// True when every scripted read has been consumed
    pub fn script_drained(&self) -> bool {
        self.state.lock().incoming.is_empty()
    }

    /// Wait until at least `count` frames were written.
    ///
    /// Returns `false` if that did not happen within a couple of seconds.
    pub async fn wait_for_frames(&self, count: usize) -> bool {
        for _ in 0..WAIT_ATTEMPTS {
            if self.state.lock().outgoing.len() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }
}

#[async_trait]
impl LinkInterface for MockInterface {
    async fn connect(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_connect {
            return Err(LinkError::PortOpenFailed {
                port: "mock".to_string(),
                reason: "simulated failure".to_string(),
            });
        }
        state.connected = true;
        state.connects += 1;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.state.lock().connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    async fn read_line(&mut self) -> Result<Option<Bytes>> {
        loop {
            let next = {
                let mut state = self.state.lock();
                if !state.connected {
                    return Err(LinkError::Disconnected);
                }
                state.incoming.pop_front()
            };
            match next {
                Some(ScriptedRead::Line(line)) => return Ok(Some(line)),
                Some(ScriptedRead::Error) => {
                    return Err(LinkError::ReadError("simulated failure".to_string()))
                }
                None => self.readable.notified().await,
            }
        }
    }

    async fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_writes {
            return Err(LinkError::WriteError("simulated failure".to_string()));
        }
        state.outgoing.push(Bytes::copy_from_slice(frame));
        Ok(())
    }

    fn name(&self) -> &str {
        "MockInterface"
    }
}

/// Runtime control that counts start requests
#[derive(Debug, Clone, Default)]
pub struct RecordingRuntime {
    starts: Arc<AtomicUsize>,
    failing: Arc<AtomicBool>,
}

impl RecordingRuntime {
    /// Create a recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepted start requests
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    /// Reject start requests with HTTP 503
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl RuntimeControl for RecordingRuntime {
    async fn start(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(LinkError::RuntimeRejected { status: 503 });
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Clock that records every time it is asked to apply
#[derive(Debug, Clone, Default)]
pub struct RecordingClock {
    times: Arc<Mutex<Vec<DateTime<Utc>>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingClock {
    /// Create a recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Times applied successfully
    pub fn times(&self) -> Vec<DateTime<Utc>> {
        self.times.lock().clone()
    }

    /// Fail every update
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl ClockSync for RecordingClock {
    async fn set_time(&self, time: DateTime<Utc>) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(LinkError::ClockUpdateFailed("simulated failure".to_string()));
        }
        self.times.lock().push(time);
        Ok(())
    }
}

/// Test fixture wiring a bridge to in-memory collaborators
#[derive(Debug, Clone)]
pub struct TestFixture {
    /// Queue store
    pub store: Arc<MemoryStore>,
    /// Mock modem
    pub interface: MockInterface,
    /// Runtime recorder
    pub runtime: RecordingRuntime,
    /// Clock recorder
    pub clock: RecordingClock,
    /// Bridge configuration
    pub config: BridgeConfig,
}

impl TestFixture {
    /// Create a basic test fixture with a short reconnect delay
    pub fn new() -> Self {
        let mut config = BridgeConfigBuilder::new().build();
        config.reconnect.delay = Duration::from_millis(10);
        Self::with_config(config)
    }

    /// Create with a specific configuration
    pub fn with_config(config: BridgeConfig) -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            interface: MockInterface::new(),
            runtime: RecordingRuntime::new(),
            clock: RecordingClock::new(),
            config,
        }
    }

    /// Build a bridge sharing this fixture's store and recorders
    pub fn bridge(&self) -> (LoraBridge<MockInterface>, BridgeHandle) {
        LoraBridge::new(
            self.interface.clone(),
            self.store.clone(),
            &self.config,
            Box::new(self.runtime.clone()),
            Box::new(self.clock.clone()),
        )
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_interface_connect_disconnect() {
        let mut mock = MockInterface::new();
        assert!(!mock.is_connected());

        mock.connect().await.unwrap();
        assert!(mock.is_connected());
        assert_eq!(mock.connect_count(), 1);

        mock.disconnect().await.unwrap();
        assert!(!mock.is_connected());
    }

    #[tokio::test]
    async fn test_mock_interface_script_order() {
        let mut mock = MockInterface::new();
        mock.connect().await.unwrap();
        mock.push_lines(["tx_token", "LBTIME: 1"]);
        mock.push_read_error();

        assert_eq!(mock.read_line().await.unwrap().unwrap().as_ref(), b"tx_token");
        assert_eq!(mock.read_line().await.unwrap().unwrap().as_ref(), b"LBTIME: 1");
        assert!(matches!(mock.read_line().await, Err(LinkError::ReadError(_))));
        assert!(mock.script_drained());
    }

    #[tokio::test]
    async fn test_mock_interface_clones_share_state() {
        let mut mock = MockInterface::new();
        let observer = mock.clone();
        mock.connect().await.unwrap();
        mock.write_frame(&[6]).await.unwrap();

        assert!(observer.is_connected());
        assert_eq!(observer.take_frames(), vec![Bytes::from_static(&[6])]);
        assert!(observer.frames().is_empty());
    }

    #[tokio::test]
    async fn test_mock_interface_read_waits_for_push() {
        let mut mock = MockInterface::new();
        mock.connect().await.unwrap();
        let feeder = mock.clone();

        let reader = tokio::spawn(async move { mock.read_line().await });
        tokio::task::yield_now().await;
        feeder.push_line("tx_token");

        let line = reader.await.unwrap().unwrap().unwrap();
        assert_eq!(line.as_ref(), b"tx_token");
    }

    #[tokio::test]
    async fn test_mock_interface_simulated_errors() {
        let mut mock = MockInterface::new();
        mock.set_fail_connect(true);
        assert!(mock.connect().await.is_err());

        mock.set_fail_connect(false);
        mock.connect().await.unwrap();
        mock.set_fail_writes(true);
        assert!(matches!(
            mock.write_frame(&[1]).await,
            Err(LinkError::WriteError(_))
        ));
    }

    #[tokio::test]
    async fn test_recorders() {
        let runtime = RecordingRuntime::new();
        runtime.start().await.unwrap();
        runtime.set_failing(true);
        assert!(runtime.start().await.is_err());
        assert_eq!(runtime.starts(), 1);

        let clock = RecordingClock::new();
        let time = DateTime::from_timestamp(42, 0).unwrap();
        clock.set_time(time).await.unwrap();
        assert_eq!(clock.times(), vec![time]);
    }

    #[test]
    fn test_fixture_defaults() {
        let fixture = TestFixture::new();
        assert_eq!(fixture.config.reconnect.delay, Duration::from_millis(10));
        assert_eq!(fixture.store.blob_count(), 0);
    }
}
