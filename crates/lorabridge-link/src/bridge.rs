//! LoraBridge - modem link service
//!
//! This module provides the main service that drives the LoRaWAN modem link.
//! A single task reads lines from the modem and handles each one completely
//! before reading the next:
//!
//! - Token → pick the next uplink frame and write it to the modem
//! - Time value → set the clock, finish the handshake, start the runtime
//! - Command → push the body onto the downstream command queue
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           LoraBridge                             │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  ┌───────────┐  lines  ┌──────────────────┐  push  ┌──────────┐  │
//! │  │ Modem     │────────►│ DownlinkRouter   │───────►│          │  │
//! │  │ (Serial)  │         └──────────────────┘        │ Queue    │  │
//! │  │           │  frame  ┌──────────────────┐  pop   │ Store    │  │
//! │  │           │◄────────│ LinkStateMachine │◄───────│ (Redis)  │  │
//! │  └───────────┘         │ + Multiplexer    │        └──────────┘  │
//! │                        └──────────────────┘                      │
//! │                                 │                                │
//! │                                 ▼                                │
//! │                     RuntimeControl / ClockSync                   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use lorabridge_link::{runtime, BridgeConfig, LoraBridge, RedisStore, SerialInterface};
//!
//! let config = BridgeConfig::default();
//! let store = Arc::new(RedisStore::connect(&config.store, config.queues.clone()).await?);
//! let (runtime, clock) = runtime::from_config(&config.runtime)?;
//! let interface = SerialInterface::from_config(&config.interface);
//!
//! let (bridge, handle) = LoraBridge::new(interface, store, &config, runtime, clock);
//! tokio::spawn(bridge.run());
//! ```

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::codec::{Frame, FrameType};
use crate::config::{BridgeConfig, ReconnectConfig};
use crate::error::{LinkError, Result};
use crate::interface::LinkInterface;
use crate::link::{LinkState, LinkStateMachine, LinkStateReader, StatusReport};
use crate::multiplexer::{MultiplexerStats, UplinkMultiplexer};
use crate::router::{Dispatch, DownlinkRouter, RouterStats};
use crate::runtime::{ClockSync, RuntimeControl};
use crate::store::QueueStore;

/// Commands that can be sent to the bridge
#[derive(Debug)]
pub enum BridgeCommand {
    /// Get bridge statistics
    GetStats(oneshot::Sender<BridgeStats>),
    /// Shutdown the bridge
    Shutdown,
}

/// Bridge statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BridgeStats {
    /// Frames written to the modem
    pub frames_sent: u64,
    /// Heartbeat frames among them
    pub heartbeats: u64,
    /// Time sync requests among them
    pub timesync_requests: u64,
    /// Tokens that produced no frame
    pub idle_tokens: u64,
    /// Frame writes that failed
    pub write_errors: u64,
    /// Interface read errors
    pub interface_errors: u64,
    /// Successful reconnects
    pub reconnects: u64,
    /// Clock updates that failed
    pub clock_failures: u64,
    /// Runtime start requests accepted
    pub runtime_starts: u64,
    /// Runtime start requests that failed
    pub runtime_start_failures: u64,
    /// Inbound line counters
    pub router: RouterStats,
    /// Uplink selection counters
    pub multiplexer: MultiplexerStats,
}

/// Handle for controlling the LoraBridge
#[derive(Debug, Clone)]
pub struct BridgeHandle {
    command_tx: mpsc::Sender<BridgeCommand>,
    state: LinkStateReader,
}

impl BridgeHandle {
    /// Current link state, answered without involving the bridge task
    pub fn link_state(&self) -> LinkState {
        self.state.get()
    }

    /// Status report for the automation runtime
    pub fn status(&self) -> StatusReport {
        self.state.report()
    }

    /// Get bridge statistics
    pub async fn stats(&self) -> Result<BridgeStats> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(BridgeCommand::GetStats(tx))
            .await
            .map_err(|_| LinkError::ChannelClosed)?;
        rx.await.map_err(|_| LinkError::ChannelClosed)
    }

    /// Shutdown the bridge
    pub async fn shutdown(&self) -> Result<()> {
        self.command_tx
            .send(BridgeCommand::Shutdown)
            .await
            .map_err(|_| LinkError::ChannelClosed)
    }
}

/// Main service driving the modem link
pub struct LoraBridge<I: LinkInterface> {
    /// Modem interface
    interface: I,
    /// Handshake and heartbeat logic
    link: LinkStateMachine,
    /// Uplink frame selection
    multiplexer: UplinkMultiplexer,
    /// Inbound line handling
    router: DownlinkRouter,
    /// Automation runtime control
    runtime: Box<dyn RuntimeControl>,
    /// Host clock
    clock: Box<dyn ClockSync>,
    /// Command receiver
    command_rx: mpsc::Receiver<BridgeCommand>,
    /// Reconnect behavior on interface errors
    reconnect: ReconnectConfig,
    /// Bridge statistics
    stats: BridgeStats,
}

impl<I: LinkInterface + 'static> LoraBridge<I> {
    /// Create a new bridge over an interface and a queue store
    pub fn new(
        interface: I,
        store: Arc<dyn QueueStore>,
        config: &BridgeConfig,
        runtime: Box<dyn RuntimeControl>,
        clock: Box<dyn ClockSync>,
    ) -> (Self, BridgeHandle) {
        let link = LinkStateMachine::new(&config.link);
        let multiplexer = UplinkMultiplexer::new(
            store.clone(),
            config.queues.clone(),
            config.link.refill_batch_per_device,
        );
        let router = DownlinkRouter::new(store, config.queues.commands.clone());

        let (command_tx, command_rx) = mpsc::channel(32);
        let handle = BridgeHandle {
            command_tx,
            state: link.reader(),
        };

        let bridge = Self {
            interface,
            link,
            multiplexer,
            router,
            runtime,
            clock,
            command_rx,
            reconnect: config.reconnect.clone(),
            stats: BridgeStats::default(),
        };

        (bridge, handle)
    }

    /// Read-only view of the link state
    pub fn state_reader(&self) -> LinkStateReader {
        self.link.reader()
    }

    /// Current link state
    pub fn link_state(&self) -> LinkState {
        self.link.state()
    }

    /// Snapshot of the statistics
    pub fn stats(&self) -> BridgeStats {
        BridgeStats {
            router: self.router.stats().clone(),
            multiplexer: self.multiplexer.stats().clone(),
            ..self.stats.clone()
        }
    }

    /// Run the bridge service
    ///
    /// Connects to the modem, then handles inbound lines and control
    /// commands until shutdown is requested or the modem cannot be
    /// reconnected. The interface is disconnected on every exit path.
    pub async fn run(mut self) -> Result<()> {
        info!(interface = self.interface.name(), "Starting LoRa bridge service");

        self.interface.connect().await?;
        info!("Connected to modem, waiting for first token");

        let result = self.event_loop().await;

        if let Err(e) = self.interface.disconnect().await {
            warn!(error = %e, "Error disconnecting from modem");
        }

        match &result {
            Ok(()) => info!("LoRa bridge stopped"),
            Err(e) => error!(error = %e, "LoRa bridge stopped with error"),
        }
        result
    }

    async fn event_loop(&mut self) -> Result<()> {
        loop {
            tokio::select! {
                line_result = self.interface.read_line() => {
                    match line_result {
                        Ok(Some(line)) => {
                            if let Err(e) = self.handle_line(&line).await {
                                warn!(error = %e, "Failed to write frame to modem");
                                self.try_reconnect().await?;
                            }
                        }
                        Ok(None) => {
                            trace!("No complete line available");
                        }
                        Err(e) => {
                            warn!(error = %e, "Error reading from modem");
                            self.stats.interface_errors += 1;
                            self.try_reconnect().await?;
                        }
                    }
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        BridgeCommand::GetStats(tx) => {
                            let _ = tx.send(self.stats());
                        }
                        BridgeCommand::Shutdown => {
                            info!("Bridge shutdown requested");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    /// Handle one inbound line completely.
    ///
    /// Only a failed frame write is returned as an error; every other
    /// failure is logged and counted.
    pub async fn handle_line(&mut self, line: &[u8]) -> Result<()> {
        match self.router.classify_and_dispatch(line).await {
            Dispatch::Token => self.on_token().await,
            Dispatch::TimeValue(time) => {
                if let Err(e) = self.clock.set_time(time).await {
                    warn!(error = %e, "Failed to apply network time");
                    self.stats.clock_failures += 1;
                }
                if self.link.on_time_synced() {
                    self.start_runtime().await;
                }
                Ok(())
            }
            Dispatch::CommandForwarded
            | Dispatch::CommandDropped
            | Dispatch::InvalidTime(_)
            | Dispatch::Ignored => Ok(()),
        }
    }

    async fn on_token(&mut self) -> Result<()> {
        let Some(frame) = self.link.on_token(&mut self.multiplexer, Instant::now()).await else {
            self.stats.idle_tokens += 1;
            return Ok(());
        };
        self.send_frame(&frame).await?;
        self.link.on_frame_sent(&frame, Instant::now());
        Ok(())
    }

    async fn send_frame(&mut self, frame: &Frame) -> Result<()> {
        let encoded = frame.encode();
        if let Err(e) = self.interface.write_frame(&encoded).await {
            self.stats.write_errors += 1;
            return Err(e);
        }

        debug!(frame_type = %frame.frame_type, size = encoded.len(), "Sent frame to modem");
        self.stats.frames_sent += 1;
        match frame.frame_type {
            FrameType::Heartbeat => self.stats.heartbeats += 1,
            FrameType::TimesyncRequest => self.stats.timesync_requests += 1,
            _ => {}
        }
        Ok(())
    }

    async fn start_runtime(&mut self) {
        match self.runtime.start().await {
            Ok(()) => self.stats.runtime_starts += 1,
            Err(e) => {
                warn!(error = %e, code = e.error_code(), "Failed to start automation runtime");
                self.stats.runtime_start_failures += 1;
            }
        }
    }

    /// Try to reconnect to the modem
    async fn try_reconnect(&mut self) -> Result<()> {
        if !self.reconnect.enabled {
            return Err(LinkError::Disconnected);
        }

        warn!(delay = ?self.reconnect.delay, "Attempting to reconnect to modem...");

        // Disconnect first (ignore errors)
        let _ = self.interface.disconnect().await;

        tokio::time::sleep(self.reconnect.delay).await;

        self.interface.connect().await?;
        self.stats.reconnects += 1;

        info!(state = %self.link.state(), "Successfully reconnected to modem");
        Ok(())
    }
}

impl<I: LinkInterface> std::fmt::Debug for LoraBridge<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoraBridge")
            .field("interface", &self.interface.name())
            .field("state", &self.link.state())
            .field("reconnect", &self.reconnect)
            .finish()
    }
}
