//! LoRaWAN modem link for LoRaBridge
//!
//! This crate drives the serial link between a LoRaBridge forwarder host and
//! its LoRaWAN modem. The modem grants one transmit opportunity at a time by
//! sending a token line; the bridge answers each token with at most one
//! binary frame chosen from Redis-backed queues, and routes everything the
//! modem sends back (time values, downlink commands) to where it belongs.
//!
//! # Architecture
//!
//! The bridge operates in four layers:
//!
//! 1. **Physical Interface** - line-oriented serial connection to the modem
//! 2. **Wire Codec** - tagged uplink frames and inbound line classification
//! 3. **Link Logic** - handshake, heartbeat, uplink priority, downlink routing
//! 4. **Integration** - Redis queues, runtime control, system clock
//!
//! # Quick Start
//!
//! ```rust,ignore
//! // Enable the `serial` feature to use SerialInterface
//! use lorabridge_link::{runtime, BridgeConfigBuilder, LoraBridge, RedisStore, SerialInterface};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BridgeConfigBuilder::new()
//!         .serial_port("/dev/ttyACM0")
//!         .runtime_url("http://localhost:1880/lorabridge/state")
//!         .build();
//!
//!     let store = Arc::new(RedisStore::connect(&config.store, config.queues.clone()).await?);
//!     let (runtime, clock) = runtime::from_config(&config.runtime)?;
//!     let interface = SerialInterface::from_config(&config.interface);
//!
//!     let (bridge, handle) = LoraBridge::new(interface, store, &config, runtime, clock);
//!     let task = tokio::spawn(bridge.run());
//!
//!     tokio::signal::ctrl_c().await?;
//!     handle.shutdown().await?;
//!     task.await??;
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! - `serial` - Serial port interface via `tokio-serial`
//!
//! # Link Protocol
//!
//! ## Modem → host (text lines)
//!
//! - `tx_token` - one transmit opportunity
//! - `LBTIME: <epoch seconds>` - current network time
//! - `LBDATA: <body>` - downlink command, forwarded to `lbcommands`
//!
//! ## Host → modem (binary frames)
//!
//! One tag byte followed by the raw payload. Tags:
//!
//! | Tag | Frame            |
//! |-----|------------------|
//! | 1   | timesync request |
//! | 2   | system event     |
//! | 3   | user event       |
//! | 4   | flow digest      |
//! | 5   | device join      |
//! | 6   | heartbeat        |
//! | 7   | sensor data      |
//! | 8   | device name      |

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

// Core modules
pub mod codec;
pub mod config;
pub mod error;
pub mod interface;
pub mod store;

// Link logic
pub mod link;
pub mod multiplexer;
pub mod router;
pub mod runtime;

// Service
pub mod bridge;

// Testing utilities
pub mod test_utils;

pub use codec::{decode_inbound, Frame, FrameType, Inbound};
pub use config::{
    BridgeConfig, BridgeConfigBuilder, InterfaceConfig, LinkConfig, QueueKeys, ReconnectConfig,
    ResyncPolicy, RuntimeConfig, StoreConfig,
};
pub use error::{LinkError, Result};
pub use interface::{ConnectionState, LineBuffer, LinkInterface};

#[cfg(feature = "serial")]
pub use interface::SerialInterface;

pub use link::{LinkState, LinkStateMachine, LinkStateReader, RuntimeState, StatusReport};
pub use multiplexer::{MultiplexerStats, UplinkMultiplexer};
pub use router::{Dispatch, DownlinkRouter, RouterStats};
pub use runtime::{ClockSync, HttpRuntimeControl, LogOnlyClock, NoRuntime, RuntimeControl, SystemClock};
pub use store::{DeviceId, MemoryStore, QueueStore, RedisStore, ScoredRef, StoreError, StoreOutcome};

pub use bridge::{BridgeHandle, BridgeStats, LoraBridge};

pub use test_utils::{MockInterface, RecordingClock, RecordingRuntime, TestFixture};

// Protocol constants re-exports
pub use codec::{COMMAND_MARKER, TIME_MARKER, TOKEN_MARKER};
pub use config::{DEFAULT_BAUD_RATE, DEFAULT_HEARTBEAT_SECS, DEFAULT_SERIAL_PORT};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
