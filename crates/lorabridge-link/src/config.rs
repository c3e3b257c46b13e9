//! Configuration types for the LoRaBridge link
//!
//! This module provides configuration structures for the serial interface,
//! the queue store, queue key names, link timing and the downstream runtime.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::store::DeviceId;

/// Default baud rate for the LoRaWAN modem
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Default serial port of the modem
pub const DEFAULT_SERIAL_PORT: &str = "/dev/ttyACM0";

/// Default heartbeat interval in seconds
pub const DEFAULT_HEARTBEAT_SECS: u64 = 60;

/// Default Redis port
pub const DEFAULT_REDIS_PORT: u16 = 6379;

/// Default number of entries pulled from one device per refill pass
pub const DEFAULT_REFILL_BATCH: usize = 16;

/// Main configuration for the bridge
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Serial interface configuration
    #[serde(default)]
    pub interface: InterfaceConfig,

    /// Queue store connection
    #[serde(default)]
    pub store: StoreConfig,

    /// Queue key names
    #[serde(default)]
    pub queues: QueueKeys,

    /// Handshake and heartbeat behavior
    #[serde(default)]
    pub link: LinkConfig,

    /// Downstream automation runtime
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Reconnection settings
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

/// Serial port settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceConfig {
    /// Path to serial port (e.g., /dev/ttyACM0)
    pub port: PathBuf,
    /// Baud rate (default: 115200)
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

impl Default for InterfaceConfig {
    fn default() -> Self {
        Self {
            port: PathBuf::from(DEFAULT_SERIAL_PORT),
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }
}

/// Redis connection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Host name
    pub host: String,
    /// Port
    pub port: u16,
    /// Database index
    pub db: i64,
}

impl StoreConfig {
    /// Connection URL for the redis client
    pub fn url(&self) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, self.db)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_REDIS_PORT,
            db: 0,
        }
    }
}

/// Names of the lists, sets and key patterns the bridge reads and writes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueKeys {
    /// System event queue
    pub system_events: String,
    /// User event queue
    pub user_events: String,
    /// Flow digest queue
    pub flow_digests: String,
    /// Device name queue
    pub device_names: String,
    /// Device join queue
    pub device_joins: String,
    /// Staging buffer ("launchpad") of pre-assembled sensor payloads
    pub staging: String,
    /// Downstream command queue for inbound commands
    pub commands: String,
    /// Set of devices with pending sensor data
    pub device_index: String,
    /// Prefix of per-device scored queues, followed by the device id
    pub device_queue_prefix: String,
    /// Prefix of payload blobs: `{prefix}{device}:message:{reference}`
    pub blob_prefix: String,
}

impl QueueKeys {
    /// Key of a device's scored queue
    pub fn device_queue(&self, device: &DeviceId) -> String {
        format!("{}{}", self.device_queue_prefix, device)
    }

    /// Key of a payload blob
    pub fn blob(&self, device: &DeviceId, reference: &str) -> String {
        format!("{}{}:message:{}", self.blob_prefix, device, reference)
    }
}

impl Default for QueueKeys {
    fn default() -> Self {
        Self {
            system_events: "lorabridge:events:system".to_string(),
            user_events: "lorabridge:events:user".to_string(),
            flow_digests: "lorabridge:flows:digest".to_string(),
            device_names: "lorabridge:device:name".to_string(),
            device_joins: "lorabridge:device:join".to_string(),
            staging: "lorabridge:launchpad".to_string(),
            commands: "lbcommands".to_string(),
            device_index: "lorabridge:device:index".to_string(),
            device_queue_prefix: "lorabridge:queue:".to_string(),
            blob_prefix: "lorabridge:device:".to_string(),
        }
    }
}

/// Whether a time value received while already synced restarts the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResyncPolicy {
    /// Start the runtime on the first handshake only
    #[default]
    Once,
    /// Start the runtime on every time value
    EveryTimeValue,
}

impl std::str::FromStr for ResyncPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "once" => Ok(ResyncPolicy::Once),
            "every_time_value" | "every" => Ok(ResyncPolicy::EveryTimeValue),
            other => Err(format!("unknown resync policy: {}", other)),
        }
    }
}

/// Handshake and heartbeat behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Idle time after which a heartbeat is sent on a token
    #[serde(with = "humantime_serde", default = "default_heartbeat_interval")]
    pub heartbeat_interval: Duration,

    /// Runtime start behavior on repeated time values
    #[serde(default)]
    pub resync_policy: ResyncPolicy,

    /// Maximum entries pulled from one device per staging refill
    #[serde(default = "default_refill_batch")]
    pub refill_batch_per_device: usize,
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(DEFAULT_HEARTBEAT_SECS)
}

fn default_refill_batch() -> usize {
    DEFAULT_REFILL_BATCH
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: default_heartbeat_interval(),
            resync_policy: ResyncPolicy::Once,
            refill_batch_per_device: DEFAULT_REFILL_BATCH,
        }
    }
}

/// Downstream automation runtime and clock settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// State-change endpoint; `None` disables the start call
    pub url: Option<String>,

    /// Request timeout
    #[serde(with = "humantime_serde", default = "default_runtime_timeout")]
    pub timeout: Duration,

    /// Apply received time values to the system clock
    #[serde(default)]
    pub set_system_clock: bool,
}

fn default_runtime_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout: default_runtime_timeout(),
            set_system_clock: false,
        }
    }
}

/// Reconnection behavior configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Reconnect to the serial port after a read error
    #[serde(default = "default_auto_reconnect")]
    pub enabled: bool,

    /// Delay before a reconnection attempt
    #[serde(with = "humantime_serde", default = "default_reconnect_delay")]
    pub delay: Duration,
}

fn default_auto_reconnect() -> bool {
    true
}

fn default_reconnect_delay() -> Duration {
    Duration::from_secs(2)
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            delay: default_reconnect_delay(),
        }
    }
}

/// Builder for BridgeConfig
#[derive(Debug, Default)]
pub struct BridgeConfigBuilder {
    config: BridgeConfig,
}

impl BridgeConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set serial port path
    pub fn serial_port(mut self, port: impl Into<PathBuf>) -> Self {
        self.config.interface.port = port.into();
        self
    }

    /// Set baud rate
    pub fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.config.interface.baud_rate = baud_rate;
        self
    }

    /// Set Redis connection parameters
    pub fn redis(mut self, host: impl Into<String>, port: u16, db: i64) -> Self {
        self.config.store = StoreConfig {
            host: host.into(),
            port,
            db,
        };
        self
    }

    /// Override queue key names
    pub fn queues(mut self, queues: QueueKeys) -> Self {
        self.config.queues = queues;
        self
    }

    /// Set heartbeat interval
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.link.heartbeat_interval = interval;
        self
    }

    /// Set resync policy
    pub fn resync_policy(mut self, policy: ResyncPolicy) -> Self {
        self.config.link.resync_policy = policy;
        self
    }

    /// Set per-device refill batch (at least 1)
    pub fn refill_batch_per_device(mut self, batch: usize) -> Self {
        self.config.link.refill_batch_per_device = batch.max(1);
        self
    }

    /// Set runtime control endpoint
    pub fn runtime_url(mut self, url: impl Into<String>) -> Self {
        self.config.runtime.url = Some(url.into());
        self
    }

    /// Enable or disable system clock updates
    pub fn set_system_clock(mut self, enabled: bool) -> Self {
        self.config.runtime.set_system_clock = enabled;
        self
    }

    /// Enable or disable auto-reconnect
    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.config.reconnect.enabled = enabled;
        self
    }

    /// Build the configuration
    pub fn build(self) -> BridgeConfig {
        self.config
    }
}

// Custom serde module for Duration with humantime
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
