//! LoRaBridge Node - LoRaWAN modem bridge with status server
//!
//! This binary runs the modem link for a LoRaBridge forwarder host:
//! - Serial link to the LoRaWAN modem (token-driven uplink, downlink commands)
//! - Redis-backed uplink queues and downlink command queue
//! - HTTP status endpoint for the automation runtime

mod server;

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use lorabridge_link::{
    runtime, BridgeConfig, BridgeConfigBuilder, BridgeHandle, LinkInterface, LoraBridge,
    RedisStore, ResyncPolicy, DEFAULT_BAUD_RATE, DEFAULT_SERIAL_PORT,
};

#[derive(Parser, Debug)]
#[command(name = "lorabridge-node")]
#[command(about = "LoRaWAN modem bridge for LoRaBridge forwarder hosts")]
struct Args {
    /// Serial port of the LoRaWAN modem
    #[arg(long, env = "SERIAL_PORT", default_value = DEFAULT_SERIAL_PORT)]
    serial_port: PathBuf,

    /// Serial baud rate
    #[arg(long, env = "BAUD_RATE", default_value_t = DEFAULT_BAUD_RATE)]
    baud_rate: u32,

    /// Redis host
    #[arg(long, env = "REDIS_HOST", default_value = "localhost")]
    redis_host: String,

    /// Redis port
    #[arg(long, env = "REDIS_PORT", default_value_t = 6379)]
    redis_port: u16,

    /// Redis database index
    #[arg(long, env = "REDIS_DB", default_value_t = 0)]
    redis_db: i64,

    /// Automation runtime control URL (runtime start is skipped when unset)
    #[arg(long, env = "RUNTIME_URL")]
    runtime_url: Option<String>,

    /// Status server port
    #[arg(long, env = "STATUS_PORT", default_value_t = 8080)]
    status_port: u16,

    /// Idle time before a heartbeat is sent (e.g. "60s", "2m")
    #[arg(long, env = "HEARTBEAT_INTERVAL", default_value = "60s", value_parser = humantime::parse_duration)]
    heartbeat_interval: Duration,

    /// Runtime start on repeated time values: "once" or "every_time_value"
    #[arg(long, env = "RESYNC_POLICY", default_value = "once")]
    resync_policy: ResyncPolicy,

    /// Apply received network time to the system clock
    #[arg(long, env = "SET_SYSTEM_CLOCK")]
    set_system_clock: bool,

    /// Exit instead of reconnecting after a serial error
    #[arg(long)]
    no_reconnect: bool,

    /// Enable verbose logging
    #[arg(long, short)]
    verbose: bool,
}

impl Args {
    fn bridge_config(&self) -> BridgeConfig {
        let mut builder = BridgeConfigBuilder::new()
            .serial_port(self.serial_port.clone())
            .baud_rate(self.baud_rate)
            .redis(self.redis_host.clone(), self.redis_port, self.redis_db)
            .heartbeat_interval(self.heartbeat_interval)
            .resync_policy(self.resync_policy)
            .set_system_clock(self.set_system_clock)
            .auto_reconnect(!self.no_reconnect);
        if let Some(url) = &self.runtime_url {
            builder = builder.runtime_url(url.clone());
        }
        builder.build()
    }
}

/// Application state shared across handlers
pub struct AppState {
    /// Handle to the running bridge
    pub bridge: BridgeHandle,
    /// Node start time
    pub start_time: Instant,
    /// Serial port the bridge drives
    pub serial_port: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose)?;

    let config = args.bridge_config();
    info!(
        version = lorabridge_link::VERSION,
        port = %config.interface.port.display(),
        baud = config.interface.baud_rate,
        "Starting LoRaBridge node"
    );

    #[cfg(feature = "serial")]
    {
        let interface = lorabridge_link::SerialInterface::from_config(&config.interface);
        run(config, args.status_port, interface).await
    }

    #[cfg(not(feature = "serial"))]
    {
        anyhow::bail!("lorabridge-node was built without the `serial` feature")
    }
}

/// Install the tracing subscriber; `RUST_LOG` overrides the default level
fn init_logging(verbose: bool) -> anyhow::Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Run the bridge and the status server until interrupted
#[cfg_attr(not(feature = "serial"), allow(dead_code))]
async fn run<I: LinkInterface + 'static>(
    config: BridgeConfig,
    status_port: u16,
    interface: I,
) -> anyhow::Result<()> {
    let store = RedisStore::connect(&config.store, config.queues.clone())
        .await
        .with_context(|| format!("connecting to queue store at {}", config.store.url()))?;
    let (runtime, clock) = runtime::from_config(&config.runtime)?;

    let (bridge, handle) = LoraBridge::new(interface, Arc::new(store), &config, runtime, clock);
    let mut bridge_task = tokio::spawn(bridge.run());

    let state = Arc::new(AppState {
        bridge: handle.clone(),
        start_time: Instant::now(),
        serial_port: config.interface.port.display().to_string(),
    });

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", status_port))
        .await
        .with_context(|| format!("binding status server to port {}", status_port))?;
    let actual_addr = listener.local_addr()?;

    info!("═══════════════════════════════════════════════════════════");
    info!("  Status server listening on http://{}", actual_addr);
    info!("  Runtime state: http://{}/api/state", actual_addr);
    info!("═══════════════════════════════════════════════════════════");

    let app = server::create_router(state);
    let server_task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "Status server error");
        }
    });

    let result = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupt received, shutting down");
            if let Err(e) = handle.shutdown().await {
                warn!(error = %e, "Bridge already stopped");
            }
            bridge_task.await?
        }
        joined = &mut bridge_task => joined?,
    };

    server_task.abort();
    result.context("bridge service failed")
}
