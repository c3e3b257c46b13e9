//! REST API endpoints

use axum::{extract::State, http::StatusCode, Json};
use lorabridge_link::{BridgeStats, LinkState, StatusReport};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

use crate::AppState;

/// Health check endpoint
pub async fn health() -> &'static str {
    "OK"
}

/// Runtime state: `{"state": "stop"}` during the handshake, `{"state": "start"}` after
pub async fn get_state(State(state): State<Arc<AppState>>) -> Json<StatusReport> {
    Json(state.bridge.status())
}

/// Bridge statistics
#[derive(Serialize)]
pub struct StatsResponse {
    /// Node version
    pub version: &'static str,
    /// Serial port the bridge drives
    pub serial_port: String,
    /// Current link state
    pub link_state: LinkState,
    /// Seconds since the node started
    pub uptime_seconds: u64,
    /// Counters reported by the bridge task
    pub bridge: BridgeStats,
}

/// Bridge statistics; 503 once the bridge task has stopped
pub async fn get_stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<StatsResponse>, StatusCode> {
    let bridge = state.bridge.stats().await.map_err(|e| {
        warn!(error = %e, "Bridge statistics unavailable");
        StatusCode::SERVICE_UNAVAILABLE
    })?;

    Ok(Json(StatsResponse {
        version: env!("CARGO_PKG_VERSION"),
        serial_port: state.serial_port.clone(),
        link_state: state.bridge.link_state(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        bridge,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lorabridge_link::{LoraBridge, MockInterface, RuntimeState, TestFixture};
    use std::time::Instant;

    fn app_state(fixture: &TestFixture) -> (Arc<AppState>, LoraBridge<MockInterface>) {
        let (bridge, handle) = fixture.bridge();
        let state = Arc::new(AppState {
            bridge: handle,
            start_time: Instant::now(),
            serial_port: "/dev/ttyACM0".to_string(),
        });
        (state, bridge)
    }

    #[tokio::test]
    async fn test_health() {
        assert_eq!(health().await, "OK");
    }

    #[tokio::test]
    async fn test_state_follows_handshake() {
        let fixture = TestFixture::new();
        let (state, mut bridge) = app_state(&fixture);

        let Json(report) = get_state(State(state.clone())).await;
        assert_eq!(report.state, RuntimeState::Stop);

        bridge.handle_line(b"LBTIME: 1700000000").await.unwrap();
        let Json(report) = get_state(State(state)).await;
        assert_eq!(report.state, RuntimeState::Start);
    }

    #[tokio::test]
    async fn test_stats_from_running_bridge() {
        let fixture = TestFixture::new();
        let (state, bridge) = app_state(&fixture);
        let task = tokio::spawn(bridge.run());

        fixture.interface.push_line("tx_token");
        assert!(fixture.interface.wait_for_frames(1).await);

        let Json(stats) = get_stats(State(state.clone())).await.unwrap();
        assert_eq!(stats.link_state, LinkState::Handshaking);
        assert_eq!(stats.bridge.timesync_requests, 1);
        assert_eq!(stats.serial_port, "/dev/ttyACM0");

        state.bridge.shutdown().await.unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_stats_unavailable_after_shutdown() {
        let fixture = TestFixture::new();
        let (state, bridge) = app_state(&fixture);
        drop(bridge);

        let result = get_stats(State(state)).await;
        assert_eq!(result.err(), Some(StatusCode::SERVICE_UNAVAILABLE));
    }
}
