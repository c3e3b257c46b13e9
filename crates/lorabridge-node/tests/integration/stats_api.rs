//! Statistics endpoint contract
//!
//! `GET /api/stats` embeds the bridge counters; these tests verify the
//! field layout produced by a live bridge.

use bytes::Bytes;
use lorabridge_link::{BridgeStats, TestFixture};
use serde_json::Value;

#[test]
fn test_empty_stats_layout() {
    let body = serde_json::to_value(BridgeStats::default()).unwrap();

    for field in [
        "frames_sent",
        "heartbeats",
        "timesync_requests",
        "idle_tokens",
        "write_errors",
        "interface_errors",
        "reconnects",
        "clock_failures",
        "runtime_starts",
        "runtime_start_failures",
    ] {
        assert_eq!(body[field], 0, "field {}", field);
    }
    assert!(body["router"].is_object());
    assert!(body["multiplexer"].is_object());
}

#[tokio::test]
async fn test_stats_after_traffic() {
    let fixture = TestFixture::new();
    fixture
        .store
        .push_list(&fixture.config.queues.system_events, Bytes::from_static(b"e"));
    let (bridge, handle) = fixture.bridge();
    let task = tokio::spawn(bridge.run());

    fixture
        .interface
        .push_lines(["tx_token", "LBTIME: 1700000000", "tx_token", "LBDATA: 01"]);
    assert!(fixture.interface.wait_for_frames(2).await);

    let stats = handle.stats().await.unwrap();
    let body: Value = serde_json::to_value(&stats).unwrap();

    assert_eq!(body["frames_sent"], 2);
    assert_eq!(body["runtime_starts"], 1);
    assert_eq!(body["router"]["tokens"], 2);
    assert_eq!(body["router"]["time_values"], 1);
    assert_eq!(body["multiplexer"]["system_events"], 1);

    handle.shutdown().await.unwrap();
    task.await.unwrap().unwrap();
}
