//! Runtime state endpoint contract
//!
//! The automation runtime polls `GET /api/state` and only understands
//! `{"state": "stop"}` and `{"state": "start"}`.

use lorabridge_link::{LinkState, RuntimeState, StatusReport, TestFixture};
use serde_json::{json, Value};

#[test]
fn test_handshaking_reports_stop() {
    let body = serde_json::to_value(StatusReport::from(LinkState::Handshaking)).unwrap();
    assert_eq!(body, json!({ "state": "stop" }));
}

#[test]
fn test_normal_reports_start() {
    let body = serde_json::to_value(StatusReport::from(LinkState::Normal)).unwrap();
    assert_eq!(body, json!({ "state": "start" }));
}

#[test]
fn test_report_has_single_field() {
    let body = serde_json::to_value(StatusReport::from(LinkState::Normal)).unwrap();
    let object = body.as_object().unwrap();
    assert_eq!(object.len(), 1);
    assert!(object["state"].is_string());
}

#[test]
fn test_report_parses_back() {
    let report: StatusReport = serde_json::from_str(r#"{"state":"stop"}"#).unwrap();
    assert_eq!(report.state, RuntimeState::Stop);
    assert!(serde_json::from_str::<StatusReport>(r#"{"state":"paused"}"#).is_err());
}

#[tokio::test]
async fn test_handle_status_tracks_handshake() {
    let fixture = TestFixture::new();
    let (mut bridge, handle) = fixture.bridge();

    let before: Value = serde_json::to_value(handle.status()).unwrap();
    assert_eq!(before["state"], "stop");

    bridge.handle_line(b"tx_token").await.unwrap();
    assert_eq!(serde_json::to_value(handle.status()).unwrap()["state"], "stop");

    bridge.handle_line(b"LBTIME: 1700000000").await.unwrap();
    assert_eq!(serde_json::to_value(handle.status()).unwrap()["state"], "start");
}
