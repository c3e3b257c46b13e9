//! Integration tests for lorabridge-node
//!
//! These tests pin the JSON contracts served by the status server.

mod stats_api;
mod status_api;
