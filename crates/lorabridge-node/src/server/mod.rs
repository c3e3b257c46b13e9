//! Status server
//!
//! This module provides the REST API the automation runtime polls to learn
//! whether the modem link has finished its handshake.

pub mod rest;

use axum::{routing::get, Router};
use std::sync::Arc;

use crate::AppState;

/// Create the server router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(rest::health))
        // Runtime state polled by the automation runtime
        .route("/api/state", get(rest::get_state))
        // Bridge counters
        .route("/api/stats", get(rest::get_stats))
        .with_state(state)
}
