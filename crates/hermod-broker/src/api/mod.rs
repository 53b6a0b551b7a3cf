/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # API Routes Aggregator Module
//!
//! This module aggregates all HTTP routes of the ingress server: the webhook
//! ingest endpoint, the control-plane RPC endpoint with its SSE companion,
//! and the health check. The server binds loopback; reachability from the
//! internet goes through the tunnel child.

use axum::extract::{DefaultBodyLimit, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;

use crate::control::ControlPlane;
use crate::pipeline::Pipeline;
use crate::rate_limit::RateLimiter;

pub mod control;
pub mod webhook;

/// Shared state for the application
///
/// This struct holds the handles every route handler needs: the webhook
/// pipeline, the control plane, and the rate limiter.
#[derive(Clone)]
pub struct AppState {
    /// The webhook processing pipeline.
    pub pipeline: Pipeline,
    /// The control plane behind /mcp.
    pub control: Arc<ControlPlane>,
    /// Per-IP admission control.
    pub rate_limiter: RateLimiter,
    /// Server name reported by the health endpoint.
    pub server_name: String,
}

/// Configures and returns the main application router with all API routes
///
/// # Arguments
///
/// * `state` - The shared application state
/// * `max_body_bytes` - Request body size cap
///
/// # Returns
///
/// Returns a configured `Router` instance that includes all API routes.
pub fn configure_api_routes(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhook/:subscription_id", post(webhook::ingest))
        .route("/mcp", post(control::rpc).get(control::sse))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
}

/// Health check endpoint handler
///
/// # Returns
///
/// Returns a 200 OK status code with the server name and current time.
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "server": state.server_name,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
