/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Webhook ingest endpoint.
//!
//! `POST /webhook/{subscription_id}` hands the raw body to the pipeline and
//! maps its outcome onto HTTP. The body is opaque here: it is forwarded
//! verbatim for signature verification and filter input.

use crate::api::AppState;
use crate::pipeline::PipelineOutcome;
use crate::rate_limit::client_ip;
use axum::body::Bytes;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use hermod_utils::logging::prelude::*;
use std::net::SocketAddr;

/// Handles one webhook delivery.
pub async fn ingest(
    State(state): State<AppState>,
    Path(subscription_id): Path<String>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<serde_json::Value>) {
    let ip = client_ip(&headers, connect_info.map(|ci| ci.0));

    if !state.rate_limiter.check(&ip) {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(serde_json::json!({"error": "rate_limited"})),
        );
    }

    debug!(
        "Webhook delivery for subscription {} from {} ({} bytes)",
        subscription_id,
        ip,
        body.len()
    );

    // The pipeline runs in its own task: a sender that disconnects after
    // posting must not abort a half-finished delivery.
    let pipeline = state.pipeline.clone();
    let task_subscription_id = subscription_id.clone();
    let outcome = tokio::spawn(async move {
        pipeline
            .process(&task_subscription_id, &headers, &body)
            .await
    })
    .await;

    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("Pipeline task failed for {}: {}", subscription_id, e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "internal error"})),
            );
        }
    };

    match outcome {
        Ok(PipelineOutcome::Accepted) => (
            StatusCode::OK,
            Json(serde_json::json!({"status": "accepted"})),
        ),
        Ok(PipelineOutcome::Rejected(reason)) => (
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({"error": reason})),
        ),
        Ok(PipelineOutcome::NotFound) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "subscription not found"})),
        ),
        Err(e) => {
            error!(
                "Store error while processing delivery for {}: {:?}",
                subscription_id, e
            );
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "internal error"})),
            )
        }
    }
}
