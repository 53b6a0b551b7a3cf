/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Control-plane HTTP endpoints.
//!
//! `POST /mcp` carries JSON-RPC 2.0 tool calls; `GET /mcp` opens the
//! server-sent-events notification stream. Both are rate limited like the
//! ingest path.

use crate::api::AppState;
use crate::control::{codes, error_response};
use crate::rate_limit::client_ip;
use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use hermod_utils::logging::prelude::*;
use std::convert::Infallible;
use std::net::SocketAddr;
use tokio_stream::wrappers::ReceiverStream;

/// Handles one JSON-RPC request.
pub async fn rpc(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<serde_json::Value>) {
    let ip = client_ip(&headers, connect_info.map(|ci| ci.0));

    if !state.rate_limiter.check(&ip) {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(error_response(
                serde_json::Value::Null,
                codes::RATE_LIMITED,
                "rate limited",
            )),
        );
    }

    if body.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(error_response(
                serde_json::Value::Null,
                codes::PARSE_ERROR,
                "empty request body",
            )),
        );
    }

    let response = state.control.handle_rpc(&body).await;
    (StatusCode::OK, Json(response))
}

/// Opens a server-sent-events notification stream.
pub async fn sse(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Response {
    let ip = client_ip(&headers, connect_info.map(|ci| ci.0));

    if !state.rate_limiter.check(&ip) {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(error_response(
                serde_json::Value::Null,
                codes::RATE_LIMITED,
                "rate limited",
            )),
        )
            .into_response();
    }

    info!("Notification stream opened by {}", ip);

    let frames = ReceiverStream::new(state.control.register_stream());
    let stream = futures::stream::once(async { ": connected\n\n".to_string() })
        .chain(frames)
        .map(|frame| Ok::<_, Infallible>(Bytes::from(frame)));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .header("X-Accel-Buffering", "no")
        .body(Body::from_stream(stream))
        .expect("static response parts are valid")
}
