/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Control plane: JSON-RPC tool dispatch and SSE notification fan-out.
//!
//! Agents manage their own subscriptions through `tools/call` requests on
//! the `/mcp` endpoint. Dispatch goes through a static registry of
//! `(name, handler)` pairs with a uniform params-in/result-out signature.
//! Every store change signal and tunnel transition is framed as an SSE event
//! and fanned out to the registered notification streams; a stream whose
//! client went away is dropped on the next failed write.

use crate::dal::DAL;
use crate::tunnel::{TunnelMode, TunnelStatus, TunnelSupervisor};
use crate::utils::event_bus::EventBus;
use futures::future::BoxFuture;
use hermod_models::models::subscriptions::{
    NewSubscription, UpdateSubscription, VALID_STATUSES,
};
use hermod_utils::logging::prelude::*;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::sync::mpsc;
use uuid::Uuid;

/// JSON-RPC 2.0 error codes used by the control plane.
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
    pub const RATE_LIMITED: i64 = -32000;
}

/// Buffered frames per notification stream before writes are skipped.
const STREAM_BUFFER: usize = 64;

/// A tool-level failure, mapped onto a JSON-RPC error.
#[derive(Debug)]
pub struct ToolError {
    pub code: i64,
    pub message: String,
}

impl ToolError {
    fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: codes::INVALID_PARAMS,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            code: codes::INTERNAL_ERROR,
            message: message.into(),
        }
    }
}

impl From<diesel::result::Error> for ToolError {
    fn from(e: diesel::result::Error) -> Self {
        match e {
            diesel::result::Error::NotFound => ToolError::invalid_params("not found"),
            other => ToolError::internal(format!("store error: {}", other)),
        }
    }
}

type ToolResult = Result<Value, ToolError>;

/// Uniform handler signature: parameters in, result or error out.
type ToolHandler = for<'a> fn(&'a ControlPlane, Value) -> BoxFuture<'a, ToolResult>;

/// The tool registry. Dispatch is a name lookup; handlers are plain
/// function pointers.
static TOOLS: &[(&str, ToolHandler)] = &[
    ("create_subscription", create_subscription),
    ("list_subscriptions", list_subscriptions),
    ("update_subscription", update_subscription),
    ("delete_subscription", delete_subscription),
    ("get_event_payload", get_event_payload),
    ("list_events", list_events),
    ("get_public_webhook_url", get_public_webhook_url),
    ("start_tunnel", start_tunnel),
    ("start_quick_tunnel", start_quick_tunnel),
    ("stop_tunnel", stop_tunnel),
    ("get_tunnel_status", get_tunnel_status),
];

/// The control plane shared by the RPC and SSE endpoints.
pub struct ControlPlane {
    dal: DAL,
    supervisor: TunnelSupervisor,
    local_port: u16,
    /// Registered notification streams.
    streams: Mutex<Vec<mpsc::Sender<String>>>,
}

impl ControlPlane {
    /// Creates a new control plane.
    ///
    /// # Arguments
    /// * `dal` - The store.
    /// * `supervisor` - The tunnel supervisor the tunnel tools delegate to.
    /// * `local_port` - Ingest port, used for webhook URLs when no tunnel is up.
    pub fn new(dal: DAL, supervisor: TunnelSupervisor, local_port: u16) -> Arc<Self> {
        Arc::new(Self {
            dal,
            supervisor,
            local_port,
            streams: Mutex::new(Vec::new()),
        })
    }

    /// Starts the task forwarding bus events to the notification streams.
    pub fn start_notification_fanout(control: &Arc<Self>, bus: &EventBus) {
        let control = Arc::clone(control);
        let mut rx = bus.subscribe();

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let frame =
                            format!("event: {}\ndata: {}\n\n", event.name(), event.data());
                        control.broadcast_frame(frame);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Notification fan-out lagged, skipped {} event(s)", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    /// Registers a new notification stream and returns its frame receiver.
    pub fn register_stream(&self) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        self.streams
            .lock()
            .expect("stream registry lock poisoned")
            .push(tx);
        rx
    }

    /// Pushes one frame to every registered stream, dropping closed ones.
    fn broadcast_frame(&self, frame: String) {
        let mut streams = self.streams.lock().expect("stream registry lock poisoned");
        streams.retain(|tx| match tx.try_send(frame.clone()) {
            Ok(()) => true,
            // A slow consumer keeps its stream; the signal is coalescable.
            Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    /// Handles one JSON-RPC request body and produces the response value.
    pub async fn handle_rpc(&self, body: &[u8]) -> Value {
        let parsed: Value = match serde_json::from_slice(body) {
            Ok(value) => value,
            Err(e) => {
                return error_response(Value::Null, codes::PARSE_ERROR, format!("parse error: {}", e))
            }
        };

        let (id, tool, arguments) = match validate_envelope(&parsed) {
            Ok(call) => call,
            Err((id, code, message)) => return error_response(id, code, message),
        };

        debug!("Dispatching tool call: {}", tool);

        match TOOLS.iter().find(|(name, _)| *name == tool) {
            None => error_response(
                id,
                codes::METHOD_NOT_FOUND,
                format!("unknown tool: {}", tool),
            ),
            Some((_, handler)) => match handler(self, arguments).await {
                Ok(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
                Err(e) => error_response(id, e.code, e.message),
            },
        }
    }

    /// Builds the public webhook URL for a subscription id: the tunnel's
    /// public host when one is up, the loopback ingest address otherwise.
    async fn webhook_url_for(&self, id: &str) -> String {
        match self.supervisor.public_url().await {
            Some(base) => format!("{}/webhook/{}", base.trim_end_matches('/'), id),
            None => format!("http://127.0.0.1:{}/webhook/{}", self.local_port, id),
        }
    }
}

/// Validates the JSON-RPC envelope of a tools/call request.
///
/// # Returns
/// The request id, tool name, and tool arguments; or the id/code/message of
/// the error response to send.
fn validate_envelope(parsed: &Value) -> Result<(Value, String, Value), (Value, i64, String)> {
    let id = parsed.get("id").cloned().unwrap_or(Value::Null);

    let method = match parsed.get("method").and_then(|m| m.as_str()) {
        Some(method) => method,
        None => {
            return Err((
                id,
                codes::INVALID_REQUEST,
                "missing method".to_string(),
            ))
        }
    };

    if method != "tools/call" {
        return Err((
            id,
            codes::METHOD_NOT_FOUND,
            format!("unknown method: {}", method),
        ));
    }

    let params = parsed.get("params").cloned().unwrap_or_else(|| json!({}));
    let tool = match params.get("name").and_then(|n| n.as_str()) {
        Some(tool) => tool.to_string(),
        None => {
            return Err((
                id,
                codes::INVALID_PARAMS,
                "missing tool name".to_string(),
            ))
        }
    };
    let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

    Ok((id, tool, arguments))
}

/// Builds a JSON-RPC error response.
pub fn error_response(id: Value, code: i64, message: impl Into<String>) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message.into() },
    })
}

fn status_json(status: &TunnelStatus) -> Value {
    let mut result = json!({ "status": status.state.as_str() });
    if let Some(url) = &status.public_url {
        result["public_url"] = json!(url);
    }
    result
}

// =============================================================================
// Tool Handlers
// =============================================================================

fn create_subscription<'a>(cp: &'a ControlPlane, args: Value) -> BoxFuture<'a, ToolResult> {
    Box::pin(cp.tool_create_subscription(args))
}

fn list_subscriptions<'a>(cp: &'a ControlPlane, args: Value) -> BoxFuture<'a, ToolResult> {
    Box::pin(cp.tool_list_subscriptions(args))
}

fn update_subscription<'a>(cp: &'a ControlPlane, args: Value) -> BoxFuture<'a, ToolResult> {
    Box::pin(cp.tool_update_subscription(args))
}

fn delete_subscription<'a>(cp: &'a ControlPlane, args: Value) -> BoxFuture<'a, ToolResult> {
    Box::pin(cp.tool_delete_subscription(args))
}

fn get_event_payload<'a>(cp: &'a ControlPlane, args: Value) -> BoxFuture<'a, ToolResult> {
    Box::pin(cp.tool_get_event_payload(args))
}

fn list_events<'a>(cp: &'a ControlPlane, args: Value) -> BoxFuture<'a, ToolResult> {
    Box::pin(cp.tool_list_events(args))
}

fn get_public_webhook_url<'a>(cp: &'a ControlPlane, args: Value) -> BoxFuture<'a, ToolResult> {
    Box::pin(cp.tool_get_public_webhook_url(args))
}

fn start_tunnel<'a>(cp: &'a ControlPlane, args: Value) -> BoxFuture<'a, ToolResult> {
    Box::pin(cp.tool_start_tunnel(args, TunnelMode::Named))
}

fn start_quick_tunnel<'a>(cp: &'a ControlPlane, args: Value) -> BoxFuture<'a, ToolResult> {
    Box::pin(cp.tool_start_tunnel(args, TunnelMode::Quick))
}

fn stop_tunnel<'a>(cp: &'a ControlPlane, args: Value) -> BoxFuture<'a, ToolResult> {
    Box::pin(cp.tool_stop_tunnel(args))
}

fn get_tunnel_status<'a>(cp: &'a ControlPlane, args: Value) -> BoxFuture<'a, ToolResult> {
    Box::pin(cp.tool_get_tunnel_status(args))
}

/// Arguments accepted by create_subscription.
#[derive(Debug, Deserialize)]
struct CreateArgs {
    session_id: String,
    #[serde(default)]
    service: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    hmac_secret: Option<String>,
    #[serde(default)]
    hmac_header: Option<String>,
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    jq_filter: Option<String>,
    #[serde(default)]
    summary_filter: Option<String>,
    #[serde(default)]
    one_shot: bool,
}

impl ControlPlane {
    async fn tool_create_subscription(&self, args: Value) -> ToolResult {
        let args: CreateArgs = serde_json::from_value(args)
            .map_err(|e| ToolError::invalid_params(format!("invalid arguments: {}", e)))?;

        let id = Uuid::new_v4().to_string();
        let webhook_url = self.webhook_url_for(&id).await;

        let new_subscription = NewSubscription::new(
            Some(id),
            args.session_id,
            webhook_url,
            args.hmac_secret,
            args.hmac_header,
            args.name,
            args.service,
            args.prompt,
            args.jq_filter,
            args.summary_filter,
            args.one_shot,
        )
        .map_err(ToolError::invalid_params)?;

        let subscription = self.dal.subscriptions().create(&new_subscription)?;
        info!("Created subscription {}", subscription.id);

        Ok(json!({
            "id": subscription.id,
            "webhook_url": subscription.webhook_url,
        }))
    }

    async fn tool_list_subscriptions(&self, args: Value) -> ToolResult {
        let subscriptions = match args.get("session_id").and_then(|v| v.as_str()) {
            Some(session_id) => self.dal.subscriptions().list_by_session(session_id)?,
            None => self.dal.subscriptions().list()?,
        };

        serde_json::to_value(subscriptions)
            .map_err(|e| ToolError::internal(format!("serialization failed: {}", e)))
    }

    async fn tool_update_subscription(&self, args: Value) -> ToolResult {
        let obj = args
            .as_object()
            .ok_or_else(|| ToolError::invalid_params("arguments must be an object"))?;
        let id = obj
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::invalid_params("missing id"))?
            .to_string();

        // Presence of a key means "set this field"; a null value clears it.
        let optional = |key: &str| -> Option<Option<String>> {
            obj.get(key).map(|v| v.as_str().map(String::from))
        };

        let status = match obj.get("status").and_then(|v| v.as_str()) {
            Some(status) if VALID_STATUSES.contains(&status) => Some(status.to_string()),
            Some(status) => {
                return Err(ToolError::invalid_params(format!(
                    "invalid status: {}",
                    status
                )))
            }
            None => None,
        };

        let update = UpdateSubscription {
            session_id: obj
                .get("session_id")
                .and_then(|v| v.as_str())
                .map(String::from),
            secret: optional("hmac_secret"),
            signature_header: optional("hmac_header"),
            display_name: optional("name"),
            service_tag: optional("service"),
            prompt: optional("prompt"),
            gate_expr: optional("jq_filter"),
            summary_expr: optional("summary_filter"),
            one_shot: obj.get("one_shot").and_then(|v| v.as_bool()),
            status,
        };

        for (field, value) in [("jq_filter", &update.gate_expr), ("summary_filter", &update.summary_expr)] {
            if matches!(value, Some(Some(expr)) if expr.trim().is_empty()) {
                return Err(ToolError::invalid_params(format!(
                    "{} cannot be empty",
                    field
                )));
            }
        }

        let untouched = update.session_id.is_none()
            && update.secret.is_none()
            && update.signature_header.is_none()
            && update.display_name.is_none()
            && update.service_tag.is_none()
            && update.prompt.is_none()
            && update.gate_expr.is_none()
            && update.summary_expr.is_none()
            && update.one_shot.is_none()
            && update.status.is_none();

        let subscription = if untouched {
            self.dal
                .subscriptions()
                .get(&id)?
                .ok_or_else(|| ToolError::invalid_params("subscription not found"))?
        } else {
            self.dal
                .subscriptions()
                .update_fields(&id, &update)
                .map_err(|e| match e {
                    diesel::result::Error::NotFound => {
                        ToolError::invalid_params("subscription not found")
                    }
                    other => other.into(),
                })?
        };

        serde_json::to_value(subscription)
            .map_err(|e| ToolError::internal(format!("serialization failed: {}", e)))
    }

    async fn tool_delete_subscription(&self, args: Value) -> ToolResult {
        let id = args
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::invalid_params("missing id"))?;

        let deleted = self.dal.subscriptions().delete(id)?;
        Ok(json!({ "deleted": deleted > 0 }))
    }

    async fn tool_get_event_payload(&self, args: Value) -> ToolResult {
        let event_id = args
            .get("event_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::invalid_params("missing event_id"))?;

        let event = self
            .dal
            .events()
            .get(event_id)?
            .ok_or_else(|| ToolError::invalid_params("event not found"))?;

        Ok(json!({ "payload": event.payload }))
    }

    async fn tool_list_events(&self, args: Value) -> ToolResult {
        let subscription_id = args
            .get("subscription_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::invalid_params("missing subscription_id"))?;
        let limit = args.get("limit").and_then(|v| v.as_i64()).unwrap_or(50);

        let events = self.dal.events().list(subscription_id, limit)?;
        serde_json::to_value(events)
            .map_err(|e| ToolError::internal(format!("serialization failed: {}", e)))
    }

    async fn tool_get_public_webhook_url(&self, args: Value) -> ToolResult {
        let subscription_id = args
            .get("subscription_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::invalid_params("missing subscription_id"))?;

        self.dal
            .subscriptions()
            .get(subscription_id)?
            .ok_or_else(|| ToolError::invalid_params("subscription not found"))?;

        Ok(json!({ "url": self.webhook_url_for(subscription_id).await }))
    }

    async fn tool_start_tunnel(&self, _args: Value, mode: TunnelMode) -> ToolResult {
        match self.supervisor.start(mode).await {
            Ok(status) => Ok(status_json(&status)),
            Err(e) => Err(ToolError::internal(e.to_string())),
        }
    }

    async fn tool_stop_tunnel(&self, _args: Value) -> ToolResult {
        let status = self.supervisor.stop().await;
        Ok(status_json(&status))
    }

    async fn tool_get_tunnel_status(&self, _args: Value) -> ToolResult {
        Ok(status_json(&self.supervisor.status().await))
    }
}
