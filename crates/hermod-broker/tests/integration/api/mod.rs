mod health;
mod ingest;
mod rpc;
mod sse;

use axum::body::Body;
use axum::http::Request;
use axum::response::Response;

/// Reads a response body as JSON.
pub(crate) async fn body_json(response: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("failed to read body");
    serde_json::from_slice(&bytes).expect("body is not JSON")
}

/// Builds a JSON-RPC tools/call request for /mcp.
pub(crate) fn rpc_request(id: serde_json::Value, tool: &str, arguments: serde_json::Value) -> Request<Body> {
    let envelope = serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "tools/call",
        "params": { "name": tool, "arguments": arguments },
    });

    Request::builder()
        .method("POST")
        .uri("/mcp")
        .header("content-type", "application/json")
        .body(Body::from(envelope.to_string()))
        .unwrap()
}
