use super::{body_json, rpc_request};
use crate::fixtures::TestFixture;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use hermod_models::models::subscriptions::STATUS_PAUSED;
use serde_json::json;
use tower::ServiceExt;

#[tokio::test]
async fn test_create_subscription_returns_id_and_url() {
    let fixture = TestFixture::new();
    let app = fixture.router(100);

    let response = app
        .oneshot(rpc_request(
            json!(1),
            "create_subscription",
            json!({
                "session_id": "session-1",
                "service": "github",
                "hmac_secret": "abc",
                "jq_filter": r#"select(.action == "opened")"#,
                "summary_filter": "{branch: .ref}",
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["jsonrpc"], "2.0");
    assert_eq!(body["id"], 1);

    let id = body["result"]["id"].as_str().unwrap();
    let url = body["result"]["webhook_url"].as_str().unwrap();
    assert!(url.ends_with(&format!("/webhook/{}", id)));

    // The record actually landed in the store.
    let stored = fixture.dal.subscriptions().get(id).unwrap().unwrap();
    assert_eq!(stored.session_id, "session-1");
    assert_eq!(stored.secret.as_deref(), Some("abc"));
    assert_eq!(stored.gate_expr.as_deref(), Some(r#"select(.action == "opened")"#));
}

#[tokio::test]
async fn test_create_subscription_requires_session_id() {
    let fixture = TestFixture::new();
    let app = fixture.router(100);

    let response = app
        .oneshot(rpc_request(json!(2), "create_subscription", json!({})))
        .await
        .unwrap();

    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], -32602);
}

#[tokio::test]
async fn test_list_subscriptions_filters_by_session() {
    let fixture = TestFixture::new();
    fixture.insert_test_subscription("session-a");
    fixture.insert_test_subscription("session-b");
    let app = fixture.router(100);

    let response = app
        .clone()
        .oneshot(rpc_request(
            json!(3),
            "list_subscriptions",
            json!({ "session_id": "session-a" }),
        ))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["result"].as_array().unwrap().len(), 1);

    let response = app
        .oneshot(rpc_request(json!(4), "list_subscriptions", json!({})))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["result"].as_array().unwrap().len(), 2);
    // Secrets never leave the control plane.
    assert!(body["result"][0].get("secret").is_none());
}

#[tokio::test]
async fn test_update_subscription_partial_and_clear() {
    let fixture = TestFixture::new();
    let subscription = fixture.insert_subscription_with("session-1", |sub| {
        sub.summary_expr = Some("{ref: .ref}".to_string());
    });
    let app = fixture.router(100);

    let response = app
        .oneshot(rpc_request(
            json!(5),
            "update_subscription",
            json!({
                "id": subscription.id,
                "status": "paused",
                "summary_filter": null,
            }),
        ))
        .await
        .unwrap();

    let body = body_json(response).await;
    assert_eq!(body["result"]["status"], "paused");
    assert_eq!(body["result"]["summary_expr"], serde_json::Value::Null);

    let stored = fixture
        .dal
        .subscriptions()
        .get(&subscription.id)
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, STATUS_PAUSED);
    assert!(stored.summary_expr.is_none());
    // Untouched fields survive.
    assert_eq!(stored.session_id, "session-1");
}

#[tokio::test]
async fn test_update_unknown_subscription_is_an_error() {
    let fixture = TestFixture::new();
    let app = fixture.router(100);

    let response = app
        .oneshot(rpc_request(
            json!(6),
            "update_subscription",
            json!({ "id": "missing", "status": "paused" }),
        ))
        .await
        .unwrap();

    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], -32602);
}

#[tokio::test]
async fn test_delete_subscription_is_idempotent() {
    let fixture = TestFixture::new();
    let subscription = fixture.insert_test_subscription("session-1");
    let app = fixture.router(100);

    let response = app
        .clone()
        .oneshot(rpc_request(
            json!(7),
            "delete_subscription",
            json!({ "id": subscription.id }),
        ))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["result"]["deleted"], true);

    let response = app
        .oneshot(rpc_request(
            json!(8),
            "delete_subscription",
            json!({ "id": subscription.id }),
        ))
        .await
        .unwrap();
    // Second delete still succeeds.
    assert_eq!(body_json(response).await["result"]["deleted"], false);
}

#[tokio::test]
async fn test_get_event_payload_round_trip() {
    let fixture = TestFixture::new();
    let subscription = fixture.insert_test_subscription("session-1");
    let event = fixture
        .dal
        .events()
        .create(
            &hermod_models::models::events::NewEvent::new(
                subscription.id.clone(),
                r#"{"full":"payload"}"#.to_string(),
                "accepted".to_string(),
                false,
            )
            .unwrap(),
        )
        .unwrap();
    let app = fixture.router(100);

    let response = app
        .oneshot(rpc_request(
            json!(9),
            "get_event_payload",
            json!({ "event_id": event.id }),
        ))
        .await
        .unwrap();

    let body = body_json(response).await;
    assert_eq!(body["result"]["payload"], r#"{"full":"payload"}"#);
}

#[tokio::test]
async fn test_get_public_webhook_url_without_tunnel_uses_loopback() {
    let fixture = TestFixture::new();
    let subscription = fixture.insert_test_subscription("session-1");
    let app = fixture.router(100);

    let response = app
        .oneshot(rpc_request(
            json!(10),
            "get_public_webhook_url",
            json!({ "subscription_id": subscription.id }),
        ))
        .await
        .unwrap();

    let body = body_json(response).await;
    assert_eq!(
        body["result"]["url"],
        format!("http://127.0.0.1:7842/webhook/{}", subscription.id)
    );
}

#[tokio::test]
async fn test_get_tunnel_status_starts_inactive() {
    let fixture = TestFixture::new();
    let app = fixture.router(100);

    let response = app
        .oneshot(rpc_request(json!(11), "get_tunnel_status", json!({})))
        .await
        .unwrap();

    let body = body_json(response).await;
    assert_eq!(body["result"]["status"], "inactive");
    assert!(body["result"].get("public_url").is_none());
}

#[tokio::test]
async fn test_parse_error_answers_null_id() {
    let fixture = TestFixture::new();
    let app = fixture.router(100);

    let request = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], -32700);
    assert_eq!(body["id"], serde_json::Value::Null);
}

#[tokio::test]
async fn test_empty_body_is_400() {
    let fixture = TestFixture::new();
    let app = fixture.router(100);

    let request = Request::builder()
        .method("POST")
        .uri("/mcp")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"]["code"], -32700);
}

#[tokio::test]
async fn test_unknown_method_and_tool() {
    let fixture = TestFixture::new();
    let app = fixture.router(100);

    let request = Request::builder()
        .method("POST")
        .uri("/mcp")
        .body(Body::from(
            json!({ "jsonrpc": "2.0", "id": 12, "method": "resources/list" }).to_string(),
        ))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], -32601);
    assert_eq!(body["id"], 12);

    let response = app
        .oneshot(rpc_request(json!(13), "no_such_tool", json!({})))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], -32601);
}

#[tokio::test]
async fn test_rate_limited_rpc_answers_32000() {
    let fixture = TestFixture::new();
    let app = fixture.router(1);

    let ok = app
        .clone()
        .oneshot(rpc_request(json!(14), "get_tunnel_status", json!({})))
        .await
        .unwrap();
    assert_eq!(ok.status(), StatusCode::OK);

    let limited = app
        .oneshot(rpc_request(json!(15), "get_tunnel_status", json!({})))
        .await
        .unwrap();
    assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body_json(limited).await["error"]["code"], -32000);
}
