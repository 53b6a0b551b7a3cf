use super::body_json;
use crate::fixtures::{sign, TestFixture};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use hermod_models::models::events::{VERIFICATION_ACCEPTED, VERIFICATION_REJECTED};
use hermod_models::models::subscriptions::STATUS_PAUSED;
use tower::ServiceExt;

fn webhook_post(subscription_id: &str, body: &[u8]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/webhook/{}", subscription_id))
        .header("content-type", "application/json")
        .body(Body::from(body.to_vec()))
        .unwrap()
}

#[tokio::test]
async fn test_unknown_subscription_is_404() {
    let fixture = TestFixture::new();
    let app = fixture.router(100);

    let response = app.oneshot(webhook_post("missing", b"{}")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_offline_session_accepts_and_queues() {
    let fixture = TestFixture::new();
    let subscription = fixture.insert_test_subscription("offline-session");
    let app = fixture.router(100);

    let response = app
        .oneshot(webhook_post(&subscription.id, br#"{"hello":"world"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "accepted");

    // One audit row, not yet injected; one queued frame.
    let events = fixture.dal.events().list(&subscription.id, 10).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].verification_result, VERIFICATION_ACCEPTED);
    assert!(!events[0].injected);

    let queued = fixture
        .dal
        .queued_events()
        .list_for_session("offline-session")
        .unwrap();
    assert_eq!(queued.len(), 1);
    assert!(queued[0].framed_payload.contains("<payload>"));
}

#[tokio::test]
async fn test_invalid_signature_is_403_and_logged() {
    let fixture = TestFixture::new();
    let subscription = fixture.insert_subscription_with("session-1", |sub| {
        sub.secret = Some("abc".to_string());
    });
    let mut session_rx = fixture.start_session_server("session-1");
    let app = fixture.router(100);

    // Signature computed over a different body.
    let request = Request::builder()
        .method("POST")
        .uri(format!("/webhook/{}", subscription.id))
        .header("X-Hub-Signature-256", sign("abc", br#"{"ref":"other"}"#))
        .body(Body::from(r#"{"ref":"refs/heads/main"}"#))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(response).await["error"], "invalid_signature");

    let events = fixture.dal.events().list(&subscription.id, 10).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].verification_result, VERIFICATION_REJECTED);
    assert!(!events[0].injected);

    // No socket write happened.
    assert!(session_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_missing_signature_is_403() {
    let fixture = TestFixture::new();
    let subscription = fixture.insert_subscription_with("session-1", |sub| {
        sub.secret = Some("abc".to_string());
    });
    let app = fixture.router(100);

    let response = app
        .oneshot(webhook_post(&subscription.id, b"{}"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(response).await["error"], "missing_signature");
}

#[tokio::test]
async fn test_paused_subscription_is_403() {
    let fixture = TestFixture::new();
    let subscription = fixture.insert_test_subscription("session-1");
    fixture
        .dal
        .subscriptions()
        .set_status(&subscription.id, STATUS_PAUSED)
        .unwrap();
    let app = fixture.router(100);

    let response = app
        .oneshot(webhook_post(&subscription.id, b"{}"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(response).await["error"], "paused");
}

#[tokio::test]
async fn test_rate_limit_denies_fourth_request_in_window() {
    let fixture = TestFixture::new();
    let app = fixture.router(3);

    for _ in 0..3 {
        let request = Request::builder()
            .method("POST")
            .uri("/webhook/missing")
            .header("X-Forwarded-For", "203.0.113.5")
            .body(Body::from("{}"))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        // The normal outcome for an unknown subscription.
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    let request = Request::builder()
        .method("POST")
        .uri("/webhook/missing")
        .header("X-Forwarded-For", "203.0.113.5")
        .body(Body::from("{}"))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    // A different client is unaffected.
    let request = Request::builder()
        .method("POST")
        .uri("/webhook/missing")
        .header("X-Forwarded-For", "203.0.113.99")
        .body(Body::from("{}"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_oversized_body_is_413() {
    let fixture = TestFixture::new();
    let subscription = fixture.insert_test_subscription("session-1");
    let app = fixture.router_with_body_limit(100, 1024);

    let response = app
        .oneshot(webhook_post(&subscription.id, &vec![b'x'; 4096]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}
