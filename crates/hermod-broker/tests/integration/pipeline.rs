use crate::fixtures::{sign, TestFixture};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use hermod_broker::pipeline::start_drain_task;
use hermod_broker::sessions::SessionWatch;
use std::time::Duration;
use tokio::time::timeout;
use tower::ServiceExt;

async fn read_body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_signed_push_is_summarized_and_injected() {
    let fixture = TestFixture::new();
    let subscription = fixture.insert_subscription_with("gh-session", |sub| {
        sub.secret = Some("abc".to_string());
        sub.signature_header = Some("X-Hub-Signature-256".to_string());
        sub.service_tag = Some("github".to_string());
        sub.summary_expr = Some("{branch: .ref}".to_string());
    });
    let mut session_rx = fixture.start_session_server("gh-session");
    let app = fixture.router(100);

    let body = br#"{"ref":"refs/heads/main"}"#;
    let request = Request::builder()
        .method("POST")
        .uri(format!("/webhook/{}", subscription.id))
        .header("X-Hub-Signature-256", sign("abc", body))
        .body(Body::from(body.to_vec()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_body_json(response).await["status"], "accepted");

    // Exactly one line reached the session socket.
    let line = timeout(Duration::from_secs(2), session_rx.recv())
        .await
        .expect("session received nothing")
        .unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
    assert_eq!(parsed["mode"], "prompt");
    let value = parsed["value"].as_str().unwrap();
    assert!(value.contains("<payload>\n{\"branch\":\"refs/heads/main\"}\n</payload>"));
    assert!(value.contains("service=\"github\""));
    assert!(session_rx.try_recv().is_err());

    // Audit log: one accepted, injected event; counter bumped.
    let events = fixture.dal.events().list(&subscription.id, 10).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].verification_result, "accepted");
    assert!(events[0].injected);
    assert!(value.contains(&format!("event-id=\"{}\"", events[0].id)));

    let stored = fixture
        .dal
        .subscriptions()
        .get(&subscription.id)
        .unwrap()
        .unwrap();
    assert_eq!(stored.event_count, 1);
}

#[tokio::test]
async fn test_gate_drop_leaves_no_trace() {
    let fixture = TestFixture::new();
    let subscription = fixture.insert_subscription_with("gate-session", |sub| {
        sub.gate_expr = Some(r#"select(.action == "opened")"#.to_string());
    });
    let mut session_rx = fixture.start_session_server("gate-session");
    let app = fixture.router(100);

    let request = Request::builder()
        .method("POST")
        .uri(format!("/webhook/{}", subscription.id))
        .body(Body::from(r#"{"action":"closed"}"#))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    // Silent accept.
    assert_eq!(response.status(), StatusCode::OK);
    assert!(fixture.dal.events().list(&subscription.id, 10).unwrap().is_empty());
    assert!(fixture
        .dal
        .queued_events()
        .list_for_session("gate-session")
        .unwrap()
        .is_empty());
    assert!(session_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_gate_pass_delivers() {
    let fixture = TestFixture::new();
    let subscription = fixture.insert_subscription_with("gate-session", |sub| {
        sub.gate_expr = Some(r#"select(.action == "opened")"#.to_string());
    });
    let mut session_rx = fixture.start_session_server("gate-session");
    let app = fixture.router(100);

    let request = Request::builder()
        .method("POST")
        .uri(format!("/webhook/{}", subscription.id))
        .body(Body::from(r#"{"action":"opened"}"#))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let line = timeout(Duration::from_secs(2), session_rx.recv())
        .await
        .expect("session received nothing")
        .unwrap();
    assert!(line.contains("webhook-event"));
    assert_eq!(fixture.dal.events().list(&subscription.id, 10).unwrap().len(), 1);
}

#[tokio::test]
async fn test_summary_fallback_truncates_payload() {
    let fixture = TestFixture::new();
    // An expression that evaluates to null degrades to truncation.
    let subscription = fixture.insert_subscription_with("trunc-session", |sub| {
        sub.summary_expr = Some(".does_not_exist".to_string());
    });
    let mut session_rx = fixture.start_session_server("trunc-session");
    let app = fixture.router(100);

    let long_value = "x".repeat(800);
    let body = format!(r#"{{"data":"{}"}}"#, long_value);
    let request = Request::builder()
        .method("POST")
        .uri(format!("/webhook/{}", subscription.id))
        .body(Body::from(body.clone()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let line = timeout(Duration::from_secs(2), session_rx.recv())
        .await
        .expect("session received nothing")
        .unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
    let value = parsed["value"].as_str().unwrap();

    // The framed payload carries the first 500 bytes, not the whole body.
    let start = value.find("<payload>\n").unwrap() + "<payload>\n".len();
    let end = value.find("\n</payload>").unwrap();
    let summary = &value[start..end];
    assert_eq!(summary.len(), 500);
    assert_eq!(summary, &body[..500]);
}

#[tokio::test]
async fn test_offline_queue_drains_on_session_appearance() {
    let fixture = TestFixture::new();
    let subscription = fixture.insert_test_subscription("late-session");
    let app = fixture.router(100);

    // Deliver while the session is offline.
    let request = Request::builder()
        .method("POST")
        .uri(format!("/webhook/{}", subscription.id))
        .body(Body::from(r#"{"n":1}"#))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let events = fixture.dal.events().list(&subscription.id, 10).unwrap();
    assert_eq!(events.len(), 1);
    assert!(!events[0].injected);
    assert_eq!(
        fixture
            .dal
            .queued_events()
            .list_for_session("late-session")
            .unwrap()
            .len(),
        1
    );

    // Bring the session up and wire the drain loop.
    let (_watch, appeared_rx) = SessionWatch::start(
        fixture.sessions_dir.clone(),
        Duration::from_millis(50),
    );
    start_drain_task(fixture.pipeline(), appeared_rx);
    let mut session_rx = fixture.start_session_server("late-session");

    let line = timeout(Duration::from_secs(5), session_rx.recv())
        .await
        .expect("queued event was never drained")
        .unwrap();
    assert!(line.contains("webhook-event"));

    // The settle is transactional: queue empty, injected set, count bumped once.
    timeout(Duration::from_secs(2), async {
        loop {
            if fixture
                .dal
                .queued_events()
                .list_for_session("late-session")
                .unwrap()
                .is_empty()
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("queue entry was not settled");

    let events = fixture.dal.events().list(&subscription.id, 10).unwrap();
    assert!(events[0].injected);
    let stored = fixture
        .dal
        .subscriptions()
        .get(&subscription.id)
        .unwrap()
        .unwrap();
    assert_eq!(stored.event_count, 1);
}

#[tokio::test]
async fn test_one_shot_subscription_is_removed_after_delivery() {
    let fixture = TestFixture::new();
    let subscription = fixture.insert_subscription_with("once-session", |sub| {
        sub.one_shot = true;
    });
    let mut session_rx = fixture.start_session_server("once-session");
    let app = fixture.router(100);

    let request = Request::builder()
        .method("POST")
        .uri(format!("/webhook/{}", subscription.id))
        .body(Body::from("{}"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    timeout(Duration::from_secs(2), session_rx.recv())
        .await
        .expect("session received nothing")
        .unwrap();

    assert!(fixture
        .dal
        .subscriptions()
        .get(&subscription.id)
        .unwrap()
        .is_none());
}
