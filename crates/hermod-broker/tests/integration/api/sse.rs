use crate::fixtures::TestFixture;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures::StreamExt;
use hermod_broker::utils::event_bus::BrokerEvent;
use std::time::Duration;
use tokio::time::timeout;
use tower::ServiceExt;

#[tokio::test]
async fn test_stream_headers_and_connected_comment() {
    let fixture = TestFixture::new();
    let app = fixture.router(100);

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/mcp")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers["content-type"], "text/event-stream");
    assert_eq!(headers["cache-control"], "no-cache");
    assert_eq!(headers["connection"], "keep-alive");
    assert_eq!(headers["x-accel-buffering"], "no");

    let mut body = response.into_body().into_data_stream();
    let first = timeout(Duration::from_secs(2), body.next())
        .await
        .expect("no first frame")
        .unwrap()
        .unwrap();
    assert_eq!(&first[..], b": connected\n\n");
}

#[tokio::test]
async fn test_store_changes_are_relayed_as_events() {
    let fixture = TestFixture::new();
    let app = fixture.router(100);

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/mcp")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let mut body = response.into_body().into_data_stream();
    // Swallow the connection comment.
    timeout(Duration::from_secs(2), body.next())
        .await
        .expect("no first frame")
        .unwrap()
        .unwrap();

    // A store mutation (here directly on the bus the DAL signals on) must
    // arrive as a framed SSE event.
    fixture.event_bus.emit(BrokerEvent::SubscriptionsChanged);

    let frame = timeout(Duration::from_secs(2), body.next())
        .await
        .expect("no change frame")
        .unwrap()
        .unwrap();
    let text = String::from_utf8(frame.to_vec()).unwrap();
    assert_eq!(text, "event: subscriptions.changed\ndata: {\"changed\":true}\n\n");
}

#[tokio::test]
async fn test_subscription_creation_reaches_the_stream() {
    let fixture = TestFixture::new();
    let app = fixture.router(100);

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/mcp")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let mut body = response.into_body().into_data_stream();
    timeout(Duration::from_secs(2), body.next())
        .await
        .expect("no first frame")
        .unwrap()
        .unwrap();

    fixture.insert_test_subscription("session-1");

    let frame = timeout(Duration::from_secs(2), body.next())
        .await
        .expect("no change frame")
        .unwrap()
        .unwrap();
    let text = String::from_utf8(frame.to_vec()).unwrap();
    assert!(text.starts_with("event: subscriptions.changed\n"));
}
