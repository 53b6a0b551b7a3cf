use crate::fixtures::TestFixture;
use hermod_broker::utils::event_bus::BrokerEvent;
use hermod_models::models::subscriptions::{STATUS_ACTIVE, STATUS_PAUSED, UpdateSubscription};

#[tokio::test]
async fn test_create_then_get_round_trip() {
    let fixture = TestFixture::new();

    let created = fixture.insert_subscription_with("session-1", |sub| {
        sub.secret = Some("abc".to_string());
        sub.service_tag = Some("github".to_string());
        sub.gate_expr = Some(r#"select(.action == "opened")"#.to_string());
    });

    let fetched = fixture
        .dal
        .subscriptions()
        .get(&created.id)
        .unwrap()
        .expect("subscription must exist");

    assert_eq!(fetched.id, created.id);
    assert_eq!(fetched.session_id, "session-1");
    assert_eq!(fetched.secret.as_deref(), Some("abc"));
    assert_eq!(fetched.service_tag.as_deref(), Some("github"));
    assert_eq!(fetched.status, STATUS_ACTIVE);
    assert_eq!(fetched.event_count, 0);
    assert_eq!(fetched.created_at, created.created_at);
}

#[tokio::test]
async fn test_get_absent_returns_none() {
    let fixture = TestFixture::new();
    assert!(fixture.dal.subscriptions().get("missing").unwrap().is_none());
}

#[tokio::test]
async fn test_list_and_list_by_session() {
    let fixture = TestFixture::new();
    fixture.insert_test_subscription("session-a");
    fixture.insert_test_subscription("session-a");
    fixture.insert_test_subscription("session-b");

    assert_eq!(fixture.dal.subscriptions().list().unwrap().len(), 3);
    assert_eq!(
        fixture
            .dal
            .subscriptions()
            .list_by_session("session-a")
            .unwrap()
            .len(),
        2
    );
    assert_eq!(
        fixture
            .dal
            .subscriptions()
            .list_by_session("session-b")
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn test_full_update_round_trip() {
    let fixture = TestFixture::new();
    let mut subscription = fixture.insert_test_subscription("session-1");

    subscription.session_id = "session-2".to_string();
    subscription.secret = Some("new-secret".to_string());
    subscription.summary_expr = Some("{ref: .ref}".to_string());
    subscription.status = STATUS_PAUSED.to_string();

    let updated = fixture.dal.subscriptions().update(&subscription).unwrap();
    let fetched = fixture
        .dal
        .subscriptions()
        .get(&subscription.id)
        .unwrap()
        .unwrap();

    assert_eq!(fetched.session_id, "session-2");
    assert_eq!(fetched.secret.as_deref(), Some("new-secret"));
    assert_eq!(fetched.summary_expr.as_deref(), Some("{ref: .ref}"));
    assert_eq!(fetched.status, STATUS_PAUSED);
    assert_eq!(fetched.session_id, updated.session_id);
}

#[tokio::test]
async fn test_full_update_clears_omitted_optionals() {
    let fixture = TestFixture::new();
    let mut subscription = fixture.insert_subscription_with("session-1", |sub| {
        sub.secret = Some("abc".to_string());
        sub.prompt = Some("look at this".to_string());
    });

    subscription.secret = None;
    subscription.prompt = None;
    fixture.dal.subscriptions().update(&subscription).unwrap();

    let fetched = fixture
        .dal
        .subscriptions()
        .get(&subscription.id)
        .unwrap()
        .unwrap();
    assert!(fetched.secret.is_none());
    assert!(fetched.prompt.is_none());
}

#[tokio::test]
async fn test_update_absent_fails() {
    let fixture = TestFixture::new();
    let mut subscription = fixture.insert_test_subscription("session-1");
    fixture.dal.subscriptions().delete(&subscription.id).unwrap();

    subscription.session_id = "elsewhere".to_string();
    let result = fixture.dal.subscriptions().update(&subscription);
    assert!(matches!(result, Err(diesel::result::Error::NotFound)));
}

#[tokio::test]
async fn test_partial_update_fields() {
    let fixture = TestFixture::new();
    let subscription = fixture.insert_subscription_with("session-1", |sub| {
        sub.secret = Some("abc".to_string());
    });

    let update = UpdateSubscription {
        status: Some(STATUS_PAUSED.to_string()),
        // Explicitly clear the secret.
        secret: Some(None),
        ..Default::default()
    };

    let updated = fixture
        .dal
        .subscriptions()
        .update_fields(&subscription.id, &update)
        .unwrap();

    assert_eq!(updated.status, STATUS_PAUSED);
    assert!(updated.secret.is_none());
    // Untouched fields survive.
    assert_eq!(updated.session_id, "session-1");
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let fixture = TestFixture::new();
    let subscription = fixture.insert_test_subscription("session-1");

    assert_eq!(fixture.dal.subscriptions().delete(&subscription.id).unwrap(), 1);
    assert_eq!(fixture.dal.subscriptions().delete(&subscription.id).unwrap(), 0);
}

#[tokio::test]
async fn test_delete_cascades_events_and_queue() {
    let fixture = TestFixture::new();
    let subscription = fixture.insert_test_subscription("session-1");

    let event = fixture
        .dal
        .events()
        .create(
            &hermod_models::models::events::NewEvent::new(
                subscription.id.clone(),
                "{}".to_string(),
                "accepted".to_string(),
                false,
            )
            .unwrap(),
        )
        .unwrap();
    fixture
        .dal
        .queued_events()
        .enqueue(
            &hermod_models::models::events::NewQueuedEvent::new(
                subscription.id.clone(),
                "session-1".to_string(),
                "framed".to_string(),
            )
            .unwrap(),
        )
        .unwrap();

    fixture.dal.subscriptions().delete(&subscription.id).unwrap();

    assert!(fixture.dal.events().get(&event.id).unwrap().is_none());
    assert!(fixture
        .dal
        .queued_events()
        .list_for_session("session-1")
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_set_status_and_increment() {
    let fixture = TestFixture::new();
    let subscription = fixture.insert_test_subscription("session-1");

    let paused = fixture
        .dal
        .subscriptions()
        .set_status(&subscription.id, STATUS_PAUSED)
        .unwrap();
    assert_eq!(paused.status, STATUS_PAUSED);

    let bumped = fixture
        .dal
        .subscriptions()
        .increment_event_count(&subscription.id)
        .unwrap();
    assert_eq!(bumped.event_count, 1);
    let bumped = fixture
        .dal
        .subscriptions()
        .increment_event_count(&subscription.id)
        .unwrap();
    assert_eq!(bumped.event_count, 2);
}

#[tokio::test]
async fn test_mutations_emit_change_signal() {
    let fixture = TestFixture::new();
    let mut rx = fixture.dal.subscribe_to_changes();

    let subscription = fixture.insert_test_subscription("session-1");
    let event = rx.recv().await.unwrap();
    assert!(matches!(event, BrokerEvent::SubscriptionsChanged));

    fixture.dal.subscriptions().delete(&subscription.id).unwrap();
    let event = rx.recv().await.unwrap();
    assert!(matches!(event, BrokerEvent::SubscriptionsChanged));

    // Deleting an already-absent row commits nothing and stays silent.
    fixture.dal.subscriptions().delete(&subscription.id).unwrap();
    assert!(rx.try_recv().is_err());
}
