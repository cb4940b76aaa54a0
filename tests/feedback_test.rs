use engage::testing::{FakeTransport, RecordingObserver};
use engage::{
    EntityType, FeedbackAction, FeedbackClient, FeedbackKey, FeedbackNotice, FeedbackStatus,
    ThrottleDecision,
};
use std::sync::Arc;
use std::time::Duration;

fn build(transport: &FakeTransport, observer: &RecordingObserver) -> FeedbackClient {
    FeedbackClient::builder()
        .transport(Arc::new(transport.clone()))
        .observer(Arc::new(observer.clone()))
        .user_id(21)
        .throttle_window(Duration::from_millis(1000))
        .build()
        .unwrap()
}

fn like_key(id: &str) -> FeedbackKey {
    FeedbackKey::new(EntityType::Article, id, FeedbackAction::Like)
}

#[tokio::test(start_paused = true)]
async fn test_first_feedback_is_submitted_immediately() {
    let transport = FakeTransport::new();
    let observer = RecordingObserver::new();
    let client = build(&transport, &observer);

    assert_eq!(
        client.like(EntityType::Article, "a-1"),
        ThrottleDecision::Executed
    );
    tokio::task::yield_now().await;

    let sent = transport.feedback();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].user_id, 21);
    assert_eq!(sent[0].action, FeedbackAction::Like);
    assert_eq!(client.status(&like_key("a-1")), Some(FeedbackStatus::Submitted));
    assert_eq!(
        observer.notices(),
        vec![FeedbackNotice::Submitted {
            user_id: 21,
            key: like_key("a-1")
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn test_rapid_feedback_coalesces_to_latest() {
    let transport = FakeTransport::new();
    let observer = RecordingObserver::new();
    let client = build(&transport, &observer);

    let first = client.feedback(EntityType::Article, "a-1", FeedbackAction::Like).score(1.0);
    let second = client.feedback(EntityType::Article, "a-1", FeedbackAction::Like).score(2.0);
    let third = client.feedback(EntityType::Article, "a-1", FeedbackAction::Like).score(3.0);

    assert_eq!(client.submit(first), ThrottleDecision::Executed);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(matches!(client.submit(second), ThrottleDecision::Deferred { .. }));
    assert!(matches!(client.submit(third), ThrottleDecision::Deferred { .. }));
    assert!(client.is_pending(&like_key("a-1")));
    assert_eq!(observer.deferred(), 2);

    tokio::time::sleep(Duration::from_millis(1000)).await;
    let scores: Vec<_> = transport.feedback().iter().map(|f| f.score).collect();
    assert_eq!(scores, vec![Some(1.0), Some(3.0)]);
    assert_eq!(observer.submitted(), 2);
    assert!(!client.is_pending(&like_key("a-1")));
}

#[tokio::test(start_paused = true)]
async fn test_deferred_notice_tells_user_when_to_retry() {
    let transport = FakeTransport::new();
    let observer = RecordingObserver::new();
    let client = build(&transport, &observer);

    client.save(EntityType::Prize, "p-1");
    tokio::time::sleep(Duration::from_millis(200)).await;
    let decision = client.save(EntityType::Prize, "p-1");
    assert_eq!(
        decision,
        ThrottleDecision::Deferred {
            retry_in: Duration::from_millis(800)
        }
    );

    let deferred = observer
        .notices()
        .into_iter()
        .find(|n| matches!(n, FeedbackNotice::Deferred { .. }))
        .unwrap();
    assert_eq!(deferred.message(), "Feedback received, try again in 1 second");
}

#[tokio::test(start_paused = true)]
async fn test_keys_are_throttled_independently() {
    let transport = FakeTransport::new();
    let observer = RecordingObserver::new();
    let client = build(&transport, &observer);

    assert_eq!(client.like(EntityType::Article, "a-1"), ThrottleDecision::Executed);
    assert_eq!(client.dislike(EntityType::Article, "a-1"), ThrottleDecision::Executed);
    assert_eq!(client.like(EntityType::Article, "a-2"), ThrottleDecision::Executed);
    assert_eq!(client.hide(EntityType::Story, "a-1"), ThrottleDecision::Executed);
    tokio::task::yield_now().await;

    assert_eq!(transport.feedback().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_not_interested_carries_reason() {
    let transport = FakeTransport::new();
    let observer = RecordingObserver::new();
    let client = build(&transport, &observer);

    client.not_interested(EntityType::Mission, "m-1", Some("too hard".into()));
    tokio::task::yield_now().await;

    let sent = transport.feedback();
    assert_eq!(sent[0].action, FeedbackAction::NotInterested);
    assert_eq!(sent[0].reason.as_deref(), Some("too hard"));
}

#[tokio::test(start_paused = true)]
async fn test_failure_is_reported_and_not_retried() {
    let transport = FakeTransport::new();
    transport.fail_next(1);
    let observer = RecordingObserver::new();
    let client = build(&transport, &observer);

    client.like(EntityType::Article, "a-1");
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert!(transport.feedback().is_empty());
    assert_eq!(observer.failed(), 1);
    match client.status(&like_key("a-1")) {
        Some(FeedbackStatus::Failed(message)) => assert!(message.contains("scripted")),
        other => panic!("unexpected status: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_discards_pending_feedback() {
    let transport = FakeTransport::new();
    let observer = RecordingObserver::new();
    let client = build(&transport, &observer);

    client.like(EntityType::Article, "a-1");
    client.like(EntityType::Article, "a-1");
    client.shutdown();

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(transport.feedback().len(), 1);
    assert_eq!(client.like(EntityType::Article, "a-1"), ThrottleDecision::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_status_unknown_for_untouched_key() {
    let transport = FakeTransport::new();
    let observer = RecordingObserver::new();
    let client = build(&transport, &observer);

    assert_eq!(client.status(&like_key("never")), None);
}
