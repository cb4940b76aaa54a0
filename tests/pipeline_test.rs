use engage::testing::FakeTransport;
use engage::{
    BackoffConfig, EntityType, EventType, FlushReport, Pipeline, PipelineConfig, StaticPlatform,
    TrackEvent,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn build(transport: &FakeTransport, config: PipelineConfig) -> Pipeline {
    Pipeline::builder()
        .transport(Arc::new(transport.clone()))
        .user_id(7)
        .session_id("sess-1")
        .config(config)
        .build()
        .unwrap()
}

fn ids(transport: &FakeTransport) -> Vec<String> {
    transport
        .delivered_events()
        .into_iter()
        .map(|e| e.entity_id)
        .collect()
}

fn queued_ids(pipeline: &Pipeline) -> Vec<String> {
    pipeline
        .queued_events()
        .into_iter()
        .map(|e| e.entity_id)
        .collect()
}

// ---------------------------------------------------------------------------
// Ordering
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_batch_preserves_insertion_order() {
    let transport = FakeTransport::new();
    let pipeline = build(&transport, PipelineConfig::default());

    for id in ["a", "b", "c", "d"] {
        pipeline.track_click(EntityType::Article, id);
    }
    assert_eq!(pipeline.flush().await, FlushReport::Delivered(4));
    assert_eq!(ids(&transport), vec!["a", "b", "c", "d"]);
}

#[tokio::test(start_paused = true)]
async fn test_events_during_in_flight_flush_go_to_next_batch() {
    let transport = FakeTransport::new();
    transport.set_latency(Duration::from_millis(200));
    let pipeline = build(&transport, PipelineConfig::default());

    pipeline.track_click(EntityType::Article, "a");
    pipeline.track_click(EntityType::Article, "b");

    let flusher = pipeline.clone();
    let in_flight = tokio::spawn(async move { flusher.flush().await });
    tokio::task::yield_now().await;

    pipeline.track_click(EntityType::Article, "c");
    assert_eq!(in_flight.await.unwrap(), FlushReport::Delivered(2));
    assert_eq!(pipeline.queued_len(), 1);

    assert_eq!(pipeline.flush().await, FlushReport::Delivered(1));
    let batches = transport.delivered();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[1].events[0].entity_id, "c");
}

#[tokio::test(start_paused = true)]
async fn test_flush_on_empty_queue_is_noop() {
    let transport = FakeTransport::new();
    let pipeline = build(&transport, PipelineConfig::default());

    assert_eq!(pipeline.flush().await, FlushReport::Empty);
    transport.assert_nothing_sent();
}

// ---------------------------------------------------------------------------
// Triggers
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_size_trigger_flushes_immediately() {
    let transport = FakeTransport::new();
    let pipeline = build(&transport, PipelineConfig::new().batch_size(3));

    pipeline.track_click(EntityType::Article, "a");
    pipeline.track_click(EntityType::Article, "b");
    assert!(transport.attempts().is_empty());

    pipeline.track_click(EntityType::Article, "c");
    tokio::task::yield_now().await;

    assert_eq!(transport.delivered().len(), 1);
    transport.assert_delivered(3);
    assert!(!pipeline.is_flush_scheduled());
}

#[tokio::test(start_paused = true)]
async fn test_debounce_coalesces_bursts() {
    let transport = FakeTransport::new();
    let pipeline = build(
        &transport,
        PipelineConfig::new().debounce(Duration::from_millis(1000)),
    );

    for id in ["a", "b", "c"] {
        pipeline.track_click(EntityType::Article, id);
        tokio::time::sleep(Duration::from_millis(400)).await;
    }
    // Last enqueue at t=800; nothing sent before t=1800.
    assert!(transport.attempts().is_empty());

    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(transport.delivered().len(), 1);
    transport.assert_delivered(3);
}

#[tokio::test(start_paused = true)]
async fn test_max_wait_flushes_continuous_stream() {
    let transport = FakeTransport::new();
    let pipeline = build(
        &transport,
        PipelineConfig::new()
            .batch_size(1000)
            .debounce(Duration::from_millis(1000))
            .max_wait(Duration::from_millis(5200)),
    );

    // An event every 500ms keeps the debounce from ever firing.
    for i in 0..11 {
        pipeline.track_click(EntityType::Article, format!("a-{i}"));
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    // The tick at t=5200 took the 11 events queued at t=0..=5000.
    assert_eq!(transport.delivered().len(), 1);
    assert_eq!(transport.delivered()[0].len(), 11);
}

// ---------------------------------------------------------------------------
// Enrichment
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_events_are_enriched_from_platform() {
    let transport = FakeTransport::new();
    let pipeline = Pipeline::builder()
        .transport(Arc::new(transport.clone()))
        .platform(Arc::new(
            StaticPlatform::new()
                .url("https://app.example.com/benefits")
                .user_agent("engage-test")
                .viewport(390, 844),
        ))
        .user_id(7)
        .build()
        .unwrap();

    pipeline.track(
        TrackEvent::new(EventType::Click, EntityType::Benefit, "b-1")
            .title("Gym discount")
            .meta("url", json!("https://caller.example.com")),
    );
    pipeline.flush().await;

    let event = &transport.delivered_events()[0];
    assert_eq!(event.user_id, 7);
    assert_eq!(event.session_id, pipeline.session_id());
    assert_eq!(event.entity_title.as_deref(), Some("Gym discount"));
    assert_eq!(event.metadata["url"], json!("https://caller.example.com"));
    assert_eq!(event.metadata["userAgent"], json!("engage-test"));
    assert_eq!(event.metadata["viewport"], json!({"width": 390, "height": 844}));
    assert!(event.metadata["timestamp"].is_string());
}

// ---------------------------------------------------------------------------
// Failures, backoff and capacity
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_failed_batch_returns_to_front() {
    let transport = FakeTransport::new();
    let pipeline = build(&transport, PipelineConfig::default());

    pipeline.track_click(EntityType::Article, "a");
    pipeline.track_click(EntityType::Article, "b");
    transport.fail_next(1);
    assert_eq!(pipeline.flush().await, FlushReport::Requeued(2));

    pipeline.track_click(EntityType::Article, "c");
    let queued: Vec<_> = pipeline
        .queued_events()
        .into_iter()
        .map(|e| e.entity_id)
        .collect();
    assert_eq!(queued, vec!["a", "b", "c"]);
    assert_eq!(pipeline.delivery_failures(), 1);

    assert_eq!(pipeline.flush().await, FlushReport::Delivered(3));
    assert_eq!(pipeline.delivery_failures(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_requeue_is_bounded_by_capacity() {
    let transport = FakeTransport::new();
    transport.set_failing(true);
    let pipeline = build(&transport, PipelineConfig::new().batch_size(5));

    // batch_size 5: the queue may hold fewer than 10 after a requeue.
    for round in 0..6 {
        for i in 0..4 {
            pipeline.track_click(EntityType::Article, format!("r{round}-{i}"));
        }
        pipeline.flush().await;
        assert!(pipeline.queued_len() < 10);
    }
}

#[tokio::test(start_paused = true)]
async fn test_capacity_drop_discards_failed_batch() {
    let transport = FakeTransport::new();
    transport.set_latency(Duration::from_millis(100));
    transport.fail_next(1);
    // batch_size 2: a failed batch is kept only while the queue stays below 4.
    let pipeline = build(&transport, PipelineConfig::new().batch_size(2));

    // a, b go on the wire; c, d fill the next batch behind them.
    for id in ["a", "b", "c"] {
        pipeline.track_click(EntityType::Article, id);
    }
    tokio::task::yield_now().await;
    pipeline.track_click(EntityType::Article, "d");

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(transport.attempts().len(), 1);
    assert!(transport.delivered().is_empty());
    assert_eq!(queued_ids(&pipeline), vec!["c", "d"]);
}

#[tokio::test(start_paused = true)]
async fn test_size_trigger_bounds_synchronous_burst() {
    let transport = FakeTransport::new();
    let pipeline = build(&transport, PipelineConfig::new().batch_size(3));

    for i in 0..7 {
        pipeline.track_click(EntityType::Article, format!("e{i}"));
    }
    assert_eq!(pipeline.queued_len(), 1);

    tokio::time::sleep(Duration::from_millis(10)).await;
    let sizes: Vec<_> = transport.attempts().iter().map(|b| b.len()).collect();
    assert_eq!(sizes, vec![3, 3]);

    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(ids(&transport), vec!["e0", "e1", "e2", "e3", "e4", "e5", "e6"]);
}

#[tokio::test(start_paused = true)]
async fn test_failure_during_burst_loses_at_most_one_batch() {
    let transport = FakeTransport::new();
    transport.fail_next(1);
    let pipeline = build(&transport, PipelineConfig::new().batch_size(3));

    for i in 0..7 {
        pipeline.track_click(EntityType::Article, format!("e{i}"));
    }
    tokio::time::sleep(Duration::from_millis(10)).await;

    // The unsent second batch returns ahead of e6; the failed first batch
    // would push the queue to the cap of 6 and is dropped alone.
    assert_eq!(transport.attempts().len(), 1);
    assert_eq!(queued_ids(&pipeline), vec!["e3", "e4", "e5", "e6"]);

    assert_eq!(pipeline.flush().await, FlushReport::Delivered(4));
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_failed_flushes_keep_order() {
    let transport = FakeTransport::new();
    transport.set_latency(Duration::from_millis(100));
    transport.fail_next(2);
    let pipeline = build(&transport, PipelineConfig::default());

    pipeline.track_click(EntityType::Article, "first");
    let flusher = pipeline.clone();
    let first = tokio::spawn(async move { flusher.flush().await });
    tokio::task::yield_now().await;
    assert_eq!(pipeline.queued_len(), 0);

    pipeline.track_click(EntityType::Article, "second");
    let flusher = pipeline.clone();
    let second = tokio::spawn(async move { flusher.flush().await });
    tokio::task::yield_now().await;
    assert_eq!(pipeline.queued_len(), 0);

    assert_eq!(first.await.unwrap(), FlushReport::Requeued(1));
    assert_eq!(second.await.unwrap(), FlushReport::Requeued(1));
    assert_eq!(transport.attempts().len(), 1);
    assert_eq!(queued_ids(&pipeline), vec!["first", "second"]);

    assert_eq!(pipeline.flush().await, FlushReport::Requeued(2));
    assert_eq!(pipeline.flush().await, FlushReport::Delivered(2));
    assert_eq!(ids(&transport), vec!["first", "second"]);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_delays_timer_retry() {
    let transport = FakeTransport::new();
    transport.fail_next(1);
    let backoff = BackoffConfig::new()
        .with_min_backoff(Duration::from_secs(4))
        .with_max_backoff(Duration::from_secs(4));
    let pipeline = build(
        &transport,
        PipelineConfig::new()
            .debounce(Duration::from_millis(1000))
            .backoff(backoff),
    );

    pipeline.track_click(EntityType::Article, "a");
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(transport.attempts().len(), 1);
    assert_eq!(pipeline.queued_len(), 1);

    // Backoff is jittered into [2s, 4s] from the failure at t=1000.
    tokio::time::sleep(Duration::from_millis(1800)).await;
    assert_eq!(transport.attempts().len(), 1);

    tokio::time::sleep(Duration::from_millis(2200)).await;
    assert_eq!(transport.attempts().len(), 2);
    transport.assert_delivered(1);
    assert_eq!(pipeline.delivery_failures(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_explicit_flush_ignores_backoff() {
    let transport = FakeTransport::new();
    transport.fail_next(1);
    let pipeline = build(
        &transport,
        PipelineConfig::new().backoff(
            BackoffConfig::new()
                .with_min_backoff(Duration::from_secs(30))
                .with_max_backoff(Duration::from_secs(30)),
        ),
    );

    pipeline.track_click(EntityType::Article, "a");
    assert_eq!(pipeline.flush().await, FlushReport::Requeued(1));
    assert_eq!(pipeline.flush().await, FlushReport::Delivered(1));
}

// ---------------------------------------------------------------------------
// Shutdown
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_shutdown_flushes_and_stops_timers() {
    let transport = FakeTransport::new();
    let pipeline = build(&transport, PipelineConfig::default());

    pipeline.track_click(EntityType::Article, "a");
    assert_eq!(pipeline.shutdown().await, FlushReport::Delivered(1));
    assert!(pipeline.is_closed());
    assert!(!pipeline.is_flush_scheduled());

    assert!(!pipeline.track_click(EntityType::Article, "b"));
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(transport.attempts().len(), 1);
    assert_eq!(pipeline.shutdown().await, FlushReport::Empty);
}

#[tokio::test(start_paused = true)]
async fn test_failed_final_flush_is_dropped() {
    let transport = FakeTransport::new();
    transport.set_failing(true);
    let pipeline = build(&transport, PipelineConfig::default());

    pipeline.track_click(EntityType::Article, "a");
    assert_eq!(pipeline.shutdown().await, FlushReport::Dropped(1));
    assert_eq!(pipeline.queued_len(), 0);
}
