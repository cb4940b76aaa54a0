//! Property-based tests for delivery ordering and the requeue bound.

use engage::testing::FakeTransport;
use engage::{EntityType, FeedbackAction, FeedbackKey, FeedbackNotice, Pipeline, PipelineConfig};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Op {
    Track(usize),
    Flush { fail: bool },
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (1usize..6).prop_map(Op::Track),
        1 => any::<bool>().prop_map(|fail| Op::Flush { fail }),
    ]
}

fn paused_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .unwrap()
}

proptest! {
    #[test]
    fn prop_delivery_preserves_insertion_order(
        batch_size in 2usize..8,
        latency_ms in 0u64..3,
        ops in proptest::collection::vec(arb_op(), 1..40),
    ) {
        let runtime = paused_runtime();
        let (delivered, queued) = runtime.block_on(async {
            let transport = FakeTransport::new();
            // With latency, size-triggered sends overlap explicit flushes.
            transport.set_latency(Duration::from_millis(latency_ms));
            let pipeline = Pipeline::builder()
                .transport(Arc::new(transport.clone()))
                .user_id(1)
                .config(
                    PipelineConfig::new()
                        .batch_size(batch_size)
                        .debounce(Duration::from_secs(3600))
                        .max_wait(Duration::from_secs(3600)),
                )
                .build()
                .unwrap();

            let mut next = 0usize;
            for op in ops {
                match op {
                    Op::Track(n) => {
                        for _ in 0..n {
                            pipeline.track_click(EntityType::Article, format!("{next:05}"));
                            next += 1;
                        }
                    }
                    Op::Flush { fail } => {
                        transport.set_failing(fail);
                        pipeline.flush().await;
                        transport.set_failing(false);
                    }
                }
                tokio::task::yield_now().await;
            }

            let delivered: Vec<String> = transport
                .delivered_events()
                .into_iter()
                .map(|e| e.entity_id)
                .collect();
            let queued: Vec<String> = pipeline
                .queued_events()
                .into_iter()
                .map(|e| e.entity_id)
                .collect();
            (delivered, queued)
        });

        // Dropped batches leave gaps but never reorder what remains.
        prop_assert!(delivered.windows(2).all(|w| w[0] < w[1]));
        prop_assert!(queued.windows(2).all(|w| w[0] < w[1]));
        if let (Some(last), Some(first)) = (delivered.last(), queued.first()) {
            prop_assert!(last < first);
        }
    }

    #[test]
    fn prop_deferred_message_rounds_up(retry_ms in 1u64..120_000) {
        let notice = FeedbackNotice::Deferred {
            key: FeedbackKey::new(EntityType::Article, "a", FeedbackAction::Like),
            retry_in: Duration::from_millis(retry_ms),
        };
        let secs = retry_ms.div_ceil(1000);
        let unit = if secs == 1 { "second" } else { "seconds" };
        prop_assert_eq!(
            notice.message(),
            format!("Feedback received, try again in {} {}", secs, unit)
        );
    }
}
