//! Test doubles for code that uses the pipeline or the feedback client.
//!
//! # Usage
//!
//! ```rust
//! use engage::testing::FakeTransport;
//! use engage::{EntityType, Pipeline};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> engage::Result<()> {
//! let transport = FakeTransport::new();
//! let pipeline = Pipeline::builder()
//!     .transport(Arc::new(transport.clone()))
//!     .user_id(1)
//!     .build()?;
//!
//! pipeline.track_click(EntityType::Article, "a-1");
//! pipeline.flush().await;
//! transport.assert_delivered(1);
//! # Ok(())
//! # }
//! ```

use crate::errors::EngageError;
use crate::event::{ActivityEvent, EventBatch};
use crate::feedback::{FeedbackNotice, FeedbackObserver, RecommendationFeedback};
use crate::transport::{BoxFuture, Transport};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Fake transport
// ---------------------------------------------------------------------------

/// In-memory transport that records everything it is asked to send.
///
/// Failures can be scripted: [`fail_next`](Self::fail_next) fails a number of
/// upcoming sends, [`set_failing`](Self::set_failing) fails all of them until
/// switched off. Failed sends are recorded as attempts but not as deliveries.
#[derive(Clone, Debug, Default)]
pub struct FakeTransport {
    inner: Arc<Mutex<FakeTransportInner>>,
}

#[derive(Debug)]
struct FakeTransportInner {
    attempts: Vec<EventBatch>,
    delivered: Vec<EventBatch>,
    beacons: Vec<EventBatch>,
    feedback: Vec<RecommendationFeedback>,
    fail_next: usize,
    failing: bool,
    beacon_accepts: bool,
    latency: Option<Duration>,
}

impl Default for FakeTransportInner {
    fn default() -> Self {
        Self {
            attempts: Vec::new(),
            delivered: Vec::new(),
            beacons: Vec::new(),
            feedback: Vec::new(),
            fail_next: 0,
            failing: false,
            beacon_accepts: true,
            latency: None,
        }
    }
}

impl FakeTransportInner {
    fn should_fail(&mut self) -> bool {
        if self.failing {
            return true;
        }
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return true;
        }
        false
    }
}

impl FakeTransport {
    /// Create a transport that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` batch or feedback sends.
    pub fn fail_next(&self, n: usize) {
        self.inner.lock().fail_next = n;
    }

    /// Fail every send until called again with `false`.
    pub fn set_failing(&self, failing: bool) {
        self.inner.lock().failing = failing;
    }

    /// Whether beacon hand-offs succeed (default: `true`).
    pub fn set_beacon_accepts(&self, accepts: bool) {
        self.inner.lock().beacon_accepts = accepts;
    }

    /// Delay every asynchronous send by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.inner.lock().latency = Some(latency);
    }

    /// Every batch send attempt, including failed ones.
    pub fn attempts(&self) -> Vec<EventBatch> {
        self.inner.lock().attempts.clone()
    }

    /// Batches that were accepted.
    pub fn delivered(&self) -> Vec<EventBatch> {
        self.inner.lock().delivered.clone()
    }

    /// All accepted events across batches, in delivery order.
    pub fn delivered_events(&self) -> Vec<ActivityEvent> {
        self.inner
            .lock()
            .delivered
            .iter()
            .flat_map(|batch| batch.events.iter().cloned())
            .collect()
    }

    /// Batches handed to the beacon send.
    pub fn beacons(&self) -> Vec<EventBatch> {
        self.inner.lock().beacons.clone()
    }

    /// Accepted feedback submissions.
    pub fn feedback(&self) -> Vec<RecommendationFeedback> {
        self.inner.lock().feedback.clone()
    }

    /// Assert that exactly `expected` events were delivered.
    pub fn assert_delivered(&self, expected: usize) {
        let delivered = self.delivered_events();
        assert_eq!(
            delivered.len(),
            expected,
            "Expected {} delivered event(s), found {}. Delivered entity ids: {:?}",
            expected,
            delivered.len(),
            delivered.iter().map(|e| &e.entity_id).collect::<Vec<_>>()
        );
    }

    /// Assert that nothing was sent at all.
    pub fn assert_nothing_sent(&self) {
        let inner = self.inner.lock();
        assert!(
            inner.attempts.is_empty() && inner.beacons.is_empty(),
            "Expected no sends, found {} batch attempt(s) and {} beacon(s)",
            inner.attempts.len(),
            inner.beacons.len()
        );
    }

    /// Forget everything recorded so far. Scripted failures are kept.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.attempts.clear();
        inner.delivered.clear();
        inner.beacons.clear();
        inner.feedback.clear();
    }

    async fn delay(&self) {
        let latency = self.inner.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

impl Transport for FakeTransport {
    fn send_batch<'a>(&'a self, batch: &'a EventBatch) -> BoxFuture<'a, crate::Result<()>> {
        Box::pin(async move {
            self.delay().await;
            let mut inner = self.inner.lock();
            inner.attempts.push(batch.clone());
            if inner.should_fail() {
                return Err(EngageError::Transport("scripted batch failure".into()));
            }
            inner.delivered.push(batch.clone());
            Ok(())
        })
    }

    fn send_beacon(&self, batch: &EventBatch) -> bool {
        let mut inner = self.inner.lock();
        if !inner.beacon_accepts {
            return false;
        }
        inner.beacons.push(batch.clone());
        true
    }

    fn submit_feedback<'a>(
        &'a self,
        feedback: &'a RecommendationFeedback,
    ) -> BoxFuture<'a, crate::Result<()>> {
        Box::pin(async move {
            self.delay().await;
            let mut inner = self.inner.lock();
            if inner.should_fail() {
                return Err(EngageError::Transport("scripted feedback failure".into()));
            }
            inner.feedback.push(feedback.clone());
            Ok(())
        })
    }
}

// ---------------------------------------------------------------------------
// Recording observer
// ---------------------------------------------------------------------------

/// Feedback observer that keeps every notice it receives.
#[derive(Clone, Debug, Default)]
pub struct RecordingObserver {
    notices: Arc<Mutex<Vec<FeedbackNotice>>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notices(&self) -> Vec<FeedbackNotice> {
        self.notices.lock().clone()
    }

    pub fn submitted(&self) -> usize {
        self.count(|n| matches!(n, FeedbackNotice::Submitted { .. }))
    }

    pub fn deferred(&self) -> usize {
        self.count(|n| matches!(n, FeedbackNotice::Deferred { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|n| matches!(n, FeedbackNotice::Failed { .. }))
    }

    fn count(&self, pred: impl Fn(&FeedbackNotice) -> bool) -> usize {
        self.notices.lock().iter().filter(|n| pred(n)).count()
    }
}

impl FeedbackObserver for RecordingObserver {
    fn notify(&self, notice: &FeedbackNotice) {
        self.notices.lock().push(notice.clone());
    }
}
