//! The activity pipeline: capture, batching, delivery and lifecycle handling.
//!
//! # Example
//!
//! ```rust,no_run
//! use engage::{ConnectionConfig, EntityType, PageEvent, Pipeline, ViewTarget};
//!
//! # #[tokio::main]
//! # async fn main() -> engage::Result<()> {
//! let pipeline = Pipeline::builder()
//!     .connection(ConnectionConfig::new("https://api.example.com").auth_token("secret"))
//!     .user_id(42)
//!     .build()?;
//!
//! pipeline.start_view_session(ViewTarget::new(EntityType::Article, "article-7").title("Budgeting 101"));
//! pipeline.track_click(EntityType::Benefit, "benefit-3");
//! pipeline.handle_page_event(PageEvent::Hidden);
//!
//! pipeline.shutdown().await;
//! # Ok(())
//! # }
//! ```

use crate::config::PipelineConfig;
use crate::errors::EngageError;
use crate::event::{ActivityEvent, EntityType, EventBatch, EventType, TrackEvent};
use crate::lifecycle::{LifecycleMonitor, PageEvent, Visibility};
use crate::platform::{self, DynPlatform, StaticPlatform};
use crate::queue::{EventQueue, Requeue};
use crate::scheduler::{BatchScheduler, FlushReason, FlushReport, Trigger};
use crate::session::{ViewSession, ViewSessionTracker, ViewTarget};
use crate::timer::Timer;
use crate::transport::DynTransport;
use parking_lot::{Mutex, MutexGuard};
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

// ---------------------------------------------------------------------------
// Pipeline builder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Pipeline`].
pub struct PipelineBuilder {
    user_id: Option<u64>,
    session_id: Option<String>,
    transport: Option<DynTransport>,
    #[cfg(feature = "reqwest-transport")]
    connection: Option<crate::ConnectionConfig>,
    platform: Option<DynPlatform>,
    config: PipelineConfig,
}

impl PipelineBuilder {
    fn new() -> Self {
        Self {
            user_id: None,
            session_id: None,
            transport: None,
            #[cfg(feature = "reqwest-transport")]
            connection: None,
            platform: None,
            config: PipelineConfig::default(),
        }
    }

    /// Set the user every event is attributed to. Without one, tracking is
    /// a no-op.
    pub fn user_id(mut self, user_id: u64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Use a host-supplied session id instead of a generated UUID.
    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Use a custom transport.
    pub fn transport(mut self, transport: DynTransport) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Deliver over HTTP with these connection settings.
    #[cfg(feature = "reqwest-transport")]
    pub fn connection(mut self, connection: crate::ConnectionConfig) -> Self {
        self.connection = Some(connection);
        self
    }

    /// Describe the host surface (default: [`StaticPlatform`] with nothing
    /// known).
    pub fn platform(mut self, platform: DynPlatform) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Set the batching and lifecycle configuration.
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the pipeline and start its max-wait timer. Must be called
    /// inside a tokio runtime.
    pub fn build(self) -> crate::Result<Pipeline> {
        if self.config.batch_size == 0 {
            return Err(EngageError::Builder("batch_size must be at least 1".into()));
        }
        if self.config.max_wait.is_zero() {
            return Err(EngageError::Builder("max_wait must be non-zero".into()));
        }

        let runtime = Handle::try_current().map_err(|_| {
            EngageError::Builder("pipeline must be built inside a tokio runtime".into())
        })?;

        let transport = match self.transport {
            Some(transport) => transport,
            #[cfg(feature = "reqwest-transport")]
            None => match self.connection {
                Some(connection) => Arc::new(crate::transport::HttpTransport::new(connection)?),
                None => return Err(EngageError::Builder("transport or connection is required".into())),
            },
            #[cfg(not(feature = "reqwest-transport"))]
            None => return Err(EngageError::Builder("transport is required".into())),
        };

        let platform = self
            .platform
            .unwrap_or_else(|| Arc::new(StaticPlatform::default()));
        let session_id = self
            .session_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let state = State {
            queue: EventQueue::new(),
            scheduler: BatchScheduler::new(&self.config),
            views: ViewSessionTracker::new(self.config.min_view_duration),
            lifecycle: LifecycleMonitor::new(self.config.hide_grace),
            outbox: VecDeque::new(),
            delivering: false,
            closed: false,
        };

        let inner = Arc::new(Inner {
            config: self.config,
            transport,
            platform,
            runtime,
            user_id: self.user_id,
            session_id,
            state: Mutex::new(state),
        });
        inner.start_max_wait();

        if inner.user_id.is_none() {
            tracing::debug!("pipeline built without a user id, tracking is disabled");
        }
        tracing::info!(
            engage.session.id = %inner.session_id,
            user_id = ?inner.user_id,
            batch_size = inner.config.batch_size,
            "activity pipeline started"
        );

        Ok(Pipeline { inner })
    }
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

struct State {
    queue: EventQueue,
    scheduler: BatchScheduler,
    views: ViewSessionTracker,
    lifecycle: LifecycleMonitor,
    /// Drained batches in drain order; the front one may be on the wire.
    outbox: VecDeque<Outgoing>,
    delivering: bool,
    closed: bool,
}

/// A drained batch waiting for, or in, delivery.
struct Outgoing {
    batch: EventBatch,
    reason: FlushReason,
    reply: oneshot::Sender<FlushReport>,
}

enum FlushStart {
    /// The batch is in the outbox; its report arrives on the receiver.
    Queued(usize, oneshot::Receiver<FlushReport>),
    /// Nothing was drained.
    Skipped(FlushReport),
}

struct Inner {
    config: PipelineConfig,
    transport: DynTransport,
    platform: DynPlatform,
    runtime: Handle,
    user_id: Option<u64>,
    session_id: String,
    state: Mutex<State>,
}

impl Inner {
    /// Validate and enrich a caller event.
    fn prepare(&self, request: TrackEvent) -> Option<ActivityEvent> {
        let Some(user_id) = self.user_id else {
            tracing::debug!(engage.entity.id = %request.entity_id, "no user id, event ignored");
            return None;
        };
        if let Some(reason) = request.rejection() {
            tracing::debug!(
                engage.entity.id = %request.entity_id,
                event_type = %request.event_type,
                reason,
                "event rejected"
            );
            return None;
        }
        let injected = platform::injected_metadata(self.platform.as_ref());
        Some(ActivityEvent::enrich(request, user_id, &self.session_id, injected))
    }

    /// Append to the queue and let the scheduler decide what happens next.
    fn enqueue(self: &Arc<Self>, state: &mut State, request: TrackEvent) -> bool {
        let Some(event) = self.prepare(request) else {
            return false;
        };
        state.queue.push(event);

        match state.scheduler.after_enqueue(state.queue.len(), Instant::now()) {
            Trigger::FlushNow => {
                self.begin_flush(state, FlushReason::Size);
            }
            Trigger::Debounce(delay) => self.arm_debounce(state, delay),
        }
        true
    }

    fn arm_debounce(self: &Arc<Self>, state: &mut State, delay: Duration) {
        let weak = Arc::downgrade(self);
        let timer = Timer::once(&self.runtime, delay, move |id| {
            if let Some(inner) = weak.upgrade() {
                inner.debounce_fired(id);
            }
        });
        state.scheduler.arm_debounce(timer);
    }

    fn debounce_fired(self: &Arc<Self>, id: u64) {
        let mut state = self.state.lock();
        if state.scheduler.debounce_fired(id) {
            self.begin_flush(&mut state, FlushReason::Debounce);
        }
    }

    fn start_max_wait(self: &Arc<Self>) {
        let weak: Weak<Inner> = Arc::downgrade(self);
        let timer = Timer::every(&self.runtime, self.config.max_wait, move |id| {
            let alive = match weak.upgrade() {
                Some(inner) => inner.max_wait_tick(id),
                None => false,
            };
            async move { alive }
        });
        self.state.lock().scheduler.start_max_wait(timer);
    }

    fn max_wait_tick(self: &Arc<Self>, id: u64) -> bool {
        let mut state = self.state.lock();
        if !state.scheduler.is_max_wait_current(id) {
            return false;
        }
        if !state.queue.is_empty() {
            self.begin_flush(&mut state, FlushReason::MaxWait);
        }
        true
    }

    fn arm_hide_grace(self: &Arc<Self>, state: &mut State) {
        let weak = Arc::downgrade(self);
        let timer = Timer::once(&self.runtime, state.lifecycle.hide_grace(), move |id| {
            if let Some(inner) = weak.upgrade() {
                inner.hide_grace_fired(id);
            }
        });
        state.lifecycle.on_hidden(timer);
    }

    fn hide_grace_fired(self: &Arc<Self>, id: u64) {
        let mut state = self.state.lock();
        if state.lifecycle.grace_fired(id) {
            self.begin_flush(&mut state, FlushReason::Hidden);
        }
    }

    /// Drain the queue into the outbox at the moment the flush fires and
    /// make sure the delivery task is running.
    fn begin_flush(self: &Arc<Self>, state: &mut State, reason: FlushReason) -> FlushStart {
        if reason.respects_backoff() {
            if let Some(remaining) = state.scheduler.backoff_remaining(Instant::now()) {
                tracing::debug!(
                    reason = %reason,
                    retry_in_ms = remaining.as_millis() as u64,
                    "flush deferred by delivery backoff"
                );
                if reason == FlushReason::Debounce && !state.closed {
                    self.arm_debounce(state, remaining);
                }
                return FlushStart::Skipped(FlushReport::Deferred);
            }
        }

        state.scheduler.cancel_debounce();
        if state.queue.is_empty() {
            return FlushStart::Skipped(FlushReport::Empty);
        }

        let batch = EventBatch::new(state.queue.drain());
        let count = batch.len();
        tracing::debug!(engage.batch.size = count, reason = %reason, "flushing batch");

        let (reply, receiver) = oneshot::channel();
        state.outbox.push_back(Outgoing {
            batch,
            reason,
            reply,
        });
        if !state.delivering {
            state.delivering = true;
            let inner = self.clone();
            self.runtime.spawn(inner.deliver());
        }
        FlushStart::Queued(count, receiver)
    }

    async fn flush(self: &Arc<Self>, reason: FlushReason) -> FlushReport {
        let start = {
            let mut state = self.state.lock();
            self.begin_flush(&mut state, reason)
        };
        match start {
            FlushStart::Skipped(report) => report,
            FlushStart::Queued(count, receiver) => {
                receiver.await.unwrap_or(FlushReport::Dropped(count))
            }
        }
    }

    /// Send outbox batches one at a time, oldest first, until it is empty.
    /// At most one of these runs per pipeline.
    async fn deliver(self: Arc<Self>) {
        loop {
            let outgoing = {
                let mut state = self.state.lock();
                match state.outbox.pop_front() {
                    Some(outgoing) => outgoing,
                    None => {
                        state.delivering = false;
                        return;
                    }
                }
            };
            let result = self.transport.send_batch(&outgoing.batch).await;
            self.settle(outgoing, result);
        }
    }

    fn settle(self: &Arc<Self>, outgoing: Outgoing, result: crate::Result<()>) {
        let Outgoing {
            batch,
            reason,
            reply,
        } = outgoing;
        let count = batch.len();
        let mut state = self.state.lock();

        let report = match result {
            Ok(()) => {
                state.scheduler.record_success();
                tracing::debug!(engage.batch.size = count, reason = %reason, "batch delivered");
                FlushReport::Delivered(count)
            }
            Err(error) if !error.is_retryable() => {
                tracing::warn!(
                    error = %error,
                    engage.batch.size = count,
                    reason = %reason,
                    "batch rejected by the endpoint, dropped"
                );
                FlushReport::Dropped(count)
            }
            Err(error) => self.requeue_failed(&mut state, batch, reason, &error),
        };
        let _ = reply.send(report);
    }

    fn requeue_failed(
        self: &Arc<Self>,
        state: &mut State,
        batch: EventBatch,
        reason: FlushReason,
        error: &EngageError,
    ) -> FlushReport {
        let count = batch.len();
        let now = Instant::now();
        let backoff = state.scheduler.record_failure(now);
        tracing::warn!(
            error = %error,
            engage.batch.size = count,
            reason = %reason,
            failures = state.scheduler.consecutive_failures(),
            retry_in_ms = backoff.as_millis() as u64,
            "batch delivery failed"
        );

        if state.closed {
            tracing::warn!(engage.batch.size = count, "pipeline closed, failed batch dropped");
            return FlushReport::Dropped(count);
        }

        // Batches drained after the failed one have not been sent; they go
        // back first so the failed batch lands ahead of them.
        while let Some(later) = state.outbox.pop_back() {
            let n = later.batch.len();
            state.queue.restore_front(later.batch.into_events());
            let _ = later.reply.send(FlushReport::Requeued(n));
        }

        let report = match state
            .queue
            .requeue(batch.into_events(), self.config.requeue_capacity())
        {
            Requeue::Restored(n) => FlushReport::Requeued(n),
            Requeue::Dropped(n) => {
                tracing::warn!(
                    engage.batch.size = n,
                    queued = state.queue.len(),
                    capacity = self.config.requeue_capacity(),
                    "requeue capacity reached, failed batch dropped"
                );
                FlushReport::Dropped(n)
            }
        };

        if !state.queue.is_empty() {
            let delay = state.scheduler.debounce_delay(now);
            self.arm_debounce(state, delay);
        }
        report
    }

    fn end_view_session(self: &Arc<Self>, state: &mut State) -> bool {
        match state.views.end(Instant::now()) {
            Some(event) => self.enqueue(state, event),
            None => false,
        }
    }

    /// Hand the whole queue, and every batch not yet on the wire, to the
    /// beacon send without awaiting anything.
    fn unload(self: &Arc<Self>, mut state: MutexGuard<'_, State>) {
        if let Some(event) = state.views.end(Instant::now()) {
            if let Some(event) = self.prepare(event) {
                state.queue.push(event);
            }
        }
        state.lifecycle.on_unload();
        state.scheduler.cancel_debounce();

        let mut events = Vec::new();
        let mut replies = Vec::new();
        for outgoing in state.outbox.drain(..) {
            replies.push((outgoing.reply, outgoing.batch.len()));
            events.extend(outgoing.batch.into_events());
        }
        events.extend(state.queue.drain());
        drop(state);

        if events.is_empty() {
            return;
        }
        let batch = EventBatch::new(events);
        let count = batch.len();

        let outcome = if self.transport.send_beacon(&batch) {
            tracing::debug!(engage.batch.size = count, "unload batch handed to beacon");
            None
        } else {
            let mut state = self.state.lock();
            let outcome = state
                .queue
                .requeue(batch.into_events(), self.config.requeue_capacity());
            match outcome {
                Requeue::Restored(n) => {
                    tracing::warn!(engage.batch.size = n, "beacon refused, batch requeued");
                }
                Requeue::Dropped(n) => {
                    tracing::warn!(engage.batch.size = n, "beacon refused and queue full, batch dropped");
                }
            }
            Some(outcome)
        };

        for (reply, n) in replies {
            let report = match outcome {
                None => FlushReport::Delivered(n),
                Some(Requeue::Restored(_)) => FlushReport::Requeued(n),
                Some(Requeue::Dropped(_)) => FlushReport::Dropped(n),
            };
            let _ = reply.send(report);
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// An activity pipeline bound to one user and one session.
///
/// Cheap to clone; clones share the same queue, timers and view session.
/// Tracking methods are synchronous and return immediately; delivery happens
/// on spawned tasks.
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("user_id", &self.inner.user_id)
            .field("session_id", &self.inner.session_id)
            .field("transport", &self.inner.transport)
            .field("queued", &self.queued_len())
            .finish()
    }
}

impl Pipeline {
    /// Create a new pipeline builder.
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    pub fn user_id(&self) -> Option<u64> {
        self.inner.user_id
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    // -----------------------------------------------------------------------
    // Tracking
    // -----------------------------------------------------------------------

    /// Enrich and enqueue one event.
    ///
    /// Returns `false` when the event was ignored: no user id, an empty
    /// entity id, a `duration` event without a duration, or a closed
    /// pipeline.
    pub fn track(&self, event: TrackEvent) -> bool {
        let mut state = self.inner.state.lock();
        if state.closed {
            tracing::debug!(engage.entity.id = %event.entity_id, "pipeline closed, event ignored");
            return false;
        }
        self.inner.enqueue(&mut state, event)
    }

    pub fn track_view(&self, entity_type: EntityType, entity_id: impl Into<String>) -> bool {
        self.track(TrackEvent::new(EventType::View, entity_type, entity_id))
    }

    pub fn track_click(&self, entity_type: EntityType, entity_id: impl Into<String>) -> bool {
        self.track(TrackEvent::new(EventType::Click, entity_type, entity_id))
    }

    pub fn track_complete(&self, entity_type: EntityType, entity_id: impl Into<String>) -> bool {
        self.track(TrackEvent::new(EventType::Complete, entity_type, entity_id))
    }

    /// Track a share; `channel` lands in `metadata.channel`.
    pub fn track_share(
        &self,
        entity_type: EntityType,
        entity_id: impl Into<String>,
        channel: Option<&str>,
    ) -> bool {
        let mut event = TrackEvent::new(EventType::Share, entity_type, entity_id);
        if let Some(channel) = channel {
            event = event.meta("channel", serde_json::json!(channel));
        }
        self.track(event)
    }

    pub fn track_like(&self, entity_type: EntityType, entity_id: impl Into<String>) -> bool {
        self.track(TrackEvent::new(EventType::Like, entity_type, entity_id))
    }

    pub fn track_comment(&self, entity_type: EntityType, entity_id: impl Into<String>) -> bool {
        self.track(TrackEvent::new(EventType::Comment, entity_type, entity_id))
    }

    // -----------------------------------------------------------------------
    // View sessions
    // -----------------------------------------------------------------------

    /// Start measuring dwell time on `target`, ending any active session.
    pub fn start_view_session(&self, target: ViewTarget) {
        let mut state = self.inner.state.lock();
        if state.closed {
            tracing::debug!(engage.entity.id = %target.entity_id, "pipeline closed, view session ignored");
            return;
        }
        let emitted = state.views.start(target, Instant::now());
        for event in emitted {
            self.inner.enqueue(&mut state, event);
        }
    }

    /// End the active session. Returns whether a `duration` event was
    /// emitted.
    pub fn end_view_session(&self) -> bool {
        let mut state = self.inner.state.lock();
        if state.views.active().is_none() {
            tracing::debug!("no active view session to end");
            return false;
        }
        self.inner.end_view_session(&mut state)
    }

    /// Refresh the active session's last activity time.
    pub fn record_view_activity(&self) -> bool {
        self.inner.state.lock().views.touch(Instant::now())
    }

    pub fn active_view_session(&self) -> Option<ViewSession> {
        self.inner.state.lock().views.active().cloned()
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// React to a lifecycle transition of the host page. Events after an
    /// unload are ignored.
    pub fn handle_page_event(&self, event: PageEvent) {
        let mut state = self.inner.state.lock();
        if state.closed {
            tracing::debug!(page_event = %event, "pipeline closed, page event ignored");
            return;
        }
        if state.lifecycle.visibility() == Visibility::Unloaded {
            tracing::debug!(page_event = %event, "page unloaded, page event ignored");
            return;
        }

        match event {
            PageEvent::Hidden => {
                self.inner.end_view_session(&mut state);
                self.inner.arm_hide_grace(&mut state);
            }
            PageEvent::Visible => {
                if state.lifecycle.on_visible() {
                    tracing::debug!("page visible again, grace flush cancelled");
                }
            }
            PageEvent::Unload => self.inner.unload(state),
        }
    }

    /// Consume page events from `events` on a spawned task until the channel
    /// closes or the pipeline is dropped.
    pub fn listen(&self, mut events: mpsc::UnboundedReceiver<PageEvent>) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        self.inner.runtime.spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                Pipeline { inner }.handle_page_event(event);
            }
        })
    }

    pub fn visibility(&self) -> Visibility {
        self.inner.state.lock().lifecycle.visibility()
    }

    // -----------------------------------------------------------------------
    // Delivery
    // -----------------------------------------------------------------------

    /// Deliver everything queued now. Never fails; the report says what
    /// happened to the batch.
    pub async fn flush(&self) -> FlushReport {
        self.inner.flush(FlushReason::Explicit).await
    }

    /// Whether a debounce or hide grace flush is waiting to fire.
    pub fn is_flush_scheduled(&self) -> bool {
        let state = self.inner.state.lock();
        state.scheduler.is_debounce_armed() || state.lifecycle.is_grace_pending()
    }

    pub fn queued_len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// Copy of the queued events, oldest first.
    pub fn queued_events(&self) -> Vec<ActivityEvent> {
        self.inner.state.lock().queue.snapshot()
    }

    /// Consecutive delivery failures since the last success.
    pub fn delivery_failures(&self) -> u32 {
        self.inner.state.lock().scheduler.consecutive_failures()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// End the view session, stop every timer and deliver what is left.
    ///
    /// After this, tracking calls are ignored and a failed final flush is
    /// dropped rather than requeued. Calling it again returns
    /// [`FlushReport::Empty`].
    pub async fn shutdown(&self) -> FlushReport {
        {
            let mut state = self.inner.state.lock();
            if state.closed {
                return FlushReport::Empty;
            }
            state.closed = true;

            if let Some(event) = state.views.end(Instant::now()) {
                if let Some(event) = self.inner.prepare(event) {
                    state.queue.push(event);
                }
            }
            state.scheduler.cancel_all();
            state.lifecycle.cancel();
        }

        let report = self.inner.flush(FlushReason::Shutdown).await;
        tracing::info!(
            engage.session.id = %self.inner.session_id,
            report = ?report,
            "activity pipeline shut down"
        );
        report
    }
}
