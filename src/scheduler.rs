use crate::backoff::{Backoff, BackoffConfig};
use crate::config::PipelineConfig;
use crate::timer::{self, Timer};
use std::time::Duration;
use tokio::time::Instant;

/// Why a flush was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// The queue reached `batch_size`.
    Size,
    /// The debounce window elapsed without new events.
    Debounce,
    /// The periodic max-wait timer fired.
    MaxWait,
    /// The page stayed hidden for the grace delay.
    Hidden,
    /// [`Pipeline::flush`](crate::Pipeline::flush) was called.
    Explicit,
    /// Final flush during shutdown.
    Shutdown,
}

impl FlushReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushReason::Size => "size",
            FlushReason::Debounce => "debounce",
            FlushReason::MaxWait => "max_wait",
            FlushReason::Hidden => "hidden",
            FlushReason::Explicit => "explicit",
            FlushReason::Shutdown => "shutdown",
        }
    }

    /// Timer-driven flushes are held back while a failure backoff is active.
    pub(crate) fn respects_backoff(&self) -> bool {
        matches!(self, FlushReason::Debounce | FlushReason::MaxWait)
    }
}

impl std::fmt::Display for FlushReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a flush did with the batch it drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReport {
    /// Nothing was queued.
    Empty,
    /// The batch was delivered, or handed to the beacon on unload.
    Delivered(usize),
    /// Delivery of this batch, or of an earlier one still in flight, failed;
    /// the batch is back at the front of the queue.
    Requeued(usize),
    /// Delivery failed, or the endpoint rejected the batch as invalid, and
    /// it was discarded.
    Dropped(usize),
    /// A failure backoff is active; nothing was sent.
    Deferred,
}

/// What the pipeline should do right after an enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Trigger {
    /// The size threshold was reached; flush now.
    FlushNow,
    /// (Re)arm the debounce timer with this delay.
    Debounce(Duration),
}

/// Decides when the queue is flushed and owns the timers that drive it.
#[derive(Debug)]
pub(crate) struct BatchScheduler {
    batch_size: usize,
    debounce: Duration,
    backoff_config: BackoffConfig,
    backoff: Backoff,
    debounce_timer: Option<Timer>,
    max_wait_timer: Option<Timer>,
}

impl BatchScheduler {
    pub(crate) fn new(config: &PipelineConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            debounce: config.debounce,
            backoff_config: config.backoff.clone(),
            backoff: Backoff::default(),
            debounce_timer: None,
            max_wait_timer: None,
        }
    }

    pub(crate) fn after_enqueue(&mut self, queue_len: usize, now: Instant) -> Trigger {
        if queue_len >= self.batch_size {
            self.cancel_debounce();
            return Trigger::FlushNow;
        }
        Trigger::Debounce(self.debounce_delay(now))
    }

    /// Debounce window, stretched to cover any active backoff.
    pub(crate) fn debounce_delay(&self, now: Instant) -> Duration {
        match self.backoff.remaining(now) {
            Some(remaining) => remaining.max(self.debounce),
            None => self.debounce,
        }
    }

    pub(crate) fn arm_debounce(&mut self, timer: Timer) {
        self.debounce_timer = Some(timer);
    }

    pub(crate) fn cancel_debounce(&mut self) {
        self.debounce_timer = None;
    }

    /// Claim the debounce timer `id` when it fires. Returns `false` for a
    /// stale timer that has since been replaced or cancelled.
    pub(crate) fn debounce_fired(&mut self, id: u64) -> bool {
        match timer::take_if_current(&mut self.debounce_timer, id) {
            Some(timer) => {
                timer.fired();
                true
            }
            None => false,
        }
    }

    pub(crate) fn is_debounce_armed(&self) -> bool {
        self.debounce_timer.is_some()
    }

    pub(crate) fn start_max_wait(&mut self, timer: Timer) {
        self.max_wait_timer = Some(timer);
    }

    pub(crate) fn is_max_wait_current(&self, id: u64) -> bool {
        self.max_wait_timer.as_ref().map(Timer::id) == Some(id)
    }

    pub(crate) fn backoff_remaining(&self, now: Instant) -> Option<Duration> {
        self.backoff.remaining(now)
    }

    pub(crate) fn record_failure(&mut self, now: Instant) -> Duration {
        self.backoff.record_failure(&self.backoff_config, now)
    }

    pub(crate) fn record_success(&mut self) {
        self.backoff.record_success();
    }

    pub(crate) fn consecutive_failures(&self) -> u32 {
        self.backoff.failures()
    }

    /// Drop every timer this scheduler armed.
    pub(crate) fn cancel_all(&mut self) {
        self.debounce_timer = None;
        self.max_wait_timer = None;
    }
}
