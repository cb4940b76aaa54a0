use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Backoff applied to timer-driven flushes after a failed delivery.
///
/// After each consecutive failure the debounce and max-wait flushes are held
/// back for an exponentially growing, jittered delay. Size-triggered flushes,
/// explicit flushes and unload delivery are never delayed.
///
/// # Example
///
/// ```rust
/// use engage::BackoffConfig;
/// use std::time::Duration;
///
/// let config = BackoffConfig::default()
///     .with_min_backoff(Duration::from_millis(200))
///     .with_max_backoff(Duration::from_secs(60));
/// assert!(config.enabled);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Base delay for the first failure (default: 1s).
    #[serde(default = "default_min_backoff", rename = "min_ms", with = "crate::config::duration_ms")]
    pub min_backoff: Duration,
    /// Upper bound for any delay (default: 30s).
    #[serde(default = "default_max_backoff", rename = "max_ms", with = "crate::config::duration_ms")]
    pub max_backoff: Duration,
    /// Whether backoff is applied at all (default: true).
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            min_backoff: default_min_backoff(),
            max_backoff: default_max_backoff(),
            enabled: default_enabled(),
        }
    }
}

impl BackoffConfig {
    /// Create a `BackoffConfig` with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the base backoff duration.
    pub fn with_min_backoff(mut self, d: Duration) -> Self {
        self.min_backoff = d;
        self
    }

    /// Set the maximum backoff duration.
    pub fn with_max_backoff(mut self, d: Duration) -> Self {
        self.max_backoff = d;
        self
    }

    /// Enable or disable backoff.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Create a `BackoffConfig` that never delays flushes.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Delay after the `failures`-th consecutive failure (1-based).
    pub(crate) fn compute_backoff(&self, failures: u32) -> Duration {
        let attempt = failures.saturating_sub(1);

        // Exponential backoff: min_backoff * 2^attempt, clamped to max_backoff.
        let base_ms = self.min_backoff.as_millis() as u64;
        let exp_ms = base_ms.saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX));
        let max_ms = self.max_backoff.as_millis() as u64;
        let clamped_ms = exp_ms.min(max_ms);

        // Jitter: uniform in [clamped/2, clamped] using system time nanos.
        let half = clamped_ms / 2;
        let jitter_range = clamped_ms - half;
        let jitter = if jitter_range > 0 {
            let nanos = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .subsec_nanos() as u64;
            nanos % (jitter_range + 1)
        } else {
            0
        };

        Duration::from_millis(half + jitter)
    }
}

fn default_min_backoff() -> Duration {
    Duration::from_millis(1000)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(30)
}

fn default_enabled() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Runtime state
// ---------------------------------------------------------------------------

/// Consecutive-failure bookkeeping for one pipeline.
#[derive(Debug, Default)]
pub(crate) struct Backoff {
    failures: u32,
    until: Option<Instant>,
}

impl Backoff {
    pub(crate) fn record_failure(&mut self, config: &BackoffConfig, now: Instant) -> Duration {
        self.failures = self.failures.saturating_add(1);
        if !config.enabled {
            self.until = None;
            return Duration::ZERO;
        }
        let delay = config.compute_backoff(self.failures);
        self.until = Some(now + delay);
        delay
    }

    pub(crate) fn record_success(&mut self) {
        self.failures = 0;
        self.until = None;
    }

    /// Time left before timer-driven flushes may run again.
    pub(crate) fn remaining(&self, now: Instant) -> Option<Duration> {
        self.until
            .filter(|until| *until > now)
            .map(|until| until - now)
    }

    pub(crate) fn failures(&self) -> u32 {
        self.failures
    }
}
