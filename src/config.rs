use crate::backoff::BackoffConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Connection settings
// ---------------------------------------------------------------------------

/// Shared connection configuration for the collection endpoint.
///
/// Use this to share connection settings between a
/// [`Pipeline`](crate::Pipeline) and a [`FeedbackClient`](crate::FeedbackClient)
/// talking to the same server.
///
/// # Example
///
/// ```rust
/// use engage::ConnectionConfig;
///
/// let config = ConnectionConfig::new("https://api.example.com")
///     .auth_token("my-token")
///     .header("X-Tenant-Id", "tenant-42")
///     .timeout(std::time::Duration::from_secs(10));
/// assert_eq!(config.url, "https://api.example.com");
/// ```
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Base URL of the collection endpoint.
    pub url: String,
    /// Authentication bearer token.
    pub auth_token: Option<String>,
    /// Custom HTTP headers.
    pub headers: HashMap<String, String>,
    /// Request timeout for asynchronous sends.
    pub timeout: Option<Duration>,
}

impl ConnectionConfig {
    /// Create a new connection config with the given base URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auth_token: None,
            headers: HashMap::new(),
            timeout: None,
        }
    }

    /// Set the authentication bearer token.
    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Add a custom HTTP header.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Set the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

// ---------------------------------------------------------------------------
// Pipeline tuning
// ---------------------------------------------------------------------------

/// Tuning knobs for batching, view sessions and lifecycle handling.
///
/// Every field has a default, so partial configuration documents deserialize:
///
/// ```rust
/// use engage::PipelineConfig;
///
/// let config: PipelineConfig = serde_json::from_str(r#"{"batch_size": 25}"#).unwrap();
/// assert_eq!(config.batch_size, 25);
/// assert_eq!(config.debounce.as_millis(), 1000);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Queue length that triggers an immediate flush.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Quiet period after the last enqueue before a debounced flush.
    #[serde(default = "default_debounce", rename = "debounce_ms", with = "duration_ms")]
    pub debounce: Duration,

    /// Period of the max-wait flush that bounds event staleness.
    #[serde(default = "default_max_wait", rename = "max_wait_ms", with = "duration_ms")]
    pub max_wait: Duration,

    /// View sessions shorter than this emit no `duration` event.
    #[serde(
        default = "default_min_view_duration",
        rename = "min_view_duration_secs",
        with = "duration_secs"
    )]
    pub min_view_duration: Duration,

    /// Delay between the page becoming hidden and the flush it schedules.
    #[serde(default = "default_hide_grace", rename = "hide_grace_ms", with = "duration_ms")]
    pub hide_grace: Duration,

    /// Delay applied to timer-driven flushes after delivery failures.
    #[serde(default)]
    pub backoff: BackoffConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            debounce: default_debounce(),
            max_wait: default_max_wait(),
            min_view_duration: default_min_view_duration(),
            hide_grace: default_hide_grace(),
            backoff: BackoffConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the size-trigger threshold.
    pub fn batch_size(mut self, n: usize) -> Self {
        self.batch_size = n;
        self
    }

    /// Set the debounce window.
    pub fn debounce(mut self, d: Duration) -> Self {
        self.debounce = d;
        self
    }

    /// Set the max-wait flush period.
    pub fn max_wait(mut self, d: Duration) -> Self {
        self.max_wait = d;
        self
    }

    /// Set the minimum view duration that produces a `duration` event.
    pub fn min_view_duration(mut self, d: Duration) -> Self {
        self.min_view_duration = d;
        self
    }

    /// Set the grace delay between hide and flush.
    pub fn hide_grace(mut self, d: Duration) -> Self {
        self.hide_grace = d;
        self
    }

    /// Set the delivery-failure backoff.
    pub fn backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Largest queue length a failed batch may be requeued into.
    pub(crate) fn requeue_capacity(&self) -> usize {
        self.batch_size.saturating_mul(2)
    }
}

// ---------------------------------------------------------------------------
// Default value functions for serde
// ---------------------------------------------------------------------------

fn default_batch_size() -> usize {
    10
}

fn default_debounce() -> Duration {
    Duration::from_millis(1000)
}

fn default_max_wait() -> Duration {
    Duration::from_millis(30_000)
}

fn default_min_view_duration() -> Duration {
    Duration::from_secs(5)
}

fn default_hide_grace() -> Duration {
    Duration::from_millis(1000)
}

pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
