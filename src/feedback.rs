//! Recommendation feedback with per-entity throttling.
//!
//! Repeated feedback for the same `(entity type, entity id, action)` within the
//! throttle window is coalesced: the first call is submitted immediately, the
//! latest of the following calls is submitted when the window closes. The
//! user is told how long to wait instead of having the action silently
//! swallowed.
//!
//! # Example
//!
//! ```rust,no_run
//! use engage::{ConnectionConfig, EntityType, FeedbackClient};
//!
//! # #[tokio::main]
//! # async fn main() -> engage::Result<()> {
//! let feedback = FeedbackClient::builder()
//!     .connection(ConnectionConfig::new("https://api.example.com"))
//!     .user_id(42)
//!     .build()?;
//!
//! feedback.like(EntityType::Article, "article-7");
//! feedback.not_interested(EntityType::Auction, "auction-3", Some("too expensive".into()));
//! # Ok(())
//! # }
//! ```

use crate::errors::EngageError;
use crate::event::EntityType;
use crate::throttle::{ThrottleDecision, Throttler};
use crate::transport::{BoxFuture, DynTransport};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// The kind of feedback a user gives on a recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackAction {
    Like,
    Dislike,
    NotInterested,
    Save,
    Hide,
}

impl FeedbackAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackAction::Like => "like",
            FeedbackAction::Dislike => "dislike",
            FeedbackAction::NotInterested => "not_interested",
            FeedbackAction::Save => "save",
            FeedbackAction::Hide => "hide",
        }
    }
}

impl fmt::Display for FeedbackAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One feedback submission, as sent to the feedback endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationFeedback {
    pub user_id: u64,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub action: FeedbackAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl RecommendationFeedback {
    pub fn new(
        user_id: u64,
        entity_type: EntityType,
        entity_id: impl Into<String>,
        action: FeedbackAction,
    ) -> Self {
        Self {
            user_id,
            entity_type,
            entity_id: entity_id.into(),
            action,
            score: None,
            reason: None,
            context: None,
            metadata: None,
        }
    }

    pub fn score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    pub fn metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// The throttle key this submission belongs to.
    pub fn key(&self) -> FeedbackKey {
        FeedbackKey {
            entity_type: self.entity_type,
            entity_id: self.entity_id.clone(),
            action: self.action,
        }
    }
}

/// Identifies one throttle window.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FeedbackKey {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub action: FeedbackAction,
}

impl FeedbackKey {
    pub fn new(entity_type: EntityType, entity_id: impl Into<String>, action: FeedbackAction) -> Self {
        Self {
            entity_type,
            entity_id: entity_id.into(),
            action,
        }
    }
}

impl fmt::Display for FeedbackKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.entity_type, self.entity_id, self.action)
    }
}

// ---------------------------------------------------------------------------
// Status and notices
// ---------------------------------------------------------------------------

/// Latest known state of the feedback for one key.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedbackStatus {
    /// Submitted or waiting for its window; no response yet.
    Pending,
    /// The endpoint accepted the feedback.
    Submitted,
    /// The endpoint rejected the feedback or could not be reached.
    Failed(String),
}

/// What the user should be told about a feedback call.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedbackNotice {
    /// The call was held back and will be sent when the window closes.
    Deferred { key: FeedbackKey, retry_in: Duration },
    /// The feedback was accepted. Recommendation caches for `user_id` are
    /// now stale.
    Submitted { user_id: u64, key: FeedbackKey },
    /// The feedback could not be submitted. It is not retried.
    Failed { key: FeedbackKey, error: String },
}

impl FeedbackNotice {
    /// Text suitable for a toast or status line.
    pub fn message(&self) -> String {
        match self {
            FeedbackNotice::Deferred { retry_in, .. } => {
                let secs = retry_in.as_millis().div_ceil(1000).max(1);
                let unit = if secs == 1 { "second" } else { "seconds" };
                format!("Feedback received, try again in {} {}", secs, unit)
            }
            FeedbackNotice::Submitted { .. } => "Thanks for your feedback".to_string(),
            FeedbackNotice::Failed { error, .. } => {
                format!("Could not save your feedback: {}", error)
            }
        }
    }
}

/// Receives user-facing feedback notices.
pub trait FeedbackObserver: Send + Sync + 'static {
    fn notify(&self, notice: &FeedbackNotice);
}

/// Observer that only logs notices.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl FeedbackObserver for TracingObserver {
    fn notify(&self, notice: &FeedbackNotice) {
        match notice {
            FeedbackNotice::Deferred { key, retry_in } => {
                tracing::debug!(
                    engage.feedback.key = %key,
                    retry_in_ms = retry_in.as_millis() as u64,
                    "feedback deferred"
                );
            }
            FeedbackNotice::Submitted { user_id, key } => {
                tracing::debug!(engage.feedback.key = %key, user_id, "feedback submitted");
            }
            FeedbackNotice::Failed { key, error } => {
                tracing::warn!(engage.feedback.key = %key, error = %error, "feedback failed");
            }
        }
    }
}

type StatusMap = Arc<Mutex<HashMap<FeedbackKey, FeedbackStatus>>>;

// ---------------------------------------------------------------------------
// Client builder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`FeedbackClient`].
pub struct FeedbackClientBuilder {
    user_id: Option<u64>,
    transport: Option<DynTransport>,
    #[cfg(feature = "reqwest-transport")]
    connection: Option<crate::ConnectionConfig>,
    throttle_window: Duration,
    observer: Arc<dyn FeedbackObserver>,
}

impl FeedbackClientBuilder {
    fn new() -> Self {
        Self {
            user_id: None,
            transport: None,
            #[cfg(feature = "reqwest-transport")]
            connection: None,
            throttle_window: Duration::from_millis(1000),
            observer: Arc::new(TracingObserver),
        }
    }

    /// Set the user the feedback is attributed to.
    pub fn user_id(mut self, user_id: u64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Use a custom transport.
    pub fn transport(mut self, transport: DynTransport) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Send over HTTP with these connection settings.
    #[cfg(feature = "reqwest-transport")]
    pub fn connection(mut self, connection: crate::ConnectionConfig) -> Self {
        self.connection = Some(connection);
        self
    }

    /// Set the throttle window (default: 1s).
    pub fn throttle_window(mut self, window: Duration) -> Self {
        self.throttle_window = window;
        self
    }

    /// Receive user-facing notices.
    pub fn observer(mut self, observer: Arc<dyn FeedbackObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Build the client. Must be called inside a tokio runtime.
    pub fn build(self) -> crate::Result<FeedbackClient> {
        let user_id = self
            .user_id
            .ok_or_else(|| EngageError::Builder("user_id is required".into()))?;

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

        let status: StatusMap = Arc::new(Mutex::new(HashMap::new()));
        let observer = self.observer;
        let execute = {
            let status = status.clone();
            let observer = observer.clone();
            move |feedback: RecommendationFeedback| -> BoxFuture<'static, ()> {
                let transport = transport.clone();
                let status = status.clone();
                let observer = observer.clone();
                Box::pin(async move { submit(&transport, &status, observer.as_ref(), feedback).await })
            }
        };

        let throttler = Throttler::new(self.throttle_window, execute)?;

        Ok(FeedbackClient {
            user_id,
            throttler,
            status,
            observer,
        })
    }
}

async fn submit(
    transport: &DynTransport,
    status: &StatusMap,
    observer: &dyn FeedbackObserver,
    feedback: RecommendationFeedback,
) {
    let key = feedback.key();
    match transport.submit_feedback(&feedback).await {
        Ok(()) => {
            status.lock().insert(key.clone(), FeedbackStatus::Submitted);
            observer.notify(&FeedbackNotice::Submitted {
                user_id: feedback.user_id,
                key,
            });
        }
        Err(e) => {
            let error = e.to_string();
            status
                .lock()
                .insert(key.clone(), FeedbackStatus::Failed(error.clone()));
            observer.notify(&FeedbackNotice::Failed { key, error });
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Submits recommendation feedback through a per-key throttle.
#[derive(Clone)]
pub struct FeedbackClient {
    user_id: u64,
    throttler: Throttler<FeedbackKey, RecommendationFeedback>,
    status: StatusMap,
    observer: Arc<dyn FeedbackObserver>,
}

impl fmt::Debug for FeedbackClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedbackClient")
            .field("user_id", &self.user_id)
            .field("throttler", &self.throttler)
            .finish()
    }
}

impl FeedbackClient {
    /// Create a new feedback client builder.
    pub fn builder() -> FeedbackClientBuilder {
        FeedbackClientBuilder::new()
    }

    pub fn user_id(&self) -> u64 {
        self.user_id
    }

    /// Start a submission for this client's user, to customize before
    /// passing it to [`submit`](Self::submit).
    pub fn feedback(
        &self,
        entity_type: EntityType,
        entity_id: impl Into<String>,
        action: FeedbackAction,
    ) -> RecommendationFeedback {
        RecommendationFeedback::new(self.user_id, entity_type, entity_id, action)
    }

    /// Submit feedback, subject to the throttle window of its key.
    pub fn submit(&self, feedback: RecommendationFeedback) -> ThrottleDecision {
        let key = feedback.key();

        // Held across the call: a finished submission must not be reset to Pending.
        let mut status = self.status.lock();
        let decision = self.throttler.call(key.clone(), feedback);
        if decision != ThrottleDecision::Closed {
            status.insert(key.clone(), FeedbackStatus::Pending);
        }
        drop(status);

        if let ThrottleDecision::Deferred { retry_in } = decision {
            self.observer
                .notify(&FeedbackNotice::Deferred { key, retry_in });
        }
        decision
    }

    pub fn like(&self, entity_type: EntityType, entity_id: impl Into<String>) -> ThrottleDecision {
        self.submit(self.feedback(entity_type, entity_id, FeedbackAction::Like))
    }

    pub fn dislike(
        &self,
        entity_type: EntityType,
        entity_id: impl Into<String>,
    ) -> ThrottleDecision {
        self.submit(self.feedback(entity_type, entity_id, FeedbackAction::Dislike))
    }

    pub fn not_interested(
        &self,
        entity_type: EntityType,
        entity_id: impl Into<String>,
        reason: Option<String>,
    ) -> ThrottleDecision {
        let mut feedback = self.feedback(entity_type, entity_id, FeedbackAction::NotInterested);
        feedback.reason = reason;
        self.submit(feedback)
    }

    pub fn save(&self, entity_type: EntityType, entity_id: impl Into<String>) -> ThrottleDecision {
        self.submit(self.feedback(entity_type, entity_id, FeedbackAction::Save))
    }

    pub fn hide(&self, entity_type: EntityType, entity_id: impl Into<String>) -> ThrottleDecision {
        self.submit(self.feedback(entity_type, entity_id, FeedbackAction::Hide))
    }

    /// Latest status for `key`, if feedback was ever given for it.
    pub fn status(&self, key: &FeedbackKey) -> Option<FeedbackStatus> {
        self.status.lock().get(key).cloned()
    }

    /// Whether a deferred submission is waiting for `key`.
    pub fn is_pending(&self, key: &FeedbackKey) -> bool {
        self.throttler.is_pending(key)
    }

    /// Cancel window timers and discard deferred submissions.
    pub fn shutdown(&self) {
        self.throttler.shutdown();
    }
}
