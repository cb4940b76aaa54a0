//! Activity event model.
//!
//! An [`ActivityEvent`] is the immutable, enriched record that travels through
//! the queue and over the wire. Callers describe what happened with a
//! [`TrackEvent`]; the pipeline adds the user id, session id and environment
//! metadata before enqueueing.
//!
//! # Example
//!
//! ```rust
//! use engage::{EntityType, EventType, TrackEvent};
//! use serde_json::json;
//!
//! let event = TrackEvent::new(EventType::Click, EntityType::Article, "article-42")
//!     .title("Saving for retirement")
//!     .category("finance")
//!     .tags(vec!["money".into()])
//!     .meta("position", json!(3));
//! assert_eq!(event.entity_id, "article-42");
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Metadata keys injected by the pipeline
// ---------------------------------------------------------------------------

pub const META_TIMESTAMP: &str = "timestamp";
pub const META_URL: &str = "url";
pub const META_USER_AGENT: &str = "userAgent";
pub const META_VIEWPORT: &str = "viewport";
pub const META_ACTION: &str = "action";

// ---------------------------------------------------------------------------
// Event and entity kinds
// ---------------------------------------------------------------------------

/// What the user did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    View,
    Click,
    /// Time spent on an entity; the only kind that carries `duration`.
    Duration,
    Complete,
    Share,
    Like,
    Comment,
    Start,
    Pause,
    Resume,
    Exit,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::View => "view",
            EventType::Click => "click",
            EventType::Duration => "duration",
            EventType::Complete => "complete",
            EventType::Share => "share",
            EventType::Like => "like",
            EventType::Comment => "comment",
            EventType::Start => "start",
            EventType::Pause => "pause",
            EventType::Resume => "resume",
            EventType::Exit => "exit",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kind of content an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Article,
    Story,
    Benefit,
    Mission,
    Auction,
    Prize,
    Page,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Article => "article",
            EntityType::Story => "story",
            EntityType::Benefit => "benefit",
            EntityType::Mission => "mission",
            EntityType::Auction => "auction",
            EntityType::Prize => "prize",
            EntityType::Page => "page",
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Caller input
// ---------------------------------------------------------------------------

/// An event as described by application code, before enrichment.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackEvent {
    pub event_type: EventType,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub entity_title: Option<String>,
    pub entity_category: Option<String>,
    pub entity_tags: Option<Vec<String>>,
    /// Seconds; required when `event_type` is [`EventType::Duration`].
    pub duration: Option<u64>,
    pub metadata: Map<String, Value>,
}

impl TrackEvent {
    pub fn new(event_type: EventType, entity_type: EntityType, entity_id: impl Into<String>) -> Self {
        Self {
            event_type,
            entity_type,
            entity_id: entity_id.into(),
            entity_title: None,
            entity_category: None,
            entity_tags: None,
            duration: None,
            metadata: Map::new(),
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.entity_title = Some(title.into());
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.entity_category = Some(category.into());
        self
    }

    pub fn tags(mut self, tags: Vec<String>) -> Self {
        self.entity_tags = Some(tags);
        self
    }

    pub fn duration(mut self, seconds: u64) -> Self {
        self.duration = Some(seconds);
        self
    }

    /// Add one metadata entry. Caller entries override injected ones.
    pub fn meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Merge a whole metadata map.
    pub fn metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata.extend(metadata);
        self
    }

    /// Why this event cannot be tracked, if anything.
    pub(crate) fn rejection(&self) -> Option<&'static str> {
        if self.entity_id.trim().is_empty() {
            return Some("entity id is empty");
        }
        if self.event_type == EventType::Duration && self.duration.is_none() {
            return Some("duration event without a duration");
        }
        None
    }
}

// ---------------------------------------------------------------------------
// Enriched event
// ---------------------------------------------------------------------------

/// A fully enriched event ready for delivery.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
    pub user_id: u64,
    pub event_type: EventType,
    pub entity_type: EntityType,
    pub entity_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub session_id: String,
}

impl ActivityEvent {
    /// Build the wire event. `injected` is written first, then the caller's
    /// metadata is overlaid on top of it.
    pub(crate) fn enrich(
        request: TrackEvent,
        user_id: u64,
        session_id: &str,
        injected: Map<String, Value>,
    ) -> Self {
        let mut metadata = injected;
        metadata.extend(request.metadata);

        Self {
            user_id,
            event_type: request.event_type,
            entity_type: request.entity_type,
            entity_id: request.entity_id,
            entity_title: request.entity_title,
            entity_category: request.entity_category,
            entity_tags: request.entity_tags,
            duration: request.duration,
            metadata,
            session_id: session_id.to_string(),
        }
    }

    /// The `metadata.action` marker, if present.
    pub fn action(&self) -> Option<&str> {
        self.metadata.get(META_ACTION).and_then(Value::as_str)
    }
}

/// One delivery payload: `{ "events": [...] }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventBatch {
    pub events: Vec<ActivityEvent>,
}

impl EventBatch {
    pub fn new(events: Vec<ActivityEvent>) -> Self {
        Self { events }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn into_events(self) -> Vec<ActivityEvent> {
        self.events
    }
}
