//! View session tracking.
//!
//! A view session measures how long the user dwells on one entity. At most one
//! session is active at a time: starting a new one ends the previous one
//! first. Ending a session yields a `duration` event only when the rounded
//! elapsed time reaches the configured minimum.

use crate::event::{EntityType, EventType, TrackEvent, META_ACTION};
use serde_json::json;
use std::time::Duration;
use tokio::time::Instant;

/// The entity a view session is about.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewTarget {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub entity_title: Option<String>,
    pub entity_category: Option<String>,
    pub entity_tags: Option<Vec<String>>,
}

impl ViewTarget {
    pub fn new(entity_type: EntityType, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type,
            entity_id: entity_id.into(),
            entity_title: None,
            entity_category: None,
            entity_tags: None,
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

    fn event(&self, event_type: EventType) -> TrackEvent {
        TrackEvent {
            event_type,
            entity_type: self.entity_type,
            entity_id: self.entity_id.clone(),
            entity_title: self.entity_title.clone(),
            entity_category: self.entity_category.clone(),
            entity_tags: self.entity_tags.clone(),
            duration: None,
            metadata: serde_json::Map::new(),
        }
    }
}

/// A snapshot of one view session.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewSession {
    pub target: ViewTarget,
    pub start_time: Instant,
    pub last_activity: Instant,
    /// Whole seconds, filled in when the session ends.
    pub total_duration: u64,
    pub is_active: bool,
}

/// Events produced by a session transition, in emission order.
pub(crate) type Emitted = Vec<TrackEvent>;

/// Two-state machine: no session, or exactly one active session.
#[derive(Debug)]
pub(crate) struct ViewSessionTracker {
    min_duration: Duration,
    active: Option<ViewSession>,
}

impl ViewSessionTracker {
    pub(crate) fn new(min_duration: Duration) -> Self {
        Self {
            min_duration,
            active: None,
        }
    }

    /// Start tracking `target`, ending any active session first.
    pub(crate) fn start(&mut self, target: ViewTarget, now: Instant) -> Emitted {
        let mut emitted = Vec::with_capacity(2);
        if let Some(ended) = self.end(now) {
            emitted.push(ended);
        }

        emitted.push(
            target
                .event(EventType::View)
                .meta(META_ACTION, json!("start")),
        );
        self.active = Some(ViewSession {
            target,
            start_time: now,
            last_activity: now,
            total_duration: 0,
            is_active: true,
        });
        emitted
    }

    /// End the active session. Returns the `duration` event when the session
    /// lasted at least the minimum; `None` for short sessions or no session.
    pub(crate) fn end(&mut self, now: Instant) -> Option<TrackEvent> {
        let mut session = self.active.take()?;
        session.is_active = false;
        session.total_duration = rounded_secs(now.saturating_duration_since(session.start_time));

        if Duration::from_secs(session.total_duration) < self.min_duration {
            tracing::debug!(
                engage.entity.id = %session.target.entity_id,
                duration_s = session.total_duration,
                "view session below minimum, discarded"
            );
            return None;
        }

        Some(
            session
                .target
                .event(EventType::Duration)
                .duration(session.total_duration)
                .meta(META_ACTION, json!("end")),
        )
    }

    pub(crate) fn touch(&mut self, now: Instant) -> bool {
        match self.active.as_mut() {
            Some(session) => {
                session.last_activity = now;
                true
            }
            None => false,
        }
    }

    pub(crate) fn active(&self) -> Option<&ViewSession> {
        self.active.as_ref()
    }
}

/// Round to the nearest whole second, halves rounding up.
fn rounded_secs(elapsed: Duration) -> u64 {
    ((elapsed.as_millis() + 500) / 1000) as u64
}
