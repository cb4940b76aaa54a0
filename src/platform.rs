use crate::event::{META_TIMESTAMP, META_URL, META_USER_AGENT, META_VIEWPORT};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt::Debug;
use std::sync::Arc;

/// Visible area of the host surface, in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// Environment facts the host exposes to the pipeline.
///
/// Implement this for whatever surface embeds the pipeline (a webview bridge,
/// a desktop shell, a test harness). Values are read on every enqueue, so an
/// implementation may return live data.
pub trait Platform: Send + Sync + Debug {
    /// The location the user is currently looking at.
    fn current_url(&self) -> Option<String>;

    /// User-agent string of the host.
    fn user_agent(&self) -> Option<String>;

    /// Current viewport size.
    fn viewport(&self) -> Option<Viewport>;
}

/// A cloneable, type-erased platform handle.
pub type DynPlatform = Arc<dyn Platform>;

/// A platform with fixed values, set once at construction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StaticPlatform {
    pub url: Option<String>,
    pub user_agent: Option<String>,
    pub viewport: Option<Viewport>,
}

impl StaticPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn viewport(mut self, width: u32, height: u32) -> Self {
        self.viewport = Some(Viewport { width, height });
        self
    }
}

impl Platform for StaticPlatform {
    fn current_url(&self) -> Option<String> {
        self.url.clone()
    }

    fn user_agent(&self) -> Option<String> {
        self.user_agent.clone()
    }

    fn viewport(&self) -> Option<Viewport> {
        self.viewport
    }
}

/// Metadata every event carries before caller keys are overlaid.
pub(crate) fn injected_metadata(platform: &dyn Platform) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert(
        META_TIMESTAMP.into(),
        json!(chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)),
    );
    metadata.insert(META_URL.into(), json!(platform.current_url()));
    metadata.insert(META_USER_AGENT.into(), json!(platform.user_agent()));
    metadata.insert(META_VIEWPORT.into(), json!(platform.viewport()));
    metadata
}
