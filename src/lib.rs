#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::struct_field_names)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::trivially_copy_pass_by_ref)]
#![allow(clippy::single_match_else)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::manual_let_else)]
//! # engage
//!
//! Client-side activity telemetry: capture user interactions with content,
//! batch them, and deliver them to a collection endpoint without losing data
//! across page hides, navigations and unloads. Recommendation feedback goes
//! through a per-item throttle so rapid repeated taps collapse into one
//! request.
//!
//! ## Quick Start
//!
//! ### Tracking activity
//!
//! ```rust,no_run
//! use engage::{ConnectionConfig, EntityType, PageEvent, Pipeline, PipelineConfig, ViewTarget};
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> engage::Result<()> {
//! let pipeline = Pipeline::builder()
//!     .connection(ConnectionConfig::new("https://api.example.com").auth_token("secret"))
//!     .user_id(42)
//!     .config(PipelineConfig::new().batch_size(20).debounce(Duration::from_millis(500)))
//!     .build()?;
//!
//! pipeline.start_view_session(ViewTarget::new(EntityType::Article, "article-7"));
//! pipeline.track_click(EntityType::Benefit, "benefit-3");
//!
//! // Wire these to the host's visibility and unload notifications.
//! pipeline.handle_page_event(PageEvent::Hidden);
//! pipeline.handle_page_event(PageEvent::Visible);
//!
//! pipeline.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ### Recommendation feedback
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
//! feedback.like(EntityType::Story, "story-9");
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Batching**: size, debounce and max-wait triggers with failure backoff
//! - **Lifecycle-aware**: hide grace flush and beacon delivery on unload
//! - **View sessions**: dwell-time measurement with a minimum duration filter
//! - **Pluggable**: bring your own [`Transport`] and [`Platform`]

pub mod backoff;
pub mod config;
pub mod errors;
pub mod event;
pub mod feedback;
pub mod lifecycle;
pub mod pipeline;
pub mod platform;
mod queue;
pub mod scheduler;
pub mod session;
#[cfg(feature = "testing")]
#[cfg_attr(docsrs, doc(cfg(feature = "testing")))]
pub mod testing;
pub mod throttle;
mod timer;
pub mod transport;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use backoff::BackoffConfig;
pub use config::{ConnectionConfig, PipelineConfig};
pub use errors::{EngageError, Result, ServerError};
pub use event::{ActivityEvent, EntityType, EventBatch, EventType, TrackEvent};
pub use feedback::{
    FeedbackAction, FeedbackClient, FeedbackClientBuilder, FeedbackKey, FeedbackNotice,
    FeedbackObserver, FeedbackStatus, RecommendationFeedback, TracingObserver,
};
pub use lifecycle::{PageEvent, Visibility};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use platform::{DynPlatform, Platform, StaticPlatform, Viewport};
pub use scheduler::{FlushReason, FlushReport};
pub use session::{ViewSession, ViewTarget};
pub use throttle::{ThrottleDecision, Throttler};
#[cfg(feature = "reqwest-transport")]
pub use transport::HttpTransport;
pub use transport::{BoxFuture, DynTransport, Transport};
