#[cfg(feature = "reqwest-transport")]
pub(crate) mod http;

#[cfg(feature = "reqwest-transport")]
pub use self::http::HttpTransport;

use crate::event::EventBatch;
use crate::feedback::RecommendationFeedback;
use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// A boxed future used by the transport layer.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Delivery client for the collection and feedback endpoints.
///
/// This trait is object-safe and uses `Pin<Box<dyn Future>>` for async
/// support. The default implementation uses reqwest (enabled via the
/// `reqwest-transport` feature).
///
/// Implement this trait to provide custom transports (e.g., a webview bridge,
/// a message bus, or an in-memory fake for tests).
///
/// # Example
///
/// ```rust
/// use engage::transport::{BoxFuture, Transport};
/// use engage::{EventBatch, RecommendationFeedback};
///
/// #[derive(Debug)]
/// struct StdoutTransport;
///
/// impl Transport for StdoutTransport {
///     fn send_batch<'a>(&'a self, batch: &'a EventBatch) -> BoxFuture<'a, engage::Result<()>> {
///         Box::pin(async move {
///             println!("{}", serde_json::to_string(batch)?);
///             Ok(())
///         })
///     }
///
///     fn send_beacon(&self, batch: &EventBatch) -> bool {
///         println!("beacon with {} events", batch.len());
///         true
///     }
///
///     fn submit_feedback<'a>(
///         &'a self,
///         feedback: &'a RecommendationFeedback,
///     ) -> BoxFuture<'a, engage::Result<()>> {
///         Box::pin(async move {
///             println!("{}", serde_json::to_string(feedback)?);
///             Ok(())
///         })
///     }
/// }
/// ```
pub trait Transport: Send + Sync + Debug {
    /// Deliver one batch of events. Used by every scheduled or explicit flush.
    fn send_batch<'a>(&'a self, batch: &'a EventBatch) -> BoxFuture<'a, crate::Result<()>>;

    /// Hand a batch off for best-effort delivery without waiting for it.
    ///
    /// Must not block on the network and must not rely on the caller's task
    /// staying alive. Returns `false` if the batch could not even be handed
    /// off.
    fn send_beacon(&self, batch: &EventBatch) -> bool;

    /// Submit one piece of recommendation feedback.
    fn submit_feedback<'a>(
        &'a self,
        feedback: &'a RecommendationFeedback,
    ) -> BoxFuture<'a, crate::Result<()>>;
}

/// A cloneable, type-erased transport handle.
pub type DynTransport = Arc<dyn Transport>;
