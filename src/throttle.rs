//! Per-key throttling with last-write-wins coalescing.
//!
//! The first call for a key runs immediately and opens a window. Calls that
//! arrive while the window is open replace one another; only the latest one
//! runs, at the end of the window, and opens a new window from that moment.
//!
//! # Example
//!
//! ```rust
//! use engage::throttle::{ThrottleDecision, Throttler};
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> engage::Result<()> {
//! let throttler = Throttler::new(Duration::from_secs(1), |query: String| {
//!     Box::pin(async move { println!("searching {query}") })
//! })?;
//!
//! assert_eq!(throttler.call("search", "ru".to_string()), ThrottleDecision::Executed);
//! assert!(matches!(
//!     throttler.call("search", "rust".to_string()),
//!     ThrottleDecision::Deferred { .. }
//! ));
//! # Ok(())
//! # }
//! ```

use crate::errors::EngageError;
use crate::timer::{self, Timer};
use crate::transport::BoxFuture;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::Instant;

/// The action a throttler runs, given the arguments of the winning call.
pub type Executor<T> = Arc<dyn Fn(T) -> BoxFuture<'static, ()> + Send + Sync>;

/// What happened to one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleDecision {
    /// The call ran immediately and opened a new window.
    Executed,
    /// The call is stored and runs when the window closes, unless a later
    /// call replaces it first.
    Deferred { retry_in: Duration },
    /// The throttler was shut down; the call was discarded.
    Closed,
}

struct Window<T> {
    ends_at: Instant,
    pending: Option<T>,
    timer: Option<Timer>,
}

impl<T> Window<T> {
    fn is_busy(&self, now: Instant) -> bool {
        now < self.ends_at || self.pending.is_some()
    }
}

struct Slots<K, T> {
    windows: HashMap<K, Window<T>>,
    closed: bool,
}

struct Inner<K, T> {
    window: Duration,
    runtime: Handle,
    execute: Executor<T>,
    slots: Mutex<Slots<K, T>>,
}

/// Independent throttle windows per key.
pub struct Throttler<K, T> {
    inner: Arc<Inner<K, T>>,
}

impl<K, T> Clone for Throttler<K, T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, T> Debug for Throttler<K, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Throttler")
            .field("window", &self.inner.window)
            .field("open_windows", &self.inner.slots.lock().windows.len())
            .finish()
    }
}

impl<K, T> Throttler<K, T>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
    T: Send + 'static,
{
    /// Create a throttler on the current tokio runtime.
    pub fn new<F>(window: Duration, execute: F) -> crate::Result<Self>
    where
        F: Fn(T) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        let runtime = Handle::try_current().map_err(|_| {
            EngageError::Builder("throttler must be created inside a tokio runtime".into())
        })?;
        Ok(Self::with_runtime(runtime, window, Arc::new(execute)))
    }

    /// Create a throttler that spawns onto `runtime`.
    pub fn with_runtime(runtime: Handle, window: Duration, execute: Executor<T>) -> Self {
        Self {
            inner: Arc::new(Inner {
                window,
                runtime,
                execute,
                slots: Mutex::new(Slots {
                    windows: HashMap::new(),
                    closed: false,
                }),
            }),
        }
    }

    /// Run `args` now, or store them as the pending call for `key`.
    pub fn call(&self, key: K, args: T) -> ThrottleDecision {
        let now = Instant::now();
        let mut slots = self.inner.slots.lock();
        if slots.closed {
            tracing::debug!(key = ?key, "throttler closed, call discarded");
            return ThrottleDecision::Closed;
        }

        slots.windows.retain(|_, window| window.is_busy(now));

        if let Some(window) = slots.windows.get_mut(&key) {
            let retry_in = window.ends_at.saturating_duration_since(now);
            if window.pending.replace(args).is_some() {
                tracing::debug!(key = ?key, "pending throttled call replaced");
            }
            if window.timer.is_none() {
                window.timer = Some(self.arm(key, retry_in));
            }
            return ThrottleDecision::Deferred { retry_in };
        }

        slots.windows.insert(
            key,
            Window {
                ends_at: now + self.inner.window,
                pending: None,
                timer: None,
            },
        );
        drop(slots);

        self.inner.runtime.spawn((self.inner.execute)(args));
        ThrottleDecision::Executed
    }

    /// Whether `key` has a call waiting for its window to close.
    pub fn is_pending(&self, key: &K) -> bool {
        self.inner
            .slots
            .lock()
            .windows
            .get(key)
            .is_some_and(|window| window.pending.is_some())
    }

    /// Number of keys with a call waiting.
    pub fn pending_count(&self) -> usize {
        self.inner
            .slots
            .lock()
            .windows
            .values()
            .filter(|window| window.pending.is_some())
            .count()
    }

    /// Cancel every window timer and discard pending calls. Later calls
    /// return [`ThrottleDecision::Closed`].
    pub fn shutdown(&self) {
        let mut slots = self.inner.slots.lock();
        slots.closed = true;
        let discarded = slots
            .windows
            .values()
            .filter(|window| window.pending.is_some())
            .count();
        slots.windows.clear();
        if discarded > 0 {
            tracing::debug!(discarded, "throttler shut down with pending calls");
        }
    }

    fn arm(&self, key: K, delay: Duration) -> Timer {
        let weak: Weak<Inner<K, T>> = Arc::downgrade(&self.inner);
        Timer::once(&self.inner.runtime, delay, move |id| {
            if let Some(inner) = weak.upgrade() {
                window_closed(&inner, key, id);
            }
        })
    }
}

fn window_closed<K, T>(inner: &Arc<Inner<K, T>>, key: K, timer_id: u64)
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
    T: Send + 'static,
{
    let mut slots = inner.slots.lock();
    if slots.closed {
        return;
    }

    let pending = {
        let Some(window) = slots.windows.get_mut(&key) else {
            return;
        };
        let Some(timer) = timer::take_if_current(&mut window.timer, timer_id) else {
            return;
        };
        timer.fired();

        let pending = window.pending.take();
        if pending.is_some() {
            window.ends_at = Instant::now() + inner.window;
        }
        pending
    };

    match pending {
        Some(args) => {
            drop(slots);
            tracing::debug!(key = ?key, "running throttled call");
            inner.runtime.spawn((inner.execute)(args));
        }
        None => {
            slots.windows.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Calls = Arc<Mutex<Vec<(&'static str, u32)>>>;

    fn recording(window: Duration) -> (Throttler<&'static str, (&'static str, u32)>, Calls) {
        let calls: Calls = Arc::new(Mutex::new(Vec::new()));
        let sink = calls.clone();
        let throttler = Throttler::new(window, move |args: (&'static str, u32)| {
            let sink = sink.clone();
            Box::pin(async move { sink.lock().push(args) }) as BoxFuture<'static, ()>
        })
        .unwrap();
        (throttler, calls)
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_call_executes_immediately() {
        let (throttler, calls) = recording(Duration::from_millis(1000));

        assert_eq!(throttler.call("like", ("a", 1)), ThrottleDecision::Executed);
        tokio::task::yield_now().await;
        assert_eq!(*calls.lock(), vec![("a", 1)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_calls_inside_window_coalesce_to_latest() {
        let (throttler, calls) = recording(Duration::from_millis(1000));

        throttler.call("like", ("a", 1));
        tokio::time::sleep(Duration::from_millis(200)).await;
        let decision = throttler.call("like", ("a", 2));
        assert_eq!(
            decision,
            ThrottleDecision::Deferred {
                retry_in: Duration::from_millis(800)
            }
        );
        throttler.call("like", ("b", 3));
        assert!(throttler.is_pending(&"like"));

        tokio::time::sleep(Duration::from_millis(900)).await;
        assert_eq!(*calls.lock(), vec![("a", 1), ("b", 3)]);
        assert!(!throttler.is_pending(&"like"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deferred_run_opens_new_window() {
        let (throttler, calls) = recording(Duration::from_millis(1000));

        throttler.call("like", ("a", 1));
        throttler.call("like", ("a", 2));
        tokio::time::sleep(Duration::from_millis(1010)).await;
        assert_eq!(calls.lock().len(), 2);

        // The deferred run at t=1000 opened a window until t=2000.
        assert!(matches!(
            throttler.call("like", ("a", 3)),
            ThrottleDecision::Deferred { .. }
        ));
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(calls.lock().last(), Some(&("a", 3)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_window_executes_again() {
        let (throttler, calls) = recording(Duration::from_millis(1000));

        throttler.call("like", ("a", 1));
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(throttler.call("like", ("a", 2)), ThrottleDecision::Executed);
        tokio::task::yield_now().await;
        assert_eq!(*calls.lock(), vec![("a", 1), ("a", 2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let (throttler, calls) = recording(Duration::from_millis(1000));

        assert_eq!(throttler.call("like", ("a", 1)), ThrottleDecision::Executed);
        assert_eq!(throttler.call("dislike", ("a", 2)), ThrottleDecision::Executed);
        tokio::task::yield_now().await;
        assert_eq!(calls.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_discards_pending() {
        let (throttler, calls) = recording(Duration::from_millis(1000));

        throttler.call("like", ("a", 1));
        throttler.call("like", ("a", 2));
        assert_eq!(throttler.pending_count(), 1);
        throttler.shutdown();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(*calls.lock(), vec![("a", 1)]);
        assert_eq!(throttler.call("like", ("a", 3)), ThrottleDecision::Closed);
    }
}
