use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

static NEXT_TIMER_ID: AtomicU64 = AtomicU64::new(1);

/// An armed, cancellable timer task.
///
/// The owner keeps the handle in an `Option` slot; dropping it aborts the
/// task. Callbacks receive the timer id and must check that the slot still
/// holds that id before acting, since a callback may already be running when
/// its handle is replaced.
#[derive(Debug)]
pub(crate) struct Timer {
    id: u64,
    task: Option<JoinHandle<()>>,
}

impl Timer {
    /// Run `callback` once after `delay`.
    pub(crate) fn once<F>(runtime: &Handle, delay: Duration, callback: F) -> Self
    where
        F: FnOnce(u64) + Send + 'static,
    {
        let id = NEXT_TIMER_ID.fetch_add(1, Ordering::Relaxed);
        let task = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            callback(id);
        });
        Self {
            id,
            task: Some(task),
        }
    }

    /// Run `tick` every `period`, first after one full period, until it
    /// returns `false` or the timer is dropped.
    pub(crate) fn every<F, Fut>(runtime: &Handle, period: Duration, mut tick: F) -> Self
    where
        F: FnMut(u64) -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send,
    {
        let id = NEXT_TIMER_ID.fetch_add(1, Ordering::Relaxed);
        let task = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // skip first immediate tick

            loop {
                ticker.tick().await;
                if !tick(id).await {
                    break;
                }
            }
        });
        Self {
            id,
            task: Some(task),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Release a timer whose callback is currently running, without aborting
    /// that callback.
    pub(crate) fn fired(mut self) {
        self.task.take();
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Take the timer out of `slot` if it is the one identified by `id`.
pub(crate) fn take_if_current(slot: &mut Option<Timer>, id: u64) -> Option<Timer> {
    match slot {
        Some(timer) if timer.id() == id => slot.take(),
        _ => None,
    }
}
