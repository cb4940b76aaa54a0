//! Page lifecycle handling.
//!
//! The host reports visibility changes and unloads as [`PageEvent`]s, either
//! by calling [`Pipeline::handle_page_event`](crate::Pipeline::handle_page_event)
//! or by feeding a channel to [`Pipeline::listen`](crate::Pipeline::listen).
//!
//! - `Hidden` ends the active view session and schedules a flush after the
//!   hide grace delay.
//! - `Visible` cancels that flush, so a quick tab switch costs nothing.
//! - `Unload` hands everything queued to the transport's beacon send.

use crate::timer::{self, Timer};
use std::time::Duration;

/// A lifecycle transition reported by the host surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageEvent {
    /// The page is no longer visible (tab switch, minimized, app backgrounded).
    Hidden,
    /// The page became visible again.
    Visible,
    /// The page is going away. Nothing after this can be awaited.
    Unload,
}

impl PageEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageEvent::Hidden => "hidden",
            PageEvent::Visible => "visible",
            PageEvent::Unload => "unload",
        }
    }
}

impl std::fmt::Display for PageEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Visibility as last reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
    Unloaded,
}

/// Tracks visibility and owns the hide grace timer.
#[derive(Debug)]
pub(crate) struct LifecycleMonitor {
    hide_grace: Duration,
    visibility: Visibility,
    grace_timer: Option<Timer>,
}

impl LifecycleMonitor {
    pub(crate) fn new(hide_grace: Duration) -> Self {
        Self {
            hide_grace,
            visibility: Visibility::Visible,
            grace_timer: None,
        }
    }

    pub(crate) fn hide_grace(&self) -> Duration {
        self.hide_grace
    }

    pub(crate) fn visibility(&self) -> Visibility {
        self.visibility
    }

    /// Record a hide and install `grace` as the pending flush, replacing any
    /// earlier one.
    pub(crate) fn on_hidden(&mut self, grace: Timer) {
        self.visibility = Visibility::Hidden;
        self.grace_timer = Some(grace);
    }

    /// Record a return to visible. Returns `true` if a pending grace flush
    /// was cancelled.
    pub(crate) fn on_visible(&mut self) -> bool {
        self.visibility = Visibility::Visible;
        self.grace_timer.take().is_some()
    }

    pub(crate) fn on_unload(&mut self) {
        self.visibility = Visibility::Unloaded;
        self.grace_timer = None;
    }

    /// Claim the grace timer `id` when it fires. Stale timers return `false`.
    pub(crate) fn grace_fired(&mut self, id: u64) -> bool {
        match timer::take_if_current(&mut self.grace_timer, id) {
            Some(timer) => {
                timer.fired();
                true
            }
            None => false,
        }
    }

    pub(crate) fn is_grace_pending(&self) -> bool {
        self.grace_timer.is_some()
    }

    pub(crate) fn cancel(&mut self) {
        self.grace_timer = None;
    }
}
