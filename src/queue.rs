use crate::event::ActivityEvent;
use std::collections::VecDeque;

/// Outcome of returning a failed batch to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Requeue {
    /// The batch is back at the front of the queue.
    Restored(usize),
    /// Restoring the batch would have reached the capacity cap.
    Dropped(usize),
}

/// Ordered buffer of events awaiting delivery.
///
/// Insertion order is delivery order. Draining hands out everything queued so
/// far and leaves a fresh, empty queue behind.
#[derive(Debug, Default)]
pub(crate) struct EventQueue {
    events: VecDeque<ActivityEvent>,
}

impl EventQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, event: ActivityEvent) {
        self.events.push_back(event);
    }

    pub(crate) fn len(&self) -> usize {
        self.events.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub(crate) fn drain(&mut self) -> Vec<ActivityEvent> {
        std::mem::take(&mut self.events).into()
    }

    /// Put a failed batch back in front of newer events.
    ///
    /// The batch is kept only while the resulting length stays below
    /// `capacity`; otherwise it is discarded as a whole.
    pub(crate) fn requeue(&mut self, batch: Vec<ActivityEvent>, capacity: usize) -> Requeue {
        let count = batch.len();
        if self.events.len() + count >= capacity {
            return Requeue::Dropped(count);
        }
        self.restore_front(batch);
        Requeue::Restored(count)
    }

    /// Put unsent events back in front of newer ones, ignoring the cap.
    pub(crate) fn restore_front(&mut self, events: Vec<ActivityEvent>) {
        for event in events.into_iter().rev() {
            self.events.push_front(event);
        }
    }

    pub(crate) fn snapshot(&self) -> Vec<ActivityEvent> {
        self.events.iter().cloned().collect()
    }
}
