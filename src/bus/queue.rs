use crate::events::StatusEvent;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// Fixed-capacity event queue with drop-oldest overflow
///
/// Pushing never blocks: when the queue is full the oldest event is evicted to
/// make room and handed back to the caller. A single consumer awaits events
/// with [`EventQueue::pop`].
#[derive(Debug)]
pub struct EventQueue {
    items: Mutex<VecDeque<StatusEvent>>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
}

impl EventQueue {
    /// Create a queue holding at most `capacity` events (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueue an event, returning the evicted oldest event if the queue was full
    pub fn push(&self, event: StatusEvent) -> Option<StatusEvent> {
        let evicted = {
            let mut items = self.lock();
            let evicted = if items.len() >= self.capacity {
                items.pop_front()
            } else {
                None
            };
            items.push_back(event);
            evicted
        };
        self.notify.notify_one();
        evicted
    }

    /// Take the oldest queued event without waiting
    pub fn try_pop(&self) -> Option<StatusEvent> {
        self.lock().pop_front()
    }

    /// Wait for the next event
    ///
    /// Returns `None` once the queue has been closed and fully drained.
    pub async fn pop(&self) -> Option<StatusEvent> {
        loop {
            let notified = self.notify.notified();
            if let Some(event) = self.try_pop() {
                return Some(event);
            }
            if self.is_closed() {
                return None;
            }
            notified.await;
        }
    }

    /// Stop accepting waits; queued events can still be drained
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Remove and return every queued event, oldest first
    pub fn drain(&self) -> Vec<StatusEvent> {
        self.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<StatusEvent>> {
        // A poisoned guard still holds a well-formed deque
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}



// Property-based tests
#[cfg(test)]
mod property_tests {
    use super::test_support::numbered_event;
    use super::*;
    use quickcheck_macros::quickcheck;

    #[quickcheck]
    fn prop_queue_retains_most_recent_events(capacity: u8, pushed: u8) -> bool {
        let capacity = (capacity % 32) as usize + 1;
        let pushed = pushed as usize % 100;
        let queue = EventQueue::new(capacity);

        let mut evictions = 0;
        for n in 0..pushed {
            if queue.push(numbered_event(n)).is_some() {
                evictions += 1;
            }
        }

        let retained: Vec<String> = queue.drain().into_iter().map(|e| e.incident.id).collect();
        let expected: Vec<String> = (pushed.saturating_sub(capacity)..pushed)
            .map(|n| format!("INC{}", n))
            .collect();

        retained == expected && evictions == pushed.saturating_sub(capacity)
    }
}
