//! Thread-safe queue for handing data from background listeners to steps
//!
//! A [`MessageQueue`] is a cheap handle: clones share the same buffer. The
//! producer side is typically a listener task owned by a subscribe step,
//! the consumer side a validation step that dequeues with a timeout.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<Vec<u8>>,
    /// First error reported by the producer, kept until read
    error: Option<String>,
    /// Set once the producer has stopped
    closed: bool,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<QueueState>,
    notify: Notify,
}

/// Producer/consumer queue of byte payloads
#[derive(Debug, Clone, Default)]
pub struct MessageQueue {
    shared: Arc<Shared>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an item and wake one waiting consumer
    pub fn push(&self, item: Vec<u8>) {
        self.state().items.push_back(item);
        self.shared.notify.notify_one();
    }

    /// Remove the oldest item without waiting
    pub fn try_pop(&self) -> Option<Vec<u8>> {
        self.state().items.pop_front()
    }

    /// Remove the oldest item, waiting up to `timeout` for one to arrive
    ///
    /// Returns `None` on timeout, or as soon as the queue is empty and the
    /// producer has closed it.
    pub async fn pop_timeout(&self, timeout: Duration) -> Option<Vec<u8>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Register interest before checking so a push between the check
            // and the await is not missed.
            let notified = self.shared.notify.notified();
            {
                let mut state = self.state();
                if let Some(item) = state.items.pop_front() {
                    return Some(item);
                }
                if state.closed {
                    return None;
                }
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.try_pop();
            }
        }
    }

    /// Wait until at least `count` items are buffered, without removing any
    ///
    /// Returns `false` on timeout or when the producer closes the queue
    /// before enough items arrived.
    pub async fn wait_len(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.shared.notify.notified();
            {
                let state = self.state();
                if state.items.len() >= count {
                    // Pass the wakeup on: a consumer may be waiting too
                    self.shared.notify.notify_one();
                    return true;
                }
                if state.closed {
                    return false;
                }
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.len() >= count;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.state().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().items.is_empty()
    }

    /// Record a producer failure; the first reported failure wins
    pub fn fail(&self, reason: impl Into<String>) {
        let mut state = self.state();
        if state.error.is_none() {
            state.error = Some(reason.into());
        }
        state.closed = true;
        drop(state);
        self.shared.notify.notify_waiters();
    }

    /// Mark the queue as no longer receiving items
    pub fn close(&self) {
        self.state().closed = true;
        self.shared.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    /// Producer failure, if any
    pub fn error(&self) -> Option<String> {
        self.state().error.clone()
    }
}
