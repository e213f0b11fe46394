//! Deduplicating, rate-limited work queue.
//!
//! Keys move through three sets:
//! - `queue`: ready to be handed out by [`WorkQueue::get`]
//! - `dirty`: needs processing (queued, or re-added while in flight)
//! - `processing`: handed out and not yet [`WorkQueue::done`]
//!
//! A key is in `queue` at most once and never in `queue` while it is in
//! `processing`, which gives at-most-one-in-flight per key no matter how many
//! workers call `get` concurrently.

use crate::backoff::{ItemBackoff, DEFAULT_ITEM_BASE_DELAY, DEFAULT_ITEM_MAX_DELAY};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;

struct QueueState<K> {
    queue: VecDeque<K>,
    dirty: HashSet<K>,
    processing: HashSet<K>,
    shutting_down: bool,
    backoff: ItemBackoff<K>,
}

struct Inner<K> {
    state: Mutex<QueueState<K>>,
    notify: Notify,
}

/// Work queue with per-key deduplication and exponential requeue backoff.
///
/// Cheap to clone; clones share the same queue.
pub struct WorkQueue<K> {
    inner: Arc<Inner<K>>,
}

impl<K> Clone for WorkQueue<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K> fmt::Debug for WorkQueue<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkQueue").finish_non_exhaustive()
    }
}

impl<K> WorkQueue<K>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
{
    /// Creates a queue with the default requeue backoff (5ms doubling up to 1000s).
    pub fn new() -> Self {
        Self::with_backoff(DEFAULT_ITEM_BASE_DELAY, DEFAULT_ITEM_MAX_DELAY)
    }

    /// Creates a queue whose rate-limited requeues start at `base` and cap at `max`.
    pub fn with_backoff(base: Duration, max: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    shutting_down: false,
                    backoff: ItemBackoff::new(base, max),
                }),
                notify: Notify::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState<K>> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks `key` as needing processing.
    ///
    /// Adding a key that is already pending is a no-op. Adding a key that is in
    /// flight defers it until [`WorkQueue::done`]. Ignored after shutdown.
    pub fn add(&self, key: K) {
        let mut state = self.state();
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }
        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.inner.notify.notify_one();
    }

    /// Waits for the next key and marks it in flight.
    ///
    /// Returns `None` once the queue is shutting down, even if keys remain.
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before checking state so an add or shutdown in between is not lost
            notified.as_mut().enable();

            {
                let mut state = self.state();
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Marks `key` as no longer in flight.
    ///
    /// If the key was re-added while it was being processed it becomes
    /// available again immediately.
    pub fn done(&self, key: &K) {
        let mut state = self.state();
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.clone());
            drop(state);
            self.inner.notify.notify_one();
        }
    }

    /// Clears the requeue history of `key`.
    pub fn forget(&self, key: &K) {
        self.state().backoff.forget(key);
    }

    /// Number of rate-limited requeues of `key` since it was last forgotten.
    pub fn num_requeues(&self, key: &K) -> u32 {
        self.state().backoff.num_requeues(key)
    }

    /// Re-adds `key` after its exponential backoff delay and counts the requeue.
    pub fn add_rate_limited(&self, key: K) {
        let delay = {
            let mut state = self.state();
            if state.shutting_down {
                return;
            }
            state.backoff.when(&key)
        };
        self.add_after(key, delay);
    }

    /// Re-adds `key` once `delay` has elapsed.
    pub fn add_after(&self, key: K, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Number of keys waiting to be handed out.
    pub fn len(&self) -> usize {
        self.state().queue.len()
    }

    /// No keys waiting to be handed out.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops the queue: pending and future `get` calls return `None`.
    ///
    /// Idempotent.
    pub fn shut_down(&self) {
        self.state().shutting_down = true;
        self.inner.notify.notify_waiters();
    }

    /// [`WorkQueue::shut_down`] has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.state().shutting_down
    }
}

impl<K> Default for WorkQueue<K>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
