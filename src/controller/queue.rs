//! Work queue of resource identities.
//!
//! An identity is queued at most once and processed by at most one worker
//! at a time. Adding an identity that is being processed marks it dirty;
//! it is queued again when the worker calls [`WorkQueue::done`]. Per
//! identity failure counts drive the backoff of [`WorkQueue::add_rate_limited`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::resource::ResourceId;

use super::backoff::Backoff;

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<ResourceId>,
    dirty: HashSet<ResourceId>,
    processing: HashSet<ResourceId>,
    scheduled: HashMap<ResourceId, Instant>,
    failures: HashMap<ResourceId, u32>,
    shutting_down: bool,
}

impl QueueState {
    fn add(&mut self, id: ResourceId) -> bool {
        if self.shutting_down || self.dirty.contains(&id) {
            return false;
        }
        self.scheduled.remove(&id);
        self.dirty.insert(id.clone());
        if self.processing.contains(&id) {
            return false;
        }
        self.ready.push_back(id);
        true
    }

    fn promote_due(&mut self, now: Instant) {
        let due: Vec<ResourceId> = self
            .scheduled
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in due {
            self.add(id);
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.scheduled.values().min().copied()
    }
}

/// Deduplicating, delay-aware work queue.
#[derive(Debug)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    backoff: Backoff,
}

impl WorkQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new(backoff: Backoff) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            backoff,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues an identity now.
    pub fn add(&self, id: ResourceId) {
        if self.lock().add(id) {
            self.notify.notify_one();
        }
    }

    /// Queues an identity after a delay.
    ///
    /// A later call replaces any delay still pending for the identity.
    pub fn add_after(&self, id: ResourceId, delay: Duration) {
        if delay.is_zero() {
            self.add(id);
            return;
        }
        {
            let mut state = self.lock();
            if state.shutting_down {
                return;
            }
            state.scheduled.insert(id, Instant::now() + delay);
        }
        // Waiting workers recompute their deadline.
        self.notify.notify_waiters();
    }

    /// Counts a failure and queues the identity after its backoff delay.
    ///
    /// Returns the delay.
    pub fn add_rate_limited(&self, id: ResourceId) -> Duration {
        let delay = {
            let mut state = self.lock();
            let failures = state.failures.entry(id.clone()).or_insert(0);
            *failures = failures.saturating_add(1);
            self.backoff.delay(*failures)
        };
        self.add_after(id, delay);
        delay
    }

    /// Clears the failure count of an identity.
    pub fn forget(&self, id: &ResourceId) {
        self.lock().failures.remove(id);
    }

    /// Drops an identity entirely: failure count and pending delay.
    pub fn remove(&self, id: &ResourceId) {
        let mut state = self.lock();
        state.failures.remove(id);
        state.scheduled.remove(id);
    }

    /// Returns the failure count of an identity.
    #[must_use]
    pub fn failures(&self, id: &ResourceId) -> u32 {
        self.lock().failures.get(id).copied().unwrap_or(0)
    }

    /// Returns the number of identities ready to be processed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().ready.len()
    }

    /// Returns true if nothing is ready to be processed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waits for the next identity to process.
    ///
    /// Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<ResourceId> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let deadline = {
                let mut state = self.lock();
                if state.shutting_down {
                    return None;
                }
                state.promote_due(Instant::now());
                if let Some(id) = state.ready.pop_front() {
                    state.dirty.remove(&id);
                    state.processing.insert(id.clone());
                    return Some(id);
                }
                state.next_deadline()
            };

            match deadline {
                Some(deadline) => {
                    tokio::select! {
                        () = &mut notified => {}
                        () = tokio::time::sleep_until(deadline) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Marks an identity as processed, requeueing it if it was added meanwhile.
    pub fn done(&self, id: &ResourceId) {
        let requeued = {
            let mut state = self.lock();
            state.processing.remove(id);
            if state.dirty.contains(id) && !state.shutting_down {
                state.ready.push_back(id.clone());
                true
            } else {
                false
            }
        };
        if requeued {
            self.notify.notify_one();
        }
    }

    /// Stops handing out work. Workers blocked in [`WorkQueue::get`] return.
    pub fn shut_down(&self) {
        self.lock().shutting_down = true;
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn id(name: &str) -> ResourceId {
        ResourceId::new("flux-system", name)
    }

    fn queue() -> WorkQueue {
        WorkQueue::new(Backoff::new(Duration::from_millis(10), Duration::from_millis(40)))
    }

    #[tokio::test]
    async fn test_deduplicates_queued_identities() {
        let queue = queue();
        queue.add(id("a"));
        queue.add(id("a"));
        queue.add(id("b"));
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.get().await, Some(id("a")));
        assert_eq!(queue.get().await, Some(id("b")));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_add_while_processing_requeues_on_done() {
        let queue = queue();
        queue.add(id("a"));
        let got = queue.get().await.expect("item");

        queue.add(id("a"));
        assert!(queue.is_empty(), "in-flight identity must not be handed out twice");

        queue.done(&got);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get().await, Some(id("a")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_after_waits_for_delay() {
        let queue = Arc::new(queue());
        queue.add_after(id("a"), Duration::from_secs(30));

        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.get().await })
        };
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!waiter.is_finished());

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(waiter.await.expect("join"), Some(id("a")));
    }

    #[tokio::test]
    async fn test_rate_limited_delays_grow_and_reset() {
        let queue = queue();
        assert_eq!(queue.add_rate_limited(id("a")), Duration::from_millis(10));
        assert_eq!(queue.add_rate_limited(id("a")), Duration::from_millis(20));
        assert_eq!(queue.add_rate_limited(id("a")), Duration::from_millis(40));
        assert_eq!(queue.add_rate_limited(id("a")), Duration::from_millis(40));
        assert_eq!(queue.failures(&id("a")), 4);

        queue.forget(&id("a"));
        assert_eq!(queue.failures(&id("a")), 0);
        assert_eq!(queue.add_rate_limited(id("a")), Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_shut_down_releases_waiters() {
        let queue = Arc::new(queue());
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.get().await })
        };
        tokio::task::yield_now().await;
        queue.shut_down();
        assert_eq!(waiter.await.expect("join"), None);

        queue.add(id("a"));
        assert!(queue.is_empty());
    }
}
