//! Deduplicating, rate-limited work queue
//!
//! Keys wait in FIFO order. A key already waiting is not added twice, and a key
//! that is being processed is parked as dirty and handed out again only after
//! the worker holding it calls [`WorkQueue::done`], so one key is never worked
//! on by two workers at once. Failed keys come back after a per-key
//! exponential backoff.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct QueueState {
    queue: VecDeque<String>,
    dirty: HashSet<String>,
    processing: HashSet<String>,
    failures: HashMap<String, u32>,
    shutting_down: bool,
}

#[derive(Debug)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    base_delay: Duration,
    max_delay: Duration,
}

impl WorkQueue {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            base_delay,
            max_delay,
        }
    }

    /// Enqueue `key` unless it is already waiting
    pub fn add(&self, key: &str) {
        let mut state = self.lock();
        if state.shutting_down || !state.dirty.insert(key.to_string()) {
            return;
        }
        if state.processing.contains(key) {
            return;
        }
        state.queue.push_back(key.to_string());
        drop(state);
        self.notify.notify_one();
    }

    /// Wait for the next key; `None` once the queue is shut down
    pub async fn get(&self) -> Option<String> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
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

    /// Release `key` after processing; re-queue it if it was re-added meanwhile
    pub fn done(&self, key: &str) {
        let mut state = self.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.to_string());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Re-add `key` after its backoff delay; returns the delay used
    pub fn add_rate_limited(self: &Arc<Self>, key: &str) -> Duration {
        let delay = {
            let mut state = self.lock();
            let failures = state.failures.entry(key.to_string()).or_insert(0);
            let delay = backoff(self.base_delay, self.max_delay, *failures);
            *failures += 1;
            delay
        };

        if delay.is_zero() {
            self.add(key);
        } else {
            let queue = Arc::clone(self);
            let key = key.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                queue.add(&key);
            });
        }
        delay
    }

    /// How many times `key` has been re-added after a failure
    pub fn num_requeues(&self, key: &str) -> u32 {
        self.lock().failures.get(key).copied().unwrap_or(0)
    }

    /// Clear the failure history of `key`
    pub fn forget(&self, key: &str) {
        self.lock().failures.remove(key);
    }

    /// Keys waiting to be handed out
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop handing out keys and wake every waiting worker
    pub fn shut_down(&self) {
        self.lock().shutting_down = true;
        self.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn backoff(base: Duration, max: Duration, failures: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(failures)).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> Arc<WorkQueue> {
        Arc::new(WorkQueue::new(
            Duration::from_millis(10),
            Duration::from_secs(1),
        ))
    }

    #[tokio::test]
    async fn pending_duplicates_collapse() {
        let q = queue();
        q.add("demo/a");
        q.add("demo/a");
        q.add("demo/b");
        assert_eq!(q.len(), 2);

        assert_eq!(q.get().await.as_deref(), Some("demo/a"));
        assert_eq!(q.get().await.as_deref(), Some("demo/b"));
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn key_added_while_processing_waits_for_done() {
        let q = queue();
        q.add("demo/a");
        let key = q.get().await.unwrap();

        q.add("demo/a");
        q.add("demo/a");
        assert!(q.is_empty(), "in-flight key must not be handed out again");

        q.done(&key);
        assert_eq!(q.len(), 1);
        assert_eq!(q.get().await.as_deref(), Some("demo/a"));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_millis(5);
        let max = Duration::from_millis(100);
        assert_eq!(backoff(base, max, 0), Duration::from_millis(5));
        assert_eq!(backoff(base, max, 1), Duration::from_millis(10));
        assert_eq!(backoff(base, max, 3), Duration::from_millis(40));
        assert_eq!(backoff(base, max, 10), max);
        assert_eq!(backoff(base, max, 64), max);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_key_returns_after_delay() {
        let q = queue();
        q.add("demo/a");
        let key = q.get().await.unwrap();

        assert_eq!(q.add_rate_limited(&key), Duration::from_millis(10));
        q.done(&key);
        assert_eq!(q.num_requeues(&key), 1);
        assert!(q.is_empty());

        let start = tokio::time::Instant::now();
        assert_eq!(q.get().await.as_deref(), Some("demo/a"));
        assert!(start.elapsed() >= Duration::from_millis(10));

        assert_eq!(q.add_rate_limited(&key), Duration::from_millis(20));
        q.forget(&key);
        assert_eq!(q.num_requeues(&key), 0);
    }

    #[tokio::test]
    async fn shut_down_releases_waiting_workers() {
        let q = queue();
        let waiter = {
            let q = q.clone();
            tokio::spawn(async move { q.get().await })
        };
        tokio::task::yield_now().await;

        q.shut_down();
        assert_eq!(waiter.await.unwrap(), None);

        q.add("demo/a");
        assert!(q.is_empty());
    }
}
