//! Watch/queue dispatcher
//!
//! Turns a stream of watch events into `namespace/name` keys on a
//! [`WorkQueue`] and runs a fixed pool of workers that hand each key to a
//! [`Reconcile`] handler. Scheduling only; what a reconcile does is up to the
//! handler.

use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{pin_mut, Stream, StreamExt};
use kube::runtime::watcher::Event;
use kube::Resource;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::queue::WorkQueue;
use crate::config::DispatcherConfig;
use crate::error::Result;
use crate::metrics;
use crate::store::ObjectKey;

/// Handler invoked for every dequeued key
#[async_trait]
pub trait Reconcile: Send + Sync {
    async fn reconcile(&self, key: &ObjectKey) -> Result<()>;
}

/// What an event last looked like when its key was enqueued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Signature {
    generation: Option<i64>,
    deleting: bool,
}

impl Signature {
    fn of<K: Resource>(obj: &K) -> Self {
        let meta = obj.meta();
        Self {
            generation: meta.generation,
            deleting: meta.deletion_timestamp.is_some(),
        }
    }
}

pub struct Dispatcher {
    kind: String,
    config: DispatcherConfig,
    queue: Arc<WorkQueue>,
    seen: HashMap<String, Signature>,
}

impl Dispatcher {
    pub fn new(kind: impl Into<String>, config: DispatcherConfig) -> Self {
        let queue = Arc::new(WorkQueue::new(config.base_delay, config.max_delay));
        Self {
            kind: kind.into(),
            config,
            queue,
            seen: HashMap::new(),
        }
    }

    /// The queue workers pull from
    pub fn queue(&self) -> Arc<WorkQueue> {
        self.queue.clone()
    }

    /// Process `events` until `stop` is cancelled
    ///
    /// On stop the queue is shut down and in-flight reconciles are awaited;
    /// keys still waiting are dropped, a restart lists them again.
    pub async fn run<K, S, E, H>(mut self, events: S, handler: Arc<H>, stop: CancellationToken)
    where
        K: Resource,
        S: Stream<Item = std::result::Result<Event<K>, E>>,
        E: Display,
        H: Reconcile + ?Sized + 'static,
    {
        info!(kind = %self.kind, workers = self.config.workers, "Starting dispatcher");

        let mut workers = JoinSet::new();
        for id in 0..self.config.workers {
            workers.spawn(worker(
                id,
                self.kind.clone(),
                self.queue.clone(),
                handler.clone(),
                self.config.max_requeues,
            ));
        }

        pin_mut!(events);
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                next = events.next() => match next {
                    Some(Ok(event)) => self.handle_event(event),
                    Some(Err(e)) => warn!(kind = %self.kind, error = %e, "Watch stream error"),
                    None => {
                        warn!(kind = %self.kind, "Watch stream ended");
                        stop.cancelled().await;
                        break;
                    }
                },
            }
        }

        info!(kind = %self.kind, "Stopping dispatcher");
        self.queue.shut_down();
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(kind = %self.kind, error = %e, "Worker panicked");
            }
        }
    }

    fn handle_event<K: Resource>(&mut self, event: Event<K>) {
        match event {
            Event::Apply(obj) => self.enqueue(&obj, false),
            Event::InitApply(obj) => self.enqueue(&obj, true),
            Event::Delete(obj) => {
                self.enqueue(&obj, true);
                if let Ok(key) = ObjectKey::from_resource(&obj) {
                    self.seen.remove(&key.to_string());
                }
            }
            Event::Init | Event::InitDone => {}
        }
    }

    /// Enqueue the object's key; unforced events with an unchanged signature
    /// are status or metadata churn and are skipped
    fn enqueue<K: Resource>(&mut self, obj: &K, force: bool) {
        let key = match ObjectKey::from_resource(obj) {
            Ok(key) => key.to_string(),
            Err(e) => {
                error!(kind = %self.kind, error = %e, "Dropping event");
                return;
            }
        };

        let signature = Signature::of(obj);
        if !force && self.seen.get(&key) == Some(&signature) {
            debug!(kind = %self.kind, key = %key, "Skipping unchanged object");
            return;
        }
        self.seen.insert(key.clone(), signature);

        self.queue.add(&key);
        metrics::QUEUE_DEPTH
            .with_label_values(&[self.kind.as_str()])
            .set(self.queue.len() as f64);
    }
}

async fn worker<H>(
    id: usize,
    kind: String,
    queue: Arc<WorkQueue>,
    handler: Arc<H>,
    max_requeues: u32,
) where
    H: Reconcile + ?Sized,
{
    debug!(kind = %kind, worker = id, "Worker started");
    while let Some(raw) = queue.get().await {
        metrics::QUEUE_DEPTH
            .with_label_values(&[kind.as_str()])
            .set(queue.len() as f64);

        let key = match raw.parse::<ObjectKey>() {
            Ok(key) => key,
            Err(e) => {
                error!(kind = %kind, error = %e, "Dropping malformed key");
                queue.forget(&raw);
                queue.done(&raw);
                continue;
            }
        };

        match handler.reconcile(&key).await {
            Ok(()) => queue.forget(&raw),
            Err(e) if queue.num_requeues(&raw) < max_requeues => {
                let delay = queue.add_rate_limited(&raw);
                warn!(
                    kind = %kind,
                    key = %key,
                    error = %e,
                    retry_in_ms = delay.as_millis() as u64,
                    "Reconcile failed, requeueing"
                );
                metrics::REQUEUES.with_label_values(&[kind.as_str()]).inc();
            }
            Err(e) => {
                error!(
                    kind = %kind,
                    key = %key,
                    error = %e,
                    "Reconcile failed too many times, dropping key"
                );
                metrics::DROPPED_KEYS.with_label_values(&[kind.as_str()]).inc();
                queue.forget(&raw);
            }
        }
        queue.done(&raw);
    }
    debug!(kind = %kind, worker = id, "Worker stopped");
}
