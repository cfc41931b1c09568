//! Supervision of detached background tasks
//!
//! Finalizations outlive the reconcile that started them. They are spawned on
//! a shared [`TaskTracker`] so shutdown can stop intake, give them a grace
//! period, and then tell the stragglers to give up.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct Supervisor {
    tasks: TaskTracker,
    stop: CancellationToken,
    abandon: CancellationToken,
    grace: Duration,
}

impl Supervisor {
    pub fn new(grace: Duration) -> Self {
        Self {
            tasks: TaskTracker::new(),
            stop: CancellationToken::new(),
            abandon: CancellationToken::new(),
            grace,
        }
    }

    /// Run `task` in the background under supervision
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(task);
    }

    /// Cancelled when the operator stops accepting new work
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Cancelled when the grace period ran out; tasks must return promptly
    pub fn abandon_token(&self) -> CancellationToken {
        self.abandon.clone()
    }

    /// Number of supervised tasks still running
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Stop accepting new work
    ///
    /// Reconciles already running may still spawn finalizations; callers
    /// wait for them to return before calling [`Supervisor::drain`].
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Wait for background tasks, abandoning them once the grace period ends
    ///
    /// No task may be spawned after this is called. Returns false when the
    /// grace period expired and remaining tasks were abandoned.
    pub async fn drain(&self) -> bool {
        self.tasks.close();

        info!(
            in_flight = self.tasks.len(),
            grace_secs = self.grace.as_secs(),
            "Waiting for background tasks"
        );
        if tokio::time::timeout(self.grace, self.tasks.wait()).await.is_ok() {
            return true;
        }

        warn!(
            in_flight = self.tasks.len(),
            "Grace period expired, abandoning background tasks"
        );
        self.abandon.cancel();
        self.tasks.wait().await;
        false
    }

    /// [`Supervisor::stop`] followed by [`Supervisor::drain`], for callers
    /// with nothing in flight that could still spawn
    pub async fn shutdown(&self) -> bool {
        self.stop();
        self.drain().await
    }
}
