//! Finalization of a role resource that is being deleted
//!
//! Deletes the Vault role, then removes the operator's finalizer so the API
//! server can drop the object. Attempts repeat every `interval` until
//! `timeout`; after that the finalizer is removed anyway so a broken Vault
//! cannot block namespace deletion forever. The Vault role may then be left
//! behind.

use std::fmt;

use kube::ResourceExt;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::registry::{finalizer_id, FinalizerRegistry};
use crate::adapters::AdapterFactory;
use crate::config::FinalizerConfig;
use crate::crd::ManagedRole;
use crate::error::Result;
use crate::metrics;
use crate::store::{self, ObjectKey, ResourceStore};

/// How a finalization ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// Role deleted and finalizer removed
    Completed,
    /// Deadline passed; finalizer removed without confirming the role is gone
    TimedOut,
    /// Another finalization of the same object is running
    AlreadyProcessing,
    /// Shutdown grace period expired; finalizer left for the next run
    Abandoned,
    /// Object has no name and cannot be addressed; nothing was attempted
    Invalid,
}

impl FinalizeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::TimedOut => "timed_out",
            Self::AlreadyProcessing => "already_processing",
            Self::Abandoned => "abandoned",
            Self::Invalid => "invalid",
        }
    }
}

impl fmt::Display for FinalizeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Drive one finalization of `role` to an outcome
#[instrument(skip_all, fields(kind = %K::kind(&()), name = %role.name_any(), namespace = role.namespace()))]
pub async fn finalize<K: ManagedRole>(
    role: &K,
    store: &dyn ResourceStore<K>,
    adapters: &dyn AdapterFactory<K>,
    registry: &FinalizerRegistry,
    config: FinalizerConfig,
    abandon: &CancellationToken,
) -> FinalizeOutcome {
    // Watched objects always carry a name
    let key = match ObjectKey::from_resource(role) {
        Ok(key) => key,
        Err(e) => {
            error!(error = %e, "Dropping finalization of an unnamed object");
            return record::<K>(FinalizeOutcome::Invalid);
        }
    };

    let id = finalizer_id(role);
    let Some(_guard) = registry.try_acquire(&id) else {
        debug!(id = %id, "Finalization already in progress");
        return record::<K>(FinalizeOutcome::AlreadyProcessing);
    };

    info!(id = %id, "Processing finalizer");
    let role_name = role.role_name();
    let deadline = Instant::now() + config.timeout;
    let mut role_deleted = false;
    let mut attempt = 0u32;

    let outcome = loop {
        if Instant::now() >= deadline {
            break FinalizeOutcome::TimedOut;
        }
        attempt += 1;
        debug!(attempt, "Finalizer attempt");

        if !role_deleted {
            match delete_role(role, adapters, &role_name).await {
                Ok(()) => {
                    info!(role = %role_name, "Deleted role from Vault");
                    role_deleted = true;
                }
                Err(e) => warn!(role = %role_name, attempt, error = %e, "Failed to delete role"),
            }
        }

        if role_deleted {
            match unregister_finalizer::<K>(store, &key).await {
                Ok(()) => break FinalizeOutcome::Completed,
                Err(e) => warn!(attempt, error = %e, "Failed to remove finalizer"),
            }
        }

        tokio::select! {
            _ = abandon.cancelled() => break FinalizeOutcome::Abandoned,
            _ = sleep(config.interval) => {}
            _ = sleep_until(deadline) => {}
        }
    };

    match outcome {
        FinalizeOutcome::Abandoned => {
            warn!(attempt, "Finalization abandoned during shutdown");
        }
        FinalizeOutcome::TimedOut => {
            warn!(
                attempt,
                timeout_secs = config.timeout.as_secs(),
                role = %role_name,
                "Finalization timed out, removing finalizer anyway"
            );
            force_remove(store, &key).await;
        }
        _ => {
            force_remove(store, &key).await;
            info!(attempt, "Finalization completed");
        }
    }

    record::<K>(outcome)
}

async fn delete_role<K: ManagedRole>(
    role: &K,
    adapters: &dyn AdapterFactory<K>,
    role_name: &str,
) -> Result<()> {
    adapters.bind(role)?.delete_role(role_name).await
}

/// Remove the operator's finalizer; a vanished object counts as success
pub async fn unregister_finalizer<K: ManagedRole>(
    store: &dyn ResourceStore<K>,
    key: &ObjectKey,
) -> Result<()> {
    match store::patch(store, key, |obj: &mut K| super::remove_finalizer(obj)).await {
        Ok(_) => Ok(()),
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e),
    }
}

async fn force_remove<K: ManagedRole>(store: &dyn ResourceStore<K>, key: &ObjectKey) {
    match unregister_finalizer::<K>(store, key).await {
        Ok(()) => info!("Removed finalizer"),
        Err(e) => warn!(error = %e, "Failed to remove finalizer"),
    }
}

fn record<K: ManagedRole>(outcome: FinalizeOutcome) -> FinalizeOutcome {
    let kind = K::kind(&());
    metrics::FINALIZATIONS
        .with_label_values(&[&*kind, outcome.as_str()])
        .inc();
    outcome
}
