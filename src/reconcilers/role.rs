//! Generic role reconciler
//!
//! One engine for every [`ManagedRole`] kind. A reconcile attaches the
//! finalizer, upserts the role in Vault and records the outcome in status.
//! Objects marked for deletion are handed to a background finalization.

use std::sync::Arc;

use async_trait::async_trait;
use kube::ResourceExt;
use tracing::{debug, info, instrument, warn};

use super::finalizer::finalize;
use super::registry::FinalizerRegistry;
use super::{add_finalizer, has_finalizer};
use crate::adapters::AdapterFactory;
use crate::config::FinalizerConfig;
use crate::controllers::{Reconcile, Supervisor};
use crate::crd::{Condition, ManagedRole, RolePhase, REASON_FAILED_TO_CREATE_ROLE};
use crate::error::{Error, Result};
use crate::metrics;
use crate::store::{self, ObjectKey, ResourceStore};

pub struct RoleReconciler<K> {
    store: Arc<dyn ResourceStore<K>>,
    adapters: Arc<dyn AdapterFactory<K>>,
    registry: FinalizerRegistry,
    supervisor: Supervisor,
    finalizer: FinalizerConfig,
}

impl<K: ManagedRole> RoleReconciler<K> {
    pub fn new(
        store: Arc<dyn ResourceStore<K>>,
        adapters: Arc<dyn AdapterFactory<K>>,
        registry: FinalizerRegistry,
        supervisor: Supervisor,
        finalizer: FinalizerConfig,
    ) -> Self {
        Self {
            store,
            adapters,
            registry,
            supervisor,
            finalizer,
        }
    }

    #[instrument(skip(self), fields(kind = %K::kind(&())))]
    async fn reconcile_role(&self, key: &ObjectKey) -> Result<()> {
        let Some(role) = self.store.cached(key) else {
            debug!("Object no longer exists");
            return Ok(());
        };

        if role.meta().deletion_timestamp.is_some() {
            if has_finalizer(role.as_ref()) {
                self.start_finalization(K::clone(&role));
            }
            return Ok(());
        }

        let role = if has_finalizer(role.as_ref()) {
            K::clone(&role)
        } else {
            match store::patch(self.store.as_ref(), key, |obj: &mut K| add_finalizer(obj)).await {
                Ok(updated) => {
                    debug!("Added finalizer");
                    updated
                }
                Err(e) if e.is_not_found() => return Ok(()),
                Err(e) => return Err(e),
            }
        };

        self.sync_role(&role, key).await
    }

    /// Upsert the role in Vault and report the outcome in status
    async fn sync_role(&self, role: &K, key: &ObjectKey) -> Result<()> {
        let created = match self.adapters.bind(role) {
            Ok(adapter) => adapter.create_role().await,
            Err(e) => Err(e),
        };

        if let Err(e) = created {
            warn!(error = %e, "Failed to create role");
            let condition = Condition::failure(REASON_FAILED_TO_CREATE_ROLE, e.to_string());
            let status_err = store::patch_status(self.store.as_ref(), key, |obj: &mut K| {
                obj.role_status_mut().set_failure(condition.clone())
            })
            .await
            .err();
            return Err(Error::aggregate(std::iter::once(e).chain(status_err))
                .unwrap_or_else(|| Error::config("role creation failed")));
        }

        if role.role_status().map(|s| s.phase) == Some(RolePhase::Failure) {
            info!(role = %role.role_name(), "Role recovered from failure");
        }

        let generation = role.meta().generation;
        store::patch_status(self.store.as_ref(), key, |obj: &mut K| {
            obj.role_status_mut().set_success(generation)
        })
        .await?;

        info!(role = %role.role_name(), generation, "Role is in sync");
        Ok(())
    }

    fn start_finalization(&self, role: K) {
        let store = self.store.clone();
        let adapters = self.adapters.clone();
        let registry = self.registry.clone();
        let config = self.finalizer;
        let abandon = self.supervisor.abandon_token();

        self.supervisor.spawn(async move {
            let outcome = finalize(
                &role,
                store.as_ref(),
                adapters.as_ref(),
                &registry,
                config,
                &abandon,
            )
            .await;
            debug!(name = %role.name_any(), outcome = %outcome, "Finalization finished");
        });
    }
}

#[async_trait]
impl<K: ManagedRole> Reconcile for RoleReconciler<K> {
    async fn reconcile(&self, key: &ObjectKey) -> Result<()> {
        let kind = K::kind(&());
        let _timer = metrics::RECONCILE_DURATION
            .with_label_values(&[&*kind])
            .start_timer();
        metrics::RECONCILIATIONS.with_label_values(&[&*kind]).inc();

        let result = self.reconcile_role(key).await;
        if result.is_err() {
            metrics::RECONCILIATION_ERRORS
                .with_label_values(&[&*kind])
                .inc();
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use chrono::Utc;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    use super::*;
    use crate::adapters::RoleAdapter;
    use crate::crd::{ConditionStatus, GCPRole, GCPRoleSpec, CONDITION_FAILURE};
    use crate::store::memory::MemoryStore;

    /// Records every Vault call; optionally fails them
    #[derive(Default)]
    struct RecordingVault {
        creates: AtomicUsize,
        deletes: AtomicUsize,
        fail_create: Mutex<Option<String>>,
        fail_delete: bool,
        delete_delay: Duration,
    }

    struct Bound(Arc<RecordingVault>);

    #[async_trait]
    impl RoleAdapter for Bound {
        async fn create_role(&self) -> Result<()> {
            self.0.creates.fetch_add(1, Ordering::SeqCst);
            match self.0.fail_create.lock().unwrap().clone() {
                Some(message) => Err(Error::Vault {
                    status: 500,
                    message,
                }),
                None => Ok(()),
            }
        }

        async fn delete_role(&self, _name: &str) -> Result<()> {
            self.0.deletes.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.0.delete_delay).await;
            if self.0.fail_delete {
                return Err(Error::Vault {
                    status: 503,
                    message: "sealed".to_string(),
                });
            }
            Ok(())
        }
    }

    struct Factory(Arc<RecordingVault>);

    impl AdapterFactory<GCPRole> for Factory {
        fn bind(&self, _role: &GCPRole) -> Result<Box<dyn RoleAdapter>> {
            Ok(Box::new(Bound(self.0.clone())))
        }
    }

    struct Harness {
        store: Arc<MemoryStore<GCPRole>>,
        vault: Arc<RecordingVault>,
        registry: FinalizerRegistry,
        supervisor: Supervisor,
        reconciler: RoleReconciler<GCPRole>,
    }

    fn harness(vault: RecordingVault) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let vault = Arc::new(vault);
        let registry = FinalizerRegistry::new();
        let supervisor = Supervisor::new(Duration::from_secs(60));
        let reconciler = RoleReconciler::new(
            store.clone() as Arc<dyn ResourceStore<GCPRole>>,
            Arc::new(Factory(vault.clone())) as Arc<dyn AdapterFactory<GCPRole>>,
            registry.clone(),
            supervisor.clone(),
            FinalizerConfig {
                timeout: Duration::from_secs(30),
                interval: Duration::from_secs(5),
            },
        );
        Harness {
            store,
            vault,
            registry,
            supervisor,
            reconciler,
        }
    }

    fn role() -> GCPRole {
        let mut role = GCPRole::new(
            "reader",
            GCPRoleSpec {
                project: "ackube".to_string(),
                ..Default::default()
            },
        );
        role.metadata.namespace = Some("demo".to_string());
        role.metadata.generation = Some(1);
        role
    }

    fn key() -> ObjectKey {
        ObjectKey::new("demo", "reader")
    }

    fn mark_deleted(h: &Harness) {
        let mut obj = h.store.object(&key()).unwrap();
        obj.metadata.deletion_timestamp = Some(Time(Utc::now()));
        h.store.insert(obj);
    }

    #[tokio::test]
    async fn new_role_gets_finalizer_vault_role_and_success_status() {
        let h = harness(RecordingVault::default());
        h.store.insert(role());

        h.reconciler.reconcile(&key()).await.unwrap();

        let obj = h.store.object(&key()).unwrap();
        assert!(has_finalizer(&obj));
        assert_eq!(h.store.object_writes(), 1);
        assert_eq!(h.store.status_writes(), 1);
        assert_eq!(h.vault.creates.load(Ordering::SeqCst), 1);

        let status = obj.status.unwrap();
        assert_eq!(status.phase, RolePhase::Success);
        assert_eq!(status.observed_generation, Some(1));
        assert!(status.conditions.is_empty());
    }

    #[tokio::test]
    async fn second_reconcile_writes_nothing() {
        let h = harness(RecordingVault::default());
        h.store.insert(role());

        h.reconciler.reconcile(&key()).await.unwrap();
        h.reconciler.reconcile(&key()).await.unwrap();

        assert_eq!(h.store.object_writes(), 1);
        assert_eq!(h.store.status_writes(), 1);
        assert_eq!(h.vault.creates.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn missing_object_is_a_no_op() {
        let h = harness(RecordingVault::default());
        h.reconciler.reconcile(&key()).await.unwrap();
        assert_eq!(h.vault.creates.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn create_failure_sets_failure_condition_and_returns_error() {
        let h = harness(RecordingVault {
            fail_create: Mutex::new(Some("permission denied".to_string())),
            ..Default::default()
        });
        h.store.insert(role());

        let err = h.reconciler.reconcile(&key()).await.unwrap_err();
        assert!(err.to_string().contains("permission denied"));

        let status = h.store.object(&key()).unwrap().status.unwrap();
        assert_eq!(status.phase, RolePhase::Failure);
        assert_eq!(status.conditions.len(), 1);
        let condition = &status.conditions[0];
        assert_eq!(condition.type_, CONDITION_FAILURE);
        assert_eq!(condition.status, ConditionStatus::True);
        assert_eq!(condition.reason.as_deref(), Some(REASON_FAILED_TO_CREATE_ROLE));
        assert!(condition
            .message
            .as_deref()
            .unwrap_or_default()
            .contains("permission denied"));

        // the same failure again leaves status untouched
        let writes = h.store.status_writes();
        h.reconciler.reconcile(&key()).await.unwrap_err();
        assert_eq!(h.store.status_writes(), writes);
    }

    #[tokio::test]
    async fn status_write_failure_is_aggregated() {
        let h = harness(RecordingVault {
            fail_create: Mutex::new(Some("permission denied".to_string())),
            ..Default::default()
        });
        let mut obj = role();
        obj.metadata.finalizers = Some(vec![GCPRole::FINALIZER.to_string()]);
        h.store.insert(obj);
        h.store.fail_next_writes(1);

        let err = h.reconciler.reconcile(&key()).await.unwrap_err();
        match err {
            Error::Aggregate(errors) => assert_eq!(errors.len(), 2),
            other => panic!("expected aggregate error, got {other}"),
        }
    }

    #[tokio::test]
    async fn recovery_clears_the_failure() {
        let h = harness(RecordingVault {
            fail_create: Mutex::new(Some("permission denied".to_string())),
            ..Default::default()
        });
        h.store.insert(role());
        h.reconciler.reconcile(&key()).await.unwrap_err();

        *h.vault.fail_create.lock().unwrap() = None;
        h.reconciler.reconcile(&key()).await.unwrap();

        let status = h.store.object(&key()).unwrap().status.unwrap();
        assert_eq!(status.phase, RolePhase::Success);
        assert!(status.conditions.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn deletion_runs_finalization_in_the_background() {
        let h = harness(RecordingVault::default());
        h.store.insert(role());
        h.reconciler.reconcile(&key()).await.unwrap();
        mark_deleted(&h);

        h.reconciler.reconcile(&key()).await.unwrap();
        assert!(h.supervisor.shutdown().await);

        assert_eq!(h.vault.deletes.load(Ordering::SeqCst), 1);
        assert!(h.store.object(&key()).is_none());
        assert!(h.registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_deletion_events_delete_once() {
        let h = harness(RecordingVault {
            delete_delay: Duration::from_secs(1),
            ..Default::default()
        });
        h.store.insert(role());
        h.reconciler.reconcile(&key()).await.unwrap();
        mark_deleted(&h);

        h.reconciler.reconcile(&key()).await.unwrap();
        h.reconciler.reconcile(&key()).await.unwrap();
        assert!(h.supervisor.shutdown().await);

        assert_eq!(h.vault.deletes.load(Ordering::SeqCst), 1);
        assert!(h.store.object(&key()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn failing_delete_releases_the_finalizer_after_timeout() {
        let h = harness(RecordingVault {
            fail_delete: true,
            ..Default::default()
        });
        h.store.insert(role());
        h.reconciler.reconcile(&key()).await.unwrap();
        mark_deleted(&h);
        let writes = h.store.object_writes();

        let start = tokio::time::Instant::now();
        h.reconciler.reconcile(&key()).await.unwrap();
        assert!(h.supervisor.shutdown().await);

        assert!(start.elapsed() <= Duration::from_secs(35));
        assert_eq!(h.store.object_writes(), writes + 1);
        assert!(h.store.object(&key()).is_none());
        assert!(h.registry.is_empty());
    }

    #[tokio::test]
    async fn deletion_without_our_finalizer_is_ignored() {
        let h = harness(RecordingVault::default());
        let mut obj = role();
        obj.metadata.deletion_timestamp = Some(Time(Utc::now()));
        obj.metadata.finalizers = Some(vec!["other.example.com".to_string()]);
        h.store.insert(obj);

        h.reconciler.reconcile(&key()).await.unwrap();

        assert_eq!(h.supervisor.in_flight(), 0);
        assert_eq!(h.store.object_writes(), 0);
        assert_eq!(h.vault.creates.load(Ordering::SeqCst), 0);
    }
}
