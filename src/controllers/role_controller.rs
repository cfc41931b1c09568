//! Role controller
//!
//! Watches one role kind and feeds it through the dispatcher into a
//! [`RoleReconciler`].

use std::sync::Arc;

use k8s_openapi::NamespaceResourceScope;
use kube::{api::ListParams, Api, Resource};
use kube_runtime::{reflector, watcher, WatchStreamExt};
use tracing::{error, info};

use super::{Context, Dispatcher};
use crate::adapters::{AdapterFactory, VaultAdapterFactory};
use crate::crd::ManagedRole;
use crate::error::Result;
use crate::reconcilers::RoleReconciler;
use crate::store::{KubeStore, ResourceStore};

/// Run the controller for `K` until the supervisor's stop token fires
pub async fn run<K>(context: Arc<Context>) -> Result<()>
where
    K: ManagedRole + Resource<Scope = NamespaceResourceScope>,
{
    let kind = K::kind(&()).to_string();
    let api: Api<K> = Api::all(context.client.clone());

    // Verify CRD is installed
    if let Err(e) = api.list(&ListParams::default().limit(1)).await {
        error!(kind = %kind, error = %e, "CRD not installed");
        return Err(e.into());
    }

    info!(kind = %kind, "Starting controller");

    let (reader, writer) = reflector::store();
    let events = reflector(writer, watcher(api, watcher::Config::default())).default_backoff();

    let store: Arc<dyn ResourceStore<K>> =
        Arc::new(KubeStore::new(context.client.clone(), reader));
    let adapters: Arc<dyn AdapterFactory<K>> =
        Arc::new(VaultAdapterFactory::new(context.vault.clone()));
    let reconciler = Arc::new(RoleReconciler::new(
        store,
        adapters,
        context.registry.clone(),
        context.supervisor.clone(),
        context.config.finalizer,
    ));

    Dispatcher::new(kind.clone(), context.config.dispatcher.clone())
        .run(events, reconciler, context.supervisor.stop_token())
        .await;

    info!(kind = %kind, "Controller stopped");
    Ok(())
}
