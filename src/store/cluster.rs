//! Kubernetes-backed resource store

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::{
    api::PostParams,
    runtime::reflector::{ObjectRef, Store},
    Api, Client, Resource, ResourceExt,
};
use serde::{de::DeserializeOwned, Serialize};

use super::{ObjectKey, ResourceStore, WriteTarget};
use crate::error::{Error, Result};

/// Reads from a reflector cache, writes through the API server
pub struct KubeStore<K>
where
    K: Resource<DynamicType = ()> + 'static,
{
    client: Client,
    cache: Store<K>,
}

impl<K> KubeStore<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope> + 'static,
{
    pub fn new(client: Client, cache: Store<K>) -> Self {
        Self { client, cache }
    }

    fn api(&self, key: &ObjectKey) -> Result<Api<K>> {
        let namespace = key
            .namespace
            .as_deref()
            .ok_or_else(|| Error::InvalidKey(format!("{} has no namespace", key)))?;
        Ok(Api::namespaced(self.client.clone(), namespace))
    }
}

#[async_trait]
impl<K> ResourceStore<K> for KubeStore<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static,
{
    fn cached(&self, key: &ObjectKey) -> Option<Arc<K>> {
        let mut obj_ref = ObjectRef::<K>::new(&key.name);
        if let Some(ns) = &key.namespace {
            obj_ref = obj_ref.within(ns);
        }
        self.cache.get(&obj_ref)
    }

    async fn get(&self, key: &ObjectKey) -> Result<Option<K>> {
        Ok(self.api(key)?.get_opt(&key.name).await?)
    }

    async fn write(&self, obj: &K, target: WriteTarget) -> Result<K> {
        let key = ObjectKey::from_resource(obj)?;
        let api = self.api(&key)?;
        let pp = PostParams::default();
        let updated = match target {
            WriteTarget::Object => api.replace(&obj.name_any(), &pp, obj).await?,
            WriteTarget::Status => {
                api.replace_status(&obj.name_any(), &pp, serde_json::to_vec(obj)?)
                    .await?
            }
        };
        Ok(updated)
    }
}
