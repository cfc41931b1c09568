//! Access to the custom resources the operator manages
//!
//! Reads come from the watch cache or straight from the API server; writes are
//! optimistic (`resourceVersion` checked) and retried on conflict by [`patch`]
//! and [`patch_status`].

mod cluster;
#[cfg(test)]
pub(crate) mod memory;

pub use cluster::KubeStore;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use kube::{Resource, ResourceExt};
use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result};

/// Attempts made by the patch helpers before a conflict is returned
pub const MAX_CONFLICT_RETRIES: usize = 5;

/// Stable identity of a namespaced object, rendered as `namespace/name`
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    /// Key for an object; fails when the object has no name
    pub fn from_resource<K: Resource>(obj: &K) -> Result<Self> {
        let name = obj
            .meta()
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::InvalidKey("object has no metadata.name".to_string()))?;
        Ok(Self {
            namespace: obj.namespace(),
            name,
        })
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => f.write_str(&self.name),
        }
    }
}

impl FromStr for ObjectKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidKey(s.to_string());
        match s.split('/').collect::<Vec<_>>().as_slice() {
            [name] if !name.is_empty() => Ok(Self {
                namespace: None,
                name: name.to_string(),
            }),
            [ns, name] if !ns.is_empty() && !name.is_empty() => Ok(Self::new(*ns, *name)),
            _ => Err(invalid()),
        }
    }
}

/// Which part of the object a write replaces
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteTarget {
    /// Metadata and spec
    Object,
    /// The status subresource
    Status,
}

/// Read and write access to one resource kind
#[async_trait]
pub trait ResourceStore<K>: Send + Sync {
    /// Last state seen by the watch, if any
    fn cached(&self, key: &ObjectKey) -> Option<Arc<K>>;

    /// Fresh read from the API server
    async fn get(&self, key: &ObjectKey) -> Result<Option<K>>;

    /// Replace the object; fails with [`Error::Conflict`] when `obj` is stale
    async fn write(&self, obj: &K, target: WriteTarget) -> Result<K>;
}

/// Read the live object, apply `mutate`, write it back; re-read on conflict
///
/// A mutation that leaves the object unchanged performs no write. A missing
/// object yields [`Error::NotFound`].
pub async fn update_with_retry<K, F>(
    store: &dyn ResourceStore<K>,
    key: &ObjectKey,
    target: WriteTarget,
    mut mutate: F,
) -> Result<K>
where
    K: Serialize + Send + Sync,
    F: FnMut(&mut K) + Send,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let mut obj = store
            .get(key)
            .await?
            .ok_or_else(|| Error::NotFound(key.to_string()))?;

        let before = serde_json::to_value(&obj)?;
        mutate(&mut obj);
        if serde_json::to_value(&obj)? == before {
            return Ok(obj);
        }

        match store.write(&obj, target).await {
            Ok(updated) => return Ok(updated),
            Err(e) if e.is_conflict() && attempt < MAX_CONFLICT_RETRIES => {
                debug!(key = %key, attempt, target = ?target, "Write conflict, retrying");
            }
            Err(e) => return Err(e),
        }
    }
}

/// Optimistic update of metadata/spec
pub async fn patch<K, F>(store: &dyn ResourceStore<K>, key: &ObjectKey, mutate: F) -> Result<K>
where
    K: Serialize + Send + Sync,
    F: FnMut(&mut K) + Send,
{
    update_with_retry(store, key, WriteTarget::Object, mutate).await
}

/// Optimistic update of the status subresource
pub async fn patch_status<K, F>(
    store: &dyn ResourceStore<K>,
    key: &ObjectKey,
    mutate: F,
) -> Result<K>
where
    K: Serialize + Send + Sync,
    F: FnMut(&mut K) + Send,
{
    update_with_retry(store, key, WriteTarget::Status, mutate).await
}
