//! In-memory resource store for tests
//!
//! Mimics the API server closely enough for the engine: resource versions are
//! checked on write, and an object marked for deletion disappears once its last
//! finalizer is removed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use kube::{Resource, ResourceExt};

use super::{ObjectKey, ResourceStore, WriteTarget};
use crate::error::{Error, Result};

pub(crate) struct MemoryStore<K> {
    objects: Mutex<HashMap<ObjectKey, K>>,
    version: AtomicUsize,
    object_writes: AtomicUsize,
    status_writes: AtomicUsize,
    rejected_writes: AtomicUsize,
    failing_writes: AtomicUsize,
}

impl<K> MemoryStore<K>
where
    K: Resource + Clone,
{
    pub(crate) fn new() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            version: AtomicUsize::new(1),
            object_writes: AtomicUsize::new(0),
            status_writes: AtomicUsize::new(0),
            rejected_writes: AtomicUsize::new(0),
            failing_writes: AtomicUsize::new(0),
        }
    }

    /// Add or overwrite an object, as another actor would
    pub(crate) fn insert(&self, mut obj: K) {
        let key = ObjectKey::from_resource(&obj).expect("test objects are named");
        obj.meta_mut().resource_version = Some(self.next_version());
        self.lock().insert(key, obj);
    }

    pub(crate) fn object(&self, key: &ObjectKey) -> Option<K> {
        self.lock().get(key).cloned()
    }

    pub(crate) fn object_writes(&self) -> usize {
        self.object_writes.load(Ordering::SeqCst)
    }

    pub(crate) fn status_writes(&self) -> usize {
        self.status_writes.load(Ordering::SeqCst)
    }

    /// Fail the next `n` writes with a conflict
    pub(crate) fn reject_next_writes(&self, n: usize) {
        self.rejected_writes.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` writes with a transient API error
    pub(crate) fn fail_next_writes(&self, n: usize) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    fn next_version(&self) -> String {
        self.version.fetch_add(1, Ordering::SeqCst).to_string()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ObjectKey, K>> {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl<K> ResourceStore<K> for MemoryStore<K>
where
    K: Resource + Clone + Send + Sync,
{
    fn cached(&self, key: &ObjectKey) -> Option<Arc<K>> {
        self.object(key).map(Arc::new)
    }

    async fn get(&self, key: &ObjectKey) -> Result<Option<K>> {
        Ok(self.object(key))
    }

    async fn write(&self, obj: &K, target: WriteTarget) -> Result<K> {
        let key = ObjectKey::from_resource(obj)?;
        if take_one(&self.failing_writes) {
            return Err(Error::config("injected write failure"));
        }
        if take_one(&self.rejected_writes) {
            return Err(Error::Conflict(format!("{} was modified", key)));
        }

        let mut objects = self.lock();
        let current = objects
            .get(&key)
            .ok_or_else(|| Error::NotFound(key.to_string()))?;
        if current.resource_version() != obj.resource_version() {
            return Err(Error::Conflict(format!("{} was modified", key)));
        }

        let mut updated = obj.clone();
        updated.meta_mut().resource_version = Some(self.next_version());
        match target {
            WriteTarget::Object => self.object_writes.fetch_add(1, Ordering::SeqCst),
            WriteTarget::Status => self.status_writes.fetch_add(1, Ordering::SeqCst),
        };

        if updated.meta().deletion_timestamp.is_some() && updated.finalizers().is_empty() {
            objects.remove(&key);
        } else {
            objects.insert(key, updated.clone());
        }
        Ok(updated)
    }
}
