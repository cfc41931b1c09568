//! Registry of in-flight finalizations
//!
//! Duplicate watch events can trigger finalization of the same object more
//! than once; only the first caller to register an id proceeds. The registry
//! is process-local and rebuilt from scratch after a restart.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use kube::{Resource, ResourceExt};

/// Composite id `<plural>/<namespace>/<name>`
pub fn finalizer_id<K: Resource<DynamicType = ()>>(obj: &K) -> String {
    format!(
        "{}/{}/{}",
        K::plural(&()),
        obj.namespace().unwrap_or_default(),
        obj.name_any()
    )
}

/// Set of ids with a finalization in progress
#[derive(Debug, Clone, Default)]
pub struct FinalizerRegistry {
    active: Arc<Mutex<HashSet<String>>>,
}

impl FinalizerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_already_processing(&self, id: &str) -> bool {
        self.lock().contains(id)
    }

    /// Register `id`; false when it was already registered
    pub fn add(&self, id: &str) -> bool {
        self.lock().insert(id.to_string())
    }

    pub fn delete(&self, id: &str) {
        self.lock().remove(id);
    }

    /// Register `id` for the lifetime of the returned guard
    pub fn try_acquire(&self, id: &str) -> Option<FinalizerGuard> {
        self.add(id).then(|| FinalizerGuard {
            registry: self.clone(),
            id: id.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Removes its id from the registry when dropped
#[derive(Debug)]
pub struct FinalizerGuard {
    registry: FinalizerRegistry,
    id: String,
}

impl FinalizerGuard {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for FinalizerGuard {
    fn drop(&mut self) {
        self.registry.delete(&self.id);
    }
}
