//! Reconcilers for role resources
//!
//! This module contains the business logic shared by every role kind:
//! - Attaching the operator's finalizer
//! - Creating the role in Vault and reporting the result in status
//! - Deleting the role and releasing the finalizer on deletion

pub mod finalizer;
pub mod registry;
mod role;

pub use finalizer::{finalize, FinalizeOutcome};
pub use registry::{finalizer_id, FinalizerGuard, FinalizerRegistry};
pub use role::RoleReconciler;

use kube::ResourceExt;

use crate::crd::ManagedRole;

/// True when the operator's finalizer is on the object
pub fn has_finalizer<K: ManagedRole>(obj: &K) -> bool {
    obj.finalizers().iter().any(|f| f == K::FINALIZER)
}

/// Add the operator's finalizer unless already present
pub fn add_finalizer<K: ManagedRole>(obj: &mut K) {
    if !has_finalizer(obj) {
        obj.finalizers_mut().push(K::FINALIZER.to_string());
    }
}

/// Remove the operator's finalizer, leaving any others in place
pub fn remove_finalizer<K: ManagedRole>(obj: &mut K) {
    obj.finalizers_mut().retain(|f| f != K::FINALIZER);
}
