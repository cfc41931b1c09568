//! Custom Resource Definitions for the Vault Engine Operator

mod aws_role;
mod etcd;
mod gcp_role;
mod status;

pub use aws_role::*;
pub use etcd::*;
pub use gcp_role::*;
pub use status::*;

use std::fmt::Debug;

use kube::{CustomResourceExt, Resource, ResourceExt};
use serde::{de::DeserializeOwned, Serialize};

use crate::error::Result;

/// A custom resource mirrored into Vault as a role
///
/// Every role kind plugs into the same reconcile and finalize engine through
/// this trait; the kind only says where its role lives and what gets written.
pub trait ManagedRole:
    Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Finalizer token owned by the operator for this kind
    const FINALIZER: &'static str;

    /// Vault path holding roles of this kind, e.g. `gcp/roleset`
    fn roles_path(&self) -> String;

    /// Role name in Vault
    fn role_name(&self) -> String;

    /// Request body written to `<roles_path>/<role_name>`
    fn role_payload(&self) -> Result<serde_json::Value>;

    fn role_status(&self) -> Option<&RoleStatus>;

    fn role_status_mut(&mut self) -> &mut RoleStatus;
}

/// Role name derived from the object's identity: `k8s.<namespace>.<name>`
pub fn default_role_name<K: Resource>(obj: &K) -> String {
    format!(
        "k8s.{}.{}",
        obj.namespace().unwrap_or_else(|| "default".to_string()),
        obj.name_any()
    )
}

/// Generate all CRD YAML manifests
pub fn generate_crds() -> Result<Vec<String>> {
    Ok(vec![
        to_yaml(&GCPRole::crd())?,
        to_yaml(&AWSRole::crd())?,
    ])
}

fn to_yaml<T: Serialize>(value: &T) -> Result<String> {
    serde_yaml::to_string(value).map_err(|e| crate::error::Error::config(e.to_string()))
}
