//! Vault storage backend configuration
//!
//! Turns a declarative storage spec into the `storage` stanza of the Vault
//! config file and the pod-template changes the backend needs (mounted TLS
//! assets, credential env vars).

mod etcd;

pub use etcd::*;

use k8s_openapi::api::core::v1::{Container, PodTemplateSpec};

use crate::error::{Error, Result};

/// A storage backend Vault can be configured with
pub trait StorageBackend {
    /// Add the volumes, mounts and env vars the backend needs to `template`
    fn apply(&self, template: &mut PodTemplateSpec) -> Result<()>;

    /// Render the `storage "<type>" { ... }` config stanza
    fn storage_config(&self) -> Result<String>;
}

/// First container of the template, the one running Vault
pub(crate) fn primary_container(template: &mut PodTemplateSpec) -> Result<&mut Container> {
    template
        .spec
        .as_mut()
        .and_then(|spec| spec.containers.first_mut())
        .ok_or_else(|| Error::config("pod template has no containers"))
}

/// `key = "value"` config line
pub(crate) fn param(key: &str, value: impl std::fmt::Display) -> String {
    format!(r#"{} = "{}""#, key, value)
}

/// Wrap rendered params into a storage stanza
pub(crate) fn stanza(kind: &str, params: &[String]) -> String {
    format!("\nstorage \"{}\" {{\n{}\n}}\n", kind, params.join("\n"))
}
