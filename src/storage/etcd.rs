//! etcd storage backend
//!
//! Vault docs: <https://developer.hashicorp.com/vault/docs/configuration/storage/etcd>
//!
//! The TLS secret is mounted at [`ETCD_TLS_ASSET_DIR`]; the credential secret
//! is exposed through `ETCD_USERNAME`/`ETCD_PASSWORD`, so no credential value
//! ever appears in the rendered config.

use k8s_openapi::api::core::v1::{
    EnvVar, EnvVarSource, PodTemplateSpec, SecretKeySelector, SecretVolumeSource, Volume,
    VolumeMount,
};

use super::{param, primary_container, stanza, StorageBackend};
use crate::crd::EtcdSpec;
use crate::error::Result;

/// Where the etcd TLS secret is mounted
pub const ETCD_TLS_ASSET_DIR: &str = "/etc/vault/storage/etcd/tls";
pub const ETCD_CLIENT_CA_NAME: &str = "ca.crt";
pub const ETCD_CLIENT_CERT_NAME: &str = "tls.crt";
pub const ETCD_CLIENT_KEY_NAME: &str = "tls.key";

const ETCD_TLS_VOLUME: &str = "vault-etcd-tls";

/// etcd backend built from an [`EtcdSpec`]
#[derive(Debug, Clone)]
pub struct EtcdStorage {
    spec: EtcdSpec,
}

impl EtcdStorage {
    pub fn new(spec: EtcdSpec) -> Self {
        Self { spec }
    }

    fn tls_secret(&self) -> Option<&str> {
        non_empty(&self.spec.tls_secret_name)
    }

    fn credential_secret(&self) -> Option<&str> {
        non_empty(&self.spec.credential_secret_name)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

fn tls_asset(name: &str) -> String {
    format!("{}/{}", ETCD_TLS_ASSET_DIR, name)
}

fn secret_env(name: &str, secret: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret.to_string(),
                key: key.to_string(),
                optional: None,
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

impl StorageBackend for EtcdStorage {
    fn apply(&self, template: &mut PodTemplateSpec) -> Result<()> {
        if let Some(secret) = self.tls_secret() {
            // checked first so a template without containers is left untouched
            let container = primary_container(template)?;
            container.volume_mounts.get_or_insert_with(Vec::new).push(VolumeMount {
                name: ETCD_TLS_VOLUME.to_string(),
                mount_path: ETCD_TLS_ASSET_DIR.to_string(),
                read_only: Some(true),
                ..Default::default()
            });

            if let Some(spec) = template.spec.as_mut() {
                spec.volumes.get_or_insert_with(Vec::new).push(Volume {
                    name: ETCD_TLS_VOLUME.to_string(),
                    secret: Some(SecretVolumeSource {
                        secret_name: Some(secret.to_string()),
                        ..Default::default()
                    }),
                    ..Default::default()
                });
            }
        }

        if let Some(secret) = self.credential_secret() {
            let container = primary_container(template)?;
            container.env.get_or_insert_with(Vec::new).extend([
                secret_env("ETCD_USERNAME", secret, "username"),
                secret_env("ETCD_PASSWORD", secret, "password"),
            ]);
        }

        Ok(())
    }

    fn storage_config(&self) -> Result<String> {
        let spec = &self.spec;
        let mut params = Vec::new();

        if let Some(address) = non_empty(&spec.address) {
            params.push(param("address", address));
        }
        if let Some(api) = non_empty(&spec.etcd_api) {
            params.push(param("etcd_api", api));
        }
        if let Some(path) = non_empty(&spec.path) {
            params.push(param("path", path));
        }
        if let Some(srv) = non_empty(&spec.discovery_srv) {
            params.push(param("discovery_srv", srv));
        }
        params.push(param("ha_enabled", spec.ha_enable));
        params.push(param("sync", spec.sync));

        if self.tls_secret().is_some() {
            params.push(param("tls_ca_file", tls_asset(ETCD_CLIENT_CA_NAME)));
            params.push(param("tls_cert_file", tls_asset(ETCD_CLIENT_CERT_NAME)));
            params.push(param("tls_key_file", tls_asset(ETCD_CLIENT_KEY_NAME)));
        }

        Ok(stanza("etcd", &params))
    }
}
