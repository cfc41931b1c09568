//! etcd storage backend specification

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// etcd storage backend for a Vault server
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EtcdSpec {
    /// Comma-separated list of etcd endpoints
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    /// etcd API version (v2, v3)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etcd_api: Option<String>,

    /// Key prefix Vault data is stored under
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// DNS SRV domain used to discover the cluster
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discovery_srv: Option<String>,

    /// Enable high availability mode
    #[serde(default)]
    pub ha_enable: bool,

    /// Sync the member list on startup
    #[serde(default)]
    pub sync: bool,

    /// Secret holding `ca.crt`, `tls.crt` and `tls.key`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_secret_name: Option<String>,

    /// Secret holding `username` and `password`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential_secret_name: Option<String>,
}
