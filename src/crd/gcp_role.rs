//! GCPRole Custom Resource Definition

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{default_role_name, ManagedRole, RoleStatus};
use crate::error::Result;

/// GCPRole resource specification
///
/// Mirrors a Vault GCP secrets engine roleset.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "engine.kubevault.com",
    version = "v1alpha1",
    kind = "GCPRole",
    plural = "gcproles",
    singular = "gcprole",
    namespaced,
    status = "RoleStatus",
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct GCPRoleSpec {
    /// Mount path of the GCP secrets engine
    #[serde(default = "default_gcp_path")]
    pub path: String,

    /// Type of secret generated (access_token, service_account_key)
    pub secret_type: String,

    /// GCP project the roleset's service account lives in
    pub project: String,

    /// Bindings configuration in HCL or JSON
    pub bindings: String,

    /// OAuth scopes for access_token rolesets
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub token_scopes: Vec<String>,
}

fn default_gcp_path() -> String {
    "gcp".to_string()
}

impl ManagedRole for GCPRole {
    const FINALIZER: &'static str = "gcprole.engine.kubevault.com";

    fn roles_path(&self) -> String {
        format!("{}/roleset", self.spec.path.trim_matches('/'))
    }

    fn role_name(&self) -> String {
        default_role_name(self)
    }

    fn role_payload(&self) -> Result<serde_json::Value> {
        let mut payload = json!({
            "secret_type": self.spec.secret_type,
            "project": self.spec.project,
            "bindings": self.spec.bindings,
        });
        if !self.spec.token_scopes.is_empty() {
            payload["token_scopes"] = json!(self.spec.token_scopes);
        }
        Ok(payload)
    }

    fn role_status(&self) -> Option<&RoleStatus> {
        self.status.as_ref()
    }

    fn role_status_mut(&mut self) -> &mut RoleStatus {
        self.status.get_or_insert_with(RoleStatus::default)
    }
}
