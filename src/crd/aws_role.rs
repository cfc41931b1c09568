//! AWSRole Custom Resource Definition

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{default_role_name, ManagedRole, RoleStatus};
use crate::error::{Error, Result};

/// AWSRole resource specification
///
/// Mirrors a role of the Vault AWS secrets engine.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "engine.kubevault.com",
    version = "v1alpha1",
    kind = "AWSRole",
    plural = "awsroles",
    singular = "awsrole",
    namespaced,
    status = "RoleStatus",
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AWSRoleSpec {
    /// Mount path of the AWS secrets engine
    #[serde(default = "default_aws_path")]
    pub path: String,

    /// Credential type (iam_user, assumed_role, federation_token)
    pub credential_type: String,

    /// Managed policy ARNs attached to the role
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub policy_arns: Vec<String>,

    /// IAM role ARNs that may be assumed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub role_arns: Vec<String>,

    /// Inline IAM policy document (JSON)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_document: Option<String>,

    /// Default STS TTL, e.g. "1h"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_sts_ttl: Option<String>,

    /// Max STS TTL, e.g. "12h"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_sts_ttl: Option<String>,
}

fn default_aws_path() -> String {
    "aws".to_string()
}

impl ManagedRole for AWSRole {
    const FINALIZER: &'static str = "awsrole.engine.kubevault.com";

    fn roles_path(&self) -> String {
        format!("{}/roles", self.spec.path.trim_matches('/'))
    }

    fn role_name(&self) -> String {
        default_role_name(self)
    }

    fn role_payload(&self) -> Result<serde_json::Value> {
        let spec = &self.spec;
        if let Some(doc) = &spec.policy_document {
            serde_json::from_str::<serde_json::Value>(doc)
                .map_err(|e| Error::config(format!("policyDocument is not valid JSON: {}", e)))?;
        }

        let mut payload = json!({ "credential_type": spec.credential_type });
        if !spec.policy_arns.is_empty() {
            payload["policy_arns"] = json!(spec.policy_arns);
        }
        if !spec.role_arns.is_empty() {
            payload["role_arns"] = json!(spec.role_arns);
        }
        if let Some(doc) = &spec.policy_document {
            payload["policy_document"] = json!(doc);
        }
        if let Some(ttl) = &spec.default_sts_ttl {
            payload["default_sts_ttl"] = json!(ttl);
        }
        if let Some(ttl) = &spec.max_sts_ttl {
            payload["max_sts_ttl"] = json!(ttl);
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

#[cfg(test)]
mod tests {
    use super::*;

    fn role(spec: AWSRoleSpec) -> AWSRole {
        let mut role = AWSRole::new("deployer", spec);
        role.metadata.namespace = Some("ci".to_string());
        role
    }

    #[test]
    fn payload_omits_unset_fields() {
        let r = role(AWSRoleSpec {
            path: "aws".to_string(),
            credential_type: "iam_user".to_string(),
            policy_arns: vec!["arn:aws:iam::aws:policy/ReadOnlyAccess".to_string()],
            ..Default::default()
        });
        let payload = r.role_payload().unwrap();
        assert_eq!(payload["credential_type"], "iam_user");
        assert_eq!(payload["policy_arns"][0], "arn:aws:iam::aws:policy/ReadOnlyAccess");
        assert!(payload.get("role_arns").is_none());
        assert!(payload.get("max_sts_ttl").is_none());
        assert_eq!(r.roles_path(), "aws/roles");
        assert_eq!(r.role_name(), "k8s.ci.deployer");
    }

    #[test]
    fn invalid_policy_document_is_a_config_error() {
        let r = role(AWSRoleSpec {
            path: "aws".to_string(),
            credential_type: "iam_user".to_string(),
            policy_document: Some("{not json".to_string()),
            ..Default::default()
        });
        let err = r.role_payload().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
