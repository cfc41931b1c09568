//! Vault-backed role adapter

use async_trait::async_trait;
use tracing::{debug, info};

use super::{AdapterFactory, RoleAdapter, VaultClient};
use crate::crd::ManagedRole;
use crate::error::{Error, Result};

/// A role of any kind, as Vault sees it
///
/// An invalid payload only fails [`RoleAdapter::create_role`]; deleting the
/// role needs nothing but its path.
#[derive(Debug, Clone)]
pub struct VaultRoleAdapter {
    client: VaultClient,
    roles_path: String,
    role_name: String,
    payload: std::result::Result<serde_json::Value, String>,
}

impl VaultRoleAdapter {
    pub fn new(
        client: VaultClient,
        roles_path: impl Into<String>,
        role_name: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            client,
            roles_path: roles_path.into(),
            role_name: role_name.into(),
            payload: Ok(payload),
        }
    }

    /// Adapter for a role whose payload could not be built
    pub fn with_invalid_payload(
        client: VaultClient,
        roles_path: impl Into<String>,
        role_name: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            client,
            roles_path: roles_path.into(),
            role_name: role_name.into(),
            payload: Err(reason.into()),
        }
    }

    fn role_path(&self, name: &str) -> String {
        format!("{}/{}", self.roles_path, name)
    }
}

#[async_trait]
impl RoleAdapter for VaultRoleAdapter {
    async fn create_role(&self) -> Result<()> {
        let payload = self.payload.as_ref().map_err(Error::config)?;
        let path = self.role_path(&self.role_name);
        self.client.write(&path, payload).await?;
        info!(path = %path, "Wrote Vault role");
        Ok(())
    }

    async fn delete_role(&self, name: &str) -> Result<()> {
        let path = self.role_path(name);
        match self.client.delete(&path).await {
            Err(e) if e.is_not_found() => {
                debug!(path = %path, "Vault role already gone");
                Ok(())
            }
            other => other,
        }
    }
}

/// Binds any [`ManagedRole`] to one shared Vault client
#[derive(Debug, Clone)]
pub struct VaultAdapterFactory {
    client: VaultClient,
}

impl VaultAdapterFactory {
    pub fn new(client: VaultClient) -> Self {
        Self { client }
    }
}

impl<K: ManagedRole> AdapterFactory<K> for VaultAdapterFactory {
    fn bind(&self, role: &K) -> Result<Box<dyn RoleAdapter>> {
        let client = self.client.clone();
        let adapter = match role.role_payload() {
            Ok(payload) => {
                VaultRoleAdapter::new(client, role.roles_path(), role.role_name(), payload)
            }
            Err(e) => VaultRoleAdapter::with_invalid_payload(
                client,
                role.roles_path(),
                role.role_name(),
                e.to_string(),
            ),
        };
        Ok(Box::new(adapter))
    }
}
