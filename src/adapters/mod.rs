//! Adapters between role resources and the Vault API

mod role;
mod vault;

pub use role::*;
pub use vault::*;

use async_trait::async_trait;

use crate::error::Result;

/// Creates and deletes one role in the secret backend
#[async_trait]
pub trait RoleAdapter: Send + Sync {
    /// Create or overwrite the role; safe to repeat
    async fn create_role(&self) -> Result<()>;

    /// Delete the named role; deleting a missing role succeeds
    async fn delete_role(&self, name: &str) -> Result<()>;
}

/// Binds a [`RoleAdapter`] to a resource's current spec
pub trait AdapterFactory<K>: Send + Sync {
    fn bind(&self, role: &K) -> Result<Box<dyn RoleAdapter>>;
}
