//! Kubernetes controllers for Vault role CRDs
//!
//! This module contains the watch/queue machinery that turns resource changes
//! into reconciles, plus the supervisor that owns background finalizations.

mod dispatcher;
mod queue;
mod role_controller;
mod supervisor;

pub use dispatcher::{Dispatcher, Reconcile};
pub use queue::WorkQueue;
pub use role_controller::run as run_role_controller;
pub use supervisor::Supervisor;

use kube::Client;

use crate::adapters::VaultClient;
use crate::config::OperatorConfig;
use crate::reconcilers::FinalizerRegistry;

/// Shared context for all controllers
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Operator configuration
    pub config: OperatorConfig,
    /// Finalizations in progress, shared across kinds
    pub registry: FinalizerRegistry,
    /// Owner of detached finalization tasks
    pub supervisor: Supervisor,
    /// Vault API client
    pub vault: VaultClient,
}

impl Context {
    /// Create a new context
    pub fn new(client: Client, config: OperatorConfig, vault: VaultClient) -> Self {
        let supervisor = Supervisor::new(config.shutdown_grace);
        Self {
            client,
            config,
            registry: FinalizerRegistry::new(),
            supervisor,
            vault,
        }
    }
}
