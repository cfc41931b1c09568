//! Vault Engine Kubernetes Operator
//!
//! Main entry point for the operator. Sets up the Kubernetes and Vault
//! clients, starts one controller per role kind, and shuts everything down
//! gracefully on SIGTERM/SIGINT.

use std::sync::Arc;

use anyhow::Context as _;
use kube::Client;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use vault_engine_operator::{
    adapters::VaultClient,
    config::OperatorConfig,
    controllers::{self, Context},
    crd::{AWSRole, GCPRole},
    metrics,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    init_tracing();

    info!("Starting Vault Engine Operator");

    let config = OperatorConfig::from_env();
    info!(
        workers = config.dispatcher.workers,
        max_requeues = config.dispatcher.max_requeues,
        finalizer_timeout_secs = config.finalizer.timeout.as_secs(),
        vault_addr = %config.vault_addr,
        "Loaded configuration"
    );

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes API server");

    let vault = VaultClient::new(&config.vault_addr, &config.vault_token)
        .context("failed to build Vault client")?;

    // Create shared context
    let metrics_port = config.metrics_port;
    let context = Arc::new(Context::new(client, config, vault));
    let stop = context.supervisor.stop_token();

    // Start metrics server
    let metrics_handle = tokio::spawn(metrics::serve(metrics_port, stop.clone()));
    info!("Metrics server starting on port {}", metrics_port);

    // Run all controllers concurrently
    let mut gcp_controller =
        tokio::spawn(controllers::run_role_controller::<GCPRole>(context.clone()));
    let mut aws_controller =
        tokio::spawn(controllers::run_role_controller::<AWSRole>(context.clone()));

    // Handle graceful shutdown
    tokio::select! {
        result = &mut gcp_controller => {
            error!(result = ?result, "GCPRole controller exited unexpectedly");
        }
        result = &mut aws_controller => {
            error!(result = ?result, "AWSRole controller exited unexpectedly");
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal, stopping operator");
        }
    }

    // Stop intake and let the dispatchers drain their in-flight reconciles,
    // which may still hand finalizations to the supervisor
    context.supervisor.stop();
    for (kind, handle) in [("GCPRole", gcp_controller), ("AWSRole", aws_controller)] {
        if !handle.is_finished() {
            if let Err(e) = handle.await {
                error!(kind, error = %e, "Controller task failed");
            }
        }
    }

    if !context.supervisor.drain().await {
        warn!("Some finalizations were abandoned, they resume on the next start");
    }

    if let Ok(Err(e)) = metrics_handle.await {
        error!(error = %e, "Metrics server failed");
    }

    info!("Vault Engine Operator stopped");
    Ok(())
}

/// Initialize tracing subscriber
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kube=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install CTRL+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received CTRL+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
