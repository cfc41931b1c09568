//! Operator configuration
//!
//! Settings are read from environment variables with defaults, so the deployment
//! can override them through `env`/`envFrom`.

use std::time::Duration;

/// Default number of reconcile workers per resource kind
pub const DEFAULT_WORKERS: usize = 2;
/// Default retry budget for a failing key before it is dropped
pub const DEFAULT_MAX_REQUEUES: u32 = 5;
/// Default first backoff step for a failed key (milliseconds)
pub const DEFAULT_REQUEUE_BASE_DELAY_MS: u64 = 5;
/// Default backoff ceiling for a failed key (seconds)
pub const DEFAULT_REQUEUE_MAX_DELAY_SECS: u64 = 1000;
/// Default upper bound on one finalization attempt (seconds)
pub const DEFAULT_FINALIZER_TIMEOUT_SECS: u64 = 30;
/// Default pause between finalization attempts (seconds)
pub const DEFAULT_FINALIZER_INTERVAL_SECS: u64 = 5;
/// Default time in-flight finalizations get to finish on shutdown (seconds)
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 30;
/// Default metrics port
pub const DEFAULT_METRICS_PORT: u16 = 8080;
/// Default Vault address
pub const DEFAULT_VAULT_ADDR: &str = "http://127.0.0.1:8200";

/// Operator-level configuration
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    /// Work queue and worker pool settings
    pub dispatcher: DispatcherConfig,
    /// Finalization loop bounds
    pub finalizer: FinalizerConfig,
    /// How long shutdown waits for detached finalizations
    pub shutdown_grace: Duration,
    /// Port for `/metrics` and health probes
    pub metrics_port: u16,
    /// Vault API address, e.g. `https://vault.vault.svc:8200`
    pub vault_addr: String,
    /// Pre-issued Vault token
    pub vault_token: String,
}

/// Worker pool and requeue policy
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub workers: usize,
    pub max_requeues: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

/// Bounds for the finalization loop
#[derive(Debug, Clone, Copy)]
pub struct FinalizerConfig {
    pub timeout: Duration,
    pub interval: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            max_requeues: DEFAULT_MAX_REQUEUES,
            base_delay: Duration::from_millis(DEFAULT_REQUEUE_BASE_DELAY_MS),
            max_delay: Duration::from_secs(DEFAULT_REQUEUE_MAX_DELAY_SECS),
        }
    }
}

impl Default for FinalizerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_FINALIZER_TIMEOUT_SECS),
            interval: Duration::from_secs(DEFAULT_FINALIZER_INTERVAL_SECS),
        }
    }
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            dispatcher: DispatcherConfig::default(),
            finalizer: FinalizerConfig::default(),
            shutdown_grace: Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECS),
            metrics_port: DEFAULT_METRICS_PORT,
            vault_addr: DEFAULT_VAULT_ADDR.to_string(),
            vault_token: String::new(),
        }
    }
}

impl OperatorConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let dispatcher = DispatcherConfig {
            workers: parse_or(&lookup, "WORKERS", DEFAULT_WORKERS).max(1),
            max_requeues: parse_or(&lookup, "MAX_REQUEUES", DEFAULT_MAX_REQUEUES),
            base_delay: Duration::from_millis(parse_or(
                &lookup,
                "REQUEUE_BASE_DELAY_MS",
                DEFAULT_REQUEUE_BASE_DELAY_MS,
            )),
            max_delay: Duration::from_secs(parse_or(
                &lookup,
                "REQUEUE_MAX_DELAY_SECS",
                DEFAULT_REQUEUE_MAX_DELAY_SECS,
            )),
        };

        let finalizer = FinalizerConfig {
            timeout: Duration::from_secs(parse_or(
                &lookup,
                "FINALIZER_TIMEOUT_SECS",
                DEFAULT_FINALIZER_TIMEOUT_SECS,
            )),
            interval: Duration::from_secs(
                parse_or(
                    &lookup,
                    "FINALIZER_INTERVAL_SECS",
                    DEFAULT_FINALIZER_INTERVAL_SECS,
                )
                .max(1),
            ),
        };

        Self {
            dispatcher,
            finalizer,
            shutdown_grace: Duration::from_secs(parse_or(
                &lookup,
                "SHUTDOWN_GRACE_SECS",
                DEFAULT_SHUTDOWN_GRACE_SECS,
            )),
            metrics_port: parse_or(&lookup, "METRICS_PORT", DEFAULT_METRICS_PORT),
            vault_addr: lookup("VAULT_ADDR").unwrap_or_else(|| DEFAULT_VAULT_ADDR.to_string()),
            vault_token: lookup("VAULT_TOKEN").unwrap_or_default(),
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    match lookup(name) {
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(variable = name, value = %raw, "Ignoring unparsable setting");
                default
            }
        },
        None => default,
    }
}
