//! Readiness gate for lazily provisioned backing tables.
//!
//! A backend's table may take seconds to create. The gate starts
//! provisioning as soon as the backend is constructed and lets every data
//! operation wait on the single outcome: `Initializing` moves once to
//! `Initialized` or `Failed`, and both are terminal.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use chatgate_core::config::StorageConfig;

/// Why a table never became usable. Shared by every waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProvisionError {
    /// The table did not report active before the deadline
    #[error("timed out after {waited_ms}ms waiting for table '{table}' to become active")]
    Timeout { table: String, waited_ms: u64 },

    /// Checking for or creating the table failed
    #[error("failed to provision table '{table}': {message}")]
    Failed { table: String, message: String },
}

impl From<ProvisionError> for chatgate_core::Error {
    fn from(e: ProvisionError) -> Self {
        match e {
            ProvisionError::Timeout { table, waited_ms } => {
                chatgate_core::Error::ProvisioningTimeout { table, waited_ms }
            }
            ProvisionError::Failed { table, message } => {
                chatgate_core::Error::ProvisioningFailed { table, message }
            }
        }
    }
}

/// Gate state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateState {
    /// Provisioning in progress
    Initializing,
    /// Table is ready; terminal
    Initialized,
    /// Provisioning failed; terminal
    Failed(ProvisionError),
}

impl GateState {
    fn outcome(&self) -> Option<Result<(), ProvisionError>> {
        match self {
            GateState::Initializing => None,
            GateState::Initialized => Some(Ok(())),
            GateState::Failed(e) => Some(Err(e.clone())),
        }
    }
}

/// One-shot barrier in front of a backend's data operations.
#[derive(Debug, Clone)]
pub struct ReadinessGate {
    table: String,
    state: watch::Receiver<GateState>,
}

impl ReadinessGate {
    /// Start provisioning on the current tokio runtime.
    ///
    /// Returns immediately; the outcome is broadcast to every
    /// [`await_ready`](Self::await_ready) caller once it is known.
    pub fn spawn<F>(table: impl Into<String>, provision: F) -> Self
    where
        F: Future<Output = Result<(), ProvisionError>> + Send + 'static,
    {
        let table = table.into();
        let (tx, rx) = watch::channel(GateState::Initializing);

        let gate = Self {
            table: table.clone(),
            state: rx,
        };
        tokio::spawn(async move {
            let state = match provision.await {
                Ok(()) => {
                    debug!(table = %table, "Table ready");
                    GateState::Initialized
                }
                Err(e) => {
                    warn!(table = %table, error = %e, "Table provisioning failed");
                    GateState::Failed(e)
                }
            };
            tx.send_replace(state);
        });

        gate
    }

    /// Provision `target` with the standard create-then-poll algorithm.
    pub fn provision<T>(target: Arc<T>, options: ProvisionOptions) -> Self
    where
        T: ProvisionTarget + ?Sized + 'static,
    {
        let table = target.table().to_string();
        Self::spawn(table, async move { provision(target.as_ref(), options).await })
    }

    /// A gate that is already open.
    pub fn ready() -> Self {
        let (_tx, rx) = watch::channel(GateState::Initialized);
        Self {
            table: String::new(),
            state: rx,
        }
    }

    /// Current state.
    pub fn state(&self) -> GateState {
        self.state.borrow().clone()
    }

    /// Wait until the table is usable.
    ///
    /// Resolves immediately once a terminal state has been reached.
    pub async fn await_ready(&self) -> Result<(), ProvisionError> {
        if let Some(outcome) = self.state.borrow().outcome() {
            return outcome;
        }

        let mut rx = self.state.clone();
        let result = rx
            .wait_for(|state| !matches!(state, GateState::Initializing))
            .await
            .map(|state| state.outcome());

        match result {
            Ok(Some(outcome)) => outcome,
            // Sender gone without a terminal state: the provisioning task died
            Ok(None) | Err(_) => Err(ProvisionError::Failed {
                table: self.table.clone(),
                message: "provisioning task ended without reporting an outcome".to_string(),
            }),
        }
    }
}

/// Status reported by a backend table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableStatus {
    /// Still being created
    Creating,
    /// Ready for reads and writes
    Active,
    /// Being torn down; will not become active
    Deleting,
    /// Exists but cannot be used (e.g. lost credentials)
    Unavailable,
}

/// A backend resource the gate knows how to provision.
#[async_trait]
pub trait ProvisionTarget: Send + Sync {
    /// Table name used in errors and logs.
    fn table(&self) -> &str;

    /// Whether the table already exists.
    async fn exists(&self) -> chatgate_core::Result<bool>;

    /// Issue the create request with the backend's schema.
    async fn create(&self) -> chatgate_core::Result<()>;

    /// Current status of the table.
    async fn status(&self) -> chatgate_core::Result<TableStatus>;
}

/// Polling parameters for provisioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProvisionOptions {
    /// Delay between status checks
    pub poll_interval: Duration,
    /// Deadline for the table to become active
    pub max_wait: Duration,
}

impl Default for ProvisionOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_wait: Duration::from_secs(6),
        }
    }
}

impl From<&StorageConfig> for ProvisionOptions {
    fn from(config: &StorageConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            max_wait: Duration::from_millis(config.provision_timeout_ms),
        }
    }
}

/// Create the table if it is missing, then wait for it to become active.
pub async fn provision<T>(target: &T, options: ProvisionOptions) -> Result<(), ProvisionError>
where
    T: ProvisionTarget + ?Sized,
{
    let failed = |e: chatgate_core::Error| ProvisionError::Failed {
        table: target.table().to_string(),
        message: e.to_string(),
    };

    if target.exists().await.map_err(failed)? {
        debug!(table = target.table(), "Table already exists");
        return Ok(());
    }

    info!(table = target.table(), "Creating table");
    target.create().await.map_err(failed)?;

    wait_until_active(target, options).await
}

/// Poll the table status until active or the deadline passes.
///
/// Failed checks are treated as transient and retried.
async fn wait_until_active<T>(target: &T, options: ProvisionOptions) -> Result<(), ProvisionError>
where
    T: ProvisionTarget + ?Sized,
{
    let start = Instant::now();
    let deadline = start + options.max_wait;

    while Instant::now() < deadline {
        match target.status().await {
            Ok(TableStatus::Active) => return Ok(()),
            Ok(status @ (TableStatus::Deleting | TableStatus::Unavailable)) => {
                warn!(table = target.table(), ?status, "Table will not become active");
                break;
            }
            Ok(TableStatus::Creating) => {}
            Err(e) => debug!(table = target.table(), error = %e, "Status check failed, retrying"),
        }
        tokio::time::sleep(options.poll_interval).await;
    }

    Err(ProvisionError::Timeout {
        table: target.table().to_string(),
        waited_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
    })
}
