//! Command workflows driving provisioning, registration, and teardown.
//!
//! Each subcommand maps to one function here, generic over the provider
//! and orchestrator gateways so tests can drive the workflows with fakes.

mod add_machine;
mod bootstrap;
mod destroy;
mod terminate;


pub use add_machine::add_machines;
pub use bootstrap::bootstrap;
pub use destroy::destroy_environment;
pub use terminate::{collect_targets, terminate_machines, TerminationTarget};

use std::sync::Arc;

use thiserror::Error;

use crate::catalog::SizeCatalog;
use crate::constraints::{self, ConstraintError};
use crate::descriptor::DescriptorError;
use crate::lifecycle::{OpError, RetryPolicy};
use crate::orchestrator::{OrchestratorError, OrchestratorGateway};
use crate::provider::{MachineRequest, ProviderError, ProviderGateway};
use crate::remote::{CommandRunner, SshProbe};
use crate::runner::{Runner, RunnerError, Task, TaskFailure};

use tracing::{error, info};

/// Errors surfaced by command workflows.
#[derive(Debug, Error)]
pub enum CommandError {
    /// A constraint string could not be parsed or satisfied.
    #[error(transparent)]
    Constraint(#[from] ConstraintError),
    /// A provider call outside a lifecycle operation failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),
    /// An orchestrator call outside a lifecycle operation failed.
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
    /// The cluster descriptor could not be read or written.
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
    /// A lifecycle operation run outside the task runner failed.
    #[error(transparent)]
    Lifecycle(#[from] OpError),
    /// The task runner refused to start.
    #[error(transparent)]
    Runner(#[from] RunnerError),
    /// The provider has no SSH keys to install on new instances.
    #[error("no SSH keys are registered with the provider; upload one first")]
    NoSshKeys,
    /// A configured SSH key name is not registered with the provider.
    #[error("no SSH key named {name} is registered with the provider")]
    UnknownSshKey {
        /// Key name that could not be found.
        name: String,
    },
    /// The requested series has no matching provider image.
    #[error("series {series} has no matching provider image")]
    UnknownSeries {
        /// Series that could not be resolved.
        series: String,
    },
    /// Bootstrap was requested for a cluster that is already up.
    #[error("cluster {name} is already bootstrapped")]
    AlreadyBootstrapped {
        /// Cluster that is already running.
        name: String,
    },
    /// A machine operation was requested before bootstrap.
    #[error("cluster {name} is not bootstrapped")]
    NotBootstrapped {
        /// Cluster that is not running.
        name: String,
    },
    /// Some operations in a batch failed; details were already logged.
    #[error("{failed} of {total} operations failed")]
    PartialFailure {
        /// Number of failed operations.
        failed: usize,
        /// Number of queued operations.
        total: usize,
    },
}

/// Shared dependencies for the command workflows.
pub struct Workflow<P, O, R: CommandRunner + Clone> {
    provider: Arc<P>,
    orchestrator: Arc<O>,
    catalog: Arc<SizeCatalog>,
    ssh_runner: R,
    ssh_user: String,
    key_filter: Option<Vec<String>>,
    provider_policy: RetryPolicy,
    reachability_policy: RetryPolicy,
}

impl<P, O, R> Workflow<P, O, R>
where
    P: ProviderGateway + 'static,
    O: OrchestratorGateway + 'static,
    R: CommandRunner + Clone + 'static,
{
    /// Assembles a workflow from its gateways and settings.
    #[must_use]
    pub fn new(
        provider: Arc<P>,
        orchestrator: Arc<O>,
        catalog: Arc<SizeCatalog>,
        ssh_runner: R,
        ssh_user: impl Into<String>,
        key_filter: Option<Vec<String>>,
    ) -> Self {
        Self {
            provider,
            orchestrator,
            catalog,
            ssh_runner,
            ssh_user: ssh_user.into(),
            key_filter,
            provider_policy: RetryPolicy::provider_default(),
            reachability_policy: RetryPolicy::reachability_default(),
        }
    }

    /// Overrides the retry policies, primarily to keep tests fast.
    #[must_use]
    pub const fn with_policies(
        mut self,
        provider_policy: RetryPolicy,
        reachability_policy: RetryPolicy,
    ) -> Self {
        self.provider_policy = provider_policy;
        self.reachability_policy = reachability_policy;
        self
    }

    fn probe(&self) -> SshProbe<R> {
        SshProbe::new(self.ssh_runner.clone(), self.ssh_user.clone())
    }

    /// Resolves the SSH key identifiers to install on new instances,
    /// enforcing the registered-key precheck.
    async fn resolve_ssh_keys(&self) -> Result<Vec<String>, CommandError> {
        let keys = self.provider.list_ssh_keys().await?;
        if keys.is_empty() {
            return Err(CommandError::NoSshKeys);
        }
        let Some(wanted) = &self.key_filter else {
            return Ok(keys.into_iter().map(|key| key.id).collect());
        };
        let mut ids = Vec::with_capacity(wanted.len());
        for name in wanted {
            let key = keys
                .iter()
                .find(|key| key.name == *name)
                .ok_or_else(|| CommandError::UnknownSshKey { name: name.clone() })?;
            ids.push(key.id.clone());
        }
        Ok(ids)
    }

    /// Builds a create request for one machine from its constraints.
    fn machine_request(
        &self,
        name: &str,
        constraints: Option<&str>,
        series: &str,
        ssh_key_ids: Vec<String>,
    ) -> Result<MachineRequest, CommandError> {
        let placement = constraints::solve(constraints.unwrap_or(""), &self.catalog)?;
        let image_id = self
            .catalog
            .image_for_series(series)
            .ok_or_else(|| CommandError::UnknownSeries {
                series: series.to_owned(),
            })?;
        Ok(MachineRequest::builder()
            .name(name)
            .image_id(image_id)
            .size_id(placement.size_id)
            .region_id(placement.region_id)
            .ssh_key_ids(ssh_key_ids)
            .build()?)
    }
}

/// Drains a runner of decommission operations, logging each result and
/// summarising failures.
async fn drain_decommissions<T>(runner: &mut Runner<T>) -> Result<(), CommandError>
where
    T: Task<Output = (), Error = OpError>,
{
    let total = runner.pending();
    if total == 0 {
        return Ok(());
    }
    let mut stream = runner.drain()?;
    let mut failed = 0_usize;
    while let Some(result) = stream.next().await {
        match result.outcome {
            Ok(()) => info!(op = %result.label, "done"),
            Err(TaskFailure::Failed(err)) => {
                failed += 1;
                error!(op = %result.label, error = %err, "operation failed");
            }
            Err(TaskFailure::Aborted { message }) => {
                failed += 1;
                error!(op = %result.label, %message, "operation aborted");
            }
        }
    }
    if failed > 0 {
        Err(CommandError::PartialFailure { failed, total })
    } else {
        Ok(())
    }
}
