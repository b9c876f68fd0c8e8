//! Add-machine workflow: provision and register a batch of machines.

use std::sync::Arc;

use tracing::{error, info};
use uuid::Uuid;

use crate::descriptor::ClusterDescriptor;
use crate::lifecycle::{RegisterOp, RegisteredMachine};
use crate::orchestrator::OrchestratorGateway;
use crate::provider::ProviderGateway;
use crate::remote::CommandRunner;
use crate::runner::{Runner, TaskFailure};

use super::{CommandError, Workflow};

/// Provisions `count` instances concurrently and registers each with the
/// orchestrator. Every queued operation reports exactly once; failures are
/// logged as they arrive and summarised in the returned error.
///
/// # Errors
///
/// Returns [`CommandError::NotBootstrapped`] when the cluster is down and
/// [`CommandError::PartialFailure`] when any operation fails.
pub async fn add_machines<P, O, R>(
    workflow: &Workflow<P, O, R>,
    descriptor: &ClusterDescriptor,
    count: usize,
    constraints: Option<&str>,
    series: &str,
) -> Result<Vec<RegisteredMachine>, CommandError>
where
    P: ProviderGateway + 'static,
    O: OrchestratorGateway + 'static,
    R: CommandRunner + Clone + 'static,
{
    let cluster = descriptor.cluster().to_owned();
    if descriptor.bootstrap_host().is_none() && !workflow.orchestrator.is_running() {
        return Err(CommandError::NotBootstrapped { name: cluster });
    }

    let ssh_key_ids = workflow.resolve_ssh_keys().await?;
    let mut runner = Runner::new();
    for _ in 0..count {
        let name = format!("{cluster}-{}", Uuid::new_v4().simple());
        let request =
            workflow.machine_request(&name, constraints, series, ssh_key_ids.clone())?;
        runner.queue_op(RegisterOp::new(
            Arc::clone(&workflow.provider),
            Arc::clone(&workflow.orchestrator),
            workflow.probe(),
            request,
            workflow.provider_policy,
            workflow.reachability_policy,
        ));
    }

    let total = runner.pending();
    let mut stream = runner.drain()?;
    let mut registered = Vec::with_capacity(total);
    let mut failed = 0_usize;
    while let Some(result) = stream.next().await {
        match result.outcome {
            Ok(machine) => {
                info!(op = %result.label, machine = %machine.machine_id, "machine added");
                registered.push(machine);
            }
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
        return Err(CommandError::PartialFailure { failed, total });
    }
    Ok(registered)
}
