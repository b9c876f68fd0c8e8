//! Destroy-environment workflow: tear down every machine, then the cluster.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::descriptor::ClusterDescriptor;
use crate::lifecycle::DecommissionOp;
use crate::orchestrator::OrchestratorGateway;
use crate::provider::ProviderGateway;
use crate::remote::CommandRunner;
use crate::runner::Runner;

use super::{collect_targets, drain_decommissions, CommandError, Workflow};

/// Machine identifier of the bootstrap host.
const BOOTSTRAP_MACHINE: &str = "0";

/// Pause between terminating worker machines and destroying the cluster, so
/// the orchestrator observes their departure.
const SETTLE_DELAY: Duration = Duration::from_secs(2);

/// Tears the whole cluster down: terminates every non-bootstrap instance,
/// destroys the cluster environment, then terminates the bootstrap host and
/// clears its descriptor entry.
///
/// Worker terminations that fail do not stop the teardown; the failure is
/// reported once the rest of the cluster is gone.
///
/// # Errors
///
/// Returns the underlying error when status, destroy, or descriptor calls
/// fail, and [`CommandError::PartialFailure`] when any termination failed.
pub async fn destroy_environment<P, O, R>(
    workflow: &Workflow<P, O, R>,
    descriptor: &mut ClusterDescriptor,
) -> Result<(), CommandError>
where
    P: ProviderGateway + 'static,
    O: OrchestratorGateway + 'static,
    R: CommandRunner + Clone + 'static,
{
    let status = workflow.orchestrator.status()?;
    let instances = workflow.provider.list_instances().await?;

    let workers: Vec<String> = status
        .keys()
        .filter(|id| id.as_str() != BOOTSTRAP_MACHINE)
        .cloned()
        .collect();
    let (targets, unresolved) = collect_targets(&status, &instances, &workers);
    for machine_id in &unresolved {
        warn!(machine = %machine_id, "no instance found for machine, skipping");
    }

    let mut runner = Runner::new();
    for target in targets {
        // The environment is destroyed afterwards, so there is no point
        // removing each machine from the orchestrator first.
        runner.queue_op(DecommissionOp::new(
            Arc::clone(&workflow.provider),
            Arc::clone(&workflow.orchestrator),
            target.instance_id,
            None,
            workflow.provider_policy.interval,
        ));
    }
    let worker_result = drain_decommissions(&mut runner).await;

    tokio::time::sleep(SETTLE_DELAY).await;
    info!(cluster = %descriptor.cluster(), "destroying the cluster environment");
    workflow.orchestrator.destroy_cluster()?;

    let (bootstrap_targets, _) =
        collect_targets(&status, &instances, &[String::from(BOOTSTRAP_MACHINE)]);
    let bootstrap_instance = bootstrap_targets
        .into_iter()
        .map(|target| target.instance_id)
        .next()
        .or_else(|| {
            // An unbootstrapped status may still leave a live host recorded
            // in the descriptor.
            descriptor.bootstrap_host().and_then(|host| {
                instances
                    .iter()
                    .find(|instance| instance.ip_address.as_deref() == Some(host.as_str()))
                    .map(|instance| instance.id.clone())
            })
        });
    if let Some(instance_id) = bootstrap_instance {
        DecommissionOp::new(
            Arc::clone(&workflow.provider),
            Arc::clone(&workflow.orchestrator),
            instance_id,
            None,
            workflow.provider_policy.interval,
        )
        .execute()
        .await?;
    }

    descriptor.clear_bootstrap_host();
    descriptor.save()?;

    worker_result
}
