//! Bootstrap workflow: launch a bootstrap host and initialise the cluster.

use std::sync::Arc;

use tracing::{info, warn};

use crate::descriptor::ClusterDescriptor;
use crate::lifecycle::{wait_reachable, OpError, ProvisionOp};
use crate::orchestrator::OrchestratorGateway;
use crate::provider::ProviderGateway;
use crate::remote::CommandRunner;

use super::{CommandError, Workflow};

/// Provisions the bootstrap host and initialises the cluster on it.
///
/// The new instance becomes machine `0`. Its address is written to the
/// cluster descriptor before the orchestrator is invoked; a failed
/// initialisation terminates the instance and clears the address again.
///
/// # Errors
///
/// Returns [`CommandError::AlreadyBootstrapped`] when the cluster is up,
/// and the underlying error when provisioning, the reachability probe, the
/// descriptor update, or the orchestrator call fails.
pub async fn bootstrap<P, O, R>(
    workflow: &Workflow<P, O, R>,
    descriptor: &mut ClusterDescriptor,
    constraints: Option<&str>,
    series: &str,
) -> Result<(), CommandError>
where
    P: ProviderGateway + 'static,
    O: OrchestratorGateway + 'static,
    R: CommandRunner + Clone + 'static,
{
    let cluster = descriptor.cluster().to_owned();
    if descriptor.bootstrap_host().is_some() || workflow.orchestrator.is_running() {
        return Err(CommandError::AlreadyBootstrapped { name: cluster });
    }

    let ssh_key_ids = workflow.resolve_ssh_keys().await?;
    let name = format!("{cluster}-0");
    let request = workflow.machine_request(&name, constraints, series, ssh_key_ids)?;

    let instance = ProvisionOp::new(
        Arc::clone(&workflow.provider),
        request,
        workflow.provider_policy,
    )
    .execute()
    .await?;
    let address = instance
        .ip_address
        .clone()
        .ok_or_else(|| OpError::Unreachable {
            name: name.clone(),
            address: String::from("<unassigned>"),
            detail: String::from("provider reported no public address"),
        })?;
    wait_reachable(
        &workflow.probe(),
        &name,
        &address,
        workflow.reachability_policy,
    )
    .await?;

    descriptor.set_bootstrap_host(&address);
    descriptor.save()?;

    info!(cluster = %cluster, host = %address, "initialising the cluster");
    if let Err(err) = workflow.orchestrator.bootstrap() {
        warn!(
            cluster = %cluster,
            error = %err,
            "cluster initialisation failed, terminating the bootstrap host",
        );
        if let Err(terminate_err) = workflow.provider.terminate_instance(&instance.id).await {
            warn!(id = %instance.id, error = %terminate_err, "rollback terminate failed");
        }
        descriptor.clear_bootstrap_host();
        if let Err(save_err) = descriptor.save() {
            warn!(error = %save_err, "failed to clear the bootstrap host");
        }
        return Err(err.into());
    }

    info!(cluster = %cluster, host = %address, "cluster bootstrapped");
    Ok(())
}
