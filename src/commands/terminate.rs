//! Terminate-machine workflow: decommission named cluster machines.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::warn;

use crate::lifecycle::DecommissionOp;
use crate::orchestrator::{MachineStatus, OrchestratorGateway};
use crate::provider::{Instance, ProviderGateway};
use crate::remote::CommandRunner;
use crate::runner::Runner;

use super::{drain_decommissions, CommandError, Workflow};

/// A cluster machine paired with the provider instance backing it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TerminationTarget {
    /// Orchestrator machine identifier.
    pub machine_id: String,
    /// Provider instance identifier.
    pub instance_id: String,
}

/// Maps requested machine identifiers to provider instances.
///
/// A machine resolves through its recorded instance identifier first, then
/// by matching its address against the live instance list. Each instance is
/// targeted at most once even when named repeatedly; machines that cannot
/// be resolved are returned separately.
#[must_use]
pub fn collect_targets(
    status: &BTreeMap<String, MachineStatus>,
    instances: &[Instance],
    requested: &[String],
) -> (Vec<TerminationTarget>, Vec<String>) {
    let mut targets = Vec::new();
    let mut unresolved = Vec::new();
    let mut seen = BTreeSet::new();
    for machine_id in requested {
        let Some(machine) = status.get(machine_id) else {
            unresolved.push(machine_id.clone());
            continue;
        };
        let instance = machine
            .provider_instance_id
            .as_ref()
            .and_then(|id| instances.iter().find(|instance| instance.id == *id))
            .or_else(|| {
                machine.dns_name.as_ref().and_then(|dns| {
                    instances
                        .iter()
                        .find(|instance| instance.ip_address.as_deref() == Some(dns.as_str()))
                })
            });
        match instance {
            Some(instance) => {
                if seen.insert(instance.id.clone()) {
                    targets.push(TerminationTarget {
                        machine_id: machine_id.clone(),
                        instance_id: instance.id.clone(),
                    });
                }
            }
            None => unresolved.push(machine_id.clone()),
        }
    }
    (targets, unresolved)
}

/// Removes the named machines from the orchestrator and terminates their
/// instances. Machines with no resolvable instance are logged and skipped.
///
/// # Errors
///
/// Returns the underlying error when the status or instance listing fails,
/// and [`CommandError::PartialFailure`] when any decommission fails.
pub async fn terminate_machines<P, O, R>(
    workflow: &Workflow<P, O, R>,
    machines: &[String],
) -> Result<(), CommandError>
where
    P: ProviderGateway + 'static,
    O: OrchestratorGateway + 'static,
    R: CommandRunner + Clone + 'static,
{
    let status = workflow.orchestrator.status()?;
    let instances = workflow.provider.list_instances().await?;
    let (targets, unresolved) = collect_targets(&status, &instances, machines);
    for machine_id in &unresolved {
        warn!(machine = %machine_id, "no instance found for machine, skipping");
    }

    let mut runner = Runner::new();
    for target in targets {
        runner.queue_op(DecommissionOp::new(
            Arc::clone(&workflow.provider),
            Arc::clone(&workflow.orchestrator),
            target.instance_id,
            Some(target.machine_id),
            workflow.provider_policy.interval,
        ));
    }
    drain_decommissions(&mut runner).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::CompletionToken;

    fn instance(id: &str, ip: &str) -> Instance {
        Instance {
            id: id.to_owned(),
            name: format!("staging-{id}"),
            ip_address: Some(ip.to_owned()),
            status: String::from("active"),
            created_at: String::from("2026-01-01T00:00:00Z"),
            completion_token: None::<CompletionToken>,
        }
    }

    fn status_entry(dns: Option<&str>, instance_id: Option<&str>) -> MachineStatus {
        MachineStatus {
            dns_name: dns.map(str::to_owned),
            provider_instance_id: instance_id.map(str::to_owned),
        }
    }

    #[test]
    fn resolves_by_instance_id_then_address() {
        let status = BTreeMap::from([
            (String::from("1"), status_entry(None, Some("221"))),
            (String::from("2"), status_entry(Some("10.0.0.7"), None)),
        ]);
        let instances = [instance("221", "10.0.0.6"), instance("222", "10.0.0.7")];

        let (targets, unresolved) = collect_targets(
            &status,
            &instances,
            &[String::from("1"), String::from("2")],
        );

        assert!(unresolved.is_empty());
        assert_eq!(
            targets,
            vec![
                TerminationTarget {
                    machine_id: String::from("1"),
                    instance_id: String::from("221"),
                },
                TerminationTarget {
                    machine_id: String::from("2"),
                    instance_id: String::from("222"),
                },
            ]
        );
    }

    #[test]
    fn targets_each_instance_at_most_once() {
        let status = BTreeMap::from([(String::from("1"), status_entry(None, Some("221")))]);
        let instances = [instance("221", "10.0.0.6")];

        let (targets, unresolved) = collect_targets(
            &status,
            &instances,
            &[String::from("1"), String::from("1")],
        );

        assert!(unresolved.is_empty());
        assert_eq!(targets.len(), 1);
        assert_eq!(targets.first().map(|t| t.instance_id.as_str()), Some("221"));
    }

    #[test]
    fn reports_unknown_and_unbacked_machines() {
        let status = BTreeMap::from([(String::from("1"), status_entry(None, None))]);
        let instances = [instance("221", "10.0.0.6")];

        let (targets, unresolved) = collect_targets(
            &status,
            &instances,
            &[String::from("1"), String::from("9")],
        );

        assert!(targets.is_empty());
        assert_eq!(unresolved, vec![String::from("1"), String::from("9")]);
    }
}
