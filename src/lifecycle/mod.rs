//! Machine lifecycle operations.
//!
//! Each operation walks an instance through a fixed sequence of phases:
//! launch, wait for the provider, verify SSH reachability, register with
//! the orchestrator. Failures absorb into [`OpPhase::Failed`]; a failure
//! during registration first rolls the instance back by terminating it.
//! Operations implement [`Task`] so the runner can schedule them.

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::orchestrator::{OrchestratorError, OrchestratorGateway};
use crate::provider::{
    CompletionStatus, Instance, MachineRequest, ProviderError, ProviderGateway,
};
use crate::remote::{CommandRunner, ProbeError, SshProbe};
use crate::runner::{Task, TaskFuture};

/// Completion event kind expected while waiting for instance creation.
const CREATE_EVENT_KIND: &str = "create";

/// Pending polls before a progress line is logged.
const PROGRESS_AFTER_POLLS: u32 = 3;

/// Interval and overall deadline for a retried step.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    /// Pause between attempts.
    pub interval: Duration,
    /// Ceiling on total elapsed time before giving up.
    pub deadline: Duration,
}

impl RetryPolicy {
    /// Builds a policy from an interval and a deadline.
    #[must_use]
    pub const fn new(interval: Duration, deadline: Duration) -> Self {
        Self { interval, deadline }
    }

    /// Default policy for provider completion polling.
    #[must_use]
    pub const fn provider_default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(200))
    }

    /// Default policy for SSH reachability probing.
    #[must_use]
    pub const fn reachability_default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(300))
    }
}

/// Phase of a machine lifecycle operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OpPhase {
    /// Operation constructed but not yet started.
    Created,
    /// Create request submitted to the provider.
    Launching,
    /// Waiting for the provider to report the instance active.
    AwaitingProviderReady,
    /// Probing the instance's public address over SSH.
    VerifyingReachability,
    /// Asking the orchestrator to adopt the machine.
    Registering,
    /// Terminating the instance after a registration failure.
    RollingBack,
    /// Operation finished successfully.
    Done,
    /// Operation finished in failure.
    Failed,
}

impl OpPhase {
    /// Reports whether `next` is a legal successor of this phase.
    ///
    /// `Done` and `Failed` are terminal. `Failed` absorbs from every
    /// non-terminal phase. Rollback is only reachable from `Registering`;
    /// earlier failures leave the instance alone. Decommissioning runs
    /// `Created` straight to `Done` because it has no intermediate phases.
    #[must_use]
    pub const fn permits(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Launching | Self::Done | Self::Failed)
                | (Self::Launching, Self::AwaitingProviderReady | Self::Failed)
                | (
                    Self::AwaitingProviderReady,
                    Self::VerifyingReachability | Self::Done | Self::Failed
                )
                | (
                    Self::VerifyingReachability,
                    Self::Registering | Self::Failed
                )
                | (Self::Registering, Self::Done | Self::RollingBack | Self::Failed)
                | (Self::RollingBack, Self::Failed)
        )
    }
}

/// Moves an operation from `from` to `to`, asserting the transition is in
/// the [`OpPhase::permits`] table, and returns the new phase.
fn advance(instance: &str, from: OpPhase, to: OpPhase) -> OpPhase {
    debug_assert!(
        from.permits(to),
        "illegal phase transition {from:?} -> {to:?}"
    );
    debug!(%instance, phase = ?to, "phase transition");
    to
}

/// Errors raised by lifecycle operations.
#[derive(Debug, Error)]
pub enum OpError {
    /// A provider call failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),
    /// An orchestrator call outside registration failed.
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
    /// The provider never reported the instance active.
    #[error("instance {name} not active after {elapsed:?}")]
    ProviderTimeout {
        /// Instance name.
        name: String,
        /// Time spent waiting.
        elapsed: Duration,
    },
    /// The provider reported the creation event as failed.
    #[error("provider reported creation of {name} failed: {diagnostic}")]
    LaunchFailed {
        /// Instance name.
        name: String,
        /// Provider-supplied diagnostic.
        diagnostic: String,
    },
    /// The completion token tracked something other than a creation.
    #[error("unexpected completion event kind {kind:?} for instance {name}")]
    UnexpectedEvent {
        /// Instance name.
        name: String,
        /// Event kind the provider reported.
        kind: String,
    },
    /// The host never answered within its reachability deadline.
    #[error("instance {name} at {address} still unreachable after {elapsed:?}")]
    ReachabilityTimeout {
        /// Instance name.
        name: String,
        /// Probed address.
        address: String,
        /// Time spent probing.
        elapsed: Duration,
    },
    /// The host failed a probe in a way a retry cannot fix.
    #[error("instance {name} at {address} is unreachable: {detail}")]
    Unreachable {
        /// Instance name.
        name: String,
        /// Probed address.
        address: String,
        /// Failure detail from the probe.
        detail: String,
    },
    /// The orchestrator refused the machine; the instance was rolled back.
    #[error("registration of {name} failed: {source}{teardown_note}")]
    Registration {
        /// Instance name.
        name: String,
        /// Underlying orchestrator failure.
        #[source]
        source: OrchestratorError,
        /// Empty when rollback succeeded, otherwise the rollback failure.
        teardown_note: String,
    },
}

/// Successful outcome of a [`RegisterOp`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RegisteredMachine {
    /// Machine identifier assigned by the orchestrator.
    pub machine_id: String,
    /// Provider instance backing the machine.
    pub instance: Instance,
}

/// Waits until the provider reports the created instance active, then
/// re-fetches it so the returned record carries its assigned address.
async fn wait_ready<P: ProviderGateway + ?Sized>(
    provider: &P,
    created: &Instance,
    policy: RetryPolicy,
) -> Result<Instance, OpError> {
    let name = created.name.clone();
    let Some(token) = created.completion_token.clone() else {
        return Ok(provider.get_instance(&created.id).await?);
    };

    let started = Instant::now();
    let mut polls: u32 = 0;
    loop {
        let report = provider.poll_completion(&token).await?;
        if report.kind != CREATE_EVENT_KIND {
            return Err(OpError::UnexpectedEvent {
                name,
                kind: report.kind,
            });
        }
        match report.status {
            CompletionStatus::Done => break,
            CompletionStatus::Error => {
                return Err(OpError::LaunchFailed {
                    name,
                    diagnostic: report
                        .diagnostic
                        .unwrap_or_else(|| String::from("no diagnostic supplied")),
                });
            }
            CompletionStatus::Pending => {
                polls += 1;
                if polls == PROGRESS_AFTER_POLLS {
                    info!(instance = %name, "still waiting for the provider");
                }
                let elapsed = started.elapsed();
                if elapsed >= policy.deadline {
                    return Err(OpError::ProviderTimeout { name, elapsed });
                }
                tokio::time::sleep(policy.interval).await;
            }
        }
    }

    Ok(provider.get_instance(&created.id).await?)
}

/// Probes `address` until it answers, a fatal probe failure occurs, or the
/// policy's deadline passes.
///
/// # Errors
///
/// Returns [`OpError::Unreachable`] on a fatal probe failure and
/// [`OpError::ReachabilityTimeout`] when the deadline passes while probes
/// keep failing transiently.
pub async fn wait_reachable<R: CommandRunner>(
    probe: &SshProbe<R>,
    name: &str,
    address: &str,
    policy: RetryPolicy,
) -> Result<(), OpError> {
    let started = Instant::now();
    loop {
        match probe.verify(address) {
            Ok(()) => return Ok(()),
            Err(ProbeError::Fatal { message }) => {
                return Err(OpError::Unreachable {
                    name: name.to_owned(),
                    address: address.to_owned(),
                    detail: message,
                });
            }
            Err(ProbeError::Transient { message }) => {
                let elapsed = started.elapsed();
                if elapsed >= policy.deadline {
                    return Err(OpError::ReachabilityTimeout {
                        name: name.to_owned(),
                        address: address.to_owned(),
                        elapsed,
                    });
                }
                debug!(instance = %name, %address, %message, "host not yet reachable");
                tokio::time::sleep(policy.interval).await;
            }
        }
    }
}

/// Creates an instance and waits until the provider reports it active.
pub struct ProvisionOp<P> {
    provider: Arc<P>,
    request: MachineRequest,
    policy: RetryPolicy,
}

impl<P: ProviderGateway + 'static> ProvisionOp<P> {
    /// Builds a provisioning operation for one instance.
    #[must_use]
    pub fn new(provider: Arc<P>, request: MachineRequest, policy: RetryPolicy) -> Self {
        Self {
            provider,
            request,
            policy,
        }
    }

    /// Creates the instance and waits for provider readiness, leaving the
    /// operation in `AwaitingProviderReady` for the caller to finish.
    async fn launch(self) -> Result<Instance, OpError> {
        let name = self.request.name.clone();
        let mut phase = advance(&name, OpPhase::Created, OpPhase::Launching);
        debug!(instance = %name, "creating instance");
        let created = match self.provider.create_instance(&self.request).await {
            Ok(created) => created,
            Err(err) => {
                advance(&name, phase, OpPhase::Failed);
                return Err(err.into());
            }
        };
        phase = advance(&name, phase, OpPhase::AwaitingProviderReady);
        debug!(instance = %name, id = %created.id, "waiting for the provider");
        match wait_ready(&*self.provider, &created, self.policy).await {
            Ok(instance) => Ok(instance),
            Err(err) => {
                advance(&name, phase, OpPhase::Failed);
                Err(err)
            }
        }
    }

    /// Runs the operation to completion.
    ///
    /// # Errors
    ///
    /// Returns [`OpError`] when creation fails, the completion event fails
    /// or tracks the wrong kind, or the provider deadline passes.
    pub async fn execute(self) -> Result<Instance, OpError> {
        let name = self.request.name.clone();
        let instance = self.launch().await?;
        advance(&name, OpPhase::AwaitingProviderReady, OpPhase::Done);
        info!(instance = %name, id = %instance.id, "instance active");
        Ok(instance)
    }
}

impl<P: ProviderGateway + 'static> Task for ProvisionOp<P> {
    type Output = Instance;
    type Error = OpError;

    fn label(&self) -> String {
        format!("provision {}", self.request.name)
    }

    fn run(self) -> TaskFuture<Self::Output, Self::Error> {
        Box::pin(self.execute())
    }
}

/// Provisions an instance, verifies it over SSH, and registers it with the
/// orchestrator. A registration failure terminates the instance again.
pub struct RegisterOp<P, O, R: CommandRunner> {
    provider: Arc<P>,
    orchestrator: Arc<O>,
    probe: SshProbe<R>,
    request: MachineRequest,
    provider_policy: RetryPolicy,
    reachability_policy: RetryPolicy,
}

impl<P, O, R> RegisterOp<P, O, R>
where
    P: ProviderGateway + 'static,
    O: OrchestratorGateway + 'static,
    R: CommandRunner + 'static,
{
    /// Builds a registration operation for one instance.
    #[must_use]
    pub fn new(
        provider: Arc<P>,
        orchestrator: Arc<O>,
        probe: SshProbe<R>,
        request: MachineRequest,
        provider_policy: RetryPolicy,
        reachability_policy: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            orchestrator,
            probe,
            request,
            provider_policy,
            reachability_policy,
        }
    }

    /// Runs the operation to completion.
    ///
    /// # Errors
    ///
    /// Returns [`OpError`] when any phase fails. A registration failure is
    /// reported as [`OpError::Registration`] after the instance has been
    /// terminated; a rollback failure is appended to the error text.
    pub async fn execute(self) -> Result<RegisteredMachine, OpError> {
        let name = self.request.name.clone();
        let instance = ProvisionOp::new(
            Arc::clone(&self.provider),
            self.request,
            self.provider_policy,
        )
        .launch()
        .await?;

        let mut phase = advance(
            &name,
            OpPhase::AwaitingProviderReady,
            OpPhase::VerifyingReachability,
        );
        debug!(instance = %name, "probing host");
        let Some(address) = instance.ip_address.clone() else {
            advance(&name, phase, OpPhase::Failed);
            return Err(OpError::Unreachable {
                name,
                address: String::from("<unassigned>"),
                detail: String::from("provider reported no public address"),
            });
        };
        if let Err(err) =
            wait_reachable(&self.probe, &name, &address, self.reachability_policy).await
        {
            advance(&name, phase, OpPhase::Failed);
            return Err(err);
        }

        phase = advance(&name, phase, OpPhase::Registering);
        debug!(instance = %name, "registering machine");
        let target = format!("{}@{address}", self.probe.user());
        match self.orchestrator.register_machine(&target) {
            Ok(machine_id) => {
                advance(&name, phase, OpPhase::Done);
                info!(instance = %name, machine = %machine_id, "machine registered");
                Ok(RegisteredMachine {
                    machine_id,
                    instance,
                })
            }
            Err(source) => {
                phase = advance(&name, phase, OpPhase::RollingBack);
                warn!(
                    instance = %name,
                    error = %source,
                    "registration failed, terminating instance",
                );
                let teardown_note = match self.provider.terminate_instance(&instance.id).await
                {
                    Ok(()) => String::new(),
                    Err(err) => {
                        format!("; rollback terminate of {} also failed: {err}", instance.id)
                    }
                };
                advance(&name, phase, OpPhase::Failed);
                Err(OpError::Registration {
                    name,
                    source,
                    teardown_note,
                })
            }
        }
    }
}

impl<P, O, R> Task for RegisterOp<P, O, R>
where
    P: ProviderGateway + 'static,
    O: OrchestratorGateway + 'static,
    R: CommandRunner + 'static,
{
    type Output = RegisteredMachine;
    type Error = OpError;

    fn label(&self) -> String {
        format!("register {}", self.request.name)
    }

    fn run(self) -> TaskFuture<Self::Output, Self::Error> {
        Box::pin(self.execute())
    }
}

/// Removes a machine from the orchestrator and terminates its instance.
///
/// Termination retries indefinitely while the provider reports a pending
/// event, matching the provider's conflict semantics for busy instances.
pub struct DecommissionOp<P, O> {
    provider: Arc<P>,
    orchestrator: Arc<O>,
    instance_id: String,
    machine_id: Option<String>,
    retry_interval: Duration,
}

impl<P, O> DecommissionOp<P, O>
where
    P: ProviderGateway + 'static,
    O: OrchestratorGateway + 'static,
{
    /// Builds a decommission operation. When `machine_id` is `None` the
    /// orchestrator is not consulted and only the instance is terminated.
    #[must_use]
    pub fn new(
        provider: Arc<P>,
        orchestrator: Arc<O>,
        instance_id: impl Into<String>,
        machine_id: Option<String>,
        retry_interval: Duration,
    ) -> Self {
        Self {
            provider,
            orchestrator,
            instance_id: instance_id.into(),
            machine_id,
            retry_interval,
        }
    }

    /// Runs the operation to completion.
    ///
    /// # Errors
    ///
    /// Returns [`OpError`] when orchestrator removal fails or termination
    /// fails with anything other than a retryable conflict.
    pub async fn execute(self) -> Result<(), OpError> {
        if let Some(machine_id) = &self.machine_id {
            debug!(machine = %machine_id, "removing machine from the orchestrator");
            if let Err(err) = self
                .orchestrator
                .remove_machines(std::slice::from_ref(machine_id))
            {
                advance(&self.instance_id, OpPhase::Created, OpPhase::Failed);
                return Err(err.into());
            }
        }
        loop {
            match self.provider.terminate_instance(&self.instance_id).await {
                Ok(()) => {
                    advance(&self.instance_id, OpPhase::Created, OpPhase::Done);
                    info!(id = %self.instance_id, "instance terminated");
                    return Ok(());
                }
                Err(err) if err.is_conflict() => {
                    debug!(id = %self.instance_id, error = %err, "termination pending, retrying");
                    tokio::time::sleep(self.retry_interval).await;
                }
                Err(err) => {
                    advance(&self.instance_id, OpPhase::Created, OpPhase::Failed);
                    return Err(err.into());
                }
            }
        }
    }
}

impl<P, O> Task for DecommissionOp<P, O>
where
    P: ProviderGateway + 'static,
    O: OrchestratorGateway + 'static,
{
    type Output = ();
    type Error = OpError;

    fn label(&self) -> String {
        format!("decommission {}", self.instance_id)
    }

    fn run(self) -> TaskFuture<Self::Output, Self::Error> {
        Box::pin(self.execute())
    }
}
