//! Core library for the Capstan cluster provisioning tool.
//!
//! Capstan provisions cloud instances for an externally managed cluster:
//! it solves placement constraints against the provider's size catalog,
//! walks each machine through a provisioning lifecycle (create, wait for
//! the provider, verify SSH reachability, register), and keeps the
//! cluster descriptor in step with the bootstrap host.

pub mod catalog;
pub mod cli;
pub mod commands;
pub mod config;
pub mod constraints;
pub mod descriptor;
pub mod lifecycle;
pub mod orchestrator;
pub mod provider;
pub mod remote;
pub mod runner;

pub use catalog::{DEFAULT_REGION, SERIES_MAP, SizeCatalog, SizeSpec};
pub use commands::{
    CommandError, TerminationTarget, Workflow, add_machines, bootstrap, collect_targets,
    destroy_environment, terminate_machines,
};
pub use config::{ClusterConfig, ConfigError, ProviderConfig};
pub use constraints::{ConstraintError, Placement, solve};
pub use descriptor::{ClusterDescriptor, DescriptorError};
pub use lifecycle::{
    DecommissionOp, OpError, OpPhase, ProvisionOp, RegisterOp, RegisteredMachine, RetryPolicy,
};
pub use orchestrator::{
    CliOrchestrator, MachineStatus, OrchestratorError, OrchestratorGateway,
};
pub use provider::{
    HttpProviderGateway, Instance, MachineRequest, ProviderError, ProviderGateway,
};
pub use remote::{CommandOutput, CommandRunner, ProcessCommandRunner, SshProbe};
pub use runner::{Runner, RunnerError, Task, TaskFailure, TaskResult};
