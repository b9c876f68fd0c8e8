//! Command-line interface definitions for the `capstan` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Args, Parser};

/// Top-level CLI for the `capstan` binary.
#[derive(Debug, Parser)]
#[command(
    name = "capstan",
    about = "Provision cloud machines for a managed cluster",
    arg_required_else_help = true
)]
pub enum Cli {
    /// Launch a bootstrap host and initialise the cluster on it.
    #[command(name = "bootstrap", about = "Bootstrap a cluster environment")]
    Bootstrap(BootstrapCommand),
    /// Provision instances and register them as cluster machines.
    #[command(name = "add-machine", about = "Add machines to an environment")]
    AddMachine(AddMachineCommand),
    /// Remove cluster machines and terminate their instances.
    #[command(name = "terminate-machine", about = "Terminate machines")]
    TerminateMachine(TerminateMachineCommand),
    /// Tear down every machine in the environment, then the environment itself.
    #[command(
        name = "destroy-environment",
        about = "Destroy all machines in the environment"
    )]
    DestroyEnvironment(DestroyEnvironmentCommand),
}

/// Flags shared by every subcommand.
#[derive(Args, Clone, Debug, Default)]
pub struct CommonOpts {
    /// Cluster environment to operate on.
    #[arg(short = 'e', long, value_name = "NAME")]
    pub environment: Option<String>,
    /// Enable debug-level diagnostics on stderr.
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

/// Flags shared by subcommands that provision new machines.
#[derive(Args, Clone, Debug, Default)]
pub struct MachineOpts {
    /// Resource constraints, e.g. "region=nyc1, cpu-cores=4, mem=2g".
    #[arg(long, value_name = "CONSTRAINTS")]
    pub constraints: Option<String>,
    /// OS release series for the boot image.
    #[arg(long, value_name = "SERIES")]
    pub series: Option<String>,
}

/// Arguments for the `capstan bootstrap` subcommand.
#[derive(Debug, Parser)]
pub struct BootstrapCommand {
    /// Shared flags.
    #[command(flatten)]
    pub common: CommonOpts,
    /// Machine selection flags.
    #[command(flatten)]
    pub machine: MachineOpts,
}

/// Arguments for the `capstan add-machine` subcommand.
#[derive(Debug, Parser)]
pub struct AddMachineCommand {
    /// Shared flags.
    #[command(flatten)]
    pub common: CommonOpts,
    /// Machine selection flags.
    #[command(flatten)]
    pub machine: MachineOpts,
    /// Number of machines to allocate.
    #[arg(short = 'n', long = "num-machines", default_value_t = 1, value_name = "COUNT")]
    pub num_machines: usize,
}

/// Arguments for the `capstan terminate-machine` subcommand.
#[derive(Debug, Parser)]
pub struct TerminateMachineCommand {
    /// Shared flags.
    #[command(flatten)]
    pub common: CommonOpts,
    /// Cluster machine identifiers to terminate.
    #[arg(required = true, value_name = "MACHINE")]
    pub machines: Vec<String>,
}

/// Arguments for the `capstan destroy-environment` subcommand.
#[derive(Debug, Parser)]
pub struct DestroyEnvironmentCommand {
    /// Shared flags.
    #[command(flatten)]
    pub common: CommonOpts,
}
