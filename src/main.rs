//! Binary entry point for the Capstan CLI.

use std::io::{self, Write};
use std::process;
use std::sync::Arc;

use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use capstan::cli::{Cli, CommonOpts};
use capstan::{
    ClusterConfig, ClusterDescriptor, CliOrchestrator, CommandError, ConfigError,
    DescriptorError, HttpProviderGateway, ProcessCommandRunner, ProviderConfig, ProviderError,
    SizeCatalog, Workflow, add_machines, bootstrap, destroy_environment, terminate_machines,
};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Command(#[from] CommandError),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(common_opts(&cli).verbose);
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

const fn common_opts(cli: &Cli) -> &CommonOpts {
    match cli {
        Cli::Bootstrap(cmd) => &cmd.common,
        Cli::AddMachine(cmd) => &cmd.common,
        Cli::TerminateMachine(cmd) => &cmd.common,
        Cli::DestroyEnvironment(cmd) => &cmd.common,
    }
}

fn init_tracing(verbose: bool) {
    let default_directive = if verbose { "capstan=debug" } else { "capstan=info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

type CliWorkflow =
    Workflow<HttpProviderGateway, CliOrchestrator<ProcessCommandRunner>, ProcessCommandRunner>;

struct Runtime {
    workflow: CliWorkflow,
    descriptor: ClusterDescriptor,
    default_series: String,
}

/// Loads configuration, the cluster descriptor, and the provider catalog,
/// then assembles the shared workflow.
async fn build_runtime(common: &CommonOpts) -> Result<Runtime, CliError> {
    let provider_config = ProviderConfig::load_without_cli_args()?;
    provider_config.validate()?;
    let cluster_config = ClusterConfig::load_without_cli_args()?;

    let descriptor_path = cluster_config.resolved_descriptor_path()?;
    let descriptor = ClusterDescriptor::load(&descriptor_path, common.environment.as_deref())?;

    let provider = Arc::new(HttpProviderGateway::with_base_url(
        provider_config.api_token.clone(),
        provider_config.api_url.clone(),
    ));
    let catalog = SizeCatalog::fetch(&*provider).await?;

    let orchestrator = Arc::new(CliOrchestrator::new(
        ProcessCommandRunner,
        cluster_config.orchestrator_tool.clone(),
        descriptor.cluster(),
        descriptor.bootstrap_host(),
        cluster_config.api_port,
    ));

    let workflow = Workflow::new(
        provider,
        orchestrator,
        catalog.into_shared(),
        ProcessCommandRunner,
        cluster_config.ssh_user.clone(),
        provider_config.ssh_key_names(),
    );
    Ok(Runtime {
        workflow,
        descriptor,
        default_series: cluster_config.default_series,
    })
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    match cli {
        Cli::Bootstrap(cmd) => {
            let mut runtime = build_runtime(&cmd.common).await?;
            let series = cmd.machine.series.unwrap_or(runtime.default_series);
            bootstrap(
                &runtime.workflow,
                &mut runtime.descriptor,
                cmd.machine.constraints.as_deref(),
                &series,
            )
            .await?;
        }
        Cli::AddMachine(cmd) => {
            let runtime = build_runtime(&cmd.common).await?;
            let series = cmd.machine.series.unwrap_or(runtime.default_series);
            add_machines(
                &runtime.workflow,
                &runtime.descriptor,
                cmd.num_machines,
                cmd.machine.constraints.as_deref(),
                &series,
            )
            .await?;
        }
        Cli::TerminateMachine(cmd) => {
            let runtime = build_runtime(&cmd.common).await?;
            terminate_machines(&runtime.workflow, &cmd.machines).await?;
        }
        Cli::DestroyEnvironment(cmd) => {
            let mut runtime = build_runtime(&cmd.common).await?;
            destroy_environment(&runtime.workflow, &mut runtime.descriptor).await?;
        }
    }
    Ok(())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
