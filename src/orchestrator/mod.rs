//! Orchestrator gateway: the external cluster manager's view of machines.
//!
//! The orchestrator is driven through its command-line tool. Output parsing
//! stays in this module; core logic only sees typed statuses and machine
//! identifiers.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::remote::{CommandOutput, CommandRunner, RemoteError};

/// Default orchestrator CLI binary.
pub const DEFAULT_TOOL: &str = "juju";

/// TCP port the orchestrator's API server listens on.
pub const DEFAULT_API_PORT: u16 = 17070;

const API_PROBE_TIMEOUT: Duration = Duration::from_millis(1200);

/// One machine as the orchestrator reports it.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MachineStatus {
    /// Address the orchestrator reaches the machine at.
    pub dns_name: Option<String>,
    /// Provider instance identifier, when the orchestrator recorded one.
    pub provider_instance_id: Option<String>,
}

/// Errors raised while driving the orchestrator tool.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum OrchestratorError {
    /// The tool could not be started.
    #[error(transparent)]
    Spawn(#[from] RemoteError),
    /// The tool ran but exited non-zero.
    #[error("{program} exited with {code:?}: {stderr}")]
    Command {
        /// Program that failed.
        program: String,
        /// Exit code, if available.
        code: Option<i32>,
        /// Captured standard error.
        stderr: String,
    },
    /// The tool's output did not match the expected shape.
    #[error("unexpected orchestrator output: {message}")]
    Malformed {
        /// Description of the parsing failure.
        message: String,
    },
}

/// Interface to the external cluster orchestrator.
pub trait OrchestratorGateway: Send + Sync {
    /// Returns the machines the orchestrator currently tracks, by machine id.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError`] when the status call fails or its output
    /// cannot be parsed.
    fn status(&self) -> Result<BTreeMap<String, MachineStatus>, OrchestratorError>;

    /// Registers a reachable host as a cluster machine, returning the
    /// orchestrator-assigned machine identifier.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError`] when registration fails.
    fn register_machine(&self, ssh_target: &str) -> Result<String, OrchestratorError>;

    /// Removes machines from the orchestrator's view.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError`] when removal fails.
    fn remove_machines(&self, machine_ids: &[String]) -> Result<(), OrchestratorError>;

    /// Reports whether the cluster's API server answers.
    fn is_running(&self) -> bool;

    /// Bootstraps the cluster. The caller must have written the bootstrap
    /// host into the cluster descriptor first.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError`] when bootstrap fails.
    fn bootstrap(&self) -> Result<(), OrchestratorError>;

    /// Destroys the cluster environment.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError`] when the destroy call fails.
    fn destroy_cluster(&self) -> Result<(), OrchestratorError>;
}

/// Orchestrator gateway backed by the orchestrator's CLI tool.
#[derive(Clone, Debug)]
pub struct CliOrchestrator<R: CommandRunner> {
    runner: R,
    tool: String,
    cluster: String,
    bootstrap_host: Option<String>,
    api_port: u16,
}

impl<R: CommandRunner> CliOrchestrator<R> {
    /// Creates a gateway for the named cluster environment.
    #[must_use]
    pub fn new(
        runner: R,
        tool: impl Into<String>,
        cluster: impl Into<String>,
        bootstrap_host: Option<String>,
        api_port: u16,
    ) -> Self {
        Self {
            runner,
            tool: tool.into(),
            cluster: cluster.into(),
            bootstrap_host,
            api_port,
        }
    }

    fn run_tool(&self, args: &[&str]) -> Result<CommandOutput, OrchestratorError> {
        let os_args: Vec<OsString> = args.iter().map(OsString::from).collect();
        debug!(tool = %self.tool, ?args, "running orchestrator command");
        let output = self.runner.run(&self.tool, &os_args)?;
        if output.is_success() {
            Ok(output)
        } else {
            Err(OrchestratorError::Command {
                program: self.tool.clone(),
                code: output.code,
                stderr: output.stderr.trim().to_owned(),
            })
        }
    }
}

#[derive(Deserialize)]
struct StatusDoc {
    #[serde(default)]
    machines: BTreeMap<String, StatusMachine>,
}

#[derive(Deserialize)]
struct StatusMachine {
    #[serde(rename = "dns-name")]
    dns_name: Option<String>,
    #[serde(rename = "instance-id")]
    instance_id: Option<String>,
}

/// Extracts the machine id the tool printed for a registration.
fn parse_machine_id(output: &CommandOutput) -> Option<String> {
    let combined = format!("{}\n{}", output.stdout, output.stderr);
    for line in combined.lines() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix("created machine ") {
            let id = rest.trim_matches(|ch: char| !ch.is_ascii_alphanumeric());
            if !id.is_empty() {
                return Some(id.to_owned());
            }
        }
    }
    let whole = combined.trim();
    (!whole.is_empty() && whole.chars().all(|ch| ch.is_ascii_digit()))
        .then(|| whole.to_owned())
}

impl<R: CommandRunner> OrchestratorGateway for CliOrchestrator<R> {
    fn status(&self) -> Result<BTreeMap<String, MachineStatus>, OrchestratorError> {
        let output = self.run_tool(&["status", "-e", self.cluster.as_str()])?;
        let doc: StatusDoc = serde_yaml::from_str(&output.stdout).map_err(|err| {
            OrchestratorError::Malformed {
                message: err.to_string(),
            }
        })?;
        Ok(doc
            .machines
            .into_iter()
            .map(|(id, machine)| {
                (
                    id,
                    MachineStatus {
                        dns_name: machine.dns_name,
                        provider_instance_id: machine.instance_id,
                    },
                )
            })
            .collect())
    }

    fn register_machine(&self, ssh_target: &str) -> Result<String, OrchestratorError> {
        let target = format!("ssh:{ssh_target}");
        let output = self.run_tool(&["add-machine", target.as_str(), "-e", self.cluster.as_str()])?;
        parse_machine_id(&output).ok_or_else(|| OrchestratorError::Malformed {
            message: format!("no machine id in add-machine output: {}", output.stdout.trim()),
        })
    }

    fn remove_machines(&self, machine_ids: &[String]) -> Result<(), OrchestratorError> {
        let mut args = vec!["terminate-machine", "--force", "-e", self.cluster.as_str()];
        args.extend(machine_ids.iter().map(String::as_str));
        self.run_tool(&args).map(|_| ())
    }

    fn is_running(&self) -> bool {
        let Some(host) = self.bootstrap_host.as_deref() else {
            return false;
        };
        let target = format!("{host}:{}", self.api_port);
        let Ok(mut addrs) = target.to_socket_addrs() else {
            return false;
        };
        addrs.any(|addr| TcpStream::connect_timeout(&addr, API_PROBE_TIMEOUT).is_ok())
    }

    fn bootstrap(&self) -> Result<(), OrchestratorError> {
        self.run_tool(&["bootstrap", "-e", self.cluster.as_str()]).map(|_| ())
    }

    fn destroy_cluster(&self) -> Result<(), OrchestratorError> {
        self.run_tool(&["destroy-environment", "-y", self.cluster.as_str()])
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    struct ScriptedRunner {
        outputs: Mutex<VecDeque<CommandOutput>>,
        calls: Mutex<Vec<Vec<OsString>>>,
    }

    impl ScriptedRunner {
        fn new(outputs: Vec<CommandOutput>) -> Self {
            Self {
                outputs: Mutex::new(outputs.into()),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn run(&self, _program: &str, args: &[OsString]) -> Result<CommandOutput, RemoteError> {
            self.calls
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(args.to_vec());
            Ok(self
                .outputs
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .pop_front()
                .unwrap_or_else(|| CommandOutput {
                    code: Some(0),
                    stdout: String::new(),
                    stderr: String::new(),
                }))
        }
    }

    fn ok_output(stdout: &str) -> CommandOutput {
        CommandOutput {
            code: Some(0),
            stdout: stdout.to_owned(),
            stderr: String::new(),
        }
    }

    fn gateway(outputs: Vec<CommandOutput>) -> CliOrchestrator<ScriptedRunner> {
        CliOrchestrator::new(
            ScriptedRunner::new(outputs),
            "juju",
            "staging",
            None,
            DEFAULT_API_PORT,
        )
    }

    #[test]
    fn status_parses_machines() {
        let yaml = concat!(
            "machines:\n",
            "  \"0\":\n",
            "    dns-name: 10.0.0.5\n",
            "    instance-id: \"220\"\n",
            "  \"1\":\n",
            "    dns-name: 10.0.0.6\n",
            "    instance-id: \"221\"\n",
        );
        let statuses = gateway(vec![ok_output(yaml)])
            .status()
            .unwrap_or_else(|err| panic!("status failed: {err}"));

        assert_eq!(statuses.len(), 2);
        assert_eq!(
            statuses.get("1").and_then(|m| m.dns_name.as_deref()),
            Some("10.0.0.6")
        );
    }

    #[test]
    fn register_machine_extracts_the_created_id() {
        let id = gateway(vec![ok_output("created machine 3\n")])
            .register_machine("root@10.0.0.6")
            .unwrap_or_else(|err| panic!("register failed: {err}"));
        assert_eq!(id, "3");
    }

    #[test]
    fn register_machine_accepts_a_bare_id() {
        let id = gateway(vec![ok_output("7\n")])
            .register_machine("root@10.0.0.6")
            .unwrap_or_else(|err| panic!("register failed: {err}"));
        assert_eq!(id, "7");
    }

    #[test]
    fn register_machine_rejects_unparseable_output() {
        let result = gateway(vec![ok_output("something went sideways")])
            .register_machine("root@10.0.0.6");
        assert!(
            matches!(result, Err(OrchestratorError::Malformed { .. })),
            "unexpected outcome: {result:?}"
        );
    }

    #[test]
    fn failed_commands_surface_stderr() {
        let failure = CommandOutput {
            code: Some(1),
            stdout: String::new(),
            stderr: String::from("ERROR environment is not bootstrapped"),
        };
        let result = gateway(vec![failure]).status();
        assert!(
            matches!(
                result,
                Err(OrchestratorError::Command { ref stderr, .. })
                    if stderr.contains("not bootstrapped")
            ),
            "unexpected outcome: {result:?}"
        );
    }

    #[test]
    fn remove_machines_forces_termination() {
        let gw = gateway(vec![ok_output("")]);
        gw.remove_machines(&[String::from("1"), String::from("2")])
            .unwrap_or_else(|err| panic!("remove failed: {err}"));
        let calls = gw
            .runner
            .calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let args = calls.first().unwrap_or_else(|| panic!("no call recorded"));
        assert!(args.contains(&OsString::from("--force")));
        assert!(args.contains(&OsString::from("2")));
    }

    #[test]
    fn is_running_is_false_without_a_bootstrap_host() {
        assert!(!gateway(Vec::new()).is_running());
    }
}
