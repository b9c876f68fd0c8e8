//! Subprocess execution and the SSH reachability probe.
//!
//! Both the orchestrator gateway and the reachability probe shell out to
//! external tools. The [`CommandRunner`] trait centralises that seam so tests
//! can script outputs without spawning processes.

use std::ffi::OsString;
use std::process::Command;

use thiserror::Error;

/// Result of running an external command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }
}

/// Errors raised while spawning external commands.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RemoteError {
    /// Raised when the command cannot be started at all.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Program that could not be started.
        program: String,
        /// Human-readable failure description.
        message: String,
    },
}

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner: Send + Sync {
    /// Runs `program` with the given arguments, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Spawn`] if the command cannot be started.
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, RemoteError>;
}

/// Real command runner that shells out to the host operating system.
#[derive(Clone, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, RemoteError> {
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|err| RemoteError::Spawn {
                program: program.to_owned(),
                message: err.to_string(),
            })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Outcome of a single reachability probe.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProbeError {
    /// The host refused, reset, or timed out the connection; worth retrying.
    #[error("host not yet reachable: {message}")]
    Transient {
        /// Failure detail from the SSH client.
        message: String,
    },
    /// Any other failure; retrying will not help.
    #[error("reachability check failed: {message}")]
    Fatal {
        /// Failure detail from the SSH client.
        message: String,
    },
}

// Stderr fragments the SSH client emits while a freshly created host is
// still booting.
const TRANSIENT_MARKERS: [&str; 5] = [
    "connection refused",
    "connection reset",
    "connection timed out",
    "timed out",
    "no route to host",
];

/// Verifies a host answers a lightweight remote command over SSH.
#[derive(Clone, Debug)]
pub struct SshProbe<R: CommandRunner> {
    runner: R,
    user: String,
}

impl<R: CommandRunner> SshProbe<R> {
    /// Creates a probe that connects as the given user.
    #[must_use]
    pub fn new(runner: R, user: impl Into<String>) -> Self {
        Self {
            runner,
            user: user.into(),
        }
    }

    /// Login user the probe connects as.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Runs `ls` on the host over SSH.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Transient`] when the connection was refused,
    /// reset, or timed out, and [`ProbeError::Fatal`] for every other
    /// failure.
    pub fn verify(&self, address: &str) -> Result<(), ProbeError> {
        let target = format!("{}@{address}", self.user);
        let args: Vec<OsString> = [
            "-o",
            "BatchMode=yes",
            "-o",
            "StrictHostKeyChecking=accept-new",
            "-o",
            "ConnectTimeout=5",
            target.as_str(),
            "ls",
        ]
        .into_iter()
        .map(OsString::from)
        .collect();

        let output = self
            .runner
            .run("ssh", &args)
            .map_err(|err| ProbeError::Fatal {
                message: err.to_string(),
            })?;
        if output.is_success() {
            return Ok(());
        }

        let detail = if output.stderr.trim().is_empty() {
            format!("ssh exited with {:?}", output.code)
        } else {
            output.stderr.trim().to_owned()
        };
        let lowered = detail.to_lowercase();
        if TRANSIENT_MARKERS
            .iter()
            .any(|marker| lowered.contains(marker))
        {
            Err(ProbeError::Transient { message: detail })
        } else {
            Err(ProbeError::Fatal { message: detail })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Runner double that replays scripted outputs and records invocations.
    struct ScriptedRunner {
        output: CommandOutput,
        calls: Mutex<Vec<(String, Vec<OsString>)>>,
    }

    impl ScriptedRunner {
        fn new(code: Option<i32>, stderr: &str) -> Self {
            Self {
                output: CommandOutput {
                    code,
                    stdout: String::new(),
                    stderr: stderr.to_owned(),
                },
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, RemoteError> {
            self.calls
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push((program.to_owned(), args.to_vec()));
            Ok(self.output.clone())
        }
    }

    #[test]
    fn success_is_reported_as_reachable() {
        let probe = SshProbe::new(ScriptedRunner::new(Some(0), ""), "root");
        assert_eq!(probe.verify("10.0.0.9"), Ok(()));
    }

    #[test]
    fn connection_refused_is_transient() {
        let probe = SshProbe::new(
            ScriptedRunner::new(Some(255), "ssh: connect to host 10.0.0.9: Connection refused"),
            "root",
        );
        let result = probe.verify("10.0.0.9");
        assert!(
            matches!(result, Err(ProbeError::Transient { .. })),
            "unexpected outcome: {result:?}"
        );
    }

    #[test]
    fn authentication_failure_is_fatal() {
        let probe = SshProbe::new(
            ScriptedRunner::new(Some(255), "Permission denied (publickey)."),
            "root",
        );
        let result = probe.verify("10.0.0.9");
        assert!(
            matches!(result, Err(ProbeError::Fatal { .. })),
            "unexpected outcome: {result:?}"
        );
    }

    #[test]
    fn probe_targets_the_configured_user() {
        let runner = ScriptedRunner::new(Some(0), "");
        let probe = SshProbe::new(runner, "root");
        probe
            .verify("192.0.2.7")
            .unwrap_or_else(|err| panic!("probe failed: {err}"));
        let calls = probe
            .runner
            .calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let (program, args) = calls
            .first()
            .unwrap_or_else(|| panic!("no command recorded"));
        assert_eq!(program, "ssh");
        assert!(args.contains(&OsString::from("root@192.0.2.7")));
    }
}
