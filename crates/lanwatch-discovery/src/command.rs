//! Bounded invocation of external network utilities

use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{trace, warn};

use crate::error::ProbeError;

/// Captured output of a finished command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    /// Exit code, `-1` when the process was killed by a signal
    pub status: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// Turn a non-zero exit into a [`ProbeError`]
    pub fn require_success(self) -> Result<Self, ProbeError> {
        if self.success() {
            Ok(self)
        } else {
            Err(ProbeError::ExitStatus {
                command: self.command,
                status: self.status,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// Run `program` with `args`, giving up after `timeout`.
///
/// The child is killed when the returned future is dropped, so a timed-out or
/// cancelled probe never outlives its caller.
pub async fn run_command(
    program: &str,
    args: &[&str],
    timeout: Duration,
) -> Result<CommandOutput, ProbeError> {
    let command = std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ");
    trace!(command = %command, "Running command");

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ProbeError::Spawn {
            command: command.clone(),
            source,
        })?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(source)) => return Err(ProbeError::Spawn { command, source }),
        Err(_) => {
            warn!(command = %command, "Command timed out");
            return Err(ProbeError::Timeout {
                command,
                timeout_secs: timeout.as_secs(),
            });
        }
    };

    Ok(CommandOutput {
        command,
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        status: output.status.code().unwrap_or(-1),
    })
}
