//! External command execution

use std::io::ErrorKind;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, trace};

use super::FactError;

/// Runs system tools with a timeout and captures their stdout
#[derive(Debug, Clone)]
pub struct CommandRunner {
    timeout: Duration,
}

impl CommandRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Run a command, returning its trimmed stdout on success.
    ///
    /// A missing executable, a non-zero exit status or empty output are all
    /// absence (`Ok(None)`).
    pub async fn run(&self, program: &str, args: &[&str]) -> Result<Option<String>, FactError> {
        self.execute(program, args, true).await
    }

    /// Like [`run`](Self::run), but keeps stdout of a failing command.
    ///
    /// Needed for tools that report state through their exit status, such
    /// as `systemctl is-active`.
    pub async fn run_any_status(
        &self,
        program: &str,
        args: &[&str],
    ) -> Result<Option<String>, FactError> {
        self.execute(program, args, false).await
    }

    async fn execute(
        &self,
        program: &str,
        args: &[&str],
        require_success: bool,
    ) -> Result<Option<String>, FactError> {
        let command = describe(program, args);
        trace!(command = %command, "Running command");

        let result = tokio::time::timeout(
            self.timeout,
            Command::new(program).args(args).kill_on_drop(true).output(),
        )
        .await;

        match result {
            Ok(Ok(output)) => {
                if require_success && !output.status.success() {
                    debug!(command = %command, status = ?output.status.code(), "Command failed");
                    return Ok(None);
                }
                let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
                Ok(if stdout.is_empty() { None } else { Some(stdout) })
            }
            Ok(Err(e)) if e.kind() == ErrorKind::NotFound => {
                debug!(command = %command, "Command not found");
                Ok(None)
            }
            Ok(Err(e)) => Err(FactError::Spawn { command, source: e }),
            Err(_) => Err(FactError::Timeout {
                command,
                timeout: self.timeout,
            }),
        }
    }
}

fn describe(program: &str, args: &[&str]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}
