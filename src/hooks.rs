use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{error, info, warn};

/// Runs optional pre/post commands through the host shell
#[derive(Debug, Clone, Default)]
pub struct HookRunner {
    timeout: Option<Duration>,
}

impl HookRunner {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    /// `None` is a no-op success. Otherwise true iff the command exits with 0.
    /// Spawn errors and timeouts count as failure.
    pub async fn run(&self, command: Option<&str>) -> bool {
        let Some(command) = command else {
            return true;
        };

        info!(command, "Running hook");
        let mut child = match shell_command(command)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                error!(command, error = %e, "Failed to start hook");
                return false;
            }
        };

        let status = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => status,
                Err(_) => {
                    warn!(command, timeout_secs = limit.as_secs(), "Hook timed out, killing it");
                    if let Err(e) = child.kill().await {
                        error!(command, error = %e, "Failed to kill hook");
                    }
                    return false;
                }
            },
            None => child.wait().await,
        };

        match status {
            Ok(status) if status.success() => {
                info!(command, "Hook finished");
                true
            }
            Ok(status) => {
                error!(command, code = ?status.code(), "Hook exited with failure");
                false
            }
            Err(e) => {
                error!(command, error = %e, "Failed waiting for hook");
                false
            }
        }
    }
}

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

#[cfg(not(windows))]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}
