use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::error::InfillError;
use crate::supervisor::backend::{collect_stderr, Platform, ProcessBackend, ProcessHandle};
use crate::supervisor::events::{TerminationEvent, TerminationNotifier};

/// How long to keep draining stderr after the shell exits. A grandchild that
/// inherited the pipe can hold it open indefinitely.
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

#[cfg(windows)]
const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;

/// Runs the command through the platform shell with inherited stdin/stdout
/// and captured stderr. Emits a `TerminationEvent` when the shell exits.
/// Teardown kills the whole process tree with `taskkill`.
pub struct WindowsBackend {
    shell: String,
    shell_args: Vec<String>,
}

impl Default for WindowsBackend {
    fn default() -> Self {
        Self::with_shell("cmd", &["/C"])
    }
}

impl WindowsBackend {
    /// Use a different shell invocation. The command string is appended as the last argument.
    pub fn with_shell(shell: &str, shell_args: &[&str]) -> Self {
        Self {
            shell: shell.to_string(),
            shell_args: shell_args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

impl ProcessBackend for WindowsBackend {
    fn platform(&self) -> Platform {
        Platform::Windows
    }

    fn launch(
        &self,
        command: &str,
        notifier: &TerminationNotifier,
    ) -> Result<ProcessHandle, InfillError> {
        let mut cmd = Command::new(&self.shell);
        cmd.args(&self.shell_args)
            .arg(command)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped());
        #[cfg(windows)]
        cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);

        let mut child = cmd.spawn().map_err(|e| {
            InfillError::Process(format!("failed to spawn {}: {e}", self.shell))
        })?;

        let handle = ProcessHandle::new(Platform::Windows, child.id());
        let buffer = handle.stderr().clone();
        let exited = handle.exit_marker();
        let notifier = notifier.clone();
        let reader = child
            .stderr
            .take()
            .map(|pipe| collect_stderr(pipe, buffer.clone()));

        tokio::spawn(async move {
            let status = child.wait().await;
            if let Some(reader) = reader
                && tokio::time::timeout(STDERR_DRAIN_TIMEOUT, reader).await.is_err()
            {
                tracing::debug!("stderr still open after exit, emitting what was captured");
            }

            let exit_code = match status {
                Ok(status) => status.code().unwrap_or(-1),
                Err(e) => {
                    tracing::warn!("failed to wait for server process: {e}");
                    -1
                }
            };
            // Listeners observe the event before the supervisor goes idle.
            notifier.emit(TerminationEvent {
                exit_code,
                stderr: buffer.take(),
            });
            exited.cancel();
        });

        tracing::info!(pid = ?handle.pid(), "started server process");
        Ok(handle)
    }

    fn terminate(&self, handle: ProcessHandle) {
        let Some(pid) = handle.pid() else {
            return;
        };
        if handle.has_exited() {
            tracing::debug!(pid, "server process already exited, nothing to kill");
            return;
        }

        tokio::spawn(async move {
            let result = Command::new("taskkill")
                .args(["/pid", &pid.to_string(), "/T", "/F"])
                .stdin(Stdio::null())
                .output()
                .await;
            match result {
                Ok(output) if output.status.success() => {
                    tracing::info!(pid, "server process tree terminated");
                }
                Ok(output) => {
                    tracing::error!(
                        pid,
                        stderr = %String::from_utf8_lossy(&output.stderr),
                        "failed to kill server process tree"
                    );
                }
                Err(e) => tracing::error!(pid, "failed to run taskkill: {e}"),
            }
        });
    }
}
