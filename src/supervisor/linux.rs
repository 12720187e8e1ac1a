use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::InfillError;
use crate::supervisor::backend::{
    GroupSignal, Platform, ProcessBackend, ProcessHandle, is_no_such_process, signal_group,
};
use crate::supervisor::events::TerminationNotifier;

/// Delay between SIGTERM and SIGKILL on teardown.
pub const FORCE_KILL_DELAY: Duration = Duration::from_secs(1);

/// Runs the command in a new terminal emulator window, inside a shell that
/// stays open afterwards. The emulator leads its own process group so the
/// whole group can be signalled on teardown.
pub struct LinuxBackend {
    terminal: String,
    force_kill_delay: Duration,
}

impl Default for LinuxBackend {
    fn default() -> Self {
        Self {
            terminal: "gnome-terminal".to_string(),
            force_kill_delay: FORCE_KILL_DELAY,
        }
    }
}

impl LinuxBackend {
    pub fn with_terminal(terminal: &str) -> Self {
        Self {
            terminal: terminal.to_string(),
            ..Default::default()
        }
    }

    /// Arguments passed to the terminal emulator.
    pub fn terminal_args(command: &str) -> Vec<String> {
        vec![
            "--disable-factory".to_string(),
            "--".to_string(),
            "bash".to_string(),
            "-c".to_string(),
            format!("{command}; exec bash"),
        ]
    }
}

impl ProcessBackend for LinuxBackend {
    fn platform(&self) -> Platform {
        Platform::Linux
    }

    fn launch(
        &self,
        command: &str,
        _notifier: &TerminationNotifier,
    ) -> Result<ProcessHandle, InfillError> {
        let mut cmd = Command::new(&self.terminal);
        cmd.args(Self::terminal_args(command))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| {
            InfillError::Process(format!("failed to spawn {}: {e}", self.terminal))
        })?;

        let handle = ProcessHandle::new(Platform::Linux, child.id());
        let exited = handle.exit_marker();

        // Reap in the background; the task does not keep the host alive.
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => tracing::debug!(%status, "terminal process exited"),
                Err(e) => tracing::warn!("failed to wait for terminal process: {e}"),
            }
            exited.cancel();
        });

        tracing::info!(pid = ?handle.pid(), terminal = %self.terminal, "started server terminal");
        Ok(handle)
    }

    fn terminate(&self, handle: ProcessHandle) {
        let Some(pid) = handle.pid() else {
            return;
        };
        if handle.has_exited() {
            tracing::debug!(pid, "terminal process already exited, nothing to signal");
            return;
        }

        if let Err(e) = signal_group(pid, GroupSignal::Terminate) {
            if is_no_such_process(&e) {
                tracing::debug!(pid, "process group already gone");
                return;
            }
            tracing::error!(pid, "failed to send SIGTERM: {e}");
        }

        schedule_force_kill(pid, handle.exit_marker(), self.force_kill_delay);
    }
}

/// SIGKILL the group after `delay` unless the leader is confirmed to have
/// exited first. A reaped pid may be reused, so it is never signalled again.
pub(crate) fn schedule_force_kill(pid: u32, exited: CancellationToken, delay: Duration) {
    tokio::spawn(async move {
        tokio::select! {
            _ = exited.cancelled() => {
                tracing::debug!(pid, "process exited after SIGTERM, forced kill cancelled");
            }
            _ = tokio::time::sleep(delay) => {
                match signal_group(pid, GroupSignal::Kill) {
                    Ok(()) => tracing::info!(pid, "process group force-killed"),
                    Err(e) if is_no_such_process(&e) => {}
                    Err(e) => tracing::error!(pid, "failed to send SIGKILL: {e}"),
                }
            }
        }
    });
}
