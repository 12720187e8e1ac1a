//! Terminal surfaces used when the server is launched in terminal mode.
//!
//! An editor host provides its own `TerminalHost` (an integrated terminal
//! panel). `ShellTerminalHost` is the headless fallback: an interactive shell
//! whose output is forwarded to the log.

use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

use crate::error::InfillError;
#[cfg(unix)]
use crate::supervisor::backend::{GroupSignal, signal_group};

/// Name given to the terminal opened for the server.
pub const TERMINAL_NAME: &str = "llama.cpp Command Terminal";

pub trait TerminalHost: Send + Sync {
    fn open(&self, name: &str) -> Result<Box<dyn TerminalSession>, InfillError>;
}

/// An open terminal. Its lifetime is the terminal's own; the supervisor only
/// sends input and disposes it.
pub trait TerminalSession: Send {
    fn show(&mut self, preserve_focus: bool);
    fn send_text(&mut self, text: &str);
    fn dispose(&mut self);
}

/// Spawns `sh` (or `cmd` on Windows) reading commands from a pipe.
#[derive(Default)]
pub struct ShellTerminalHost;

impl TerminalHost for ShellTerminalHost {
    fn open(&self, name: &str) -> Result<Box<dyn TerminalSession>, InfillError> {
        Ok(Box::new(self.spawn(name)?))
    }
}

impl ShellTerminalHost {
    pub fn spawn(&self, name: &str) -> Result<ShellTerminal, InfillError> {
        let (program, args): (&str, &[&str]) = if cfg!(windows) {
            ("cmd", &["/Q", "/K"])
        } else {
            ("sh", &[])
        };

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| InfillError::Process(format!("failed to open terminal {name}: {e}")))?;

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        if let Some(mut stdin) = child.stdin.take() {
            tokio::spawn(async move {
                while let Some(line) = rx.recv().await {
                    if let Err(e) = stdin.write_all(line.as_bytes()).await {
                        tracing::warn!("terminal input closed: {e}");
                        break;
                    }
                    let _ = stdin.flush().await;
                }
            });
        }
        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, name.to_string());
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, name.to_string());
        }

        Ok(ShellTerminal {
            name: name.to_string(),
            child: Some(child),
            input: tx,
        })
    }
}

fn forward_lines<R>(pipe: R, name: String)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(pipe).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::info!(target: "infill::terminal", terminal = %name, "{line}");
        }
    });
}

pub struct ShellTerminal {
    name: String,
    child: Option<Child>,
    input: mpsc::UnboundedSender<String>,
}

impl ShellTerminal {
    /// Pid of the shell, which also leads its process group. None once disposed.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }
}

impl TerminalSession for ShellTerminal {
    fn show(&mut self, _preserve_focus: bool) {
        tracing::info!(terminal = %self.name, "terminal output is forwarded to the log");
    }

    fn send_text(&mut self, text: &str) {
        let line = if text.ends_with('\n') {
            text.to_string()
        } else {
            format!("{text}\n")
        };
        if self.input.send(line).is_err() {
            tracing::warn!(terminal = %self.name, "terminal is closed, input dropped");
        }
    }

    fn dispose(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        #[cfg(unix)]
        if let Some(pid) = child.id()
            && let Err(e) = signal_group(pid, GroupSignal::Kill)
        {
            tracing::debug!(pid, "failed to kill terminal process group: {e}");
        }
        if let Err(e) = child.start_kill() {
            tracing::debug!("terminal already exited: {e}");
        }
        // Reap when a runtime is available; kill_on_drop covers the rest.
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                let _ = child.wait().await;
            });
        }
        tracing::info!(terminal = %self.name, "terminal disposed");
    }
}

impl Drop for ShellTerminal {
    fn drop(&mut self) {
        self.dispose();
    }
}
