pub mod backend;
pub mod events;
pub mod linux;
pub mod macos;
pub mod terminal;
pub mod windows;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::supervisor::backend::{Platform, ProcessBackend, ProcessHandle};
use crate::supervisor::events::{TerminationEvent, TerminationNotifier};
use crate::supervisor::linux::LinuxBackend;
use crate::supervisor::macos::MacBackend;
use crate::supervisor::terminal::{
    ShellTerminalHost, TERMINAL_NAME, TerminalHost, TerminalSession,
};
use crate::supervisor::windows::WindowsBackend;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorState {
    Idle,
    Launching,
    Running,
    Terminating,
}

pub fn backend_for(platform: Platform) -> Box<dyn ProcessBackend> {
    match platform {
        Platform::Windows => Box::new(WindowsBackend::default()),
        Platform::MacOs => Box::new(MacBackend),
        Platform::Linux => Box::new(LinuxBackend::default()),
    }
}

enum Session {
    Idle,
    Terminal(Box<dyn TerminalSession>),
    Process {
        handle: ProcessHandle,
        generation: u64,
        retired: CancellationToken,
    },
}

struct Inner {
    config: Arc<Config>,
    backend: Box<dyn ProcessBackend>,
    terminals: Box<dyn TerminalHost>,
    session: Mutex<Session>,
    generation: AtomicU64,
    state: watch::Sender<SupervisorState>,
    notifier: TerminationNotifier,
    last_event: Arc<Mutex<Option<TerminationEvent>>>,
}

/// Owns at most one inference server, either a tracked process or a terminal
/// session. Never returns errors: OS-level failures are logged and the
/// supervisor falls back to `Idle`.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    /// Supervisor for the current platform with a headless terminal host.
    pub fn new(config: Arc<Config>) -> Self {
        Self::with_parts(
            config,
            backend_for(Platform::current()),
            Box::new(ShellTerminalHost),
        )
    }

    pub fn with_parts(
        config: Arc<Config>,
        backend: Box<dyn ProcessBackend>,
        terminals: Box<dyn TerminalHost>,
    ) -> Self {
        let (state, _) = watch::channel(SupervisorState::Idle);
        let notifier = TerminationNotifier::new();
        let last_event = Arc::new(Mutex::new(None));
        {
            let last_event = last_event.clone();
            notifier.on_terminate(move |event| {
                *lock(&last_event) = Some(event.clone());
            });
        }

        tracing::debug!(platform = ?backend.platform(), "process supervisor ready");
        Self {
            inner: Arc::new(Inner {
                config,
                backend,
                terminals,
                session: Mutex::new(Session::Idle),
                generation: AtomicU64::new(0),
                state,
                notifier,
                last_event,
            }),
        }
    }

    pub fn platform(&self) -> Platform {
        self.inner.backend.platform()
    }

    pub fn state(&self) -> SupervisorState {
        *self.inner.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SupervisorState> {
        self.inner.state.subscribe()
    }

    /// Most recent termination event, if any process has exited.
    pub fn last_termination(&self) -> Option<TerminationEvent> {
        lock(&self.inner.last_event).clone()
    }

    pub fn on_terminate<F>(&self, listener: F)
    where
        F: Fn(&TerminationEvent) + Send + Sync + 'static,
    {
        self.inner.notifier.on_terminate(listener);
    }

    pub fn notifier(&self) -> &TerminationNotifier {
        &self.inner.notifier
    }

    /// Launch the configured `launch_cmd`.
    pub fn launch_configured(&self) {
        let command = self.inner.config.launch_cmd.clone();
        self.launch(&command);
    }

    /// Start `command`, replacing any live session. Empty commands are ignored.
    pub fn launch(&self, command: &str) {
        let command = command.trim();
        if command.is_empty() {
            tracing::debug!("empty launch command, nothing to start");
            return;
        }

        let mut session = lock(&self.inner.session);
        if self.inner.teardown(&mut session) {
            tracing::info!("stopped previous server session before launching");
        }
        self.inner.set_state(SupervisorState::Launching);

        if self.inner.config.use_terminal {
            match self.inner.terminals.open(TERMINAL_NAME) {
                Ok(mut terminal) => {
                    terminal.show(true);
                    terminal.send_text(command);
                    *session = Session::Terminal(terminal);
                    self.inner.set_state(SupervisorState::Running);
                    tracing::info!("server command sent to terminal");
                }
                Err(e) => {
                    tracing::error!("failed to open terminal: {e}");
                    self.inner.set_state(SupervisorState::Idle);
                }
            }
            return;
        }

        match self.inner.backend.launch(command, &self.inner.notifier) {
            Ok(handle) => {
                let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
                let retired = CancellationToken::new();
                if handle.pid().is_some() {
                    watch_exit(
                        Arc::downgrade(&self.inner),
                        handle.exit_marker(),
                        retired.clone(),
                        generation,
                    );
                }
                *session = Session::Process {
                    handle,
                    generation,
                    retired,
                };
                self.inner.set_state(SupervisorState::Running);
            }
            Err(e) => {
                tracing::error!("failed to launch inference server: {e}");
                self.inner.set_state(SupervisorState::Idle);
            }
        }
    }

    /// Stop the live session, if any. Calling this while idle does nothing.
    pub fn terminate(&self) {
        let mut session = lock(&self.inner.session);
        if !self.inner.teardown(&mut session) {
            tracing::debug!("no server session to terminate");
        }
    }
}

impl Inner {
    fn set_state(&self, next: SupervisorState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            tracing::debug!(?prev, ?next, "supervisor state changed");
        }
    }

    /// Tear down the current session. Returns false when there was none.
    fn teardown(&self, session: &mut Session) -> bool {
        match std::mem::replace(session, Session::Idle) {
            Session::Idle => false,
            Session::Terminal(mut terminal) => {
                self.set_state(SupervisorState::Terminating);
                terminal.dispose();
                self.set_state(SupervisorState::Idle);
                true
            }
            Session::Process {
                handle, retired, ..
            } => {
                self.set_state(SupervisorState::Terminating);
                retired.cancel();
                self.backend.terminate(handle);
                self.set_state(SupervisorState::Idle);
                true
            }
        }
    }
}

/// Drop the session once its process exits on its own, unless it has been
/// replaced or torn down in the meantime.
fn watch_exit(
    inner: Weak<Inner>,
    exited: CancellationToken,
    retired: CancellationToken,
    generation: u64,
) {
    tokio::spawn(async move {
        tokio::select! {
            _ = exited.cancelled() => {}
            _ = retired.cancelled() => return,
        }
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let mut session = lock(&inner.session);
        let is_live = matches!(
            &*session,
            Session::Process { generation: live, .. } if *live == generation
        );
        if is_live {
            *session = Session::Idle;
            inner.set_state(SupervisorState::Idle);
            tracing::info!("inference server exited");
        }
    });
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
