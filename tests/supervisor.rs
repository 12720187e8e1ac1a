//! Supervisor lifecycle against fake platform backends and terminal hosts.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use infill::config::Config;
use infill::error::InfillError;
use infill::supervisor::backend::{Platform, ProcessBackend, ProcessHandle};
use infill::supervisor::events::{TerminationEvent, TerminationNotifier};
use infill::supervisor::terminal::{TERMINAL_NAME, TerminalHost, TerminalSession};
use infill::supervisor::{Supervisor, SupervisorState};
use tokio_util::sync::CancellationToken;

#[derive(Clone, Debug, PartialEq, Eq)]
enum Call {
    Launch(String),
    Terminate(Option<u32>),
    Open(String),
    Show(bool),
    Send(String),
    Dispose,
}

type Log = Arc<Mutex<Vec<Call>>>;

fn calls(log: &Log) -> Vec<Call> {
    log.lock().unwrap().clone()
}

/// Records calls and hands out handles whose exit markers the test controls.
struct FakeBackend {
    log: Log,
    next_pid: Mutex<u32>,
    exit_markers: Arc<Mutex<Vec<CancellationToken>>>,
    fail: bool,
}

impl FakeBackend {
    fn new(log: Log) -> Self {
        Self {
            log,
            next_pid: Mutex::new(100),
            exit_markers: Arc::default(),
            fail: false,
        }
    }
}

impl ProcessBackend for FakeBackend {
    fn platform(&self) -> Platform {
        Platform::Linux
    }

    fn launch(
        &self,
        command: &str,
        _notifier: &TerminationNotifier,
    ) -> Result<ProcessHandle, InfillError> {
        self.log.lock().unwrap().push(Call::Launch(command.to_string()));
        if self.fail {
            return Err(InfillError::Process("no such terminal".to_string()));
        }
        let mut pid = self.next_pid.lock().unwrap();
        *pid += 1;
        let handle = ProcessHandle::new(Platform::Linux, Some(*pid));
        self.exit_markers.lock().unwrap().push(handle.exit_marker());
        Ok(handle)
    }

    fn terminate(&self, handle: ProcessHandle) {
        self.log.lock().unwrap().push(Call::Terminate(handle.pid()));
    }
}

struct FakeTerminals {
    log: Log,
}

struct FakeTerminal {
    log: Log,
}

impl TerminalHost for FakeTerminals {
    fn open(&self, name: &str) -> Result<Box<dyn TerminalSession>, InfillError> {
        self.log.lock().unwrap().push(Call::Open(name.to_string()));
        Ok(Box::new(FakeTerminal {
            log: self.log.clone(),
        }))
    }
}

impl TerminalSession for FakeTerminal {
    fn show(&mut self, preserve_focus: bool) {
        self.log.lock().unwrap().push(Call::Show(preserve_focus));
    }

    fn send_text(&mut self, text: &str) {
        self.log.lock().unwrap().push(Call::Send(text.to_string()));
    }

    fn dispose(&mut self) {
        self.log.lock().unwrap().push(Call::Dispose);
    }
}

fn process_config() -> Arc<Config> {
    Arc::new(Config {
        use_terminal: false,
        launch_cmd: "llama-server --port 8012".to_string(),
        ..Default::default()
    })
}

fn supervisor_with(config: Arc<Config>, backend: FakeBackend, log: &Log) -> Supervisor {
    Supervisor::with_parts(
        config,
        Box::new(backend),
        Box::new(FakeTerminals { log: log.clone() }),
    )
}

#[tokio::test]
async fn blank_command_is_a_no_op() {
    let log = Log::default();
    let supervisor = supervisor_with(process_config(), FakeBackend::new(log.clone()), &log);

    supervisor.launch("");
    supervisor.launch("   \n");

    assert!(calls(&log).is_empty());
    assert_eq!(supervisor.state(), SupervisorState::Idle);
}

#[tokio::test]
async fn terminate_is_idempotent() {
    let log = Log::default();
    let supervisor = supervisor_with(process_config(), FakeBackend::new(log.clone()), &log);

    supervisor.terminate();
    supervisor.launch_configured();
    assert_eq!(supervisor.state(), SupervisorState::Running);

    supervisor.terminate();
    supervisor.terminate();

    assert_eq!(
        calls(&log),
        vec![
            Call::Launch("llama-server --port 8012".to_string()),
            Call::Terminate(Some(101)),
        ]
    );
    assert_eq!(supervisor.state(), SupervisorState::Idle);
}

#[tokio::test]
async fn relaunch_tears_down_previous_process_first() {
    let log = Log::default();
    let supervisor = supervisor_with(process_config(), FakeBackend::new(log.clone()), &log);

    supervisor.launch("llama-server -m a.gguf");
    supervisor.launch("llama-server -m b.gguf");

    assert_eq!(
        calls(&log),
        vec![
            Call::Launch("llama-server -m a.gguf".to_string()),
            Call::Terminate(Some(101)),
            Call::Launch("llama-server -m b.gguf".to_string()),
        ]
    );
    assert_eq!(supervisor.state(), SupervisorState::Running);
}

#[tokio::test]
async fn launch_failure_returns_to_idle() {
    let log = Log::default();
    let mut backend = FakeBackend::new(log.clone());
    backend.fail = true;
    let supervisor = supervisor_with(process_config(), backend, &log);

    supervisor.launch_configured();
    assert_eq!(supervisor.state(), SupervisorState::Idle);

    supervisor.terminate();
    assert_eq!(calls(&log).len(), 1, "nothing to terminate after a failed launch");
}

#[tokio::test]
async fn self_exit_clears_the_session() {
    let log = Log::default();
    let backend = FakeBackend::new(log.clone());
    let markers = backend.exit_markers.clone();
    let supervisor = supervisor_with(process_config(), backend, &log);
    let mut state = supervisor.watch_state();

    supervisor.launch_configured();
    assert_eq!(*state.borrow_and_update(), SupervisorState::Running);

    markers.lock().unwrap()[0].cancel();
    tokio::time::timeout(Duration::from_secs(2), state.changed())
        .await
        .expect("state should change after exit")
        .unwrap();
    assert_eq!(*state.borrow(), SupervisorState::Idle);

    supervisor.terminate();
    assert_eq!(
        calls(&log),
        vec![Call::Launch("llama-server --port 8012".to_string())],
        "an exited process is not terminated again"
    );
}

#[tokio::test]
async fn stale_exit_does_not_clear_a_newer_session() {
    let log = Log::default();
    let backend = FakeBackend::new(log.clone());
    let markers = backend.exit_markers.clone();
    let supervisor = supervisor_with(process_config(), backend, &log);

    supervisor.launch("first");
    supervisor.launch("second");
    markers.lock().unwrap()[0].cancel();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(supervisor.state(), SupervisorState::Running);
    supervisor.terminate();
    assert_eq!(calls(&log).last(), Some(&Call::Terminate(Some(102))));
}

#[tokio::test]
async fn terminal_mode_sends_command_to_named_terminal() {
    let log = Log::default();
    let config = Arc::new(Config {
        use_terminal: true,
        launch_cmd: "llama-server --fim-qwen-1.5b-default".to_string(),
        ..Default::default()
    });
    let supervisor = supervisor_with(config, FakeBackend::new(log.clone()), &log);

    supervisor.launch_configured();
    assert_eq!(supervisor.state(), SupervisorState::Running);
    supervisor.launch("llama-server --port 9000");
    supervisor.terminate();

    assert_eq!(
        calls(&log),
        vec![
            Call::Open(TERMINAL_NAME.to_string()),
            Call::Show(true),
            Call::Send("llama-server --fim-qwen-1.5b-default".to_string()),
            Call::Dispose,
            Call::Open(TERMINAL_NAME.to_string()),
            Call::Show(true),
            Call::Send("llama-server --port 9000".to_string()),
            Call::Dispose,
        ]
    );
    assert_eq!(supervisor.state(), SupervisorState::Idle);
}

#[tokio::test]
async fn listeners_see_events_in_registration_order() {
    let log = Log::default();
    let supervisor = supervisor_with(process_config(), FakeBackend::new(log.clone()), &log);
    let seen = Arc::new(Mutex::new(Vec::new()));
    for name in ["status", "panel"] {
        let seen = seen.clone();
        supervisor.on_terminate(move |e| seen.lock().unwrap().push((name, e.exit_code)));
    }

    let event = TerminationEvent {
        exit_code: 3,
        stderr: "error: model file not found".to_string(),
    };
    supervisor.notifier().emit(event.clone());

    assert_eq!(*seen.lock().unwrap(), vec![("status", 3), ("panel", 3)]);
    assert_eq!(supervisor.last_termination(), Some(event));
}

#[cfg(unix)]
mod captured_shell {
    use super::*;
    use infill::supervisor::windows::WindowsBackend;

    fn shell_supervisor() -> Supervisor {
        Supervisor::with_parts(
            process_config(),
            Box::new(WindowsBackend::with_shell("sh", &["-c"])),
            Box::new(FakeTerminals {
                log: Log::default(),
            }),
        )
    }

    #[tokio::test]
    async fn exit_event_carries_code_and_stderr() {
        let supervisor = shell_supervisor();
        let mut events = supervisor.notifier().subscribe();

        supervisor.launch("echo 'error: failed to load model' >&2; exit 3");

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("termination event within timeout")
            .unwrap();
        assert_eq!(event.exit_code, 3);
        assert_eq!(event.stderr, "error: failed to load model\n");
        assert_eq!(supervisor.last_termination(), Some(event));
    }

    #[tokio::test]
    async fn exit_is_recorded_before_state_turns_idle() {
        let supervisor = shell_supervisor();
        let mut state = supervisor.watch_state();

        supervisor.launch("exit 4");
        assert_eq!(*state.borrow_and_update(), SupervisorState::Running);

        tokio::time::timeout(
            Duration::from_secs(5),
            state.wait_for(|s| *s == SupervisorState::Idle),
        )
        .await
        .expect("state should return to idle after exit")
        .unwrap();

        let event = supervisor
            .last_termination()
            .expect("termination recorded by the time the state is idle");
        assert_eq!(event.exit_code, 4);
    }

    #[tokio::test]
    async fn stderr_buffer_resets_between_runs() {
        let supervisor = shell_supervisor();
        let mut events = supervisor.notifier().subscribe();

        supervisor.launch("echo first >&2; exit 1");
        let first = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();

        supervisor.launch("exit 0");
        let second = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(first.stderr, "first\n");
        assert_eq!(second.exit_code, 0);
        assert_eq!(second.stderr, "");
    }
}
