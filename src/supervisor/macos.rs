use std::process::Stdio;

use tokio::process::Command;

use crate::error::InfillError;
use crate::supervisor::backend::{Platform, ProcessBackend, ProcessHandle};
use crate::supervisor::events::TerminationNotifier;

/// Custom title given to the Terminal tab so it can be found again on teardown.
pub const TERMINAL_TAB_TITLE: &str = "llama.vscode-llama.cpp-server";

/// Opens a Terminal.app tab through AppleScript. There is no child process to
/// track, so no termination events are produced; teardown closes the tagged tab.
#[derive(Default)]
pub struct MacBackend;

impl ProcessBackend for MacBackend {
    fn platform(&self) -> Platform {
        Platform::MacOs
    }

    fn launch(
        &self,
        command: &str,
        _notifier: &TerminationNotifier,
    ) -> Result<ProcessHandle, InfillError> {
        let script = start_script(command);
        tokio::spawn(async move {
            run_osascript(&script, "launching Terminal").await;
        });
        Ok(ProcessHandle::new(Platform::MacOs, None))
    }

    fn terminate(&self, _handle: ProcessHandle) {
        tokio::spawn(async move {
            run_osascript(&close_script(), "closing Terminal tab").await;
        });
    }
}

/// Escape text for use inside an AppleScript string literal.
fn applescript_quote(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

pub fn start_script(command: &str) -> String {
    let command = applescript_quote(&format!("echo 'Running command'; {command}"));
    format!(
        r#"tell application "Terminal"
    activate
    set newTab to do script "{command}"
    delay 0.5
    set custom title of newTab to "{TERMINAL_TAB_TITLE}"
end tell"#
    )
}

pub fn close_script() -> String {
    format!(
        r#"tell application "Terminal"
    set winList to every window
    repeat with w in winList
        set tabList to tabs of w
        repeat with t in tabList
            try
                if custom title of t is equal to "{TERMINAL_TAB_TITLE}" then
                    close t
                    exit repeat
                end if
            end try
        end repeat
    end repeat
end tell"#
    )
}

async fn run_osascript(script: &str, action: &str) {
    let result = Command::new("osascript")
        .arg("-e")
        .arg(script)
        .stdin(Stdio::null())
        .output()
        .await;
    match result {
        Ok(output) if output.status.success() => tracing::debug!("{action}: done"),
        Ok(output) => tracing::error!(
            stderr = %String::from_utf8_lossy(&output.stderr),
            "error {action}"
        ),
        Err(e) => tracing::error!("error {action}: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_script_tags_the_tab_and_escapes_quotes() {
        let script = start_script(r#"llama-server --alias "fim" -m C:\models"#);
        assert!(script.contains(r#"--alias \"fim\""#));
        assert!(script.contains(r"C:\\models"));
        assert!(script.contains(&format!(r#"set custom title of newTab to "{TERMINAL_TAB_TITLE}""#)));
    }

    #[test]
    fn close_script_matches_on_tag() {
        let script = close_script();
        assert!(script.contains(&format!(r#"is equal to "{TERMINAL_TAB_TITLE}""#)));
        assert!(script.contains("close t"));
    }
}
