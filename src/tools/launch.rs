use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::supervisor::SupervisorState;
use crate::supervisor::backend::Platform;
use crate::supervisor::events::TerminationEvent;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct LaunchRequest {
    /// Shell command that starts the server, e.g. "llama-server --fim-qwen-1.5b-default --port 8012".
    /// Defaults to the configured launch_cmd.
    pub command: Option<String>,
}

impl LaunchRequest {
    /// The explicit command if non-blank, otherwise `fallback`.
    pub fn command_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.command
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or(fallback)
    }
}

#[derive(Debug, Serialize)]
pub struct ServerStatus {
    pub state: SupervisorState,
    pub platform: Platform,
    pub terminal_mode: bool,
    pub last_termination: Option<TerminationEvent>,
}
