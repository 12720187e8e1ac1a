use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfillError {
    /// A path that needs a remote client was called without one configured.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Non-success status from the native infill endpoint. Never leaves the adapter.
    #[error("infill endpoint rejected request with status {status}")]
    Rejected { status: u16 },

    #[error("upstream error from {provider}: {message}")]
    Upstream {
        provider: String,
        message: String,
        status: Option<u16>,
    },

    #[error("schema parse error: {0}")]
    SchemaParse(String),

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("process error: {0}")]
    Process(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),
}

impl InfillError {
    /// Returns true for failures at the network layer (connection refused, reset, timeout).
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Request(_))
    }

    /// Produce a sanitized error message safe for returning to MCP clients.
    /// Does not leak internal URLs or upstream error bodies.
    pub fn user_message(&self) -> String {
        match self {
            Self::Configuration(msg) => msg.clone(),
            Self::Rejected { status } => format!("infill endpoint returned status {status}"),
            Self::Upstream {
                provider, status, ..
            } => match status {
                Some(code) => format!("upstream error from {provider} (status {code})"),
                None => format!("upstream error from {provider}"),
            },
            Self::SchemaParse(_) => "failed to parse server response".to_string(),
            Self::Request(e) if e.is_connect() => {
                "could not connect to the inference server".to_string()
            }
            Self::Request(e) if e.is_timeout() => {
                "request to the inference server timed out".to_string()
            }
            Self::Request(_) => "request to the inference server failed".to_string(),
            Self::Process(msg) => format!("process error: {msg}"),
            Self::Io(e) => format!("io error: {e}"),
            Self::Config(msg) => format!("config error: {msg}"),
        }
    }
}
