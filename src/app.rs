use std::sync::Arc;

use crate::adapter::CompletionAdapter;
use crate::config::Config;
use crate::error::InfillError;
use crate::supervisor::Supervisor;

/// Everything built once at startup and shared by the request surface.
pub struct App {
    pub config: Arc<Config>,
    pub adapter: CompletionAdapter,
    pub supervisor: Supervisor,
}

impl App {
    pub fn new(config: Config) -> Result<Self, InfillError> {
        let config = Arc::new(config);
        let supervisor = Supervisor::new(config.clone());
        Self::with_supervisor(config, supervisor)
    }

    /// Build around a supervisor assembled by the caller (custom backend or terminal host).
    pub fn with_supervisor(
        config: Arc<Config>,
        supervisor: Supervisor,
    ) -> Result<Self, InfillError> {
        let adapter = CompletionAdapter::new(config.clone())?;
        Ok(Self {
            config,
            adapter,
            supervisor,
        })
    }
}
