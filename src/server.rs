use std::sync::Arc;
use std::time::Instant;

use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, Implementation, ServerCapabilities, ServerInfo};
use rmcp::{ErrorData as McpError, ServerHandler, tool, tool_handler, tool_router};

use crate::app::App;
use crate::dispatch::Backend;
use crate::response::{ToolMetadata, ToolResponse};
use crate::tools::chat::{ChatRequest, collect_stream};
use crate::tools::complete::{CompleteRequest, PrimeCacheRequest};
use crate::tools::launch::{LaunchRequest, ServerStatus};

#[derive(Clone)]
pub struct InfillServer {
    app: Arc<App>,
    tool_router: ToolRouter<Self>,
}

fn backend_name(backend: Backend) -> &'static str {
    match backend {
        Backend::NativeInfill => "infill",
        Backend::OpenAiCompatible => "openai",
    }
}

#[tool_router]
impl InfillServer {
    pub fn new(app: Arc<App>) -> Self {
        Self {
            app,
            tool_router: Self::tool_router(),
        }
    }

    pub fn app(&self) -> &App {
        &self.app
    }

    #[tool(
        name = "complete",
        description = "Fill-in-the-middle completion at the cursor. Returns the server's completion result as JSON, or status \"no_completion\" when the server had nothing to offer. A native server answer that is not valid JSON or exceeds 2MB is also reported as \"no_completion\".",
        annotations(read_only_hint = true)
    )]
    async fn complete(
        &self,
        Parameters(req): Parameters<CompleteRequest>,
    ) -> Result<CallToolResult, McpError> {
        let start = Instant::now();
        let backend = backend_name(self.app.adapter.backend());

        let result = self
            .app
            .adapter
            .get_completion(
                &req.input_prefix,
                &req.input_suffix,
                req.prompt(),
                req.chunks(),
                req.n_indent,
            )
            .await;

        let metadata = ToolMetadata::new("complete", backend, start.elapsed().as_secs_f64());
        let response = match result {
            Ok(Some(completion)) => ToolResponse::json(&completion, metadata),
            Ok(None) => ToolResponse::no_completion(metadata),
            Err(e) => {
                tracing::warn!("completion failed: {e}");
                ToolResponse::error(e.user_message(), metadata)
            }
        };

        Ok(response.into_call_tool_result())
    }

    #[tool(
        name = "prime_cache",
        description = "Load context chunks into the server's prompt cache ahead of the next completion. Returns immediately; does nothing for OpenAI-compatible servers."
    )]
    async fn prime_cache(
        &self,
        Parameters(req): Parameters<PrimeCacheRequest>,
    ) -> Result<CallToolResult, McpError> {
        let backend = backend_name(self.app.adapter.backend());
        let chunks = req.input_extra.unwrap_or_default();

        let content = match self.app.adapter.prime_cache(&chunks) {
            Some(_task) => format!("priming request sent with {} chunks", chunks.len()),
            None => "skipped: backend has no prompt cache priming".to_string(),
        };

        let response =
            ToolResponse::success(content, ToolMetadata::new("prime_cache", backend, 0.0));
        Ok(response.into_call_tool_result())
    }

    #[tool(
        name = "chat",
        description = "Chat with the configured OpenAI-compatible model. Tools and tool_choice are forwarded untouched. Returns the streamed answer as one JSON transcript.",
        annotations(read_only_hint = true)
    )]
    async fn chat(
        &self,
        Parameters(req): Parameters<ChatRequest>,
    ) -> Result<CallToolResult, McpError> {
        if req.messages.is_empty() {
            return Err(McpError::invalid_params("messages must not be empty", None));
        }
        let start = Instant::now();

        let result = match self
            .app
            .adapter
            .get_chat_stream(&req.messages, req.tools.as_deref(), req.tool_choice.as_ref())
            .await
        {
            Ok(stream) => collect_stream(stream).await,
            Err(e) => Err(e),
        };

        let metadata = ToolMetadata::new("chat", "openai", start.elapsed().as_secs_f64());
        let response = match result {
            Ok(transcript) => ToolResponse::json(&transcript, metadata),
            Err(e) => {
                tracing::warn!("chat failed: {e}");
                ToolResponse::error(e.user_message(), metadata)
            }
        };

        Ok(response.into_call_tool_result())
    }

    #[tool(
        name = "launch_server",
        description = "Start the local inference server, stopping any server started earlier. Uses the configured launch command when `command` is omitted."
    )]
    async fn launch_server(
        &self,
        Parameters(req): Parameters<LaunchRequest>,
    ) -> Result<CallToolResult, McpError> {
        let command = req.command_or(&self.app.config.launch_cmd).to_string();
        let metadata = ToolMetadata::new("launch_server", "none", 0.0);

        if command.trim().is_empty() {
            let response =
                ToolResponse::error("no launch command given or configured".to_string(), metadata);
            return Ok(response.into_call_tool_result());
        }

        self.app.supervisor.launch(&command);
        let response = ToolResponse::json(&self.status(), metadata);
        Ok(response.into_call_tool_result())
    }

    #[tool(
        name = "stop_server",
        description = "Stop the inference server started by launch_server. Does nothing if none is running."
    )]
    async fn stop_server(&self) -> Result<CallToolResult, McpError> {
        self.app.supervisor.terminate();
        let response = ToolResponse::json(
            &self.status(),
            ToolMetadata::new("stop_server", "none", 0.0),
        );
        Ok(response.into_call_tool_result())
    }

    #[tool(
        name = "server_status",
        description = "Report whether an inference server is running and how the last one exited.",
        annotations(read_only_hint = true)
    )]
    async fn server_status(&self) -> Result<CallToolResult, McpError> {
        let response = ToolResponse::json(
            &self.status(),
            ToolMetadata::new("server_status", "none", 0.0),
        );
        Ok(response.into_call_tool_result())
    }

    fn status(&self) -> ServerStatus {
        let supervisor = &self.app.supervisor;
        ServerStatus {
            state: supervisor.state(),
            platform: supervisor.platform(),
            terminal_mode: self.app.config.use_terminal,
            last_termination: supervisor.last_termination(),
        }
    }
}

#[tool_handler]
impl ServerHandler for InfillServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "infill".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            },
            instructions: Some(
                "infill: code completion against a llama.cpp or OpenAI-compatible server.\n\n\
                 - `complete` on each edit with prefix/suffix around the cursor; discard stale answers.\n\
                 - `prime_cache` with fresh context chunks between edits (fire-and-forget).\n\
                 - `chat` for conversational requests (needs an OpenAI-compatible server).\n\
                 - `launch_server` / `stop_server` / `server_status` manage a local llama-server."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
