use std::pin::Pin;

use eventsource_stream::{EventStreamError, Eventsource};
use futures_util::stream::{self, Stream, StreamExt};
use reqwest::Client;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::OpenAiConfig;
use crate::error::InfillError;

const PROVIDER: &str = "openai";

/// Cap on error bodies read from the server.
const MAX_ERROR_BODY_BYTES: usize = 64 * 1024;

/// Live stream of chat increments. Ends on `[DONE]`, on EOF, or after the first error.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<ChatDelta, InfillError>> + Send>>;

#[derive(Debug, Serialize)]
pub struct CompletionRequest<'a> {
    pub model: &'a str,
    pub prompt: &'a str,
    pub max_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,
    pub stream: bool,
}

#[derive(Debug, Deserialize)]
pub struct TextCompletion {
    #[serde(default)]
    pub created: Option<i64>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub choices: Vec<TextChoice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
pub struct TextChoice {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: Option<u64>,
    #[serde(default)]
    pub completion_tokens: Option<u64>,
    #[serde(default)]
    pub total_tokens: Option<u64>,
}

/// One chat message in OpenAI wire format.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ChatMessage {
    /// "system", "user", "assistant" or "tool".
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    pub fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.to_string()),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
    pub stream: bool,
    pub temperature: f64,
    pub top_p: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<&'a [serde_json::Value]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<&'a serde_json::Value>,
}

/// One streamed increment of a chat completion.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChatDelta {
    pub content: Option<String>,
    pub reasoning_content: Option<String>,
    pub tool_calls: Option<Vec<serde_json::Value>>,
    pub finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<Delta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<serde_json::Value>>,
}

/// Minimal client for an OpenAI-compatible server: text completions and
/// streaming chat completions, nothing else.
#[derive(Clone)]
pub struct OpenAiClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl OpenAiClient {
    /// Returns None when no base URL is configured.
    pub fn from_config(client: Client, config: &OpenAiConfig) -> Option<Self> {
        let base_url = config.base_url.as_deref()?.trim();
        if base_url.is_empty() {
            return None;
        }
        Some(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn completions_url(&self) -> String {
        format!("{}/completions", self.base_url)
    }

    pub fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    pub async fn create_completion(
        &self,
        req: &CompletionRequest<'_>,
    ) -> Result<TextCompletion, InfillError> {
        let response = self.post(&self.completions_url(), req).await?;
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| InfillError::SchemaParse(format!("failed to parse completion: {e}")))
    }

    pub async fn create_chat_stream(
        &self,
        req: &ChatCompletionRequest<'_>,
    ) -> Result<ChatStream, InfillError> {
        let response = self.post(&self.chat_completions_url(), req).await?;
        let events = Box::pin(response.bytes_stream().eventsource());

        let deltas = stream::unfold(Some(events), |state| async move {
            let mut events = state?;
            loop {
                match events.next().await {
                    None => return None,
                    Some(Ok(event)) => {
                        let data = event.data.trim();
                        if data == "[DONE]" {
                            return None;
                        }
                        if data.is_empty() {
                            continue;
                        }
                        if let Some(delta) = parse_chunk(data) {
                            return Some((Ok(delta), Some(events)));
                        }
                    }
                    Some(Err(EventStreamError::Transport(e))) => {
                        return Some((Err(InfillError::Request(e)), None));
                    }
                    Some(Err(e)) => {
                        return Some((
                            Err(InfillError::SchemaParse(format!("malformed event stream: {e}"))),
                            None,
                        ));
                    }
                }
            }
        });

        Ok(Box::pin(deltas))
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
    ) -> Result<reqwest::Response, InfillError> {
        let mut request = self.client.post(url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_bytes = response.bytes().await.unwrap_or_default();
            let truncated = &error_bytes[..error_bytes.len().min(MAX_ERROR_BODY_BYTES)];
            let text = String::from_utf8_lossy(truncated);
            return Err(InfillError::Upstream {
                provider: PROVIDER.to_string(),
                message: format!("{status}: {text}"),
                status: Some(status.as_u16()),
            });
        }
        Ok(response)
    }
}

/// Parse one SSE data payload. Returns None for chunks without choices
/// (e.g. trailing usage chunks) and for payloads that are not JSON.
fn parse_chunk(data: &str) -> Option<ChatDelta> {
    let chunk: ChatChunk = match serde_json::from_str(data) {
        Ok(c) => c,
        Err(e) => {
            tracing::debug!("skipping unparseable stream event: {e}");
            return None;
        }
    };
    let choice = chunk.choices.into_iter().next()?;
    let delta = choice.delta.unwrap_or_default();
    Some(ChatDelta {
        content: delta.content,
        reasoning_content: delta.reasoning_content,
        tool_calls: delta.tool_calls,
        finish_reason: choice.finish_reason,
    })
}
