use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::config::Config;
use crate::dispatch::infill::{InfillDispatch, RequestPayload};
use crate::dispatch::openai::{
    ChatCompletionRequest, ChatMessage, ChatStream, CompletionRequest, OpenAiClient,
    TextCompletion,
};
use crate::dispatch::{Backend, CompletionResult, ContextChunk, TEMPERATURE, TOP_P, Timings};
use crate::error::InfillError;
use crate::template::{head_chars, replace_placeholders, tail_chars};

/// Adapts editor completion requests to the native `/infill` API or an
/// OpenAI-compatible server, and normalizes the answers into `CompletionResult`.
///
/// FIM operations never fail on misconfiguration or rejected requests: they
/// return `None`. Only transport errors propagate. The chat path is the
/// exception and fails when no remote client is configured.
pub struct CompletionAdapter {
    config: Arc<Config>,
    infill: InfillDispatch,
    openai: Option<OpenAiClient>,
}

impl CompletionAdapter {
    pub fn new(config: Arc<Config>) -> Result<Self, InfillError> {
        let client = crate::dispatch::http_client()?;
        let infill = InfillDispatch::new(client.clone(), &config);
        let openai = OpenAiClient::from_config(client, &config.openai);
        Ok(Self {
            config,
            infill,
            openai,
        })
    }

    pub fn backend(&self) -> Backend {
        Backend::select(&self.config)
    }

    pub fn has_remote_client(&self) -> bool {
        self.openai.is_some()
    }

    pub async fn get_completion(
        &self,
        input_prefix: &str,
        input_suffix: &str,
        prompt: &str,
        chunks: &[ContextChunk],
        n_indent: Option<u32>,
    ) -> Result<Option<CompletionResult>, InfillError> {
        match self.backend() {
            Backend::OpenAiCompatible => {
                self.openai_completion(chunks, input_prefix, input_suffix, prompt)
                    .await
            }
            Backend::NativeInfill => {
                let payload = RequestPayload::completion(
                    &self.config,
                    input_prefix,
                    input_suffix,
                    chunks,
                    prompt,
                    n_indent,
                );
                match self.infill.complete(&payload).await {
                    Ok(result) => Ok(result),
                    Err(InfillError::Rejected { status }) => {
                        tracing::debug!(status, "infill request rejected, no completion");
                        Ok(None)
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    /// Warm the server's prompt cache with the current context chunks.
    ///
    /// Returns None when nothing is sent (OpenAI-compatible backend). Otherwise
    /// the request runs on its own task; dropping the handle is fine.
    pub fn prime_cache(
        &self,
        chunks: &[ContextChunk],
    ) -> Option<JoinHandle<Result<(), InfillError>>> {
        if self.backend() == Backend::OpenAiCompatible {
            return None;
        }

        let payload = RequestPayload::preparation(&self.config, chunks);
        let infill = self.infill.clone();
        Some(tokio::spawn(async move {
            let result = infill.send_and_forget(&payload).await;
            if let Err(ref e) = result {
                tracing::debug!("cache priming failed: {e}");
            }
            result
        }))
    }

    /// Start a streaming chat completion. Fails before any network activity
    /// when no remote client is configured.
    pub async fn get_chat_stream(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[serde_json::Value]>,
        tool_choice: Option<&serde_json::Value>,
    ) -> Result<ChatStream, InfillError> {
        let client = self.openai.as_ref().ok_or_else(|| {
            InfillError::Configuration(
                "no OpenAI-compatible client configured (set OPENAI_BASE_URL)".to_string(),
            )
        })?;

        let request = ChatCompletionRequest {
            model: client.model(),
            messages,
            stream: true,
            temperature: TEMPERATURE,
            top_p: TOP_P,
            tools,
            tool_choice,
        };
        client.create_chat_stream(&request).await
    }

    /// Assemble the prompt sent to the OpenAI-compatible completions endpoint.
    pub fn build_openai_prompt(
        &self,
        chunks: &[ContextChunk],
        input_prefix: &str,
        input_suffix: &str,
        prompt: &str,
    ) -> String {
        let additional_context = if chunks.is_empty() {
            String::new()
        } else {
            let texts: Vec<&str> = chunks.iter().map(ContextChunk::text).collect();
            format!("Context:\n\n{}", texts.join("\n"))
        };

        let values: HashMap<&str, &str> = HashMap::from([
            ("inputPrefix", tail_chars(input_prefix, self.config.n_prefix)),
            ("prompt", prompt),
            ("inputSuffix", head_chars(input_suffix, self.config.n_suffix)),
        ]);

        additional_context + &replace_placeholders(&self.config.openai_prompt_template, &values)
    }

    async fn openai_completion(
        &self,
        chunks: &[ContextChunk],
        input_prefix: &str,
        input_suffix: &str,
        prompt: &str,
    ) -> Result<Option<CompletionResult>, InfillError> {
        let Some(client) = &self.openai else {
            return Ok(None);
        };

        let full_prompt = self.build_openai_prompt(chunks, input_prefix, input_suffix, prompt);
        let request = CompletionRequest {
            model: client.model(),
            prompt: &full_prompt,
            max_tokens: self.config.n_predict,
            temperature: TEMPERATURE,
            top_p: TOP_P,
            stream: false,
        };

        let completion = client.create_completion(&request).await?;
        Ok(Some(normalize_completion(completion)?))
    }
}

/// Map a provider completion onto the llama.cpp result shape. Token counts
/// land in the timing fields; they are counts, not latencies.
fn normalize_completion(completion: TextCompletion) -> Result<CompletionResult, InfillError> {
    let TextCompletion {
        created,
        model,
        choices,
        usage,
    } = completion;

    let choice = choices.into_iter().next().ok_or_else(|| {
        InfillError::SchemaParse("completion response has no choices".to_string())
    })?;

    let mut settings = serde_json::Map::new();
    settings.insert("finish_reason".into(), serde_json::json!(choice.finish_reason));
    settings.insert("model".into(), serde_json::json!(model));
    settings.insert("created".into(), serde_json::json!(created));

    let usage = usage.unwrap_or_default();
    Ok(CompletionResult {
        content: Some(choice.text),
        generation_settings: Some(settings),
        tokens_cached: None,
        truncated: None,
        timings: Some(Timings {
            prompt_ms: usage.prompt_tokens.map(|n| n as f64),
            predicted_ms: usage.completion_tokens.map(|n| n as f64),
            predicted_n: usage.total_tokens.map(|n| n as f64),
            ..Default::default()
        }),
    })
}
