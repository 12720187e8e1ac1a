use reqwest::{Client, StatusCode};
use serde::Serialize;

use crate::config::Config;
use crate::dispatch::{CompletionResult, ContextChunk, TOP_K, TOP_P};
use crate::error::InfillError;

const MAX_RESPONSE_BYTES: usize = 2 * 1024 * 1024; // 2MB

/// Samplers used for a real completion. A preparation request uses none.
const INFILL_SAMPLERS: [&str; 3] = ["top_k", "top_p", "infill"];

/// Body of `POST {endpoint}/infill`.
///
/// Two shapes exist: a completion request carrying the full sampling settings,
/// and a preparation request that only fills the server's prompt cache
/// (`n_predict = 0`, no samplers, `t_max_predict_ms = 1`). `cache_prompt` is
/// always true.
#[derive(Clone, Debug, Serialize)]
pub struct RequestPayload {
    pub input_prefix: String,
    pub input_suffix: String,
    pub input_extra: Vec<ContextChunk>,
    pub prompt: String,
    pub n_predict: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    pub samplers: Vec<String>,
    pub cache_prompt: bool,
    pub t_max_prompt_ms: u32,
    pub t_max_predict_ms: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n_indent: Option<u32>,
}

impl RequestPayload {
    pub fn completion(
        config: &Config,
        input_prefix: &str,
        input_suffix: &str,
        chunks: &[ContextChunk],
        prompt: &str,
        n_indent: Option<u32>,
    ) -> Self {
        Self {
            input_prefix: input_prefix.to_string(),
            input_suffix: input_suffix.to_string(),
            input_extra: chunks.to_vec(),
            prompt: prompt.to_string(),
            n_predict: config.n_predict,
            top_k: Some(TOP_K),
            top_p: Some(TOP_P),
            stream: Some(false),
            samplers: INFILL_SAMPLERS.iter().map(|s| s.to_string()).collect(),
            cache_prompt: true,
            t_max_prompt_ms: config.t_max_prompt_ms,
            t_max_predict_ms: config.t_max_predict_ms,
            n_indent: n_indent.filter(|n| *n != 0),
        }
    }

    pub fn preparation(config: &Config, chunks: &[ContextChunk]) -> Self {
        Self {
            input_prefix: String::new(),
            input_suffix: String::new(),
            input_extra: chunks.to_vec(),
            prompt: String::new(),
            n_predict: 0,
            top_k: None,
            top_p: None,
            stream: None,
            samplers: Vec::new(),
            cache_prompt: true,
            t_max_prompt_ms: config.t_max_prompt_ms,
            t_max_predict_ms: 1,
            n_indent: None,
        }
    }
}

/// Client for the llama.cpp `/infill` route.
#[derive(Clone)]
pub struct InfillDispatch {
    client: Client,
    url: String,
    api_key: Option<String>,
}

impl InfillDispatch {
    pub fn new(client: Client, config: &Config) -> Self {
        Self {
            client,
            url: config.infill_url(),
            api_key: config.api_key.clone(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send a completion payload. Any status other than 200 is returned as
    /// `Rejected`; transport failures as `Request`.
    pub async fn complete(
        &self,
        payload: &RequestPayload,
    ) -> Result<Option<CompletionResult>, InfillError> {
        let response = self.post(payload).await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(InfillError::Rejected {
                status: status.as_u16(),
            });
        }

        let bytes = response.bytes().await?;
        if bytes.len() > MAX_RESPONSE_BYTES {
            tracing::warn!(
                len = bytes.len(),
                max = MAX_RESPONSE_BYTES,
                "infill response too large, discarding"
            );
            return Ok(None);
        }

        match serde_json::from_slice::<CompletionResult>(&bytes) {
            Ok(result) => Ok(Some(result)),
            Err(e) => {
                tracing::warn!("infill response is not a completion result: {e}");
                Ok(None)
            }
        }
    }

    /// Send a payload and ignore whatever comes back. Only transport failures surface.
    pub async fn send_and_forget(&self, payload: &RequestPayload) -> Result<(), InfillError> {
        let response = self.post(payload).await?;
        tracing::debug!(status = %response.status(), "cache priming request finished");
        Ok(())
    }

    async fn post(&self, payload: &RequestPayload) -> Result<reqwest::Response, InfillError> {
        let mut request = self.client.post(&self.url).json(payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        Ok(request.send().await?)
    }
}
