pub mod infill;
pub mod openai;

use std::time::Duration;

use reqwest::Client;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::InfillError;

/// Sampling constants shared by both backends.
pub const TOP_K: u32 = 40;
pub const TOP_P: f64 = 0.99;
pub const TEMPERATURE: f64 = 0.1;

/// Build the HTTP client shared by both backends. Only a connect timeout is set:
/// generation time is bounded server-side by the payload's time budgets.
pub fn http_client() -> Result<Client, InfillError> {
    let client = Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(4)
        .build()?;
    Ok(client)
}

/// A snippet of surrounding code supplied by the context ring. Opaque: forwarded
/// to `/infill` exactly as received, only read as text for the OpenAI prompt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct ContextChunk(pub serde_json::Value);

impl ContextChunk {
    /// Text of the chunk: a string as is, or the `text` field of an object.
    /// Anything else reads as empty.
    pub fn text(&self) -> &str {
        match &self.0 {
            serde_json::Value::String(text) => text,
            value => value.get("text").and_then(|t| t.as_str()).unwrap_or(""),
        }
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }
}

impl From<&str> for ContextChunk {
    fn from(text: &str) -> Self {
        Self(serde_json::Value::String(text.to_string()))
    }
}

impl From<serde_json::Value> for ContextChunk {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

/// Which protocol a completion is sent over. Derived from config on every call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backend {
    NativeInfill,
    OpenAiCompatible,
}

impl Backend {
    pub fn select(config: &Config) -> Self {
        if config.use_openai_endpoint {
            Self::OpenAiCompatible
        } else {
            Self::NativeInfill
        }
    }
}

/// Normalized completion result. Every field is optional; a missing field is not an error.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_settings: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_cached: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncated: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timings: Option<Timings>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Timings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_n: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_per_second: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicted_n: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicted_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicted_per_second: Option<f64>,
}
