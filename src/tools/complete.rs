use schemars::JsonSchema;
use serde::Deserialize;

use crate::dispatch::ContextChunk;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CompleteRequest {
    /// Text before the cursor. Sent in full to /infill; tail-truncated for OpenAI-compatible servers.
    pub input_prefix: String,
    /// Text after the cursor. Sent in full to /infill; head-truncated for OpenAI-compatible servers.
    pub input_suffix: String,
    /// Text of the current line up to the cursor (defaults to empty).
    pub prompt: Option<String>,
    /// Context chunks from other files, usually strings or {text, filename, time} objects. Forwarded untouched.
    pub input_extra: Option<Vec<ContextChunk>>,
    /// Indentation of the current line. Omitted from the request when 0.
    pub n_indent: Option<u32>,
}

impl CompleteRequest {
    pub fn prompt(&self) -> &str {
        self.prompt.as_deref().unwrap_or("")
    }

    pub fn chunks(&self) -> &[ContextChunk] {
        self.input_extra.as_deref().unwrap_or(&[])
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct PrimeCacheRequest {
    /// Context chunks to load into the server's prompt cache.
    pub input_extra: Option<Vec<ContextChunk>>,
}
