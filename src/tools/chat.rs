use futures_util::StreamExt;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::dispatch::openai::{ChatMessage, ChatStream};
use crate::error::InfillError;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ChatRequest {
    /// Conversation so far, in OpenAI chat format.
    pub messages: Vec<ChatMessage>,
    /// OpenAI tool definitions, forwarded untouched.
    pub tools: Option<Vec<serde_json::Value>>,
    /// OpenAI tool_choice value, forwarded untouched.
    pub tool_choice: Option<serde_json::Value>,
}

/// A chat stream consumed to the end.
#[derive(Debug, Default, PartialEq, Serialize)]
pub struct ChatTranscript {
    pub content: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub reasoning_content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<serde_json::Value>,
    pub finish_reason: Option<String>,
}

/// Drain `stream`, concatenating text and merging tool-call fragments by index.
pub async fn collect_stream(mut stream: ChatStream) -> Result<ChatTranscript, InfillError> {
    let mut transcript = ChatTranscript::default();
    while let Some(delta) = stream.next().await {
        let delta = delta?;
        if let Some(text) = delta.content {
            transcript.content.push_str(&text);
        }
        if let Some(text) = delta.reasoning_content {
            transcript.reasoning_content.push_str(&text);
        }
        for fragment in delta.tool_calls.unwrap_or_default() {
            merge_tool_call(&mut transcript.tool_calls, fragment);
        }
        if delta.finish_reason.is_some() {
            transcript.finish_reason = delta.finish_reason;
        }
    }
    Ok(transcript)
}

/// Streamed tool calls arrive as fragments sharing an `index`; `id`, `type`
/// and the function name come once, `function.arguments` arrives in pieces.
fn merge_tool_call(calls: &mut Vec<serde_json::Value>, fragment: serde_json::Value) {
    let index = fragment.get("index").and_then(|i| i.as_u64());
    let existing = index.and_then(|idx| {
        calls
            .iter_mut()
            .find(|c| c.get("index").and_then(|i| i.as_u64()) == Some(idx))
    });

    let Some(call) = existing else {
        calls.push(fragment);
        return;
    };

    for key in ["id", "type"] {
        if let Some(v) = fragment.get(key).filter(|v| !v.is_null()) {
            call[key] = v.clone();
        }
    }
    if let Some(name) = fragment.pointer("/function/name").filter(|v| !v.is_null()) {
        call["function"]["name"] = name.clone();
    }
    if let Some(piece) = fragment.pointer("/function/arguments").and_then(|v| v.as_str()) {
        let mut args = call
            .pointer("/function/arguments")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        args.push_str(piece);
        call["function"]["arguments"] = serde_json::Value::String(args);
    }
}
