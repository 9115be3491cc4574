//! Normalized responses and streamed chunks

use serde::{Deserialize, Serialize};

use super::message::{Role, UnifiedMessage};

/// Why the model stopped producing output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
}

impl FinishReason {
    /// Map any backend-native finish/stop reason. Unknown values map to `Stop`.
    pub fn from_native(reason: &str) -> Self {
        match reason.to_ascii_lowercase().as_str() {
            "stop" | "end_turn" | "stop_sequence" | "finish_reason_unspecified" => {
                FinishReason::Stop
            }
            "length" | "max_tokens" | "model_length" => FinishReason::Length,
            "tool_calls" | "tool_use" | "function_call" => FinishReason::ToolCalls,
            "content_filter" | "safety" | "recitation" | "blocklist" | "prohibited_content"
            | "spii" | "refusal" => FinishReason::ContentFilter,
            _ => FinishReason::Stop,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::ToolCalls => "tool_calls",
            FinishReason::ContentFilter => "content_filter",
        }
    }
}

/// Token usage statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub message: UnifiedMessage,
    pub finish_reason: FinishReason,
}

/// Single-shot completion result (`chat.completion`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedResponse {
    pub id: String,
    #[serde(default = "completion_object")]
    pub object: String,
    #[serde(rename = "created")]
    pub created_at: u64,
    pub model: String,
    pub choices: Vec<Choice>,
    pub usage: Usage,
}

fn completion_object() -> String {
    "chat.completion".to_string()
}

impl UnifiedResponse {
    pub fn first_message(&self) -> Option<&UnifiedMessage> {
        self.choices.first().map(|c| &c.message)
    }

    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.choices.first().map(|c| c.finish_reason)
    }
}

/// Incremental tool call fragment inside a streamed delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireToolCallDelta", into = "WireToolCallDelta")]
pub struct ToolCallDelta {
    pub index: u32,
    pub id: Option<String>,
    pub tool_name: Option<String>,
    pub arguments: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct WireToolCallDelta {
    index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
    #[serde(default)]
    function: WireFunctionDelta,
}

#[derive(Default, Serialize, Deserialize)]
struct WireFunctionDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    arguments: Option<String>,
}

impl From<WireToolCallDelta> for ToolCallDelta {
    fn from(w: WireToolCallDelta) -> Self {
        ToolCallDelta {
            index: w.index,
            id: w.id,
            tool_name: w.function.name,
            arguments: w.function.arguments,
        }
    }
}

impl From<ToolCallDelta> for WireToolCallDelta {
    fn from(d: ToolCallDelta) -> Self {
        WireToolCallDelta {
            index: d.index,
            kind: d.id.as_ref().map(|_| "function".to_string()),
            id: d.id,
            function: WireFunctionDelta {
                name: d.tool_name,
                arguments: d.arguments,
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallDelta>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: MessageDelta,
    pub finish_reason: Option<FinishReason>,
}

/// Streamed fragment (`chat.completion.chunk`). Only the terminal chunk carries
/// a finish reason and usage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedChunk {
    pub id: String,
    #[serde(default = "chunk_object")]
    pub object: String,
    #[serde(rename = "created")]
    pub created_at: u64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

fn chunk_object() -> String {
    "chat.completion.chunk".to_string()
}

impl UnifiedChunk {
    pub fn new(id: impl Into<String>, created_at: u64, model: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            object: chunk_object(),
            created_at,
            model: model.into(),
            choices: Vec::new(),
            usage: None,
        }
    }

    pub fn with_delta(mut self, delta: MessageDelta) -> Self {
        self.choices.push(ChunkChoice {
            index: 0,
            delta,
            finish_reason: None,
        });
        self
    }

    pub fn terminal(mut self, finish_reason: FinishReason, usage: Usage) -> Self {
        self.choices.push(ChunkChoice {
            index: 0,
            delta: MessageDelta::default(),
            finish_reason: Some(finish_reason),
        });
        self.usage = Some(usage);
        self
    }

    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.choices.first().and_then(|c| c.finish_reason)
    }

    pub fn content(&self) -> Option<&str> {
        self.choices.first().and_then(|c| c.delta.content.as_deref())
    }
}

pub(crate) fn new_completion_id() -> String {
    format!("chatcmpl-{}", uuid::Uuid::new_v4().simple())
}

pub(crate) fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
