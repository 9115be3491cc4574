//! 后端驱动抽象层：统一请求/响应与各后端原生协议之间的双向转换
//!
//! Backend driver abstraction. A driver is pure translation: it turns a
//! [`UnifiedRequest`] into a backend-native body, and backend responses or
//! stream events back into unified pieces. It never performs I/O; the
//! [`crate::client::BackendClient`] adapters do that.
//!
//! | Backend | Driver | Wire protocol |
//! |---------|--------|---------------|
//! | `openai` | [`OpenAiDriver`] | Chat Completions |
//! | `openrouter` | [`OpenAiDriver`] | Chat Completions + `provider` routing preferences |
//! | `anthropic` | [`AnthropicDriver`] | Messages API |
//! | `vertex` | [`GeminiDriver`] | Gemini `generateContent` |

pub mod anthropic;
pub mod gemini;

use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

use crate::routing::{BackendKind, ModelCapabilities, ModelDescriptor};
use crate::structured::{JsonMode, SchemaNode};
use crate::types::{
    FinishReason, MessageContent, Role, ToolCall, UnifiedMessage, UnifiedRequest, Usage,
};
use crate::{Error, Result};

pub use anthropic::AnthropicDriver;
pub use gemini::GeminiDriver;

/// Backend-native chat body, translated once and reused for every candidate model.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatPayload {
    pub backend: BackendKind,
    /// Body without the model id and stream flag.
    pub body: Value,
}

/// A fully-formed call, minus base URL and credentials.
#[derive(Debug, Clone, PartialEq)]
pub struct DriverRequest {
    /// Path relative to the backend base URL, including any query string.
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Value,
    pub stream: bool,
}

/// A parsed single-shot completion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackendResult {
    pub id: Option<String>,
    pub model: Option<String>,
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: Option<FinishReason>,
    pub usage: Option<Usage>,
}

/// One unit of streamed output, normalized across backends.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    ContentDelta(String),
    ToolCallDelta {
        index: u32,
        id: Option<String>,
        name: Option<String>,
        arguments: Option<String>,
    },
    Finish(FinishReason),
    Usage(Usage),
}

/// Per-stream scratch state owned by the stream adapter and threaded through
/// [`BackendDriver::parse_stream_event`].
#[derive(Debug, Default)]
pub struct StreamState {
    tool_slots: HashMap<u64, u32>,
    next_tool: u32,
    pub prompt_tokens: u64,
    pub saw_tool_call: bool,
}

impl StreamState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stable output index for a backend-side block index.
    pub fn tool_slot(&mut self, backend_index: u64) -> u32 {
        if let Some(slot) = self.tool_slots.get(&backend_index) {
            return *slot;
        }
        let slot = self.next_slot();
        self.tool_slots.insert(backend_index, slot);
        slot
    }

    pub fn existing_tool_slot(&self, backend_index: u64) -> Option<u32> {
        self.tool_slots.get(&backend_index).copied()
    }

    /// Allocate a fresh output index.
    pub fn next_slot(&mut self) -> u32 {
        let slot = self.next_tool;
        self.next_tool += 1;
        self.saw_tool_call = true;
        slot
    }
}

/// Backend-neutral embedding call parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingPayload {
    pub inputs: Vec<String>,
    /// Already filtered against the model's capabilities.
    pub dimensions: Option<u32>,
    pub user: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmbeddingResult {
    /// (input index, vector)
    pub vectors: Vec<(usize, Vec<f32>)>,
    pub model: Option<String>,
    pub prompt_tokens: u64,
    pub total_tokens: u64,
}

/// Translation contract every backend implements.
pub trait BackendDriver: Send + Sync + fmt::Debug {
    fn kind(&self) -> BackendKind;

    /// Translate messages, tools, tool choice, and response format.
    fn build_chat_payload(
        &self,
        req: &UnifiedRequest,
        target: &ModelDescriptor,
    ) -> Result<ChatPayload>;

    /// Bind a translated payload to one candidate model.
    fn chat_request(&self, payload: &ChatPayload, model: &str, stream: bool) -> DriverRequest;

    fn parse_chat_response(&self, body: &Value) -> Result<BackendResult>;

    /// Parse one SSE `data:` payload. May yield zero or more events.
    fn parse_stream_event(&self, data: &str, state: &mut StreamState)
        -> Result<Vec<BackendEvent>>;

    fn embedding_request(&self, payload: &EmbeddingPayload, model: &str) -> Result<DriverRequest>;

    fn parse_embedding_response(&self, body: &Value) -> Result<EmbeddingResult>;
}

/// Driver for a backend kind.
pub fn create_driver(kind: BackendKind) -> Arc<dyn BackendDriver> {
    match kind {
        BackendKind::OpenAi | BackendKind::OpenRouter => Arc::new(OpenAiDriver::new(kind)),
        BackendKind::Anthropic => Arc::new(AnthropicDriver::new()),
        BackendKind::Vertex => Arc::new(GeminiDriver::new()),
    }
}

/// Shared pre-pass over the conversation:
/// - `function` messages are dropped
/// - image parts are flattened away when the model has no vision
/// - assistant turns with tool calls lose their text
pub(crate) fn prepare_messages(
    messages: &[UnifiedMessage],
    backend: BackendKind,
    capabilities: &ModelCapabilities,
) -> Vec<UnifiedMessage> {
    messages
        .iter()
        .enumerate()
        .filter_map(|(i, m)| {
            if m.role == Role::Function {
                warn!(backend = %backend, message_index = i, "dropping legacy function-role message");
                return None;
            }
            let mut m = m.clone();
            if m.contains_image() && !capabilities.vision {
                warn!(
                    backend = %backend,
                    message_index = i,
                    "model does not accept images; keeping text parts only"
                );
                m.content = m
                    .content
                    .as_ref()
                    .map(|c| MessageContent::Text(c.joined_text()));
            }
            if m.role == Role::Assistant && !m.tool_calls.is_empty() {
                m.content = None;
            }
            Some(m)
        })
        .collect()
}

/// Tool call arguments as a JSON object, for backends that require one.
pub(crate) fn arguments_object(arguments: &Value) -> Value {
    match arguments {
        Value::Object(_) => arguments.clone(),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(v @ Value::Object(_)) => v,
            _ => json!({}),
        },
        _ => json!({}),
    }
}

pub(crate) fn str_field(v: &Value, pointer: &str) -> Option<String> {
    v.pointer(pointer).and_then(Value::as_str).map(String::from)
}

pub(crate) fn u64_field(v: &Value, pointer: &str) -> u64 {
    v.pointer(pointer).and_then(Value::as_u64).unwrap_or(0)
}

/// Surface an in-band `{"error": {...}}` object as a backend error.
pub(crate) fn check_error_body(backend: BackendKind, body: &Value) -> Result<()> {
    let Some(err) = body.get("error").filter(|e| !e.is_null()) else {
        return Ok(());
    };
    let message = err
        .get("message")
        .and_then(Value::as_str)
        .map(String::from)
        .unwrap_or_else(|| err.to_string());
    let class = err
        .get("type")
        .or_else(|| err.get("status"))
        .and_then(Value::as_str)
        .unwrap_or("backend_error")
        .to_string();
    let status = err
        .get("code")
        .and_then(Value::as_u64)
        .and_then(|c| u16::try_from(c).ok());
    Err(Error::Backend {
        backend,
        status,
        class,
        message,
    })
}

/// OpenAI Chat Completions driver; also serves the OpenRouter aggregator.
#[derive(Debug)]
pub struct OpenAiDriver {
    kind: BackendKind,
}

impl OpenAiDriver {
    pub fn new(kind: BackendKind) -> Self {
        Self { kind }
    }

    fn message_to_wire(m: &UnifiedMessage) -> Result<Value> {
        let mut v = serde_json::to_value(m)?;
        if m.role == Role::Assistant && !m.tool_calls.is_empty() {
            v["content"] = Value::Null;
        }
        Ok(v)
    }

    fn tool_call_from_wire(&self, v: &Value) -> Result<ToolCall> {
        serde_json::from_value(v.clone()).map_err(|e| {
            Error::backend_protocol(self.kind, format!("malformed tool call: {}", e))
        })
    }
}

impl BackendDriver for OpenAiDriver {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn build_chat_payload(
        &self,
        req: &UnifiedRequest,
        target: &ModelDescriptor,
    ) -> Result<ChatPayload> {
        let messages = prepare_messages(&req.messages, self.kind, &target.capabilities)
            .iter()
            .map(Self::message_to_wire)
            .collect::<Result<Vec<_>>>()?;

        let mut body = json!({ "messages": messages });

        if let Some(t) = req.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(mt) = req.max_tokens.or(target.capabilities.max_tokens) {
            body["max_tokens"] = json!(mt);
        }
        if let Some(tools) = req.tools.as_ref().filter(|t| !t.is_empty()) {
            let wire: Vec<Value> = tools
                .iter()
                .map(|t| {
                    let mut function = json!({
                        "name": t.name,
                        "parameters": SchemaNode::from_json_schema(&t.parameters).to_json_schema(),
                    });
                    if let Some(d) = &t.description {
                        function["description"] = Value::String(d.clone());
                    }
                    json!({ "type": "function", "function": function })
                })
                .collect();
            body["tools"] = Value::Array(wire);
        }
        if let Some(choice) = &req.tool_choice {
            body["tool_choice"] = choice.to_openai();
        }
        let mode = JsonMode::resolve(
            req.response_format.as_ref(),
            self.kind,
            &target.capabilities,
        );
        if let Some(format) = mode.to_openai_format() {
            body["response_format"] = format;
        }
        if let Some(user) = &req.user {
            body["user"] = Value::String(user.clone());
        }
        if self.kind.is_aggregator() {
            if let Some(hint) = &target.routing_hint {
                body["provider"] = hint.clone();
            }
        }

        Ok(ChatPayload {
            backend: self.kind,
            body,
        })
    }

    fn chat_request(&self, payload: &ChatPayload, model: &str, stream: bool) -> DriverRequest {
        let mut body = payload.body.clone();
        body["model"] = Value::String(model.to_string());
        body["stream"] = Value::Bool(stream);
        if stream {
            body["stream_options"] = json!({ "include_usage": true });
        }
        DriverRequest {
            path: "/chat/completions".into(),
            headers: HashMap::new(),
            body,
            stream,
        }
    }

    fn parse_chat_response(&self, body: &Value) -> Result<BackendResult> {
        check_error_body(self.kind, body)?;
        let choice = body
            .pointer("/choices/0")
            .ok_or_else(|| Error::backend_protocol(self.kind, "response has no choices"))?;

        let tool_calls = choice
            .pointer("/message/tool_calls")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .map(|v| self.tool_call_from_wire(v))
                    .collect::<Result<Vec<_>>>()
            })
            .transpose()?
            .unwrap_or_default();

        let finish_reason = str_field(choice, "/finish_reason")
            .map(|r| FinishReason::from_native(&r))
            .or_else(|| (!tool_calls.is_empty()).then_some(FinishReason::ToolCalls));

        let usage = body.get("usage").filter(|u| !u.is_null()).map(|u| Usage {
            prompt_tokens: u64_field(u, "/prompt_tokens"),
            completion_tokens: u64_field(u, "/completion_tokens"),
            total_tokens: u64_field(u, "/total_tokens"),
        });

        Ok(BackendResult {
            id: str_field(body, "/id"),
            model: str_field(body, "/model"),
            content: str_field(choice, "/message/content"),
            tool_calls,
            finish_reason,
            usage,
        })
    }

    fn parse_stream_event(
        &self,
        data: &str,
        _state: &mut StreamState,
    ) -> Result<Vec<BackendEvent>> {
        if data.trim().is_empty() {
            return Ok(Vec::new());
        }
        let v: Value = serde_json::from_str(data).map_err(|e| {
            Error::backend_protocol(self.kind, format!("invalid stream event: {}", e))
        })?;
        check_error_body(self.kind, &v)?;

        let mut events = Vec::new();
        if let Some(choice) = v.pointer("/choices/0") {
            if let Some(text) = choice.pointer("/delta/content").and_then(Value::as_str) {
                if !text.is_empty() {
                    events.push(BackendEvent::ContentDelta(text.to_string()));
                }
            }
            if let Some(calls) = choice.pointer("/delta/tool_calls").and_then(Value::as_array) {
                for (pos, call) in calls.iter().enumerate() {
                    let index = call
                        .get("index")
                        .and_then(Value::as_u64)
                        .and_then(|i| u32::try_from(i).ok())
                        .unwrap_or(pos as u32);
                    events.push(BackendEvent::ToolCallDelta {
                        index,
                        id: str_field(call, "/id"),
                        name: str_field(call, "/function/name"),
                        arguments: str_field(call, "/function/arguments"),
                    });
                }
            }
            if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
                events.push(BackendEvent::Finish(FinishReason::from_native(reason)));
            }
        }
        if let Some(u) = v.get("usage").filter(|u| u.is_object()) {
            events.push(BackendEvent::Usage(Usage {
                prompt_tokens: u64_field(u, "/prompt_tokens"),
                completion_tokens: u64_field(u, "/completion_tokens"),
                total_tokens: u64_field(u, "/total_tokens"),
            }));
        }
        Ok(events)
    }

    fn embedding_request(&self, payload: &EmbeddingPayload, model: &str) -> Result<DriverRequest> {
        let mut body = json!({
            "model": model,
            "input": payload.inputs,
            "encoding_format": "float",
        });
        if let Some(d) = payload.dimensions {
            body["dimensions"] = json!(d);
        }
        if let Some(u) = &payload.user {
            body["user"] = Value::String(u.clone());
        }
        Ok(DriverRequest {
            path: "/embeddings".into(),
            headers: HashMap::new(),
            body,
            stream: false,
        })
    }

    fn parse_embedding_response(&self, body: &Value) -> Result<EmbeddingResult> {
        check_error_body(self.kind, body)?;
        let data = body
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::backend_protocol(self.kind, "embedding response has no data"))?;

        let vectors = data
            .iter()
            .enumerate()
            .map(|(pos, item)| {
                let index = item
                    .get("index")
                    .and_then(Value::as_u64)
                    .map(|i| i as usize)
                    .unwrap_or(pos);
                let vector = float_array(item.get("embedding")).ok_or_else(|| {
                    Error::backend_protocol(self.kind, "embedding is not a float array")
                })?;
                Ok((index, vector))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(EmbeddingResult {
            vectors,
            model: str_field(body, "/model"),
            prompt_tokens: u64_field(body, "/usage/prompt_tokens"),
            total_tokens: u64_field(body, "/usage/total_tokens"),
        })
    }
}

pub(crate) fn float_array(v: Option<&Value>) -> Option<Vec<f32>> {
    v?.as_array()?
        .iter()
        .map(|x| x.as_f64().map(|f| f as f32))
        .collect()
}
