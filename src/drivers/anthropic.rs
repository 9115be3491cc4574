//! Anthropic Messages API 驱动：实现 Anthropic 特有的请求/响应格式转换
//!
//! Anthropic Messages API driver. Handles the key differences from OpenAI:
//! - System messages are a top-level `system` parameter, not part of `messages`.
//! - Content uses typed blocks; tool calls are `tool_use` blocks and tool
//!   results are `tool_result` blocks inside a user turn.
//! - Consecutive turns of the same role must be merged.
//! - `max_tokens` is required and `temperature` tops out at 1.0.
//! - Streaming uses typed events (`message_start`, `content_block_*`, `message_delta`).

use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::debug;

use super::{
    arguments_object, prepare_messages, str_field, u64_field, BackendDriver, BackendEvent,
    BackendResult, ChatPayload, DriverRequest, EmbeddingPayload, EmbeddingResult, StreamState,
};
use crate::routing::{BackendKind, ModelDescriptor};
use crate::structured::SchemaNode;
use crate::types::{
    ContentPart, FinishReason, MessageContent, Role, ToolCall, ToolChoice, UnifiedMessage,
    UnifiedRequest, Usage,
};
use crate::{Error, Result};

const DEFAULT_MAX_TOKENS: u32 = 4096;
const API_VERSION: &str = "2023-06-01";
const MAX_TEMPERATURE: f64 = 1.0;

/// Anthropic Messages API driver.
#[derive(Debug, Default)]
pub struct AnthropicDriver;

impl AnthropicDriver {
    pub fn new() -> Self {
        Self
    }

    /// Extract system text and convert the rest into merged role turns.
    fn split_system_messages(messages: &[UnifiedMessage]) -> (Option<String>, Vec<Value>) {
        let mut system_parts: Vec<String> = Vec::new();
        let mut turns: Vec<(&'static str, Vec<Value>)> = Vec::new();

        for m in messages {
            let (role, blocks) = match m.role {
                Role::System => {
                    let text = m.text();
                    if !text.is_empty() {
                        system_parts.push(text);
                    }
                    continue;
                }
                Role::User => ("user", Self::user_blocks(m)),
                Role::Assistant => ("assistant", Self::assistant_blocks(m)),
                Role::Tool => (
                    "user",
                    vec![json!({
                        "type": "tool_result",
                        "tool_use_id": m.tool_call_id.clone().unwrap_or_default(),
                        "content": m.text(),
                    })],
                ),
                // removed by prepare_messages
                Role::Function => continue,
            };
            if blocks.is_empty() {
                continue;
            }
            match turns.last_mut() {
                Some((last_role, last_blocks)) if *last_role == role => {
                    last_blocks.extend(blocks)
                }
                _ => turns.push((role, blocks)),
            }
        }

        let system = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        };
        let messages = turns
            .into_iter()
            .map(|(role, content)| json!({ "role": role, "content": content }))
            .collect();
        (system, messages)
    }

    fn user_blocks(m: &UnifiedMessage) -> Vec<Value> {
        match &m.content {
            None => Vec::new(),
            Some(MessageContent::Text(s)) => vec![json!({ "type": "text", "text": s })],
            Some(MessageContent::Parts(parts)) => parts
                .iter()
                .map(|p| match p {
                    ContentPart::Text { text } => json!({ "type": "text", "text": text }),
                    ContentPart::ImageUrl { image_url } => match image_url.as_data_url() {
                        Some((media_type, data)) => json!({
                            "type": "image",
                            "source": { "type": "base64", "media_type": media_type, "data": data }
                        }),
                        None => json!({
                            "type": "image",
                            "source": { "type": "url", "url": image_url.url }
                        }),
                    },
                })
                .collect(),
        }
    }

    fn assistant_blocks(m: &UnifiedMessage) -> Vec<Value> {
        let mut blocks = Vec::new();
        let text = m.text();
        if !text.is_empty() {
            blocks.push(json!({ "type": "text", "text": text }));
        }
        for call in &m.tool_calls {
            blocks.push(json!({
                "type": "tool_use",
                "id": call.id,
                "name": call.tool_name,
                "input": arguments_object(&call.arguments),
            }));
        }
        blocks
    }

    fn map_tool_choice(choice: &ToolChoice) -> Value {
        match choice {
            ToolChoice::None => json!({ "type": "none" }),
            ToolChoice::Auto => json!({ "type": "auto" }),
            ToolChoice::Tool { tool_name } => json!({ "type": "tool", "name": tool_name }),
        }
    }

    fn map_error(v: &Value) -> Error {
        let class = str_field(v, "/error/type").unwrap_or_else(|| "backend_error".into());
        let message = str_field(v, "/error/message").unwrap_or_else(|| v.to_string());
        Error::Backend {
            backend: BackendKind::Anthropic,
            status: None,
            class,
            message,
        }
    }
}

impl BackendDriver for AnthropicDriver {
    fn kind(&self) -> BackendKind {
        BackendKind::Anthropic
    }

    fn build_chat_payload(
        &self,
        req: &UnifiedRequest,
        target: &ModelDescriptor,
    ) -> Result<ChatPayload> {
        let prepared = prepare_messages(&req.messages, self.kind(), &target.capabilities);
        let (system, msgs) = Self::split_system_messages(&prepared);

        let max_tokens = req
            .max_tokens
            .or(target.capabilities.max_tokens)
            .unwrap_or(DEFAULT_MAX_TOKENS);

        let mut body = json!({
            "messages": msgs,
            "max_tokens": max_tokens,
        });

        if let Some(sys) = system {
            body["system"] = Value::String(sys);
        }
        if let Some(t) = req.temperature {
            if t > MAX_TEMPERATURE {
                debug!(requested = t, "clamping temperature to Anthropic maximum");
            }
            body["temperature"] = json!(t.min(MAX_TEMPERATURE));
        }
        if let Some(tools) = req.tools.as_ref().filter(|t| !t.is_empty()) {
            let wire: Vec<Value> = tools
                .iter()
                .map(|t| {
                    let mut tool = json!({
                        "name": t.name,
                        "input_schema": SchemaNode::from_json_schema(&t.parameters).to_json_schema(),
                    });
                    if let Some(d) = &t.description {
                        tool["description"] = Value::String(d.clone());
                    }
                    tool
                })
                .collect();
            body["tools"] = Value::Array(wire);
        }
        if let Some(choice) = &req.tool_choice {
            body["tool_choice"] = Self::map_tool_choice(choice);
        }
        if let Some(user) = &req.user {
            body["metadata"] = json!({ "user_id": user });
        }
        // response_format: no native schema-constrained decoding; omitted

        Ok(ChatPayload {
            backend: self.kind(),
            body,
        })
    }

    fn chat_request(&self, payload: &ChatPayload, model: &str, stream: bool) -> DriverRequest {
        let mut body = payload.body.clone();
        body["model"] = Value::String(model.to_string());
        body["stream"] = Value::Bool(stream);

        let mut headers = HashMap::new();
        headers.insert("anthropic-version".into(), API_VERSION.into());

        DriverRequest {
            path: "/messages".into(),
            headers,
            body,
            stream,
        }
    }

    fn parse_chat_response(&self, body: &Value) -> Result<BackendResult> {
        if body.get("type").and_then(Value::as_str) == Some("error") {
            return Err(Self::map_error(body));
        }
        let blocks = body
            .get("content")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::backend_protocol(self.kind(), "response has no content"))?;

        let mut text = String::new();
        let mut tool_calls = Vec::new();
        for b in blocks {
            match b.get("type").and_then(Value::as_str) {
                Some("text") => {
                    if let Some(t) = b.get("text").and_then(Value::as_str) {
                        text.push_str(t);
                    }
                }
                Some("tool_use") => tool_calls.push(ToolCall::new(
                    str_field(b, "/id").unwrap_or_default(),
                    str_field(b, "/name").unwrap_or_default(),
                    b.get("input").cloned().unwrap_or_else(|| json!({})),
                )),
                _ => {}
            }
        }

        let usage = body.get("usage").map(|u| {
            Usage::new(u64_field(u, "/input_tokens"), u64_field(u, "/output_tokens"))
        });

        Ok(BackendResult {
            id: str_field(body, "/id"),
            model: str_field(body, "/model"),
            content: (!text.is_empty()).then_some(text),
            tool_calls,
            finish_reason: str_field(body, "/stop_reason").map(|r| FinishReason::from_native(&r)),
            usage,
        })
    }

    fn parse_stream_event(
        &self,
        data: &str,
        state: &mut StreamState,
    ) -> Result<Vec<BackendEvent>> {
        if data.trim().is_empty() {
            return Ok(Vec::new());
        }

        let v: Value = serde_json::from_str(data).map_err(|e| {
            Error::backend_protocol(self.kind(), format!("invalid stream event: {}", e))
        })?;

        let event_type = v.get("type").and_then(|t| t.as_str()).unwrap_or("");

        match event_type {
            "message_start" => {
                state.prompt_tokens = u64_field(&v, "/message/usage/input_tokens");
                Ok(Vec::new())
            }
            "content_block_start" => {
                let index = u64_field(&v, "/index");
                let block = v.get("content_block").cloned().unwrap_or(Value::Null);
                match block.get("type").and_then(Value::as_str) {
                    Some("tool_use") => {
                        let slot = state.tool_slot(index);
                        Ok(vec![BackendEvent::ToolCallDelta {
                            index: slot,
                            id: str_field(&block, "/id"),
                            name: str_field(&block, "/name"),
                            arguments: None,
                        }])
                    }
                    Some("text") => Ok(str_field(&block, "/text")
                        .filter(|t| !t.is_empty())
                        .map(BackendEvent::ContentDelta)
                        .into_iter()
                        .collect()),
                    _ => Ok(Vec::new()),
                }
            }
            "content_block_delta" => {
                match v.pointer("/delta/type").and_then(Value::as_str) {
                    Some("text_delta") => Ok(str_field(&v, "/delta/text")
                        .filter(|t| !t.is_empty())
                        .map(BackendEvent::ContentDelta)
                        .into_iter()
                        .collect()),
                    Some("input_json_delta") => {
                        let index = u64_field(&v, "/index");
                        let Some(slot) = state.existing_tool_slot(index) else {
                            return Ok(Vec::new());
                        };
                        Ok(vec![BackendEvent::ToolCallDelta {
                            index: slot,
                            id: None,
                            name: None,
                            arguments: str_field(&v, "/delta/partial_json"),
                        }])
                    }
                    // thinking / signature deltas are not part of the unified stream
                    _ => Ok(Vec::new()),
                }
            }
            "message_delta" => {
                let mut events = Vec::new();
                if let Some(r) = str_field(&v, "/delta/stop_reason") {
                    events.push(BackendEvent::Finish(FinishReason::from_native(&r)));
                }
                if v.get("usage").is_some() {
                    events.push(BackendEvent::Usage(Usage::new(
                        state.prompt_tokens.max(u64_field(&v, "/usage/input_tokens")),
                        u64_field(&v, "/usage/output_tokens"),
                    )));
                }
                Ok(events)
            }
            "error" => Err(Self::map_error(&v)),
            // message_stop, content_block_stop, ping
            _ => Ok(Vec::new()),
        }
    }

    fn embedding_request(&self, _payload: &EmbeddingPayload, _model: &str) -> Result<DriverRequest> {
        Err(Error::Unsupported {
            backend: self.kind(),
            operation: "embeddings",
        })
    }

    fn parse_embedding_response(&self, _body: &Value) -> Result<EmbeddingResult> {
        Err(Error::Unsupported {
            backend: self.kind(),
            operation: "embeddings",
        })
    }
}
