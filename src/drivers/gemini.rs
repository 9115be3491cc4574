//! Gemini Generate API 驱动：实现 Google Gemini 特有的请求/响应格式转换
//!
//! Google Gemini generateContent API driver (the `vertex` backend). Key differences:
//! - Uses `contents` instead of `messages`, with `parts` instead of `content`.
//! - Roles: `user` and `model` (not `assistant`). System uses `system_instruction`.
//! - Tools are `functionDeclarations` with OpenAPI-style (upper-case) schemas;
//!   results go back as `functionResponse` parts keyed by function *name*.
//! - `generationConfig` wraps temperature, max_tokens (→ `maxOutputTokens`) and
//!   `responseSchema` for structured output.
//! - The model id lives in the URL path; streaming is `:streamGenerateContent?alt=sse`
//!   where every event is a full response fragment.

use serde_json::{json, Map, Value};
use std::collections::HashMap;

use super::{
    arguments_object, check_error_body, float_array, prepare_messages, str_field, u64_field,
    BackendDriver, BackendEvent, BackendResult, ChatPayload, DriverRequest, EmbeddingPayload,
    EmbeddingResult, StreamState,
};
use crate::routing::{BackendKind, ModelDescriptor};
use crate::structured::{JsonMode, SchemaNode};
use crate::types::{
    ContentPart, FinishReason, MessageContent, Role, ToolCall, ToolChoice, UnifiedMessage,
    UnifiedRequest, Usage,
};
use crate::{Error, Result};

/// Google Gemini generateContent API driver.
#[derive(Debug, Default)]
pub struct GeminiDriver;

impl GeminiDriver {
    pub fn new() -> Self {
        Self
    }

    /// Separate system instructions from conversation contents.
    fn split_messages(messages: &[UnifiedMessage]) -> (Option<Value>, Vec<Value>) {
        let mut system_parts: Vec<String> = Vec::new();
        let mut turns: Vec<(&'static str, Vec<Value>)> = Vec::new();
        // tool_call_id -> function name, for functionResponse parts
        let mut call_names: HashMap<&str, &str> = HashMap::new();

        for m in messages {
            let (role, parts) = match m.role {
                Role::System => {
                    let text = m.text();
                    if !text.is_empty() {
                        system_parts.push(text);
                    }
                    continue;
                }
                Role::User => ("user", Self::content_to_parts(m.content.as_ref())),
                Role::Assistant => {
                    let mut parts = Vec::new();
                    let text = m.text();
                    if !text.is_empty() {
                        parts.push(json!({ "text": text }));
                    }
                    for call in &m.tool_calls {
                        call_names.insert(call.id.as_str(), call.tool_name.as_str());
                        parts.push(json!({
                            "functionCall": {
                                "name": call.tool_name,
                                "args": arguments_object(&call.arguments),
                            }
                        }));
                    }
                    ("model", parts)
                }
                Role::Tool => {
                    let name = m
                        .tool_call_id
                        .as_deref()
                        .and_then(|id| call_names.get(id).copied())
                        .or(m.name.as_deref())
                        .unwrap_or("unknown");
                    let text = m.text();
                    let response = match serde_json::from_str::<Value>(&text) {
                        Ok(v @ Value::Object(_)) => v,
                        Ok(other) => json!({ "content": other }),
                        Err(_) => json!({ "content": text }),
                    };
                    (
                        "user",
                        vec![json!({
                            "functionResponse": { "name": name, "response": response }
                        })],
                    )
                }
                Role::Function => continue,
            };
            if parts.is_empty() {
                continue;
            }
            match turns.last_mut() {
                Some((last_role, last_parts)) if *last_role == role => last_parts.extend(parts),
                _ => turns.push((role, parts)),
            }
        }

        let system = if system_parts.is_empty() {
            None
        } else {
            Some(json!({ "parts": [{ "text": system_parts.join("\n\n") }] }))
        };
        let contents = turns
            .into_iter()
            .map(|(role, parts)| json!({ "role": role, "parts": parts }))
            .collect();
        (system, contents)
    }

    fn content_to_parts(content: Option<&MessageContent>) -> Vec<Value> {
        match content {
            None => Vec::new(),
            Some(MessageContent::Text(s)) => vec![json!({ "text": s })],
            Some(MessageContent::Parts(parts)) => parts
                .iter()
                .map(|p| match p {
                    ContentPart::Text { text } => json!({ "text": text }),
                    ContentPart::ImageUrl { image_url } => match image_url.as_data_url() {
                        Some((mime_type, data)) => json!({
                            "inline_data": { "mime_type": mime_type, "data": data }
                        }),
                        None => json!({
                            "file_data": {
                                "mime_type": guess_image_mime(&image_url.url),
                                "file_uri": image_url.url,
                            }
                        }),
                    },
                })
                .collect(),
        }
    }

    fn tool_config(choice: &ToolChoice) -> Value {
        let config = match choice {
            ToolChoice::None => json!({ "mode": "NONE" }),
            ToolChoice::Auto => json!({ "mode": "AUTO" }),
            ToolChoice::Tool { tool_name } => json!({
                "mode": "ANY",
                "allowed_function_names": [tool_name],
            }),
        };
        json!({ "function_calling_config": config })
    }

    fn finish_reason(candidate: &Value, has_tool_calls: bool) -> Option<FinishReason> {
        let reason = str_field(candidate, "/finishReason")?;
        let mapped = FinishReason::from_native(&reason);
        Some(if has_tool_calls && mapped == FinishReason::Stop {
            FinishReason::ToolCalls
        } else {
            mapped
        })
    }

    fn usage(body: &Value) -> Option<Usage> {
        let meta = body.get("usageMetadata")?;
        let prompt = u64_field(meta, "/promptTokenCount");
        let completion = u64_field(meta, "/candidatesTokenCount");
        let total = meta
            .get("totalTokenCount")
            .and_then(Value::as_u64)
            .unwrap_or(prompt + completion);
        Some(Usage {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: total,
        })
    }

    fn function_call(part: &Value) -> Option<ToolCall> {
        let call = part.get("functionCall")?;
        Some(ToolCall::new(
            str_field(call, "/id").unwrap_or_else(new_call_id),
            str_field(call, "/name").unwrap_or_default(),
            call.get("args").cloned().unwrap_or_else(|| json!({})),
        ))
    }
}

fn new_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

fn guess_image_mime(url: &str) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or(url).to_ascii_lowercase();
    if path.ends_with(".png") {
        "image/png"
    } else if path.ends_with(".gif") {
        "image/gif"
    } else if path.ends_with(".webp") {
        "image/webp"
    } else {
        "image/jpeg"
    }
}

impl BackendDriver for GeminiDriver {
    fn kind(&self) -> BackendKind {
        BackendKind::Vertex
    }

    fn build_chat_payload(
        &self,
        req: &UnifiedRequest,
        target: &ModelDescriptor,
    ) -> Result<ChatPayload> {
        let prepared = prepare_messages(&req.messages, self.kind(), &target.capabilities);
        let (system, contents) = Self::split_messages(&prepared);

        let mut body = json!({ "contents": contents });
        if let Some(sys) = system {
            body["system_instruction"] = sys;
        }

        let mut gen_config = Map::new();
        if let Some(t) = req.temperature {
            gen_config.insert("temperature".into(), json!(t));
        }
        if let Some(mt) = req.max_tokens.or(target.capabilities.max_tokens) {
            gen_config.insert("maxOutputTokens".into(), json!(mt));
        }
        match JsonMode::resolve(req.response_format.as_ref(), self.kind(), &target.capabilities) {
            JsonMode::Off => {}
            JsonMode::JsonObject => {
                gen_config.insert("responseMimeType".into(), json!("application/json"));
            }
            JsonMode::JsonSchema(constraint) => {
                gen_config.insert("responseMimeType".into(), json!("application/json"));
                gen_config.insert("responseSchema".into(), constraint.tree.to_openapi_schema());
            }
        }
        if !gen_config.is_empty() {
            body["generationConfig"] = Value::Object(gen_config);
        }

        if let Some(tools) = req.tools.as_ref().filter(|t| !t.is_empty()) {
            let declarations: Vec<Value> = tools
                .iter()
                .map(|t| {
                    let mut decl = json!({ "name": t.name });
                    if let Some(d) = &t.description {
                        decl["description"] = Value::String(d.clone());
                    }
                    let params = SchemaNode::from_json_schema(&t.parameters).to_openapi_schema();
                    // Gemini rejects OBJECT schemas with no properties
                    if params.get("properties").is_some() {
                        decl["parameters"] = params;
                    }
                    decl
                })
                .collect();
            body["tools"] = json!([{ "functionDeclarations": declarations }]);
        }
        if let Some(choice) = &req.tool_choice {
            body["tool_config"] = Self::tool_config(choice);
        }

        Ok(ChatPayload {
            backend: self.kind(),
            body,
        })
    }

    fn chat_request(&self, payload: &ChatPayload, model: &str, stream: bool) -> DriverRequest {
        let path = if stream {
            format!("/models/{}:streamGenerateContent?alt=sse", model)
        } else {
            format!("/models/{}:generateContent", model)
        };
        DriverRequest {
            path,
            headers: HashMap::new(),
            body: payload.body.clone(),
            stream,
        }
    }

    fn parse_chat_response(&self, body: &Value) -> Result<BackendResult> {
        check_error_body(self.kind(), body)?;
        let candidate = body.pointer("/candidates/0").ok_or_else(|| {
            let reason = str_field(body, "/promptFeedback/blockReason")
                .unwrap_or_else(|| "no candidates".into());
            Error::backend_protocol(self.kind(), format!("response has no candidates: {}", reason))
        })?;

        let mut text = String::new();
        let mut tool_calls = Vec::new();
        if let Some(parts) = candidate.pointer("/content/parts").and_then(Value::as_array) {
            for p in parts {
                if let Some(t) = p.get("text").and_then(Value::as_str) {
                    text.push_str(t);
                } else if let Some(call) = Self::function_call(p) {
                    tool_calls.push(call);
                }
            }
        }

        Ok(BackendResult {
            id: str_field(body, "/responseId"),
            model: str_field(body, "/modelVersion"),
            finish_reason: Self::finish_reason(candidate, !tool_calls.is_empty()),
            content: (!text.is_empty()).then_some(text),
            tool_calls,
            usage: Self::usage(body),
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
        check_error_body(self.kind(), &v)?;

        let mut events = Vec::new();
        if let Some(candidate) = v.pointer("/candidates/0") {
            if let Some(parts) = candidate.pointer("/content/parts").and_then(Value::as_array) {
                for p in parts {
                    if let Some(t) = p.get("text").and_then(Value::as_str) {
                        if !t.is_empty() {
                            events.push(BackendEvent::ContentDelta(t.to_string()));
                        }
                    } else if let Some(call) = Self::function_call(p) {
                        // Gemini sends each function call whole, never split
                        events.push(BackendEvent::ToolCallDelta {
                            index: state.next_slot(),
                            id: Some(call.id.clone()),
                            name: Some(call.tool_name.clone()),
                            arguments: Some(call.arguments_string()),
                        });
                    }
                }
            }
            if let Some(reason) = Self::finish_reason(candidate, state.saw_tool_call) {
                events.push(BackendEvent::Finish(reason));
            }
        }
        if let Some(usage) = Self::usage(&v) {
            events.push(BackendEvent::Usage(usage));
        }
        Ok(events)
    }

    fn embedding_request(&self, payload: &EmbeddingPayload, model: &str) -> Result<DriverRequest> {
        let requests: Vec<Value> = payload
            .inputs
            .iter()
            .map(|text| {
                let mut r = json!({
                    "model": format!("models/{}", model),
                    "content": { "parts": [{ "text": text }] },
                });
                if let Some(d) = payload.dimensions {
                    r["outputDimensionality"] = json!(d);
                }
                r
            })
            .collect();
        Ok(DriverRequest {
            path: format!("/models/{}:batchEmbedContents", model),
            headers: HashMap::new(),
            body: json!({ "requests": requests }),
            stream: false,
        })
    }

    fn parse_embedding_response(&self, body: &Value) -> Result<EmbeddingResult> {
        check_error_body(self.kind(), body)?;
        let embeddings = body
            .get("embeddings")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                Error::backend_protocol(self.kind(), "embedding response has no embeddings")
            })?;
        let vectors = embeddings
            .iter()
            .enumerate()
            .map(|(i, e)| {
                float_array(e.get("values"))
                    .map(|v| (i, v))
                    .ok_or_else(|| Error::backend_protocol(self.kind(), "embedding values missing"))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(EmbeddingResult {
            vectors,
            model: None,
            prompt_tokens: 0,
            total_tokens: 0,
        })
    }
}
