//! Inbound chat request

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::message::{Role, UnifiedMessage};
use super::tool::{ToolChoice, ToolDefinition};
use crate::routing::BackendKind;
use crate::{Error, ErrorContext, Result};

/// OpenAI-compatible chat request, already authorized by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedRequest {
    pub messages: Vec<UnifiedMessage>,
    pub model: String,
    /// Explicit backend override; wins over registry and heuristics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<BackendKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
    /// Caller identity, forwarded to telemetry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl UnifiedRequest {
    pub fn new(model: impl Into<String>, messages: Vec<UnifiedMessage>) -> Self {
        Self {
            messages,
            model: model.into(),
            provider: None,
            temperature: None,
            max_tokens: None,
            stream: false,
            tools: None,
            tool_choice: None,
            response_format: None,
            user: None,
        }
    }

    pub fn with_provider(mut self, provider: BackendKind) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_tool_choice(mut self, tool_choice: ToolChoice) -> Self {
        self.tool_choice = Some(tool_choice);
        self
    }

    pub fn with_response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = Some(format);
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Check the request invariants before any backend is contacted.
    pub fn validate(&self) -> Result<()> {
        if self.messages.is_empty() {
            return Err(Error::validation_with_context(
                "request must contain at least one message",
                ErrorContext::new()
                    .with_field_path("request.messages")
                    .with_source("request_validator"),
            ));
        }
        if self.model.trim().is_empty() {
            return Err(Error::validation_with_context(
                "model must not be empty",
                ErrorContext::new()
                    .with_field_path("request.model")
                    .with_source("request_validator"),
            ));
        }
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(Error::validation_with_context(
                    "temperature out of range",
                    ErrorContext::new()
                        .with_field_path("request.temperature")
                        .with_details(format!("expected 0.0..=2.0, got {}", t))
                        .with_source("request_validator"),
                ));
            }
        }
        if self.max_tokens == Some(0) {
            return Err(Error::validation_with_context(
                "max_tokens must be greater than zero",
                ErrorContext::new()
                    .with_field_path("request.max_tokens")
                    .with_source("request_validator"),
            ));
        }
        for (i, m) in self.messages.iter().enumerate() {
            if m.role == Role::Tool && m.tool_call_id.as_deref().map_or(true, str::is_empty) {
                return Err(Error::validation_with_context(
                    "tool message is missing tool_call_id",
                    ErrorContext::new()
                        .with_field_path(format!("request.messages[{}].tool_call_id", i))
                        .with_source("request_validator"),
                ));
            }
        }
        Ok(())
    }
}

/// Requested output format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseFormat {
    Text,
    JsonObject,
    JsonSchema { json_schema: JsonSchemaFormat },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonSchemaFormat {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub schema: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strict: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> UnifiedRequest {
        UnifiedRequest::new("gpt-4o", vec![UnifiedMessage::user("hi")])
    }

    #[test]
    fn accepts_valid_request() {
        assert!(base().with_temperature(2.0).with_max_tokens(1).validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_temperature() {
        let err = base().with_temperature(2.5).validate().unwrap_err();
        assert_eq!(
            err.context().and_then(|c| c.field_path.as_deref()),
            Some("request.temperature")
        );
    }

    #[test]
    fn rejects_zero_max_tokens_and_orphan_tool_message() {
        assert!(base().with_max_tokens(0).validate().is_err());

        let mut req = base();
        let mut orphan = UnifiedMessage::tool("x", "result");
        orphan.tool_call_id = None;
        req.messages.push(orphan);
        let err = req.validate().unwrap_err();
        assert!(err.to_string().contains("messages[1].tool_call_id"));
    }

    #[test]
    fn parses_openai_request_body() {
        let req: UnifiedRequest = serde_json::from_value(serde_json::json!({
            "model": "anthropic/claude-3-5-sonnet",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": true,
            "provider": "Anthropic",
            "response_format": {
                "type": "json_schema",
                "json_schema": {"name": "out", "schema": {"type": "object"}}
            }
        }))
        .unwrap();
        assert!(req.stream);
        assert_eq!(req.provider, Some(BackendKind::Anthropic));
        assert!(matches!(
            req.response_format,
            Some(ResponseFormat::JsonSchema { .. })
        ));
    }
}
