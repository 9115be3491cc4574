//! JSON mode support for structured output.
//!
//! Decides, per request and model, whether a `response_format` is forwarded to
//! the backend natively or dropped (the caller then parses free-form JSON).

use serde_json::Value;
use tracing::debug;

use crate::routing::{BackendKind, ModelCapabilities};
use crate::structured::schema::SchemaNode;
use crate::types::ResponseFormat;

/// JSON mode options for structured output.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonMode {
    /// No JSON constraint forwarded.
    Off,
    /// Any valid JSON object.
    JsonObject,
    /// Schema-constrained decoding.
    JsonSchema(SchemaConstraint),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchemaConstraint {
    pub name: String,
    pub description: Option<String>,
    /// The schema exactly as the caller sent it.
    pub raw: Value,
    pub tree: SchemaNode,
    pub strict: Option<bool>,
}

impl JsonMode {
    /// Resolve what can actually be forwarded to `backend` for this model.
    pub fn resolve(
        format: Option<&ResponseFormat>,
        backend: BackendKind,
        capabilities: &ModelCapabilities,
    ) -> Self {
        match format {
            None | Some(ResponseFormat::Text) => JsonMode::Off,
            Some(ResponseFormat::JsonObject) => {
                if backend == BackendKind::Anthropic {
                    debug!(backend = %backend, "json_object mode has no native equivalent, omitted");
                    JsonMode::Off
                } else {
                    JsonMode::JsonObject
                }
            }
            Some(ResponseFormat::JsonSchema { json_schema }) => {
                if !capabilities.structured_output {
                    debug!(
                        backend = %backend,
                        schema = %json_schema.name,
                        "schema-constrained decoding unsupported, response_format omitted"
                    );
                    return JsonMode::Off;
                }
                JsonMode::JsonSchema(SchemaConstraint {
                    name: json_schema.name.clone(),
                    description: json_schema.description.clone(),
                    raw: json_schema.schema.clone(),
                    tree: SchemaNode::from_json_schema(&json_schema.schema),
                    strict: json_schema.strict,
                })
            }
        }
    }

    pub fn is_off(&self) -> bool {
        matches!(self, JsonMode::Off)
    }

    /// OpenAI `response_format` value, if any.
    pub fn to_openai_format(&self) -> Option<Value> {
        match self {
            JsonMode::Off => None,
            JsonMode::JsonObject => Some(serde_json::json!({ "type": "json_object" })),
            JsonMode::JsonSchema(c) => {
                let mut inner = serde_json::json!({ "name": c.name, "schema": c.raw });
                if let Some(d) = &c.description {
                    inner["description"] = Value::String(d.clone());
                }
                if let Some(strict) = c.strict {
                    inner["strict"] = Value::Bool(strict);
                }
                Some(serde_json::json!({ "type": "json_schema", "json_schema": inner }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JsonSchemaFormat;

    fn schema_format() -> ResponseFormat {
        ResponseFormat::JsonSchema {
            json_schema: JsonSchemaFormat {
                name: "answer".into(),
                description: None,
                schema: serde_json::json!({
                    "type": "object",
                    "properties": {"value": {"type": "string"}},
                    "required": ["value"]
                }),
                strict: Some(true),
            },
        }
    }

    #[test]
    fn schema_is_forwarded_when_supported() {
        let caps = ModelCapabilities::infer(BackendKind::OpenAi, "gpt-4o");
        let mode = JsonMode::resolve(Some(&schema_format()), BackendKind::OpenAi, &caps);
        let wire = mode.to_openai_format().unwrap();
        assert_eq!(wire["type"], "json_schema");
        assert_eq!(wire["json_schema"]["name"], "answer");
        assert_eq!(wire["json_schema"]["strict"], true);
    }

    #[test]
    fn schema_is_omitted_when_unsupported() {
        let caps = ModelCapabilities::infer(BackendKind::Anthropic, "claude-3-haiku");
        let mode = JsonMode::resolve(Some(&schema_format()), BackendKind::Anthropic, &caps);
        assert!(mode.is_off());
        assert!(mode.to_openai_format().is_none());
    }
}
