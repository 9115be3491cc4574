//! Tool calling definitions
//!
//! The unified shapes are flat (`tool_name`, parsed `arguments`); on the wire they
//! serialize to the OpenAI `{"type": "function", "function": {...}}` envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tool call (invocation from model)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireToolCall", into = "WireToolCall")]
pub struct ToolCall {
    pub id: String,
    pub tool_name: String,
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, tool_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            tool_name: tool_name.into(),
            arguments,
        }
    }

    /// Arguments as a JSON string, the way OpenAI-style backends expect them.
    pub fn arguments_string(&self) -> String {
        match &self.arguments {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Parse a raw arguments string; keeps the raw text when it is not valid JSON.
pub fn parse_arguments(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Value::Object(Default::default());
    }
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[derive(Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    kind: String,
    function: WireFunctionCall,
}

#[derive(Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    arguments: Value,
}

fn function_type() -> String {
    "function".to_string()
}

impl From<WireToolCall> for ToolCall {
    fn from(w: WireToolCall) -> Self {
        let arguments = match w.function.arguments {
            Value::String(s) => parse_arguments(&s),
            Value::Null => Value::Object(Default::default()),
            other => other,
        };
        ToolCall {
            id: w.id,
            tool_name: w.function.name,
            arguments,
        }
    }
}

impl From<ToolCall> for WireToolCall {
    fn from(t: ToolCall) -> Self {
        let arguments = Value::String(t.arguments_string());
        WireToolCall {
            id: t.id,
            kind: function_type(),
            function: WireFunctionCall {
                name: t.tool_name,
                arguments,
            },
        }
    }
}

/// Tool definition (for function calling)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireToolDefinition", into = "WireToolDefinition")]
pub struct ToolDefinition {
    pub name: String,
    pub description: Option<String>,
    /// JSON Schema of the parameters object.
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: Option<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description,
            parameters,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct WireToolDefinition {
    #[serde(rename = "type", default = "function_type")]
    kind: String,
    function: WireFunctionDefinition,
}

#[derive(Serialize, Deserialize)]
struct WireFunctionDefinition {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default)]
    parameters: Value,
}

impl From<WireToolDefinition> for ToolDefinition {
    fn from(w: WireToolDefinition) -> Self {
        ToolDefinition {
            name: w.function.name,
            description: w.function.description,
            parameters: w.function.parameters,
        }
    }
}

impl From<ToolDefinition> for WireToolDefinition {
    fn from(t: ToolDefinition) -> Self {
        WireToolDefinition {
            kind: function_type(),
            function: WireFunctionDefinition {
                name: t.name,
                description: t.description,
                parameters: t.parameters,
            },
        }
    }
}

/// Tool choice constraint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "WireToolChoice", into = "WireToolChoice")]
pub enum ToolChoice {
    None,
    Auto,
    /// Force exactly this tool.
    Tool { tool_name: String },
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum WireToolChoice {
    Mode(String),
    Function { function: WireNamedFunction },
}

#[derive(Serialize, Deserialize)]
struct WireNamedFunction {
    name: String,
}

impl From<WireToolChoice> for ToolChoice {
    fn from(w: WireToolChoice) -> Self {
        match w {
            WireToolChoice::Mode(m) if m == "none" => ToolChoice::None,
            // "required" has no unified counterpart; treat it as unconstrained
            WireToolChoice::Mode(_) => ToolChoice::Auto,
            WireToolChoice::Function { function } => ToolChoice::Tool {
                tool_name: function.name,
            },
        }
    }
}

impl From<ToolChoice> for WireToolChoice {
    fn from(t: ToolChoice) -> Self {
        match t {
            ToolChoice::None => WireToolChoice::Mode("none".into()),
            ToolChoice::Auto => WireToolChoice::Mode("auto".into()),
            ToolChoice::Tool { tool_name } => WireToolChoice::Function {
                function: WireNamedFunction { name: tool_name },
            },
        }
    }
}

impl ToolChoice {
    /// OpenAI-shaped JSON value.
    pub fn to_openai(&self) -> Value {
        match self {
            ToolChoice::None => Value::String("none".into()),
            ToolChoice::Auto => Value::String("auto".into()),
            ToolChoice::Tool { tool_name } => serde_json::json!({
                "type": "function",
                "function": { "name": tool_name }
            }),
        }
    }
}
