//! JSON-Schema to structured parameter tree conversion.
//!
//! Tool parameter schemas and response schemas arrive as JSON Schema. They are
//! parsed into a [`SchemaNode`] tree (a closed tagged union) and rendered back
//! out in whichever dialect a backend speaks. Constructs the tree cannot
//! express (`anyOf`, `oneOf`, unknown types) degrade to a permissive string
//! with a warning instead of failing the request.

use serde_json::{json, Map, Value};
use tracing::warn;

const MAX_DEPTH: usize = 32;

#[derive(Debug, Clone, PartialEq)]
pub struct SchemaNode {
    pub kind: NodeKind,
    pub description: Option<String>,
    pub nullable: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Object(Vec<Property>),
    Array(Box<SchemaNode>),
    String,
    /// Closed set of string choices.
    Enum(Vec<String>),
    Number,
    Integer,
    Boolean,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub name: String,
    pub schema: SchemaNode,
    /// True when the property is not listed in the parent's `required`.
    pub optional: bool,
}

impl SchemaNode {
    fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            description: None,
            nullable: false,
        }
    }

    pub fn string() -> Self {
        Self::new(NodeKind::String)
    }

    /// Parse a JSON Schema fragment. Never fails; see module docs for degradations.
    pub fn from_json_schema(schema: &Value) -> Self {
        convert(schema, 0, "$")
    }

    /// Names of the top-level properties that are optional.
    pub fn optional_properties(&self) -> Vec<&str> {
        match &self.kind {
            NodeKind::Object(props) => props
                .iter()
                .filter(|p| p.optional)
                .map(|p| p.name.as_str())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Standard JSON Schema (OpenAI, Anthropic).
    pub fn to_json_schema(&self) -> Value {
        let mut out = match &self.kind {
            NodeKind::Object(props) => {
                let mut properties = Map::new();
                let mut required = Vec::new();
                for p in props {
                    properties.insert(p.name.clone(), p.schema.to_json_schema());
                    if !p.optional {
                        required.push(Value::String(p.name.clone()));
                    }
                }
                let mut obj = json!({ "type": "object", "properties": properties });
                if !required.is_empty() {
                    obj["required"] = Value::Array(required);
                }
                obj
            }
            NodeKind::Array(items) => json!({ "type": "array", "items": items.to_json_schema() }),
            NodeKind::String => json!({ "type": "string" }),
            NodeKind::Enum(values) => json!({ "type": "string", "enum": values }),
            NodeKind::Number => json!({ "type": "number" }),
            NodeKind::Integer => json!({ "type": "integer" }),
            NodeKind::Boolean => json!({ "type": "boolean" }),
        };
        if self.nullable {
            if let Some(t) = out.get("type").cloned() {
                out["type"] = json!([t, "null"]);
            }
        }
        if let Some(d) = &self.description {
            out["description"] = Value::String(d.clone());
        }
        out
    }

    /// OpenAPI 3.0 subset used by Gemini function declarations and response schemas.
    pub fn to_openapi_schema(&self) -> Value {
        let mut out = match &self.kind {
            NodeKind::Object(props) => {
                let mut properties = Map::new();
                let mut required = Vec::new();
                for p in props {
                    properties.insert(p.name.clone(), p.schema.to_openapi_schema());
                    if !p.optional {
                        required.push(Value::String(p.name.clone()));
                    }
                }
                let mut obj = json!({ "type": "OBJECT" });
                if !properties.is_empty() {
                    obj["properties"] = Value::Object(properties);
                }
                if !required.is_empty() {
                    obj["required"] = Value::Array(required);
                }
                obj
            }
            NodeKind::Array(items) => json!({ "type": "ARRAY", "items": items.to_openapi_schema() }),
            NodeKind::String => json!({ "type": "STRING" }),
            NodeKind::Enum(values) => json!({ "type": "STRING", "format": "enum", "enum": values }),
            NodeKind::Number => json!({ "type": "NUMBER" }),
            NodeKind::Integer => json!({ "type": "INTEGER" }),
            NodeKind::Boolean => json!({ "type": "BOOLEAN" }),
        };
        if self.nullable {
            out["nullable"] = Value::Bool(true);
        }
        if let Some(d) = &self.description {
            out["description"] = Value::String(d.clone());
        }
        out
    }
}

fn convert(schema: &Value, depth: usize, path: &str) -> SchemaNode {
    let description = schema
        .get("description")
        .and_then(Value::as_str)
        .map(String::from);

    if depth > MAX_DEPTH {
        warn!(path, "schema nesting too deep, degrading to string");
        return with_meta(SchemaNode::string(), description, false);
    }

    let Some(obj) = schema.as_object() else {
        // `true` / `{}`-like schemas accept anything
        return with_meta(SchemaNode::string(), description, false);
    };

    for combinator in ["anyOf", "oneOf", "allOf"] {
        if obj.contains_key(combinator) {
            warn!(path, combinator, "unsupported schema combinator, degrading to string");
            return with_meta(SchemaNode::string(), description, false);
        }
    }

    let (type_name, nullable) = declared_type(obj);

    if let Some(values) = string_choices(obj) {
        if matches!(type_name.as_deref(), None | Some("string")) {
            return with_meta(SchemaNode::new(NodeKind::Enum(values)), description, nullable);
        }
    }

    let inferred = type_name.or_else(|| {
        if obj.contains_key("properties") {
            Some("object".to_string())
        } else if obj.contains_key("items") {
            Some("array".to_string())
        } else {
            None
        }
    });

    let kind = match inferred.as_deref() {
        Some("object") => NodeKind::Object(convert_properties(obj, depth, path)),
        Some("array") => {
            let items = match obj.get("items") {
                Some(items) => convert(items, depth + 1, &format!("{}[]", path)),
                None => SchemaNode::string(),
            };
            NodeKind::Array(Box::new(items))
        }
        Some("string") => NodeKind::String,
        Some("number") => NodeKind::Number,
        Some("integer") => NodeKind::Integer,
        Some("boolean") => NodeKind::Boolean,
        Some(other) => {
            warn!(path, schema_type = other, "unsupported schema type, degrading to string");
            NodeKind::String
        }
        None => NodeKind::String,
    };

    with_meta(SchemaNode::new(kind), description, nullable)
}

fn convert_properties(obj: &Map<String, Value>, depth: usize, path: &str) -> Vec<Property> {
    let required: Vec<&str> = obj
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    obj.get("properties")
        .and_then(Value::as_object)
        .map(|props| {
            props
                .iter()
                .map(|(name, schema)| Property {
                    name: name.clone(),
                    schema: convert(schema, depth + 1, &format!("{}.{}", path, name)),
                    optional: !required.contains(&name.as_str()),
                })
                .collect()
        })
        .unwrap_or_default()
}

// "type": "x" or "type": ["x", "null"]
fn declared_type(obj: &Map<String, Value>) -> (Option<String>, bool) {
    match obj.get("type") {
        Some(Value::String(t)) => (Some(t.clone()), false),
        Some(Value::Array(types)) => {
            let names: Vec<&str> = types.iter().filter_map(Value::as_str).collect();
            let nullable = names.contains(&"null");
            let first = names.into_iter().find(|t| *t != "null").map(String::from);
            (first, nullable)
        }
        _ => (None, obj.get("nullable").and_then(Value::as_bool).unwrap_or(false)),
    }
}

fn string_choices(obj: &Map<String, Value>) -> Option<Vec<String>> {
    if let Some(Value::String(c)) = obj.get("const") {
        return Some(vec![c.clone()]);
    }
    let values = obj.get("enum")?.as_array()?;
    let strings: Vec<String> = values
        .iter()
        .filter_map(|v| v.as_str().map(String::from))
        .collect();
    (!strings.is_empty() && strings.len() == values.len()).then_some(strings)
}

fn with_meta(mut node: SchemaNode, description: Option<String>, nullable: bool) -> SchemaNode {
    node.description = description;
    node.nullable = nullable;
    node
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weather_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "city": {"type": "string", "description": "City name"},
                "unit": {"type": "string", "enum": ["c", "f"]},
                "days": {"type": "integer"},
                "tags": {"type": "array", "items": {"type": "number"}},
                "raw": {"type": "array"}
            },
            "required": ["city", "days"]
        })
    }

    #[test]
    fn non_required_properties_are_optional() {
        let node = SchemaNode::from_json_schema(&weather_schema());
        let mut optional = node.optional_properties();
        optional.sort();
        assert_eq!(optional, vec!["raw", "tags", "unit"]);
    }

    #[test]
    fn enums_integers_and_arrays_are_typed() {
        let node = SchemaNode::from_json_schema(&weather_schema());
        let NodeKind::Object(props) = &node.kind else {
            panic!("expected object");
        };
        let find = |n: &str| props.iter().find(|p| p.name == n).unwrap();
        assert_eq!(
            find("unit").schema.kind,
            NodeKind::Enum(vec!["c".into(), "f".into()])
        );
        assert_eq!(find("days").schema.kind, NodeKind::Integer);
        assert_eq!(
            find("tags").schema.kind,
            NodeKind::Array(Box::new(SchemaNode::new(NodeKind::Number)))
        );
        // missing items: array of strings
        assert_eq!(
            find("raw").schema.kind,
            NodeKind::Array(Box::new(SchemaNode::string()))
        );
        assert_eq!(find("city").schema.description.as_deref(), Some("City name"));
    }

    #[test]
    fn unsupported_constructs_degrade_to_string() {
        let node = SchemaNode::from_json_schema(&json!({
            "anyOf": [{"type": "string"}, {"type": "number"}]
        }));
        assert_eq!(node.kind, NodeKind::String);
        let node = SchemaNode::from_json_schema(&json!({"type": "file"}));
        assert_eq!(node.kind, NodeKind::String);
    }

    #[test]
    fn nullable_type_array_picks_first_non_null() {
        let node = SchemaNode::from_json_schema(&json!({"type": ["null", "integer"]}));
        assert_eq!(node.kind, NodeKind::Integer);
        assert!(node.nullable);
        assert_eq!(node.to_openapi_schema(), json!({"type": "INTEGER", "nullable": true}));
    }

    #[test]
    fn json_schema_rendering_keeps_required_set() {
        let rendered = SchemaNode::from_json_schema(&weather_schema()).to_json_schema();
        let mut required: Vec<&str> = rendered["required"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .collect();
        required.sort();
        assert_eq!(required, vec!["city", "days"]);
        assert_eq!(rendered["properties"]["unit"]["enum"], json!(["c", "f"]));
    }

    #[test]
    fn openapi_rendering_uses_upper_case_types() {
        let rendered = SchemaNode::from_json_schema(&weather_schema()).to_openapi_schema();
        assert_eq!(rendered["type"], "OBJECT");
        assert_eq!(rendered["properties"]["unit"]["format"], "enum");
        assert_eq!(rendered["properties"]["tags"]["items"]["type"], "NUMBER");
    }

    #[test]
    fn deep_nesting_is_bounded() {
        let mut schema = json!({"type": "string"});
        for _ in 0..(MAX_DEPTH + 8) {
            schema = json!({"type": "array", "items": schema});
        }
        // must terminate without overflowing
        let node = SchemaNode::from_json_schema(&schema);
        assert!(matches!(node.kind, NodeKind::Array(_)));
    }
}
