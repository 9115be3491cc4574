//! Tool parameter schemas as each backend receives them.

use llm_relay::drivers::create_driver;
use llm_relay::routing::resolve_heuristic;
use llm_relay::structured::SchemaNode;
use llm_relay::types::{ToolChoice, ToolDefinition};
use llm_relay::{BackendKind, UnifiedMessage, UnifiedRequest};
use serde_json::{json, Value};
use std::collections::BTreeSet;

fn weather_tool() -> ToolDefinition {
    ToolDefinition::new(
        "get_weather",
        Some("Current weather".into()),
        json!({
            "type": "object",
            "properties": {
                "city": { "type": "string" },
                "unit": { "type": "string", "enum": ["c", "f"] },
                "days": { "type": ["integer", "null"] }
            },
            "required": ["city"]
        }),
    )
}

fn names(v: &Value) -> BTreeSet<String> {
    v.as_array()
        .map(|a| a.iter().filter_map(|s| s.as_str().map(String::from)).collect())
        .unwrap_or_default()
}

#[test]
fn only_non_required_properties_are_optional() {
    let node = SchemaNode::from_json_schema(&weather_tool().parameters);
    let optional: BTreeSet<&str> = node.optional_properties().into_iter().collect();
    assert_eq!(optional, BTreeSet::from(["days", "unit"]));
}

#[test]
fn every_backend_keeps_the_required_set() {
    let req = UnifiedRequest::new("m", vec![UnifiedMessage::user("weather in Oslo?")])
        .with_tools(vec![weather_tool()])
        .with_tool_choice(ToolChoice::Tool {
            tool_name: "get_weather".into(),
        });
    let expected = BTreeSet::from(["city".to_string()]);

    let openai = create_driver(BackendKind::OpenAi)
        .build_chat_payload(&req, &resolve_heuristic("openai/gpt-4o", None))
        .unwrap();
    assert_eq!(
        names(&openai.body["tools"][0]["function"]["parameters"]["required"]),
        expected
    );

    let anthropic = create_driver(BackendKind::Anthropic)
        .build_chat_payload(&req, &resolve_heuristic("claude-3-5-sonnet", None))
        .unwrap();
    assert_eq!(names(&anthropic.body["tools"][0]["input_schema"]["required"]), expected);
    assert_eq!(
        anthropic.body["tool_choice"],
        json!({ "type": "tool", "name": "get_weather" })
    );

    let gemini = create_driver(BackendKind::Vertex)
        .build_chat_payload(&req, &resolve_heuristic("gemini-1.5-pro", None))
        .unwrap();
    let decl = &gemini.body["tools"][0]["functionDeclarations"][0];
    assert_eq!(names(&decl["parameters"]["required"]), expected);
    assert_eq!(decl["parameters"]["properties"]["unit"]["format"], "enum");
    assert_eq!(decl["parameters"]["properties"]["days"]["nullable"], true);
}
