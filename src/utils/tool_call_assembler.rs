use std::collections::BTreeMap;

use crate::types::tool::{parse_arguments, ToolCall};

#[derive(Debug, Default)]
struct PartialToolCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// Collects streamed tool call deltas (keyed by output index) into final
/// [`ToolCall`]s. Tolerant: arguments that never form valid JSON are kept as
/// the raw string.
#[derive(Debug, Default)]
pub struct ToolCallAssembler {
    calls: BTreeMap<u32, PartialToolCall>,
}

impl ToolCallAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// First non-empty id/name wins; argument fragments are appended.
    pub fn on_delta(
        &mut self,
        index: u32,
        id: Option<&str>,
        name: Option<&str>,
        arguments: Option<&str>,
    ) {
        let slot = self.calls.entry(index).or_default();
        if slot.id.is_none() {
            slot.id = id.filter(|s| !s.is_empty()).map(str::to_string);
        }
        if slot.name.is_none() {
            slot.name = name.filter(|s| !s.is_empty()).map(str::to_string);
        }
        if let Some(fragment) = arguments {
            slot.arguments.push_str(fragment);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Calls in index order. Missing ids are synthesized.
    pub fn finalize(self) -> Vec<ToolCall> {
        self.calls
            .into_iter()
            .map(|(index, partial)| ToolCall {
                id: partial.id.unwrap_or_else(|| format!("call_{index}")),
                tool_name: partial.name.unwrap_or_default(),
                arguments: parse_arguments(&partial.arguments),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn assembles_interleaved_fragments_by_index() {
        let mut asm = ToolCallAssembler::new();
        asm.on_delta(0, Some("call_a"), Some("lookup"), Some("{\"q\":"));
        asm.on_delta(1, Some("call_b"), Some("search"), None);
        asm.on_delta(0, None, None, Some("\"x\"}"));
        asm.on_delta(1, None, None, Some("not json"));

        let calls = asm.finalize();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "call_a");
        assert_eq!(calls[0].tool_name, "lookup");
        assert_eq!(calls[0].arguments, json!({"q": "x"}));
        assert_eq!(calls[1].arguments, json!("not json"));
    }

    #[test]
    fn empty_arguments_become_empty_object() {
        let mut asm = ToolCallAssembler::new();
        asm.on_delta(3, None, Some("ping"), None);
        let calls = asm.finalize();
        assert_eq!(calls[0].id, "call_3");
        assert_eq!(calls[0].arguments, json!({}));
    }
}
