//! Structured output and tool-parameter schemas.
//!
//! - [`SchemaNode`]: JSON Schema parsed into a closed tree, rendered per backend dialect
//! - [`JsonMode`]: what a `response_format` turns into for a given backend/model
//!
//! # Examples
//!
//! ```
//! use llm_relay::structured::SchemaNode;
//! use serde_json::json;
//!
//! let schema = json!({
//!     "type": "object",
//!     "properties": {
//!         "name": {"type": "string"},
//!         "age": {"type": "integer"}
//!     },
//!     "required": ["name"]
//! });
//!
//! let node = SchemaNode::from_json_schema(&schema);
//! assert_eq!(node.optional_properties(), vec!["age"]);
//! assert_eq!(node.to_openapi_schema()["type"], "OBJECT");
//! ```

pub mod json_mode;
pub mod schema;

pub use json_mode::{JsonMode, SchemaConstraint};
pub use schema::{NodeKind, Property, SchemaNode};
