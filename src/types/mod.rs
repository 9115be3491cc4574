//! 类型系统模块：定义统一（OpenAI 兼容）的请求、消息、工具与响应类型。
//!
//! # Types Module
//!
//! The unified, OpenAI-compatible representation every backend is translated
//! to and from.
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`UnifiedRequest`] | Inbound chat request |
//! | [`UnifiedMessage`] | Chat message with role, text or multimodal content, tool calls |
//! | [`ToolDefinition`] / [`ToolCall`] | Tool declarations and invocations |
//! | [`UnifiedResponse`] | Single-shot completion |
//! | [`UnifiedChunk`] | Streamed fragment; the terminal one carries finish reason and usage |
//!
//! ## Example
//!
//! ```rust
//! use llm_relay::types::{ToolDefinition, UnifiedMessage, UnifiedRequest};
//!
//! let req = UnifiedRequest::new(
//!     "claude-3-5-sonnet",
//!     vec![
//!         UnifiedMessage::system("You are a helpful assistant"),
//!         UnifiedMessage::user("What's the weather?"),
//!     ],
//! )
//! .with_tools(vec![ToolDefinition::new(
//!     "get_weather",
//!     Some("Get current weather for a location".to_string()),
//!     serde_json::json!({
//!         "type": "object",
//!         "properties": { "location": { "type": "string" } },
//!         "required": ["location"]
//!     }),
//! )]);
//! assert!(req.validate().is_ok());
//! ```

pub mod message;
pub mod request;
pub mod response;
pub mod tool;

pub use message::{ContentPart, ImageUrl, MessageContent, Role, UnifiedMessage};
pub use request::{JsonSchemaFormat, ResponseFormat, UnifiedRequest};
pub use response::{
    Choice, ChunkChoice, FinishReason, MessageDelta, ToolCallDelta, UnifiedChunk,
    UnifiedResponse, Usage,
};
pub use tool::{ToolCall, ToolChoice, ToolDefinition};
