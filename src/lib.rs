//! # llm-relay
//!
//! 面向多个大模型后端的 OpenAI 兼容请求路由与协议转换库。
//!
//! OpenAI-compatible request router and protocol translator. Callers speak one
//! chat/streaming/embeddings dialect; the router resolves the model, translates
//! the request for the owning backend (OpenAI, Anthropic, Vertex/Gemini,
//! OpenRouter), falls back across candidate models, and translates the answer
//! back.
//!
//! ## Core Philosophy
//!
//! - **One dialect in, one dialect out**: every backend is hidden behind the unified types
//! - **Translation is pure**: drivers never do I/O; [`client::BackendClient`] does
//! - **Streaming-First**: deltas are forwarded as they arrive, with exactly one terminal chunk
//! - **Cancellation is safe**: abandoning a stream closes the backend connection once
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use llm_relay::config::RouterConfig;
//! use llm_relay::types::{UnifiedMessage, UnifiedRequest};
//! use llm_relay::LlmRouterBuilder;
//!
//! #[tokio::main]
//! async fn main() -> llm_relay::Result<()> {
//!     let router = LlmRouterBuilder::from_config(RouterConfig::from_env()).build()?;
//!
//!     let request = UnifiedRequest::new(
//!         "claude-3-5-sonnet-20241022",
//!         vec![UnifiedMessage::user("Hello, how are you?")],
//!     );
//!     let response = router.complete(&request).await?;
//!     println!("{:?}", response.first_message().map(|m| m.text()));
//!
//!     let mut stream = router.complete_streaming(&request).await?;
//!     while let Some(chunk) = stream.next().await {
//!         if let Some(text) = chunk?.content() {
//!             print!("{text}");
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | Router, builder, backend clients, streaming sessions |
//! | [`config`] | YAML / environment configuration |
//! | [`drivers`] | Per-backend request and response translation |
//! | [`embeddings`] | Embedding types and vector encoding |
//! | [`pipeline`] | SSE decoding and candidate fallback |
//! | [`registry`] | Model registry contract and in-memory registry |
//! | [`routing`] | Backend kinds, model descriptors, resolution |
//! | [`structured`] | JSON Schema conversion and JSON mode |
//! | [`telemetry`] | Per-request telemetry sessions |
//! | [`transport`] | HTTP transport |
//! | [`types`] | Unified request, message, tool, and response types |

pub mod client;
pub mod config;
pub mod drivers;
pub mod embeddings;
pub mod pipeline;
pub mod registry;
pub mod routing;
pub mod structured;
pub mod telemetry;
pub mod transport;
pub mod types;
pub mod utils;

// Re-export main types for convenience
pub use client::{CancelHandle, ChatCompletionStream, LlmRouter, LlmRouterBuilder};
pub use config::RouterConfig;
pub use embeddings::{EmbeddingRequest, EmbeddingResponse};
pub use routing::{BackendKind, ModelDescriptor};
pub use types::{UnifiedChunk, UnifiedMessage, UnifiedRequest, UnifiedResponse};

use futures::Stream;
use std::pin::Pin;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// A specialized Result for pipeline operations
pub type PipeResult<T> = std::result::Result<T, Error>;

/// A unified pinned, boxed stream that emits `PipeResult<T>`
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = PipeResult<T>> + Send + 'a>>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
