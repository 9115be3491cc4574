//! 流水线处理模块：SSE 解码与候选模型回退执行。
//!
//! # Pipeline
//!
//! ```text
//! Raw Bytes → SseDecoder → data payloads → driver parse → BackendEvents
//!
//! candidates [A, B, C] → FallbackExecutor → first success | AllCandidatesFailed
//! ```
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`decode`] | Server-Sent Events frame decoder |
//! | [`fallback`] | Sequential candidate fallback |

pub mod decode;
pub mod fallback;

pub use decode::SseDecoder;
pub use fallback::{FallbackExecutor, FallbackSuccess};
