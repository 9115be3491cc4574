//! Router entry point.
//!
//! Keep the public surface small: build an [`LlmRouter`], then call
//! `complete`, `complete_streaming`, or `embed`.
//! Implementation details are split into submodules under `src/client/`.

pub mod backend;
pub mod builder;
pub mod core;
pub(crate) mod error_classification;
pub mod streaming;

pub use backend::{BackendClient, BackendStream, HttpBackendClient};
pub use builder::LlmRouterBuilder;
pub use core::{failed_attempts, LlmRouter};
pub use streaming::{CancelHandle, ChatCompletionStream};
