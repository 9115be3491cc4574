//! Embedding support.
//!
//! - OpenAI-shaped request/response types
//! - base64 wire encoding for `encoding_format: base64`

mod types;
mod vectors;

pub use types::{
    EmbeddingData, EmbeddingInput, EmbeddingRequest, EmbeddingResponse, EmbeddingUsage,
    EmbeddingVector, EncodingFormat,
};
pub use vectors::{decode_base64, encode_base64};
