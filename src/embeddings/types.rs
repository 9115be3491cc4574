//! Embedding request and response types (OpenAI `/embeddings` shape).

use serde::{Deserialize, Serialize};

use crate::routing::BackendKind;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    pub input: EmbeddingInput,
    pub model: String,
    /// Forces a backend, bypassing inference or registry routing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<BackendKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding_format: Option<EncodingFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EmbeddingInput {
    Single(String),
    Batch(Vec<String>),
}

impl EmbeddingInput {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            EmbeddingInput::Single(s) => vec![s],
            EmbeddingInput::Batch(v) => v,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            EmbeddingInput::Single(_) => 1,
            EmbeddingInput::Batch(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodingFormat {
    #[default]
    Float,
    Base64,
}

impl EmbeddingRequest {
    pub fn single(model: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(model, EmbeddingInput::Single(text.into()))
    }

    pub fn batch(model: impl Into<String>, texts: Vec<String>) -> Self {
        Self::new(model, EmbeddingInput::Batch(texts))
    }

    fn new(model: impl Into<String>, input: EmbeddingInput) -> Self {
        Self {
            input,
            model: model.into(),
            provider: None,
            encoding_format: None,
            dimensions: None,
            user: None,
        }
    }

    pub fn with_provider(mut self, provider: BackendKind) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_encoding_format(mut self, format: EncodingFormat) -> Self {
        self.encoding_format = Some(format);
        self
    }

    pub fn with_dimensions(mut self, dimensions: u32) -> Self {
        self.dimensions = Some(dimensions);
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(Error::validation("model must not be empty"));
        }
        if self.input.is_empty() {
            return Err(Error::validation("input must contain at least one string"));
        }
        if self.dimensions == Some(0) {
            return Err(Error::validation("dimensions must be greater than zero"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    #[serde(default = "list_object")]
    pub object: String,
    /// Sorted by `index`.
    pub data: Vec<EmbeddingData>,
    pub model: String,
    pub usage: EmbeddingUsage,
}

fn list_object() -> String {
    "list".to_string()
}

impl EmbeddingResponse {
    pub fn new(model: impl Into<String>, data: Vec<EmbeddingData>, usage: EmbeddingUsage) -> Self {
        Self {
            object: list_object(),
            data,
            model: model.into(),
            usage,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingData {
    #[serde(default = "embedding_object")]
    pub object: String,
    pub index: usize,
    pub embedding: EmbeddingVector,
}

fn embedding_object() -> String {
    "embedding".to_string()
}

impl EmbeddingData {
    pub fn new(index: usize, embedding: EmbeddingVector) -> Self {
        Self {
            object: embedding_object(),
            index,
            embedding,
        }
    }
}

/// Float array, or base64 of little-endian f32 bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EmbeddingVector {
    Float(Vec<f32>),
    Base64(String),
}

impl EmbeddingVector {
    pub fn as_floats(&self) -> Option<&[f32]> {
        match self {
            EmbeddingVector::Float(v) => Some(v),
            EmbeddingVector::Base64(_) => None,
        }
    }

    /// Decoded vector, whatever the encoding.
    pub fn to_floats(&self) -> Result<Vec<f32>> {
        match self {
            EmbeddingVector::Float(v) => Ok(v.clone()),
            EmbeddingVector::Base64(s) => super::vectors::decode_base64(s),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingUsage {
    pub prompt_tokens: u64,
    pub total_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_single_or_batch_input() {
        let single: EmbeddingRequest =
            serde_json::from_value(json!({"model": "text-embedding-3-small", "input": "hi"})).unwrap();
        assert_eq!(single.input.len(), 1);

        let batch: EmbeddingRequest = serde_json::from_value(json!({
            "model": "text-embedding-3-small",
            "input": ["a", "b"],
            "encoding_format": "base64",
            "provider": "openai"
        }))
        .unwrap();
        assert_eq!(batch.input.len(), 2);
        assert_eq!(batch.encoding_format, Some(EncodingFormat::Base64));
        assert_eq!(batch.provider, Some(BackendKind::OpenAi));
    }

    #[test]
    fn rejects_empty_batch() {
        let req = EmbeddingRequest::batch("m", vec![]);
        assert!(matches!(req.validate(), Err(Error::Validation { .. })));
    }
}
