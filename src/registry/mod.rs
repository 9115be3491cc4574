//! 模型注册表：模型元数据查询接口及内存实现
//!
//! Model registry lookup. Persistence of model metadata lives outside this
//! crate; the router only needs [`ModelRegistry::get_model`]. The in-memory
//! implementation is seeded from configuration (see [`crate::config`]) or tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::routing::{BackendKind, DeclaredCapabilities, ModelCapabilities, ModelDescriptor};
use crate::Result;

/// Source of truth for model metadata.
#[async_trait]
pub trait ModelRegistry: Send + Sync {
    /// `Ok(None)` means the id is unknown.
    async fn get_model(&self, id: &str) -> Result<Option<ModelDescriptor>>;
}

/// Declarative model document, as stored by operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEntry {
    pub id: String,
    pub provider: BackendKind,
    /// Backend-native model id; defaults to `id`.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub fallback_models: Vec<String>,
    /// Aggregator provider preferences, forwarded untouched.
    #[serde(default)]
    pub routing_hint: Option<Value>,
    #[serde(default)]
    pub supports_image_upload: Option<bool>,
    #[serde(default)]
    pub supports_structured_output: Option<bool>,
    #[serde(default)]
    pub supports_embedding_dimensions: Option<bool>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl ModelEntry {
    pub fn new(id: impl Into<String>, provider: BackendKind) -> Self {
        Self {
            id: id.into(),
            provider,
            model: None,
            fallback_models: Vec::new(),
            routing_hint: None,
            supports_image_upload: None,
            supports_structured_output: None,
            supports_embedding_dimensions: None,
            max_tokens: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_fallbacks<I, S>(mut self, fallbacks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fallback_models = fallbacks.into_iter().map(Into::into).collect();
        self
    }

    pub fn to_descriptor(&self) -> ModelDescriptor {
        let canonical = self.model.clone().unwrap_or_else(|| self.id.clone());
        let declared = DeclaredCapabilities {
            vision: self.supports_image_upload,
            structured_output: self.supports_structured_output,
            embedding_dimensions: self.supports_embedding_dimensions,
        };
        ModelDescriptor {
            id: self.id.clone(),
            backend: self.provider,
            capabilities: ModelCapabilities::with_declared(
                self.provider,
                &canonical,
                &declared,
                self.max_tokens,
            ),
            canonical_model: canonical,
            fallback_models: self.fallback_models.clone(),
            routing_hint: self.routing_hint.clone(),
            declared,
        }
    }
}

/// Registry backed by a map; read-only after construction.
#[derive(Debug, Clone, Default)]
pub struct InMemoryModelRegistry {
    models: HashMap<String, ModelDescriptor>,
}

impl InMemoryModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a ModelEntry>) -> Self {
        let models = entries
            .into_iter()
            .map(|e| (e.id.clone(), e.to_descriptor()))
            .collect();
        Self { models }
    }

    pub fn insert(&mut self, descriptor: ModelDescriptor) {
        self.models.insert(descriptor.id.clone(), descriptor);
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

#[async_trait]
impl ModelRegistry for InMemoryModelRegistry {
    async fn get_model(&self, id: &str) -> Result<Option<ModelDescriptor>> {
        Ok(self.models.get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_defaults_model_and_capabilities() {
        let entry: ModelEntry = serde_yaml::from_str(
            "id: fast-chat\nprovider: openrouter\nmodel: mistralai/mistral-small\nfallback_models: [openai/gpt-4o-mini]\nsupports_image_upload: false\nrouting_hint:\n  order: [Together]\n",
        )
        .unwrap();
        let d = entry.to_descriptor();
        assert_eq!(d.backend, BackendKind::OpenRouter);
        assert_eq!(d.canonical_model, "mistralai/mistral-small");
        assert_eq!(d.candidates(), vec!["mistralai/mistral-small", "openai/gpt-4o-mini"]);
        assert!(!d.capabilities.vision);
        assert!(d.routing_hint.is_some());

        let bare = ModelEntry::new("claude-3-haiku", BackendKind::Anthropic).to_descriptor();
        assert_eq!(bare.canonical_model, "claude-3-haiku");
        assert!(!bare.capabilities.structured_output);
    }

    #[tokio::test]
    async fn lookup_by_id() {
        let reg = InMemoryModelRegistry::from_entries(&[ModelEntry::new(
            "gpt-4o",
            BackendKind::OpenAi,
        )]);
        assert!(reg.get_model("gpt-4o").await.unwrap().is_some());
        assert!(reg.get_model("missing").await.unwrap().is_none());
    }
}
