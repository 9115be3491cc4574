//! 模型路由：把入站模型标识解析为具体后端与候选链。
//!
//! Model resolution: turns an inbound model identifier into a [`ModelDescriptor`]
//! (backend, canonical id, ordered fallback chain, capabilities).
//!
//! Precedence:
//! 1. An explicit `provider` on the request always wins over the backend the
//!    registry or the heuristic would pick.
//! 2. When a [`ModelRegistry`] is configured it is authoritative: an unknown id
//!    is [`Error::ModelNotFound`], never a guess.
//! 3. Without a registry, [`resolve_heuristic`] parses the string.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

use crate::registry::ModelRegistry;
use crate::{Error, Result};

/// Closed set of supported backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BackendKind {
    OpenAi,
    Anthropic,
    /// Google Gemini models (generateContent protocol).
    Vertex,
    /// Aggregator fronting many vendors behind an OpenAI-compatible API.
    OpenRouter,
}

impl BackendKind {
    pub const ALL: [BackendKind; 4] = [
        BackendKind::OpenAi,
        BackendKind::Anthropic,
        BackendKind::Vertex,
        BackendKind::OpenRouter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::OpenAi => "openai",
            BackendKind::Anthropic => "anthropic",
            BackendKind::Vertex => "vertex",
            BackendKind::OpenRouter => "openrouter",
        }
    }

    pub fn is_aggregator(&self) -> bool {
        matches!(self, BackendKind::OpenRouter)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(BackendKind::OpenAi),
            "anthropic" => Ok(BackendKind::Anthropic),
            "vertex" => Ok(BackendKind::Vertex),
            "openrouter" => Ok(BackendKind::OpenRouter),
            other => Err(Error::validation(format!("unknown backend '{}'", other))),
        }
    }
}

impl TryFrom<String> for BackendKind {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<BackendKind> for String {
    fn from(k: BackendKind) -> Self {
        k.as_str().to_string()
    }
}

/// What a resolved model can do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCapabilities {
    /// Accepts image parts in user messages.
    pub vision: bool,
    /// Backend honours schema-constrained decoding natively.
    pub structured_output: bool,
    /// Embedding endpoint accepts a `dimensions` override.
    pub embedding_dimensions: bool,
    /// Default output token cap for this model, if known.
    pub max_tokens: Option<u32>,
}

impl ModelCapabilities {
    /// Defaults for a model family when nothing is declared.
    pub fn infer(backend: BackendKind, canonical_model: &str) -> Self {
        let m = canonical_model.to_ascii_lowercase();
        let text_only = ["gpt-3.5", "o1-mini", "o3-mini", "text-embedding", "embedding"]
            .iter()
            .any(|p| m.contains(p));
        Self {
            vision: !text_only,
            structured_output: backend != BackendKind::Anthropic,
            embedding_dimensions: match backend {
                BackendKind::OpenAi | BackendKind::OpenRouter => {
                    m.contains("text-embedding-3")
                }
                BackendKind::Vertex => true,
                BackendKind::Anthropic => false,
            },
            max_tokens: None,
        }
    }

    /// Inferred defaults with `declared` flags taking precedence.
    pub fn with_declared(
        backend: BackendKind,
        canonical_model: &str,
        declared: &DeclaredCapabilities,
        max_tokens: Option<u32>,
    ) -> Self {
        let inferred = Self::infer(backend, canonical_model);
        Self {
            vision: declared.vision.unwrap_or(inferred.vision),
            structured_output: declared
                .structured_output
                .unwrap_or(inferred.structured_output),
            embedding_dimensions: declared
                .embedding_dimensions
                .unwrap_or(inferred.embedding_dimensions),
            max_tokens,
        }
    }
}

/// Capability flags a registry entry states outright. `None` means "infer
/// from backend and model name".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclaredCapabilities {
    pub vision: Option<bool>,
    pub structured_output: Option<bool>,
    pub embedding_dimensions: Option<bool>,
}

/// Everything the router needs to know about one model for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Identifier as requested by the caller.
    pub id: String,
    pub backend: BackendKind,
    /// Model id understood by the backend.
    pub canonical_model: String,
    /// Tried in order after `canonical_model` fails.
    #[serde(default)]
    pub fallback_models: Vec<String>,
    /// Opaque backend-specific routing preferences (aggregator provider hints).
    #[serde(default)]
    pub routing_hint: Option<Value>,
    pub capabilities: ModelCapabilities,
    /// Flags kept from the registry entry when the backend is overridden.
    #[serde(default)]
    pub declared: DeclaredCapabilities,
}

impl ModelDescriptor {
    pub fn new(
        id: impl Into<String>,
        backend: BackendKind,
        canonical_model: impl Into<String>,
    ) -> Self {
        let canonical_model = canonical_model.into();
        let capabilities = ModelCapabilities::infer(backend, &canonical_model);
        Self {
            id: id.into(),
            backend,
            canonical_model,
            fallback_models: Vec::new(),
            routing_hint: None,
            capabilities,
            declared: DeclaredCapabilities::default(),
        }
    }

    pub fn with_fallbacks(mut self, fallbacks: Vec<String>) -> Self {
        self.fallback_models = fallbacks;
        self
    }

    pub fn with_routing_hint(mut self, hint: Value) -> Self {
        self.routing_hint = Some(hint);
        self
    }

    /// Point the descriptor at another backend. Undeclared capabilities are
    /// inferred again for the new backend.
    pub fn retarget(&mut self, backend: BackendKind) {
        self.backend = backend;
        self.capabilities = ModelCapabilities::with_declared(
            backend,
            &self.canonical_model,
            &self.declared,
            self.capabilities.max_tokens,
        );
    }

    /// `[canonical_model] ++ fallback_models`, in order.
    pub fn candidates(&self) -> Vec<String> {
        std::iter::once(self.canonical_model.clone())
            .chain(self.fallback_models.iter().cloned())
            .collect()
    }
}

/// Resolves model ids, consulting the registry when one is configured.
#[derive(Clone, Default)]
pub struct ModelResolver {
    registry: Option<Arc<dyn ModelRegistry>>,
}

impl ModelResolver {
    pub fn new(registry: Option<Arc<dyn ModelRegistry>>) -> Self {
        Self { registry }
    }

    pub fn has_registry(&self) -> bool {
        self.registry.is_some()
    }

    pub async fn resolve(
        &self,
        model_id: &str,
        explicit_provider: Option<BackendKind>,
    ) -> Result<ModelDescriptor> {
        let Some(registry) = &self.registry else {
            return Ok(resolve_heuristic(model_id, explicit_provider));
        };

        let mut descriptor = registry
            .get_model(model_id)
            .await?
            .ok_or_else(|| Error::ModelNotFound {
                model: model_id.to_string(),
            })?;

        if let Some(provider) = explicit_provider {
            if provider != descriptor.backend {
                debug!(
                    model = model_id,
                    registry_backend = %descriptor.backend,
                    explicit_backend = %provider,
                    "explicit provider overrides registry backend"
                );
                descriptor.retarget(provider);
            }
        }
        Ok(descriptor)
    }
}

impl fmt::Debug for ModelResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelResolver")
            .field("registry", &self.registry.is_some())
            .finish()
    }
}

/// Registry-less resolution by parsing the model string.
pub fn resolve_heuristic(model_id: &str, explicit_provider: Option<BackendKind>) -> ModelDescriptor {
    let (inferred, canonical) = match model_id.split_once('/') {
        Some((prefix, rest)) => match prefix.parse::<BackendKind>() {
            Ok(kind) if !rest.is_empty() => (kind, rest.to_string()),
            // vendor/model ids the aggregator understands as-is, e.g. "meta-llama/llama-3-70b"
            _ => (BackendKind::OpenRouter, model_id.to_string()),
        },
        None => (infer_backend_from_name(model_id), model_id.to_string()),
    };

    let backend = explicit_provider.unwrap_or(inferred);
    ModelDescriptor::new(model_id, backend, canonical)
}

fn infer_backend_from_name(model: &str) -> BackendKind {
    let m = model.to_ascii_lowercase();
    if m.contains("claude") {
        BackendKind::Anthropic
    } else if m.contains("gemini") || m.contains("vertex") {
        BackendKind::Vertex
    } else if m.starts_with("gpt-")
        || m.starts_with("chatgpt")
        || m.starts_with("text-embedding")
        || m.contains("davinci")
        || is_openai_reasoning_family(&m)
    {
        BackendKind::OpenAi
    } else {
        BackendKind::OpenRouter
    }
}

// o1, o1-mini, o3-2025-04-16, o4-mini ...
fn is_openai_reasoning_family(m: &str) -> bool {
    ["o1", "o3", "o4"].iter().any(|family| {
        m.strip_prefix(family)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('-'))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_prefix_is_stripped() {
        let d = resolve_heuristic("anthropic/claude-3-5-sonnet", None);
        assert_eq!(d.backend, BackendKind::Anthropic);
        assert_eq!(d.canonical_model, "claude-3-5-sonnet");
        assert_eq!(d.id, "anthropic/claude-3-5-sonnet");
    }

    #[test]
    fn prefix_is_case_insensitive_and_split_once() {
        let d = resolve_heuristic("OpenAI/ft:gpt-4o/custom", None);
        assert_eq!(d.backend, BackendKind::OpenAi);
        assert_eq!(d.canonical_model, "ft:gpt-4o/custom");
    }

    #[test]
    fn unknown_prefix_goes_to_aggregator_whole() {
        let d = resolve_heuristic("meta-llama/llama-3-70b", None);
        assert_eq!(d.backend, BackendKind::OpenRouter);
        assert_eq!(d.canonical_model, "meta-llama/llama-3-70b");
    }

    #[test]
    fn vendor_substrings() {
        assert_eq!(resolve_heuristic("claude-3-haiku", None).backend, BackendKind::Anthropic);
        assert_eq!(resolve_heuristic("gemini-1.5-pro", None).backend, BackendKind::Vertex);
        assert_eq!(resolve_heuristic("gpt-4o-mini", None).backend, BackendKind::OpenAi);
        assert_eq!(resolve_heuristic("o3-mini", None).backend, BackendKind::OpenAi);
        assert_eq!(resolve_heuristic("o1", None).backend, BackendKind::OpenAi);
        assert_eq!(resolve_heuristic("omni-x", None).backend, BackendKind::OpenRouter);
        assert_eq!(resolve_heuristic("mistral-large", None).backend, BackendKind::OpenRouter);
    }

    #[test]
    fn explicit_provider_wins() {
        let d = resolve_heuristic("claude-3-haiku", Some(BackendKind::OpenRouter));
        assert_eq!(d.backend, BackendKind::OpenRouter);
        assert_eq!(d.canonical_model, "claude-3-haiku");
    }

    #[test]
    fn capability_defaults() {
        let c = ModelCapabilities::infer(BackendKind::Anthropic, "claude-3-haiku");
        assert!(c.vision);
        assert!(!c.structured_output);
        let c = ModelCapabilities::infer(BackendKind::OpenAi, "gpt-3.5-turbo");
        assert!(!c.vision);
        let c = ModelCapabilities::infer(BackendKind::OpenAi, "text-embedding-3-small");
        assert!(c.embedding_dimensions);
        let c = ModelCapabilities::infer(BackendKind::OpenAi, "text-embedding-ada-002");
        assert!(!c.embedding_dimensions);
    }

    #[test]
    fn backend_kind_parses_case_insensitively() {
        assert_eq!("OpenRouter".parse::<BackendKind>().unwrap(), BackendKind::OpenRouter);
        assert!("cohere".parse::<BackendKind>().is_err());
        let k: BackendKind = serde_json::from_value(serde_json::json!("ANTHROPIC")).unwrap();
        assert_eq!(k, BackendKind::Anthropic);
        assert_eq!(serde_json::to_value(k).unwrap(), "anthropic");
    }
}
