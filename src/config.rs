//! 路由器配置：后端凭据、HTTP 参数与可选的模型注册表条目。
//!
//! Router configuration.
//!
//! Loaded from YAML and/or the environment. Environment variables override
//! file values:
//!
//! | Variable | Effect |
//! |----------|--------|
//! | `OPENAI_API_KEY` / `OPENAI_BASE_URL` | openai credentials |
//! | `ANTHROPIC_API_KEY` / `ANTHROPIC_BASE_URL` | anthropic credentials |
//! | `GEMINI_API_KEY` / `GEMINI_BASE_URL` | vertex credentials |
//! | `OPENROUTER_API_KEY` / `OPENROUTER_BASE_URL` | openrouter credentials |
//! | `LLM_RELAY_HTTP_TIMEOUT_SECS` | non-streaming request timeout |
//! | `LLM_RELAY_PROXY_URL` | proxy for all backends |
//!
//! ```rust
//! use llm_relay::config::RouterConfig;
//! use llm_relay::routing::BackendKind;
//!
//! let config = RouterConfig::from_yaml_str(r#"
//! backends:
//!   anthropic:
//!     api_key: sk-ant-test
//!     default_max_tokens: 2048
//! models:
//!   - id: fast
//!     provider: anthropic
//!     model: claude-3-haiku-20240307
//!     fallback_models: [claude-3-5-haiku-20241022]
//! "#).unwrap();
//!
//! assert!(config.backend(BackendKind::Anthropic).is_some());
//! assert_eq!(config.models.len(), 1);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use url::Url;

use crate::error::ErrorContext;
use crate::registry::ModelEntry;
use crate::routing::BackendKind;
use crate::transport::HttpSettings;
use crate::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Defaults to the public endpoint for the backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Output cap applied when neither the request nor the model declares one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
}

impl BackendConfig {
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            ..Self::default()
        }
    }

    pub fn base_url_or_default(&self, kind: BackendKind) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| default_base_url(kind).to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openai: Option<BackendConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anthropic: Option<BackendConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vertex: Option<BackendConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openrouter: Option<BackendConfig>,
}

impl BackendsConfig {
    pub fn get(&self, kind: BackendKind) -> Option<&BackendConfig> {
        match kind {
            BackendKind::OpenAi => self.openai.as_ref(),
            BackendKind::Anthropic => self.anthropic.as_ref(),
            BackendKind::Vertex => self.vertex.as_ref(),
            BackendKind::OpenRouter => self.openrouter.as_ref(),
        }
    }

    fn slot(&mut self, kind: BackendKind) -> &mut Option<BackendConfig> {
        match kind {
            BackendKind::OpenAi => &mut self.openai,
            BackendKind::Anthropic => &mut self.anthropic,
            BackendKind::Vertex => &mut self.vertex,
            BackendKind::OpenRouter => &mut self.openrouter,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default)]
    pub backends: BackendsConfig,
    #[serde(default)]
    pub http: HttpSettings,
    /// Seeds an in-memory registry. Empty means heuristic routing.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub models: Vec<ModelEntry>,
}

pub fn default_base_url(kind: BackendKind) -> &'static str {
    match kind {
        BackendKind::OpenAi => "https://api.openai.com/v1",
        BackendKind::Anthropic => "https://api.anthropic.com/v1",
        BackendKind::Vertex => "https://generativelanguage.googleapis.com/v1beta",
        BackendKind::OpenRouter => "https://openrouter.ai/api/v1",
    }
}

fn env_prefix(kind: BackendKind) -> &'static str {
    match kind {
        BackendKind::OpenAi => "OPENAI",
        BackendKind::Anthropic => "ANTHROPIC",
        BackendKind::Vertex => "GEMINI",
        BackendKind::OpenRouter => "OPENROUTER",
    }
}

impl RouterConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: RouterConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&raw).map_err(|e| match e {
            Error::Yaml(inner) => Error::configuration_with_context(
                format!("failed to parse {}: {}", path.display(), inner),
                ErrorContext::new().with_source("config_file"),
            ),
            other => other,
        })
    }

    /// Configuration taken entirely from the environment.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`. A backend section is created when its
    /// API key appears only in the environment.
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        for kind in BackendKind::ALL {
            let prefix = env_prefix(kind);
            let api_key = lookup(&format!("{prefix}_API_KEY"));
            let base_url = lookup(&format!("{prefix}_BASE_URL"));
            if api_key.is_none() && base_url.is_none() {
                continue;
            }
            let section = self.backends.slot(kind).get_or_insert_with(BackendConfig::default);
            if api_key.is_some() {
                section.api_key = api_key;
            }
            if base_url.is_some() {
                section.base_url = base_url;
            }
        }
        self.http.apply_env_with(lookup);
    }

    pub fn backend(&self, kind: BackendKind) -> Option<&BackendConfig> {
        self.backends.get(kind)
    }

    pub fn with_backend(mut self, kind: BackendKind, backend: BackendConfig) -> Self {
        *self.backends.slot(kind) = Some(backend);
        self
    }

    pub fn with_models(mut self, models: Vec<ModelEntry>) -> Self {
        self.models = models;
        self
    }

    pub fn validate(&self) -> Result<()> {
        for kind in BackendKind::ALL {
            let Some(backend) = self.backend(kind) else {
                continue;
            };
            if let Some(base_url) = &backend.base_url {
                Url::parse(base_url).map_err(|e| {
                    Error::configuration_with_context(
                        format!("invalid base_url for {kind}: {e}"),
                        ErrorContext::new()
                            .with_field_path(format!("backends.{kind}.base_url")),
                    )
                })?;
            }
            if backend.default_max_tokens == Some(0) {
                return Err(Error::configuration_with_context(
                    "default_max_tokens must be greater than zero",
                    ErrorContext::new()
                        .with_field_path(format!("backends.{kind}.default_max_tokens")),
                ));
            }
        }
        for (i, entry) in self.models.iter().enumerate() {
            if entry.id.trim().is_empty() {
                return Err(Error::configuration_with_context(
                    "model id must not be empty",
                    ErrorContext::new().with_field_path(format!("models[{i}].id")),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_overrides_file_values() {
        let mut config = RouterConfig::from_yaml_str(
            r#"
backends:
  openai:
    api_key: from-file
http:
  timeout_secs: 5
"#,
        )
        .unwrap();
        let env: HashMap<&str, &str> = [
            ("OPENAI_API_KEY", "from-env"),
            ("GEMINI_API_KEY", "g-key"),
            ("LLM_RELAY_PROXY_URL", "http://proxy:8080"),
            ("ANTHROPIC_API_KEY", "  "),
        ]
        .into_iter()
        .collect();
        config.apply_env_with(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(
            config.backend(BackendKind::OpenAi).unwrap().api_key.as_deref(),
            Some("from-env")
        );
        assert_eq!(
            config.backend(BackendKind::Vertex).unwrap().api_key.as_deref(),
            Some("g-key")
        );
        assert!(config.backend(BackendKind::Anthropic).is_none());
        assert_eq!(config.http.timeout_secs, 5);
        assert_eq!(config.http.proxy_url.as_deref(), Some("http://proxy:8080"));
    }

    #[test]
    fn rejects_malformed_base_url() {
        let err = RouterConfig::from_yaml_str(
            r#"
backends:
  openrouter:
    base_url: "not a url"
"#,
        )
        .unwrap_err();
        assert_eq!(
            err.context().and_then(|c| c.field_path.as_deref()),
            Some("backends.openrouter.base_url")
        );
    }

    #[test]
    fn default_base_urls() {
        let b = BackendConfig::default();
        assert_eq!(
            b.base_url_or_default(BackendKind::Vertex),
            "https://generativelanguage.googleapis.com/v1beta"
        );
    }
}
