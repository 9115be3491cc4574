use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::client::backend::{BackendClient, HttpBackendClient};
use crate::client::core::LlmRouter;
use crate::config::RouterConfig;
use crate::drivers::create_driver;
use crate::registry::{InMemoryModelRegistry, ModelRegistry};
use crate::routing::{BackendKind, ModelResolver};
use crate::telemetry::{noop_telemetry, TelemetryHook};
use crate::transport::HttpTransport;
use crate::Result;

/// Builder for [`LlmRouter`].
///
/// Backends come from the config (a section with an API key or base URL) or
/// are injected directly with [`LlmRouterBuilder::with_backend`].
pub struct LlmRouterBuilder {
    config: RouterConfig,
    registry: Option<Arc<dyn ModelRegistry>>,
    telemetry: Arc<dyn TelemetryHook>,
    backends: HashMap<BackendKind, Arc<dyn BackendClient>>,
    /// Override base URLs (primarily for testing with mock servers)
    base_url_overrides: HashMap<BackendKind, String>,
}

impl Default for LlmRouterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LlmRouterBuilder {
    pub fn new() -> Self {
        Self {
            config: RouterConfig::default(),
            registry: None,
            telemetry: noop_telemetry(),
            backends: HashMap::new(),
            base_url_overrides: HashMap::new(),
        }
    }

    /// Start from a config; see [`RouterConfig::from_env`] for env-only setups.
    pub fn from_config(config: RouterConfig) -> Self {
        Self::new().with_config(config)
    }

    pub fn with_config(mut self, config: RouterConfig) -> Self {
        self.config = config;
        self
    }

    /// Authoritative registry. Takes precedence over `models` in the config.
    pub fn with_registry(mut self, registry: Arc<dyn ModelRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Inject a telemetry hook. Default is a no-op hook.
    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetryHook>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Use `client` for `kind` instead of building one from config.
    pub fn with_backend(mut self, kind: BackendKind, client: Arc<dyn BackendClient>) -> Self {
        self.backends.insert(kind, client);
        self
    }

    pub fn with_base_url_override(mut self, kind: BackendKind, base_url: impl Into<String>) -> Self {
        self.base_url_overrides.insert(kind, base_url.into());
        self
    }

    pub fn build(self) -> Result<LlmRouter> {
        self.config.validate()?;

        let registry = self.registry.or_else(|| {
            if self.config.models.is_empty() {
                None
            } else {
                let registry: Arc<dyn ModelRegistry> =
                    Arc::new(InMemoryModelRegistry::from_entries(&self.config.models));
                Some(registry)
            }
        });

        let mut backends = self.backends;
        let mut drivers = HashMap::new();
        let mut default_max_tokens = HashMap::new();

        for kind in BackendKind::ALL {
            let driver = create_driver(kind);
            drivers.insert(kind, driver.clone());

            let section = self.config.backend(kind).cloned().unwrap_or_default();
            if let Some(max_tokens) = section.default_max_tokens {
                default_max_tokens.insert(kind, max_tokens);
            }
            if backends.contains_key(&kind) {
                continue;
            }

            let override_url = self.base_url_overrides.get(&kind).cloned();
            if section.api_key.is_none() && section.base_url.is_none() && override_url.is_none() {
                continue;
            }
            let base_url = override_url.unwrap_or_else(|| section.base_url_or_default(kind));
            debug!(backend = %kind, base_url = %base_url, "configuring backend client");
            let transport = HttpTransport::new(
                kind,
                base_url,
                section.api_key.clone(),
                section.headers.clone(),
                &self.config.http,
            )?;
            backends.insert(kind, Arc::new(HttpBackendClient::new(transport, driver)));
        }

        Ok(LlmRouter {
            resolver: ModelResolver::new(registry),
            backends,
            drivers,
            telemetry: self.telemetry,
            default_max_tokens,
        })
    }
}
