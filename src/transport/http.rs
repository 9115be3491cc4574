use bytes::Bytes;
use futures::TryStreamExt;
use reqwest::Proxy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use tracing::{debug, info};

use crate::client::error_classification::classify_status;
use crate::drivers::DriverRequest;
use crate::routing::BackendKind;
use crate::transport::TransportError;
use crate::{BoxStream, Error, Result};

/// How a backend expects its API key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    /// `Authorization: Bearer <key>`
    Bearer,
    /// `x-api-key: <key>`
    XApiKey,
    /// `x-goog-api-key: <key>`
    GoogApiKey,
}

impl AuthScheme {
    pub fn for_backend(kind: BackendKind) -> Self {
        match kind {
            BackendKind::OpenAi | BackendKind::OpenRouter => AuthScheme::Bearer,
            BackendKind::Anthropic => AuthScheme::XApiKey,
            BackendKind::Vertex => AuthScheme::GoogApiKey,
        }
    }
}

/// Connection tuning shared by all backend clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    /// Whole-request timeout for non-streaming calls.
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout_secs: u64,
    pub proxy_url: Option<String>,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            connect_timeout_secs: 10,
            pool_max_idle_per_host: 32,
            pool_idle_timeout_secs: 90,
            proxy_url: None,
        }
    }
}

impl HttpSettings {
    /// Defaults with `LLM_RELAY_*` environment overrides applied.
    pub fn from_env() -> Self {
        let mut s = Self::default();
        s.apply_env_with(|key| env::var(key).ok());
        s
    }

    /// Apply `LLM_RELAY_HTTP_*` / `LLM_RELAY_PROXY_URL` overrides from `lookup`.
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let parse = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());
        if let Some(v) = parse("LLM_RELAY_HTTP_TIMEOUT_SECS") {
            self.timeout_secs = v;
        }
        if let Some(v) = parse("LLM_RELAY_HTTP_CONNECT_TIMEOUT_SECS") {
            self.connect_timeout_secs = v;
        }
        if let Some(v) = parse("LLM_RELAY_HTTP_POOL_MAX_IDLE_PER_HOST") {
            self.pool_max_idle_per_host = v as usize;
        }
        if let Some(proxy) = lookup("LLM_RELAY_PROXY_URL").filter(|p| !p.is_empty()) {
            self.proxy_url = Some(proxy);
        }
    }
}

/// One pooled HTTP client bound to a backend base URL and credential.
pub struct HttpTransport {
    client: reqwest::Client,
    backend: BackendKind,
    base_url: String,
    api_key: Option<String>,
    auth: AuthScheme,
    extra_headers: HashMap<String, String>,
    request_timeout: Duration,
}

impl HttpTransport {
    pub fn new(
        backend: BackendKind,
        base_url: impl Into<String>,
        api_key: Option<String>,
        extra_headers: HashMap<String, String>,
        settings: &HttpSettings,
    ) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .pool_max_idle_per_host(settings.pool_max_idle_per_host)
            .pool_idle_timeout(Some(Duration::from_secs(settings.pool_idle_timeout_secs)))
            // Conservative HTTP/2 keepalive defaults for long-lived streams.
            .http2_adaptive_window(true)
            .http2_keep_alive_interval(Some(Duration::from_secs(30)))
            .http2_keep_alive_timeout(Duration::from_secs(10));

        if let Some(proxy_url) = &settings.proxy_url {
            let proxy = Proxy::all(proxy_url)
                .map_err(|e| Error::Transport(TransportError::Other(e.to_string())))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| Error::Transport(TransportError::Other(e.to_string())))?;

        Ok(Self {
            client,
            backend,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            auth: AuthScheme::for_backend(backend),
            extra_headers,
            request_timeout: Duration::from_secs(settings.timeout_secs),
        })
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build(&self, req: &DriverRequest) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, req.path);
        let mut builder = self.client.post(&url).json(&req.body);

        if let Some(key) = &self.api_key {
            builder = match self.auth {
                AuthScheme::Bearer => builder.bearer_auth(key),
                AuthScheme::XApiKey => builder.header("x-api-key", key),
                AuthScheme::GoogApiKey => builder.header("x-goog-api-key", key),
            };
        }
        for (k, v) in self.extra_headers.iter().chain(req.headers.iter()) {
            builder = builder.header(k, v);
        }
        if req.stream {
            builder.header("accept", "text/event-stream")
        } else {
            // streams are bounded by the consumer, not a wall clock
            builder.timeout(self.request_timeout)
        }
    }

    /// Send a request and decode a JSON body.
    pub async fn post_json(&self, req: &DriverRequest) -> Result<Value> {
        let resp = self.send(req).await?;
        let json = resp
            .json()
            .await
            .map_err(|e| Error::Transport(TransportError::Http(e)))?;
        Ok(json)
    }

    /// Send a streaming request; yields raw body chunks once the status is known good.
    pub async fn post_stream(&self, req: &DriverRequest) -> Result<BoxStream<'static, Bytes>> {
        let resp = self.send(req).await?;
        let byte_stream = resp
            .bytes_stream()
            .map_err(|e| Error::Transport(TransportError::Http(e)));
        Ok(Box::pin(byte_stream))
    }

    async fn send(&self, req: &DriverRequest) -> Result<reqwest::Response> {
        debug!(backend = %self.backend, path = %req.path, stream = req.stream, "sending backend request");
        let resp = self
            .build(req)
            .send()
            .await
            .map_err(|e| Error::Transport(TransportError::Http(e)))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let code = status.as_u16();
        let class = classify_status(code);
        let body = resp.text().await.unwrap_or_default();
        let message = extract_error_message(&body);
        info!(
            backend = %self.backend,
            http_status = code,
            error_class = class,
            "backend returned error status"
        );
        Err(Error::Backend {
            backend: self.backend,
            status: Some(code),
            class: class.to_string(),
            message,
        })
    }
}

/// Best-effort human message from an error body (OpenAI, Anthropic and Google shapes).
fn extract_error_message(body: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    parsed
        .as_ref()
        .and_then(|v| {
            v.pointer("/error/message")
                .or_else(|| v.get("message"))
                .or_else(|| v.get("error"))
                .and_then(Value::as_str)
                .map(String::from)
        })
        .unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                "empty error body".to_string()
            } else {
                trimmed.chars().take(512).collect()
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_message_shapes() {
        assert_eq!(
            extract_error_message(r#"{"error":{"message":"bad key","type":"auth"}}"#),
            "bad key"
        );
        assert_eq!(extract_error_message(r#"{"error":"nope"}"#), "nope");
        assert_eq!(extract_error_message("upstream timeout"), "upstream timeout");
        assert_eq!(extract_error_message(""), "empty error body");
    }

    #[test]
    fn auth_scheme_per_backend() {
        assert_eq!(AuthScheme::for_backend(BackendKind::Anthropic), AuthScheme::XApiKey);
        assert_eq!(AuthScheme::for_backend(BackendKind::Vertex), AuthScheme::GoogApiKey);
        assert_eq!(AuthScheme::for_backend(BackendKind::OpenRouter), AuthScheme::Bearer);
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let t = HttpTransport::new(
            BackendKind::OpenAi,
            "http://localhost:1234/v1/",
            None,
            HashMap::new(),
            &HttpSettings::default(),
        )
        .unwrap();
        assert_eq!(t.base_url(), "http://localhost:1234/v1");
    }
}
