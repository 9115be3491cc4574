use crate::routing::BackendKind;
use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "request.messages[2].tool_call_id")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected range, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "request_validator", "router_builder")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// One failed (or successful) candidate in a fallback sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    pub candidate_model: String,
    pub succeeded: bool,
    pub error: Option<String>,
}

/// Unified error type for the router.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Model not found: {model}")]
    ModelNotFound { model: String },

    #[error("Backend error from {backend}{}: ({class}) {message}", format_status(.status))]
    Backend {
        backend: BackendKind,
        status: Option<u16>,
        class: String,
        message: String,
    },

    #[error("All {} candidate model(s) failed; last error: {last}", .attempts.len())]
    AllCandidatesFailed {
        attempts: Vec<AttemptRecord>,
        last: Box<Error>,
    },

    #[error("Stream failed after output started: {0}")]
    StreamMidFlight(Box<Error>),

    #[error("Operation '{operation}' is not supported by backend {backend}")]
    Unsupported {
        backend: BackendKind,
        operation: &'static str,
    },

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Validation error: {message}{}", format_context(.context))]
    Validation {
        message: String,
        context: ErrorContext,
    },

    #[error("Network transport error: {0}")]
    Transport(#[from] crate::transport::TransportError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

fn format_status(status: &Option<u16>) -> String {
    match status {
        Some(s) => format!(" (HTTP {})", s),
        None => String::new(),
    }
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation {
            message: msg.into(),
            context: ErrorContext::new(),
        }
    }

    /// Create a new validation error with structured context
    pub fn validation_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Validation {
            message: msg.into(),
            context,
        }
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Error::Configuration {
            message: msg.into(),
            context: ErrorContext::new(),
        }
    }

    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    /// A malformed or unexpected payload coming back from a backend.
    pub fn backend_protocol(backend: BackendKind, msg: impl Into<String>) -> Self {
        Error::Backend {
            backend,
            status: None,
            class: "invalid_response".to_string(),
            message: msg.into(),
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. } | Error::Validation { context, .. } => {
                Some(context)
            }
            _ => None,
        }
    }

    /// Error class for logs and telemetry, e.g. "rate_limited" or "model_not_found".
    pub fn class(&self) -> &str {
        match self {
            Error::ModelNotFound { .. } => "model_not_found",
            Error::Backend { class, .. } => class,
            Error::AllCandidatesFailed { last, .. } => last.class(),
            Error::StreamMidFlight(inner) => inner.class(),
            Error::Unsupported { .. } => "unsupported",
            Error::Configuration { .. } => "configuration",
            Error::Validation { .. } => "invalid_request",
            Error::Transport(_) => "transport",
            Error::Io(_) => "io",
            Error::Serialization(_) | Error::Yaml(_) => "serialization",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_error_display_includes_status() {
        let err = Error::Backend {
            backend: BackendKind::Anthropic,
            status: Some(429),
            class: "rate_limited".into(),
            message: "slow down".into(),
        };
        let s = err.to_string();
        assert!(s.contains("anthropic"));
        assert!(s.contains("HTTP 429"));
        assert!(s.contains("rate_limited"));
    }

    #[test]
    fn all_failed_reports_last_error_class() {
        let err = Error::AllCandidatesFailed {
            attempts: vec![AttemptRecord {
                candidate_model: "a".into(),
                succeeded: false,
                error: Some("boom".into()),
            }],
            last: Box::new(Error::validation("bad")),
        };
        assert_eq!(err.class(), "invalid_request");
        assert!(err.to_string().starts_with("All 1 candidate"));
    }

    #[test]
    fn context_is_rendered() {
        let err = Error::validation_with_context(
            "temperature out of range",
            ErrorContext::new()
                .with_field_path("request.temperature")
                .with_source("request_validator"),
        );
        let s = err.to_string();
        assert!(s.contains("field: request.temperature"));
        assert!(s.contains("source: request_validator"));
        assert!(err.context().is_some());
    }
}
