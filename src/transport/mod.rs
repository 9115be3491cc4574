//! HTTP transport to backend APIs.

pub mod http;

pub use http::{AuthScheme, HttpSettings, HttpTransport};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Transport error: {0}")]
    Other(String),
}
