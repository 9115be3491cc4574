//! Shared fixtures: a scripted in-process backend and a mockito server wrapper.

#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream;
use llm_relay::client::{BackendClient, BackendStream};
use llm_relay::drivers::{
    BackendEvent, BackendResult, ChatPayload, EmbeddingPayload, EmbeddingResult,
};
use llm_relay::{BackendKind, BoxStream, Error, Result};
use mockito::{Mock, Server, ServerGuard};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// What a scripted backend does for one candidate model.
#[derive(Clone)]
pub enum Outcome {
    Fail(u16),
    Complete(BackendResult),
    /// Events, then end of stream.
    Stream(Vec<BackendEvent>),
    /// Events, then silence until closed.
    OpenStream(Vec<BackendEvent>),
    Embed(EmbeddingResult),
}

pub struct ScriptedBackend {
    kind: BackendKind,
    outcomes: HashMap<String, Outcome>,
    calls: Mutex<Vec<String>>,
    payloads: Mutex<Vec<ChatPayload>>,
    closes: Arc<AtomicUsize>,
}

impl ScriptedBackend {
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            outcomes: HashMap::new(),
            calls: Mutex::new(Vec::new()),
            payloads: Mutex::new(Vec::new()),
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn on(mut self, model: &str, outcome: Outcome) -> Self {
        self.outcomes.insert(model.to_string(), outcome);
        self
    }

    /// Candidate models called, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn last_payload(&self) -> Option<ChatPayload> {
        self.payloads.lock().unwrap().last().cloned()
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn outcome(&self, model: &str) -> Result<Outcome> {
        self.calls.lock().unwrap().push(model.to_string());
        match self.outcomes.get(model) {
            Some(Outcome::Fail(status)) => Err(Error::Backend {
                backend: self.kind,
                status: Some(*status),
                class: if *status >= 500 { "server_error" } else { "invalid_request" }.into(),
                message: format!("scripted failure for {model}"),
            }),
            Some(outcome) => Ok(outcome.clone()),
            None => Err(Error::Backend {
                backend: self.kind,
                status: Some(404),
                class: "not_found".into(),
                message: format!("no script for {model}"),
            }),
        }
    }
}

#[async_trait]
impl BackendClient for ScriptedBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn complete(&self, payload: &ChatPayload, model: &str) -> Result<BackendResult> {
        self.payloads.lock().unwrap().push(payload.clone());
        match self.outcome(model)? {
            Outcome::Complete(r) => Ok(r),
            _ => panic!("model {model} is not scripted for complete"),
        }
    }

    async fn open_stream(&self, payload: &ChatPayload, model: &str) -> Result<BackendStream> {
        self.payloads.lock().unwrap().push(payload.clone());
        let (events, open) = match self.outcome(model)? {
            Outcome::Stream(e) => (e, false),
            Outcome::OpenStream(e) => (e, true),
            _ => panic!("model {model} is not scripted for streaming"),
        };
        let items = stream::iter(events.into_iter().map(Ok));
        let events: BoxStream<'static, BackendEvent> = if open {
            Box::pin(futures::StreamExt::chain(items, stream::pending()))
        } else {
            Box::pin(items)
        };
        let closes = self.closes.clone();
        Ok(BackendStream::new(events).with_on_close(move || {
            closes.fetch_add(1, Ordering::SeqCst);
        }))
    }

    async fn embed(&self, _payload: &EmbeddingPayload, model: &str) -> Result<EmbeddingResult> {
        match self.outcome(model)? {
            Outcome::Embed(r) => Ok(r),
            _ => panic!("model {model} is not scripted for embeddings"),
        }
    }
}

/// Log to the test writer; filter with `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Test fixture that manages a mock HTTP server.
pub struct MockServerFixture {
    pub server: ServerGuard,
    pub base_url: String,
}

impl MockServerFixture {
    pub async fn new() -> Self {
        init_tracing();
        let server = Server::new_async().await;
        let base_url = server.url();
        Self { server, base_url }
    }

    pub async fn mock_json(&mut self, path: &str, status: usize, body: &str) -> Mock {
        self.server
            .mock("POST", path)
            .with_status(status)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await
    }

    /// SSE body from `data:` payloads, each framed with a blank line.
    pub async fn mock_sse(&mut self, path: &str, payloads: &[&str]) -> Mock {
        let body: String = payloads
            .iter()
            .map(|p| format!("data: {}\n\n", p))
            .collect();
        self.server
            .mock("POST", path)
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(body)
            .create_async()
            .await
    }
}
