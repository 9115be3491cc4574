//! 遥测模块：每个请求/流恰好一次的会话开始与结束上报。
//!
//! Telemetry hook.
//!
//! Telemetry storage and export live outside this crate. The router only
//! reports one session per request (or per stream) through [`TelemetryHook`]:
//! `start_session` after the model is resolved, `end_session` exactly once on
//! success, failure, or cancellation.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`TelemetryHook`] | Trait for telemetry destinations |
//! | [`NoopTelemetry`] | Default no-op hook |
//! | [`TracingTelemetry`] | Emits session events through `tracing` |
//! | [`InMemoryTelemetry`] | In-memory hook for tests |
//! | [`TelemetrySession`] | Guard that guarantees a single `end_session` |

use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tracing::info;

use crate::routing::BackendKind;
use crate::types::Usage;

/// Which router operation a session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Generation,
    Streaming,
    Embedding,
}

impl SessionKind {
    fn trace_label(&self) -> &'static str {
        match self {
            SessionKind::Generation => "LLM Generation",
            SessionKind::Streaming => "LLM Streaming",
            SessionKind::Embedding => "LLM Embedding",
        }
    }

    fn generation_name(&self) -> &'static str {
        match self {
            SessionKind::Generation => "llm-generation",
            SessionKind::Streaming => "llm-streaming",
            SessionKind::Embedding => "llm-embedding",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStart {
    pub kind: SessionKind,
    /// e.g. "LLM Generation - anthropic/claude-3-5-sonnet"
    pub trace_name: String,
    /// e.g. "llm-generation"
    pub generation_name: String,
    pub user_id: String,
    pub backend: BackendKind,
    pub model: String,
    pub input: Value,
    pub temperature: Option<f64>,
}

impl SessionStart {
    pub fn new(
        kind: SessionKind,
        backend: BackendKind,
        model: impl Into<String>,
        user: Option<&str>,
        input: Value,
    ) -> Self {
        let model = model.into();
        Self {
            kind,
            trace_name: format!("{} - {}/{}", kind.trace_label(), backend, model),
            generation_name: kind.generation_name().to_string(),
            user_id: user
                .filter(|u| !u.is_empty())
                .unwrap_or("anonymous")
                .to_string(),
            backend,
            model,
            input,
            temperature: None,
        }
    }

    pub fn with_temperature(mut self, temperature: Option<f64>) -> Self {
        self.temperature = temperature;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "message", rename_all = "snake_case")]
pub enum SessionOutcome {
    Success,
    Error(String),
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionEnd {
    pub outcome: SessionOutcome,
    /// Model that served the request, when one did.
    pub model: Option<String>,
    /// Full generated text, for chat and streaming.
    pub output: Option<String>,
    /// Zeros when unknown or on error.
    pub usage: Usage,
    pub attempts: usize,
}

impl SessionEnd {
    pub fn success(model: impl Into<String>, output: Option<String>, usage: Usage) -> Self {
        Self {
            outcome: SessionOutcome::Success,
            model: Some(model.into()),
            output,
            usage,
            attempts: 1,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            outcome: SessionOutcome::Error(message.into()),
            model: None,
            output: None,
            usage: Usage::default(),
            attempts: 0,
        }
    }

    pub fn cancelled() -> Self {
        Self {
            outcome: SessionOutcome::Cancelled,
            model: None,
            output: None,
            usage: Usage::default(),
            attempts: 0,
        }
    }

    pub fn with_attempts(mut self, attempts: usize) -> Self {
        self.attempts = attempts;
        self
    }
}

/// Opaque id correlating a start with its end.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    pub id: String,
}

impl SessionHandle {
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Destination for per-request telemetry sessions.
///
/// Calls are synchronous and must not block: `end_session` may run from a
/// `Drop` impl when a stream is abandoned.
pub trait TelemetryHook: Send + Sync {
    fn start_session(&self, start: SessionStart) -> SessionHandle;
    fn end_session(&self, handle: SessionHandle, end: SessionEnd);
}

/// Default hook: no collection.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl TelemetryHook for NoopTelemetry {
    fn start_session(&self, _start: SessionStart) -> SessionHandle {
        SessionHandle::new()
    }

    fn end_session(&self, _handle: SessionHandle, _end: SessionEnd) {}
}

pub fn noop_telemetry() -> Arc<dyn TelemetryHook> {
    Arc::new(NoopTelemetry)
}

/// Logs sessions as `tracing` events under the `llm_relay::telemetry` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl TelemetryHook for TracingTelemetry {
    fn start_session(&self, start: SessionStart) -> SessionHandle {
        let handle = SessionHandle::new();
        info!(
            target: "llm_relay::telemetry",
            session_id = %handle.id,
            trace = %start.trace_name,
            generation = %start.generation_name,
            user_id = %start.user_id,
            "session started"
        );
        handle
    }

    fn end_session(&self, handle: SessionHandle, end: SessionEnd) {
        info!(
            target: "llm_relay::telemetry",
            session_id = %handle.id,
            outcome = ?end.outcome,
            model = end.model.as_deref().unwrap_or(""),
            prompt_tokens = end.usage.prompt_tokens,
            completion_tokens = end.usage.completion_tokens,
            attempts = end.attempts,
            "session ended"
        );
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedSession {
    pub handle: SessionHandle,
    pub start: SessionStart,
    pub end: Option<SessionEnd>,
    /// Number of `end_session` calls observed; anything but 1 is a bug.
    pub end_calls: usize,
}

/// In-memory hook for testing.
#[derive(Debug, Default)]
pub struct InMemoryTelemetry {
    sessions: Mutex<Vec<RecordedSession>>,
}

impl InMemoryTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sessions(&self) -> Vec<RecordedSession> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<RecordedSession>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl TelemetryHook for InMemoryTelemetry {
    fn start_session(&self, start: SessionStart) -> SessionHandle {
        let handle = SessionHandle::new();
        self.lock().push(RecordedSession {
            handle: handle.clone(),
            start,
            end: None,
            end_calls: 0,
        });
        handle
    }

    fn end_session(&self, handle: SessionHandle, end: SessionEnd) {
        let mut sessions = self.lock();
        if let Some(s) = sessions.iter_mut().find(|s| s.handle == handle) {
            s.end_calls += 1;
            s.end = Some(end);
        }
    }
}

/// Ends its session exactly once: explicitly via [`TelemetrySession::end`],
/// or as cancelled when dropped unfinished.
pub struct TelemetrySession {
    hook: Arc<dyn TelemetryHook>,
    handle: Option<SessionHandle>,
}

impl TelemetrySession {
    pub fn start(hook: Arc<dyn TelemetryHook>, start: SessionStart) -> Self {
        let handle = hook.start_session(start);
        Self {
            hook,
            handle: Some(handle),
        }
    }

    pub fn end(&mut self, end: SessionEnd) {
        if let Some(handle) = self.handle.take() {
            self.hook.end_session(handle, end);
        }
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for TelemetrySession {
    fn drop(&mut self) {
        self.end(SessionEnd::cancelled());
    }
}

impl std::fmt::Debug for TelemetrySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetrySession")
            .field("handle", &self.handle)
            .finish()
    }
}
