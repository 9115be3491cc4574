//! 流式会话：将后端事件转为统一的 chunk 流，并保证关闭与遥测恰好一次。
//!
//! Streaming session.
//!
//! [`ChatCompletionStream`] turns backend events into [`UnifiedChunk`]s:
//! deltas are forwarded as they arrive, finish reason and usage are held back
//! for a single terminal chunk at end of stream. A backend error ends the
//! stream; it is reported as [`Error::StreamMidFlight`] when output had
//! already been delivered. Cancellation (through a
//! [`CancelHandle`] or by dropping the stream) closes the backend connection
//! and ends the telemetry session as cancelled.

use futures::{Future, Stream};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::{debug, warn};

use crate::client::backend::BackendStream;
use crate::drivers::BackendEvent;
use crate::telemetry::{SessionEnd, TelemetrySession};
use crate::types::{
    FinishReason, MessageDelta, Role, ToolCallDelta, UnifiedChunk, Usage,
};
use crate::utils::ToolCallAssembler;
use crate::{Error, Result};

/// Cancels a [`ChatCompletionStream`] from anywhere, including another task.
///
/// The stream observes cancellation on its next poll (or when dropped) and
/// yields nothing further.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// A streamed chat completion.
pub struct ChatCompletionStream {
    inner: Option<BackendStream>,
    id: String,
    created: u64,
    model: String,
    role_sent: bool,
    content: String,
    tools: Option<ToolCallAssembler>,
    finish: Option<FinishReason>,
    usage: Option<Usage>,
    telemetry: TelemetrySession,
    attempts: usize,
    token: CancellationToken,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
    done: bool,
}

impl ChatCompletionStream {
    pub(crate) fn new(
        inner: BackendStream,
        model: String,
        telemetry: TelemetrySession,
        attempts: usize,
    ) -> Self {
        let token = CancellationToken::new();
        let cancelled = Box::pin(token.clone().cancelled_owned());
        Self {
            inner: Some(inner),
            id: crate::types::response::new_completion_id(),
            created: crate::types::response::unix_now(),
            model,
            role_sent: false,
            content: String::new(),
            tools: Some(ToolCallAssembler::new()),
            finish: None,
            usage: None,
            telemetry,
            attempts,
            token,
            cancelled,
            done: false,
        }
    }

    /// Completion id shared by every chunk of this stream.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Candidate model that accepted the stream.
    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            token: self.token.clone(),
        }
    }

    /// Stop immediately: close the backend connection and end telemetry.
    pub fn cancel(&mut self) {
        self.token.cancel();
        self.shutdown_cancelled();
    }

    pub fn is_finished(&self) -> bool {
        self.done
    }

    fn close_backend(&mut self) {
        if let Some(mut inner) = self.inner.take() {
            inner.close();
        }
    }

    fn shutdown_cancelled(&mut self) {
        if self.done {
            return;
        }
        debug!(model = %self.model, stream_id = %self.id, "stream cancelled");
        self.done = true;
        self.close_backend();
        self.telemetry
            .end(SessionEnd::cancelled().with_attempts(self.attempts));
    }

    fn chunk(&self) -> UnifiedChunk {
        UnifiedChunk::new(self.id.clone(), self.created, self.model.clone())
    }

    fn delta(&mut self) -> MessageDelta {
        let role = if self.role_sent {
            None
        } else {
            self.role_sent = true;
            Some(Role::Assistant)
        };
        MessageDelta {
            role,
            ..MessageDelta::default()
        }
    }

    /// Chunk to emit for an event, if any. Finish and usage are only recorded.
    fn apply(&mut self, event: BackendEvent) -> Option<UnifiedChunk> {
        match event {
            BackendEvent::ContentDelta(text) => {
                if text.is_empty() {
                    return None;
                }
                self.content.push_str(&text);
                let mut delta = self.delta();
                delta.content = Some(text);
                Some(self.chunk().with_delta(delta))
            }
            BackendEvent::ToolCallDelta {
                index,
                id,
                name,
                arguments,
            } => {
                if let Some(tools) = self.tools.as_mut() {
                    tools.on_delta(index, id.as_deref(), name.as_deref(), arguments.as_deref());
                }
                let mut delta = self.delta();
                delta.tool_calls = vec![ToolCallDelta {
                    index,
                    id,
                    tool_name: name,
                    arguments,
                }];
                Some(self.chunk().with_delta(delta))
            }
            BackendEvent::Finish(reason) => {
                self.finish = Some(reason);
                None
            }
            BackendEvent::Usage(usage) => {
                self.usage = Some(usage);
                None
            }
        }
    }

    fn terminal_chunk(&mut self) -> UnifiedChunk {
        self.done = true;
        self.close_backend();

        let tool_calls = self
            .tools
            .take()
            .map(ToolCallAssembler::finalize)
            .unwrap_or_default();
        let finish = self.finish.unwrap_or(if tool_calls.is_empty() {
            FinishReason::Stop
        } else {
            FinishReason::ToolCalls
        });
        let usage = self.usage.unwrap_or_default();

        let output = if self.content.is_empty() && !tool_calls.is_empty() {
            serde_json::to_string(&tool_calls).ok()
        } else {
            Some(self.content.clone())
        };
        self.telemetry.end(
            SessionEnd::success(self.model.clone(), output, usage)
                .with_attempts(self.attempts),
        );

        self.chunk().terminal(finish, usage)
    }

    /// Terminal error. Wrapped in [`Error::StreamMidFlight`] only once a
    /// chunk has reached the consumer.
    fn fail(&mut self, error: Error) -> Error {
        self.done = true;
        self.close_backend();
        let started = self.role_sent;
        warn!(
            model = %self.model,
            stream_id = %self.id,
            error_class = error.class(),
            output_started = started,
            error = %error,
            "stream failed"
        );
        let mut end = SessionEnd::error(error.to_string()).with_attempts(self.attempts);
        end.model = Some(self.model.clone());
        end.usage = self.usage.unwrap_or_default();
        if !self.content.is_empty() {
            end.output = Some(self.content.clone());
        }
        self.telemetry.end(end);
        if started {
            Error::StreamMidFlight(Box::new(error))
        } else {
            error
        }
    }
}

impl Stream for ChatCompletionStream {
    type Item = Result<UnifiedChunk>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        if this.cancelled.as_mut().poll(cx).is_ready() {
            this.shutdown_cancelled();
            return Poll::Ready(None);
        }

        loop {
            let Some(inner) = this.inner.as_mut() else {
                this.done = true;
                return Poll::Ready(None);
            };
            match Pin::new(inner).poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(Ok(event))) => {
                    if let Some(chunk) = this.apply(event) {
                        return Poll::Ready(Some(Ok(chunk)));
                    }
                }
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Some(Err(this.fail(e)))),
                Poll::Ready(None) => return Poll::Ready(Some(Ok(this.terminal_chunk()))),
            }
        }
    }
}

impl Drop for ChatCompletionStream {
    fn drop(&mut self) {
        if !self.done {
            debug!(model = %self.model, stream_id = %self.id, "stream dropped before completion");
            self.shutdown_cancelled();
        }
    }
}

impl std::fmt::Debug for ChatCompletionStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatCompletionStream")
            .field("id", &self.id)
            .field("model", &self.model)
            .field("done", &self.done)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::BackendKind;
    use crate::telemetry::{InMemoryTelemetry, SessionKind, SessionOutcome, SessionStart};
    use crate::BoxStream;
    use futures::{stream, StreamExt};
    use std::sync::Arc;

    fn session(hook: &Arc<InMemoryTelemetry>) -> TelemetrySession {
        TelemetrySession::start(
            hook.clone(),
            SessionStart::new(
                SessionKind::Streaming,
                BackendKind::OpenAi,
                "gpt-4o",
                None,
                serde_json::Value::Null,
            ),
        )
    }

    fn backend(events: Vec<Result<BackendEvent>>) -> BackendStream {
        let s: BoxStream<'static, BackendEvent> = Box::pin(stream::iter(events));
        BackendStream::new(s)
    }

    #[tokio::test]
    async fn single_terminal_chunk_after_deltas() {
        let hook = Arc::new(InMemoryTelemetry::new());
        let s = ChatCompletionStream::new(
            backend(vec![
                Ok(BackendEvent::ContentDelta("Hel".into())),
                Ok(BackendEvent::Usage(Usage::new(3, 2))),
                Ok(BackendEvent::ContentDelta("lo".into())),
                Ok(BackendEvent::Finish(FinishReason::Length)),
            ]),
            "gpt-4o".into(),
            session(&hook),
            1,
        );
        let chunks: Vec<UnifiedChunk> = s.map(|c| c.unwrap()).collect().await;
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].choices[0].delta.role, Some(Role::Assistant));
        assert_eq!(chunks[1].choices[0].delta.role, None);
        assert!(chunks[..2].iter().all(|c| c.finish_reason().is_none()));
        assert_eq!(chunks[2].finish_reason(), Some(FinishReason::Length));
        assert_eq!(chunks[2].usage, Some(Usage::new(3, 2)));

        let sessions = hook.sessions();
        let end = sessions[0].end.as_ref().unwrap();
        assert_eq!(end.outcome, SessionOutcome::Success);
        assert_eq!(end.output.as_deref(), Some("Hello"));
    }

    #[tokio::test]
    async fn tool_deltas_without_finish_end_with_tool_calls() {
        let hook = Arc::new(InMemoryTelemetry::new());
        let s = ChatCompletionStream::new(
            backend(vec![Ok(BackendEvent::ToolCallDelta {
                index: 0,
                id: Some("call_1".into()),
                name: Some("lookup".into()),
                arguments: Some("{}".into()),
            })]),
            "gpt-4o".into(),
            session(&hook),
            1,
        );
        let chunks: Vec<UnifiedChunk> = s.map(|c| c.unwrap()).collect().await;
        let last = chunks.last().unwrap();
        assert_eq!(last.finish_reason(), Some(FinishReason::ToolCalls));
        assert_eq!(last.usage, Some(Usage::default()));
    }

    #[tokio::test]
    async fn mid_stream_error_is_terminal() {
        let hook = Arc::new(InMemoryTelemetry::new());
        let mut s = ChatCompletionStream::new(
            backend(vec![
                Ok(BackendEvent::ContentDelta("a".into())),
                Ok(BackendEvent::Usage(Usage::new(10, 1))),
                Err(Error::validation("broken frame")),
                Ok(BackendEvent::ContentDelta("b".into())),
            ]),
            "gpt-4o".into(),
            session(&hook),
            1,
        );
        assert!(s.next().await.unwrap().is_ok());
        let err = s.next().await.unwrap().unwrap_err();
        assert!(matches!(err, Error::StreamMidFlight(_)));
        assert!(s.next().await.is_none());
        let sessions = hook.sessions();
        assert_eq!(sessions[0].end_calls, 1);
        let end = sessions[0].end.as_ref().unwrap();
        assert!(matches!(end.outcome, SessionOutcome::Error(_)));
        assert_eq!(end.usage, Usage::new(10, 1));
        assert_eq!(end.output.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn error_before_any_chunk_is_not_mid_flight() {
        let hook = Arc::new(InMemoryTelemetry::new());
        let mut s = ChatCompletionStream::new(
            backend(vec![Err(Error::backend_protocol(
                BackendKind::OpenAi,
                "error frame in stream",
            ))]),
            "gpt-4o".into(),
            session(&hook),
            1,
        );
        let err = s.next().await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Backend { .. }));
        assert_eq!(err.class(), "invalid_response");
        assert!(s.next().await.is_none());

        let sessions = hook.sessions();
        assert_eq!(sessions[0].end_calls, 1);
        let end = sessions[0].end.as_ref().unwrap();
        assert!(matches!(end.outcome, SessionOutcome::Error(_)));
        assert_eq!(end.usage, Usage::default());
    }
}
