//! Backend client seam.
//!
//! [`BackendClient`] is the one I/O boundary between the router and a backend
//! service. [`HttpBackendClient`] pairs an [`HttpTransport`] with a
//! [`BackendDriver`]; tests substitute scripted implementations.

use async_trait::async_trait;
use futures::{future, stream, Stream, StreamExt};
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::drivers::{
    BackendDriver, BackendEvent, BackendResult, ChatPayload, EmbeddingPayload, EmbeddingResult,
    StreamState,
};
use crate::pipeline::SseDecoder;
use crate::routing::BackendKind;
use crate::transport::HttpTransport;
use crate::{BoxStream, Result};

/// One backend service, already bound to its credentials.
#[async_trait]
pub trait BackendClient: Send + Sync {
    fn kind(&self) -> BackendKind;

    async fn complete(&self, payload: &ChatPayload, model: &str) -> Result<BackendResult>;

    /// Open a streaming completion. Errors here happen before any output.
    async fn open_stream(&self, payload: &ChatPayload, model: &str) -> Result<BackendStream>;

    async fn embed(&self, payload: &EmbeddingPayload, model: &str) -> Result<EmbeddingResult>;
}

/// A live backend event stream with an explicit close.
///
/// Closing drops the underlying connection and runs the close callback.
/// Both happen at most once, whether through [`BackendStream::close`] or `Drop`.
pub struct BackendStream {
    events: Option<BoxStream<'static, BackendEvent>>,
    on_close: Option<Box<dyn FnOnce() + Send>>,
}

impl BackendStream {
    pub fn new(events: BoxStream<'static, BackendEvent>) -> Self {
        Self {
            events: Some(events),
            on_close: None,
        }
    }

    pub fn with_on_close(mut self, on_close: impl FnOnce() + Send + 'static) -> Self {
        self.on_close = Some(Box::new(on_close));
        self
    }

    pub fn close(&mut self) {
        self.events.take();
        if let Some(on_close) = self.on_close.take() {
            on_close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.events.is_none()
    }
}

impl Stream for BackendStream {
    type Item = Result<BackendEvent>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.get_mut().events.as_mut() {
            Some(events) => events.as_mut().poll_next(cx),
            None => Poll::Ready(None),
        }
    }
}

impl Drop for BackendStream {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for BackendStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendStream")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// HTTP implementation: driver translation around a pooled transport.
pub struct HttpBackendClient {
    transport: Arc<HttpTransport>,
    driver: Arc<dyn BackendDriver>,
}

impl HttpBackendClient {
    pub fn new(transport: HttpTransport, driver: Arc<dyn BackendDriver>) -> Self {
        Self {
            transport: Arc::new(transport),
            driver,
        }
    }

    pub fn base_url(&self) -> &str {
        self.transport.base_url()
    }
}

impl fmt::Debug for HttpBackendClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpBackendClient")
            .field("backend", &self.driver.kind())
            .field("base_url", &self.transport.base_url())
            .finish()
    }
}

#[async_trait]
impl BackendClient for HttpBackendClient {
    fn kind(&self) -> BackendKind {
        self.driver.kind()
    }

    async fn complete(&self, payload: &ChatPayload, model: &str) -> Result<BackendResult> {
        let request = self.driver.chat_request(payload, model, false);
        let body = self.transport.post_json(&request).await?;
        self.driver.parse_chat_response(&body)
    }

    async fn open_stream(&self, payload: &ChatPayload, model: &str) -> Result<BackendStream> {
        let request = self.driver.chat_request(payload, model, true);
        let bytes = self.transport.post_stream(&request).await?;
        let frames = SseDecoder::default().decode(bytes);

        let driver = self.driver.clone();
        let events = frames
            .scan(StreamState::new(), move |state, frame| {
                let parsed: Vec<Result<BackendEvent>> =
                    match frame.and_then(|data| driver.parse_stream_event(&data, state)) {
                        Ok(events) => events.into_iter().map(Ok).collect(),
                        Err(e) => vec![Err(e)],
                    };
                future::ready(Some(stream::iter(parsed)))
            })
            .flatten();

        Ok(BackendStream::new(Box::pin(events)))
    }

    async fn embed(&self, payload: &EmbeddingPayload, model: &str) -> Result<EmbeddingResult> {
        let request = self.driver.embedding_request(payload, model)?;
        let body = self.transport.post_json(&request).await?;
        self.driver.parse_embedding_response(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn close_runs_callback_once() {
        let closes = Arc::new(AtomicUsize::new(0));
        let counter = closes.clone();
        let events: BoxStream<'static, BackendEvent> = Box::pin(stream::iter(vec![Ok(
            BackendEvent::ContentDelta("hi".into()),
        )]));
        let mut s = BackendStream::new(events).with_on_close(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        s.close();
        s.close();
        assert!(s.next().await.is_none());
        drop(s);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }
}
