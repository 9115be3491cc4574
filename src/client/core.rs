use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::client::backend::BackendClient;
use crate::client::builder::LlmRouterBuilder;
use crate::client::streaming::ChatCompletionStream;
use crate::drivers::{create_driver, BackendDriver, BackendResult, EmbeddingPayload};
use crate::embeddings::{
    encode_base64, EmbeddingData, EmbeddingRequest, EmbeddingResponse, EmbeddingUsage,
    EmbeddingVector, EncodingFormat,
};
use crate::error::{AttemptRecord, ErrorContext};
use crate::pipeline::FallbackExecutor;
use crate::routing::{BackendKind, ModelDescriptor, ModelResolver};
use crate::telemetry::{SessionEnd, SessionKind, SessionStart, TelemetryHook, TelemetrySession};
use crate::types::response::{new_completion_id, unix_now};
use crate::types::{
    Choice, FinishReason, MessageContent, Role, UnifiedMessage, UnifiedRequest, UnifiedResponse,
    Usage,
};
use crate::{Error, Result};

/// Routes unified requests to backends.
///
/// Cheap to share behind an `Arc`; every call is independent.
pub struct LlmRouter {
    pub(crate) resolver: ModelResolver,
    pub(crate) backends: HashMap<BackendKind, Arc<dyn BackendClient>>,
    pub(crate) drivers: HashMap<BackendKind, Arc<dyn BackendDriver>>,
    pub(crate) telemetry: Arc<dyn TelemetryHook>,
    pub(crate) default_max_tokens: HashMap<BackendKind, u32>,
}

impl fmt::Debug for LlmRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut backends: Vec<&BackendKind> = self.backends.keys().collect();
        backends.sort_by_key(|k| k.as_str());
        f.debug_struct("LlmRouter")
            .field("resolver", &self.resolver)
            .field("backends", &backends)
            .finish()
    }
}

impl LlmRouter {
    pub fn builder() -> LlmRouterBuilder {
        LlmRouterBuilder::new()
    }

    pub fn has_backend(&self, kind: BackendKind) -> bool {
        self.backends.contains_key(&kind)
    }

    /// Resolve a model id the way a request would, with configured defaults applied.
    pub async fn resolve_model(
        &self,
        model_id: &str,
        provider: Option<BackendKind>,
    ) -> Result<ModelDescriptor> {
        let mut target = self.resolver.resolve(model_id, provider).await?;
        if target.capabilities.max_tokens.is_none() {
            target.capabilities.max_tokens = self.default_max_tokens.get(&target.backend).copied();
        }
        Ok(target)
    }

    fn backend(&self, kind: BackendKind) -> Result<Arc<dyn BackendClient>> {
        self.backends.get(&kind).cloned().ok_or_else(|| {
            Error::configuration_with_context(
                format!("backend {kind} is not configured"),
                ErrorContext::new()
                    .with_field_path(format!("backends.{kind}"))
                    .with_details("set an API key for this backend or pass a client to the builder"),
            )
        })
    }

    fn driver(&self, kind: BackendKind) -> Arc<dyn BackendDriver> {
        self.drivers
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| create_driver(kind))
    }

    fn chat_session(&self, kind: SessionKind, target: &ModelDescriptor, req: &UnifiedRequest) -> TelemetrySession {
        let input = serde_json::to_value(&req.messages).unwrap_or_default();
        TelemetrySession::start(
            self.telemetry.clone(),
            SessionStart::new(kind, target.backend, &target.canonical_model, req.user.as_deref(), input)
                .with_temperature(req.temperature),
        )
    }

    /// Single-shot chat completion, with fallback across candidate models.
    pub async fn complete(&self, request: &UnifiedRequest) -> Result<UnifiedResponse> {
        request.validate()?;
        let target = self.resolve_model(&request.model, request.provider).await?;
        let backend = self.backend(target.backend)?;
        let payload = self.driver(target.backend).build_chat_payload(request, &target)?;

        info!(
            backend = %target.backend,
            model = %target.canonical_model,
            candidates = target.fallback_models.len() + 1,
            "chat completion"
        );
        let mut session = self.chat_session(SessionKind::Generation, &target, request);

        let client = backend.as_ref();
        let payload = &payload;
        let outcome = FallbackExecutor::from_descriptor(&target)
            .with_operation("chat")
            .execute(move |model| async move { client.complete(payload, &model).await })
            .await;

        match outcome {
            Ok(success) => {
                let attempts = success.attempts.len();
                let response = normalize_response(success.value, success.model);
                let output = response.first_message().map(|m| m.text());
                session.end(
                    SessionEnd::success(response.model.clone(), output, response.usage)
                        .with_attempts(attempts),
                );
                info!(
                    backend = %target.backend,
                    model = %response.model,
                    finish_reason = response.finish_reason().map(|f| f.as_str()).unwrap_or(""),
                    prompt_tokens = response.usage.prompt_tokens,
                    completion_tokens = response.usage.completion_tokens,
                    "chat completion finished"
                );
                Ok(response)
            }
            Err(e) => {
                session.end(SessionEnd::error(e.to_string()).with_attempts(attempt_count(&e)));
                Err(e)
            }
        }
    }

    /// Streaming chat completion.
    ///
    /// Fallback covers opening the stream only. Once a candidate has accepted
    /// it, a backend error is the last item of the stream: the backend's own
    /// error if no chunk was delivered yet, [`Error::StreamMidFlight`] after.
    pub async fn complete_streaming(&self, request: &UnifiedRequest) -> Result<ChatCompletionStream> {
        request.validate()?;
        let target = self.resolve_model(&request.model, request.provider).await?;
        let backend = self.backend(target.backend)?;
        let payload = self.driver(target.backend).build_chat_payload(request, &target)?;

        info!(
            backend = %target.backend,
            model = %target.canonical_model,
            candidates = target.fallback_models.len() + 1,
            "streaming chat completion"
        );
        let mut session = self.chat_session(SessionKind::Streaming, &target, request);

        let client = backend.as_ref();
        let payload = &payload;
        let outcome = FallbackExecutor::from_descriptor(&target)
            .with_operation("stream_open")
            .execute(move |model| async move { client.open_stream(payload, &model).await })
            .await;

        match outcome {
            Ok(success) => {
                let attempts = success.attempts.len();
                Ok(ChatCompletionStream::new(success.value, success.model, session, attempts))
            }
            Err(e) => {
                session.end(SessionEnd::error(e.to_string()).with_attempts(attempt_count(&e)));
                Err(e)
            }
        }
    }

    /// Embeddings for one or many inputs, returned in input order.
    pub async fn embed(&self, request: &EmbeddingRequest) -> Result<EmbeddingResponse> {
        request.validate()?;
        let target = self.resolve_model(&request.model, request.provider).await?;
        let backend = self.backend(target.backend)?;

        let dimensions = match request.dimensions {
            Some(d) if !target.capabilities.embedding_dimensions => {
                debug!(
                    backend = %target.backend,
                    model = %target.canonical_model,
                    dimensions = d,
                    "model does not accept a dimensions override; dropping it"
                );
                None
            }
            d => d,
        };
        let payload = EmbeddingPayload {
            inputs: request.input.clone().into_vec(),
            dimensions,
            user: request.user.clone(),
        };
        let expected = payload.inputs.len();

        let mut session = TelemetrySession::start(
            self.telemetry.clone(),
            SessionStart::new(
                SessionKind::Embedding,
                target.backend,
                &target.canonical_model,
                request.user.as_deref(),
                Value::from(payload.inputs.clone()),
            ),
        );

        let client = backend.as_ref();
        let kind = target.backend;
        let payload = &payload;
        let outcome = FallbackExecutor::from_descriptor(&target)
            .with_operation("embed")
            .execute(move |model| async move {
                let mut result = client.embed(payload, &model).await?;
                if result.vectors.len() != expected {
                    return Err(Error::backend_protocol(
                        kind,
                        format!("expected {} embeddings, got {}", expected, result.vectors.len()),
                    ));
                }
                result.vectors.sort_by_key(|(index, _)| *index);
                if let Some((position, (index, _))) = result
                    .vectors
                    .iter()
                    .enumerate()
                    .find(|(position, (index, _))| position != index)
                {
                    return Err(Error::backend_protocol(
                        kind,
                        format!("embedding index {index} at position {position}; expected indices 0..{expected}"),
                    ));
                }
                Ok(result)
            })
            .await;

        let success = match outcome {
            Ok(success) => success,
            Err(e) => {
                session.end(SessionEnd::error(e.to_string()).with_attempts(attempt_count(&e)));
                return Err(e);
            }
        };

        let attempts = success.attempts.len();
        let result = success.value;
        let model = result.model.unwrap_or(success.model);
        let usage = EmbeddingUsage {
            prompt_tokens: result.prompt_tokens,
            total_tokens: result.total_tokens.max(result.prompt_tokens),
        };

        let format = request.encoding_format.unwrap_or_default();
        let data = result
            .vectors
            .into_iter()
            .map(|(index, v)| {
                let embedding = match format {
                    EncodingFormat::Float => EmbeddingVector::Float(v),
                    EncodingFormat::Base64 => EmbeddingVector::Base64(encode_base64(&v)),
                };
                EmbeddingData::new(index, embedding)
            })
            .collect();

        session.end(
            SessionEnd::success(
                model.clone(),
                None,
                Usage {
                    prompt_tokens: usage.prompt_tokens,
                    completion_tokens: 0,
                    total_tokens: usage.total_tokens,
                },
            )
            .with_attempts(attempts),
        );
        Ok(EmbeddingResponse::new(model, data, usage))
    }
}

/// Attempts made before failing; zero when no backend call happened.
fn attempt_count(e: &Error) -> usize {
    match e {
        Error::AllCandidatesFailed { attempts, .. } => attempts.len(),
        _ => 0,
    }
}

/// Fill defaults so every response is complete: generated id, current
/// timestamp, a finish reason, zero usage when unreported.
fn normalize_response(result: BackendResult, candidate: String) -> UnifiedResponse {
    let finish_reason = result.finish_reason.unwrap_or(if result.tool_calls.is_empty() {
        FinishReason::Stop
    } else {
        FinishReason::ToolCalls
    });
    let message = UnifiedMessage {
        role: Role::Assistant,
        content: result.content.map(MessageContent::Text),
        tool_calls: result.tool_calls,
        tool_call_id: None,
        name: None,
    };
    UnifiedResponse {
        id: result.id.unwrap_or_else(new_completion_id),
        object: "chat.completion".to_string(),
        created_at: unix_now(),
        model: result.model.unwrap_or(candidate),
        choices: vec![Choice {
            index: 0,
            message,
            finish_reason,
        }],
        usage: result.usage.unwrap_or_default(),
    }
}

/// Failed attempts of an [`Error::AllCandidatesFailed`], for callers that
/// want to report them.
pub fn failed_attempts(e: &Error) -> &[AttemptRecord] {
    match e {
        Error::AllCandidatesFailed { attempts, .. } => attempts,
        _ => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolCall;
    use serde_json::json;

    #[test]
    fn normalize_fills_missing_fields() {
        let r = normalize_response(
            BackendResult {
                tool_calls: vec![ToolCall::new("call_1", "lookup", json!({"q": "x"}))],
                ..BackendResult::default()
            },
            "gpt-4o".into(),
        );
        assert!(r.id.starts_with("chatcmpl-"));
        assert_eq!(r.model, "gpt-4o");
        assert_eq!(r.finish_reason(), Some(FinishReason::ToolCalls));
        assert_eq!(r.usage, Usage::default());
        assert!(r.first_message().unwrap().content.is_none());
    }

    #[test]
    fn backend_finish_reason_is_kept() {
        let r = normalize_response(
            BackendResult {
                id: Some("msg_1".into()),
                content: Some("hi".into()),
                finish_reason: Some(FinishReason::Length),
                usage: Some(Usage::new(4, 1)),
                ..BackendResult::default()
            },
            "claude-3-haiku".into(),
        );
        assert_eq!(r.id, "msg_1");
        assert_eq!(r.finish_reason(), Some(FinishReason::Length));
        assert_eq!(r.usage.total_tokens, 5);
    }
}
