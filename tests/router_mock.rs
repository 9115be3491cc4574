//! End-to-end router tests against mock HTTP backends.

mod common;

use common::MockServerFixture;
use futures::StreamExt;
use llm_relay::config::{BackendConfig, RouterConfig};
use llm_relay::registry::ModelEntry;
use llm_relay::types::{FinishReason, ToolDefinition, UnifiedChunk};
use llm_relay::{
    BackendKind, Error, LlmRouter, LlmRouterBuilder, UnifiedMessage, UnifiedRequest,
};
use mockito::Matcher;
use serde_json::json;

fn router_for(kind: BackendKind, fixture: &MockServerFixture, config: RouterConfig) -> LlmRouter {
    let config = config.with_backend(kind, BackendConfig::with_api_key("test-key"));
    LlmRouterBuilder::from_config(config)
        .with_base_url_override(kind, fixture.base_url.clone())
        .build()
        .unwrap()
}

fn lookup_tool() -> ToolDefinition {
    ToolDefinition::new(
        "lookup",
        Some("Look something up".into()),
        json!({
            "type": "object",
            "properties": { "q": { "type": "string" } },
            "required": ["q"]
        }),
    )
}

#[tokio::test]
async fn openai_tool_call_is_normalized() {
    let mut fixture = MockServerFixture::new().await;
    let mock = fixture
        .server
        .mock("POST", "/chat/completions")
        .match_header("authorization", "Bearer test-key")
        .match_body(Matcher::PartialJson(json!({
            "model": "gpt-4o",
            "stream": false
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "id": "chatcmpl-abc",
                "object": "chat.completion",
                "created": 1700000000,
                "model": "gpt-4o-2024-08-06",
                "choices": [{
                    "index": 0,
                    "message": {
                        "role": "assistant",
                        "content": null,
                        "tool_calls": [{
                            "id": "call_1",
                            "type": "function",
                            "function": { "name": "lookup", "arguments": "{\"q\":\"x\"}" }
                        }]
                    },
                    "finish_reason": "tool_calls"
                }],
                "usage": { "prompt_tokens": 20, "completion_tokens": 8, "total_tokens": 28 }
            })
            .to_string(),
        )
        .create_async()
        .await;

    let router = router_for(BackendKind::OpenAi, &fixture, RouterConfig::default());
    let req = UnifiedRequest::new("gpt-4o", vec![UnifiedMessage::user("find x")])
        .with_tools(vec![lookup_tool()]);
    let resp = router.complete(&req).await.unwrap();

    let message = resp.first_message().unwrap();
    assert_eq!(message.tool_calls.len(), 1);
    assert_eq!(message.tool_calls[0].tool_name, "lookup");
    assert_eq!(message.tool_calls[0].arguments, json!({"q": "x"}));
    assert_eq!(resp.finish_reason(), Some(FinishReason::ToolCalls));
    assert_eq!(resp.usage.total_tokens, 28);
    mock.assert_async().await;
}

#[tokio::test]
async fn anthropic_without_registry() {
    let mut fixture = MockServerFixture::new().await;
    let mock = fixture
        .server
        .mock("POST", "/messages")
        .match_header("x-api-key", "test-key")
        .match_header("anthropic-version", "2023-06-01")
        .match_body(Matcher::PartialJson(json!({
            "model": "claude-3-haiku-20240307",
            "system": "be brief",
            "max_tokens": 4096
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "id": "msg_01",
                "type": "message",
                "role": "assistant",
                "model": "claude-3-haiku-20240307",
                "content": [{ "type": "text", "text": "Hi there" }],
                "stop_reason": "end_turn",
                "usage": { "input_tokens": 9, "output_tokens": 3 }
            })
            .to_string(),
        )
        .create_async()
        .await;

    let router = router_for(BackendKind::Anthropic, &fixture, RouterConfig::default());
    let req = UnifiedRequest::new(
        "claude-3-haiku-20240307",
        vec![UnifiedMessage::system("be brief"), UnifiedMessage::user("hello")],
    );
    let resp = router.complete(&req).await.unwrap();

    assert_eq!(resp.first_message().unwrap().text(), "Hi there");
    assert!(matches!(
        resp.finish_reason(),
        Some(
            FinishReason::Stop
                | FinishReason::Length
                | FinishReason::ToolCalls
                | FinishReason::ContentFilter
        )
    ));
    assert_eq!(resp.usage.prompt_tokens, 9);
    assert_eq!(resp.usage.total_tokens, 12);
    mock.assert_async().await;
}

#[tokio::test]
async fn openai_sse_stream() {
    let mut fixture = MockServerFixture::new().await;
    let mock = fixture
        .mock_sse(
            "/chat/completions",
            &[
                r#"{"id":"c1","choices":[{"index":0,"delta":{"role":"assistant","content":""}}]}"#,
                r#"{"id":"c1","choices":[{"index":0,"delta":{"content":"Hello"}}]}"#,
                r#"{"id":"c1","choices":[{"index":0,"delta":{"content":" World"}}]}"#,
                r#"{"id":"c1","choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#,
                r#"{"id":"c1","choices":[],"usage":{"prompt_tokens":5,"completion_tokens":2,"total_tokens":7}}"#,
                "[DONE]",
            ],
        )
        .await;

    let router = router_for(BackendKind::OpenAi, &fixture, RouterConfig::default());
    let req = UnifiedRequest::new("gpt-4o-mini", vec![UnifiedMessage::user("hi")]);
    let stream = router.complete_streaming(&req).await.unwrap();
    let chunks: Vec<UnifiedChunk> = stream.map(|c| c.unwrap()).collect().await;

    let text: String = chunks.iter().filter_map(|c| c.content()).collect();
    assert_eq!(text, "Hello World");
    assert_eq!(chunks.len(), 3);
    let last = chunks.last().unwrap();
    assert_eq!(last.finish_reason(), Some(FinishReason::Stop));
    assert_eq!(last.usage.map(|u| u.total_tokens), Some(7));
    mock.assert_async().await;
}

#[tokio::test]
async fn server_error_falls_back_to_next_candidate() {
    let mut fixture = MockServerFixture::new().await;
    let failing = fixture
        .server
        .mock("POST", "/chat/completions")
        .match_body(Matcher::PartialJson(json!({ "model": "gpt-4o" })))
        .with_status(500)
        .with_body(r#"{"error":{"message":"upstream exploded","type":"server_error"}}"#)
        .create_async()
        .await;
    let fallback = fixture
        .server
        .mock("POST", "/chat/completions")
        .match_body(Matcher::PartialJson(json!({ "model": "gpt-4o-mini" })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "id": "chatcmpl-2",
                "model": "gpt-4o-mini",
                "choices": [{
                    "index": 0,
                    "message": { "role": "assistant", "content": "fallback answer" },
                    "finish_reason": "stop"
                }]
            })
            .to_string(),
        )
        .create_async()
        .await;

    let config = RouterConfig::default().with_models(vec![ModelEntry::new(
        "default-chat",
        BackendKind::OpenAi,
    )
    .with_model("gpt-4o")
    .with_fallbacks(["gpt-4o-mini"])]);
    let router = router_for(BackendKind::OpenAi, &fixture, config);

    let req = UnifiedRequest::new("default-chat", vec![UnifiedMessage::user("hi")]);
    let resp = router.complete(&req).await.unwrap();
    assert_eq!(resp.first_message().unwrap().text(), "fallback answer");
    assert_eq!(resp.model, "gpt-4o-mini");
    failing.assert_async().await;
    fallback.assert_async().await;
}

#[tokio::test]
async fn http_status_is_classified() {
    let mut fixture = MockServerFixture::new().await;
    let _mock = fixture
        .mock_json(
            "/chat/completions",
            429,
            r#"{"error":{"message":"slow down","type":"rate_limit"}}"#,
        )
        .await;

    let router = router_for(BackendKind::OpenAi, &fixture, RouterConfig::default());
    let req = UnifiedRequest::new("gpt-4o", vec![UnifiedMessage::user("hi")]);
    let err = router.complete(&req).await.unwrap_err();

    let Error::AllCandidatesFailed { last, .. } = err else {
        panic!("expected AllCandidatesFailed");
    };
    match *last {
        Error::Backend {
            status, ref class, ref message, ..
        } => {
            assert_eq!(status, Some(429));
            assert_eq!(class, "rate_limited");
            assert_eq!(message, "slow down");
        }
        ref other => panic!("unexpected {other:?}"),
    }
}
