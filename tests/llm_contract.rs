//! LLM client contract tests.
//!
//! Verify exact HTTP format compliance for the chat-completions client:
//! request shape, auth header, response parsing, SSE streaming, error
//! mapping, and the retry policy.

use futures_util::StreamExt;
use repocast::config::LlmConfig;
use repocast::llm::{ChatMessage, ChatParams, LlmClient, OpenRouterClient};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> OpenRouterClient {
    OpenRouterClient::new(LlmConfig {
        api_key: "test-key".into(),
        base_url: server.uri(),
        model_id: "test/model".into(),
        ..LlmConfig::default()
    })
    .expect("client")
}

fn completion_body(text: &str) -> serde_json::Value {
    json!({
        "choices": [{
            "message": {"role": "assistant", "content": text},
            "finish_reason": "stop"
        }]
    })
}

#[tokio::test]
async fn chat_sends_model_messages_and_bearer_auth() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({
            "model": "test/model",
            "messages": [{"role": "user", "content": "Hello"}],
            "stream": false,
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("Hi!")))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let text = client
        .chat(&[ChatMessage::user("Hello")], &ChatParams::default())
        .await
        .expect("chat");
    assert_eq!(text, "Hi!");
}

#[tokio::test]
async fn chat_prepends_system_override() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "messages": [
                {"role": "system", "content": "Be terse."},
                {"role": "user", "content": "Hi"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("ok")))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let params = ChatParams::default().with_system("Be terse.");
    client
        .chat(&[ChatMessage::user("Hi")], &params)
        .await
        .expect("chat");
}

#[tokio::test]
async fn chat_stream_yields_deltas_in_order() {
    let server = MockServer::start().await;
    let sse_body = concat!(
        "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\" world\"}}]}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(sse_body),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let mut stream = client
        .chat_stream(&[ChatMessage::user("Hi")], &ChatParams::default())
        .await
        .expect("stream");

    let mut text = String::new();
    while let Some(delta) = stream.next().await {
        text.push_str(&delta.expect("delta"));
    }
    assert_eq!(text, "Hello world");
}

#[tokio::test]
async fn rate_limit_is_retried_until_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("recovered")))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let text = client
        .chat(&[ChatMessage::user("Hi")], &ChatParams::default())
        .await
        .expect("retried");
    assert_eq!(text, "recovered");
}

#[tokio::test]
async fn rate_limit_exhaustion_surfaces_typed_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_string("still busy"))
        .expect(3)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client
        .chat(&[ChatMessage::user("Hi")], &ChatParams::default())
        .await
        .expect_err("exhausted");
    assert_eq!(err.code(), "provider_rate_limited");
}

#[tokio::test]
async fn bad_request_is_fatal_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_string("malformed"))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client
        .chat(&[ChatMessage::user("Hi")], &ChatParams::default())
        .await
        .expect_err("fatal");
    assert_eq!(err.code(), "provider_other");
}

#[tokio::test]
async fn content_filter_maps_to_its_own_code() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_string(r#"{"error": {"code": "content_filter"}}"#),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client
        .chat(&[ChatMessage::user("Hi")], &ChatParams::default())
        .await
        .expect_err("filtered");
    assert_eq!(err.code(), "provider_content_filtered");
}

#[tokio::test]
async fn content_filter_finish_reason_is_detected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "message": {"role": "assistant", "content": "partial"},
                "finish_reason": "content_filter"
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client
        .chat(&[ChatMessage::user("Hi")], &ChatParams::default())
        .await
        .expect_err("filtered");
    assert_eq!(err.code(), "provider_content_filtered");
}
