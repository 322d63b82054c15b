//! OpenAI-compatible chat-completions client.
//!
//! Talks to an OpenRouter-style endpoint (`POST {base}/v1/chat/completions`)
//! with bearer auth. Rate limits and timeouts are retried with exponential
//! backoff and jitter up to the configured attempt count; content filtering
//! and other 4xx responses are fatal.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use std::time::Duration;

use super::sse::SseFeed;
use super::{ChatMessage, ChatParams, LlmClient, Role, TextDeltaStream};
use crate::config::LlmConfig;
use crate::error::{Error, Result};

/// Chat-completions client for OpenRouter-compatible providers.
pub struct OpenRouterClient {
    http: reqwest::Client,
    config: LlmConfig,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

impl OpenRouterClient {
    /// Create a client from provider config.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if the HTTP client cannot be built.
    pub fn new(config: LlmConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, config })
    }

    /// The configured default model.
    pub fn model_id(&self) -> &str {
        &self.config.model_id
    }

    fn request_body(
        &self,
        messages: &[ChatMessage],
        params: &ChatParams,
        stream: bool,
    ) -> serde_json::Value {
        let mut wire: Vec<serde_json::Value> = Vec::with_capacity(messages.len() + 1);
        if let Some(system) = &params.system {
            wire.push(serde_json::json!({"role": "system", "content": system}));
        }
        for msg in messages {
            let role = match msg.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            wire.push(serde_json::json!({"role": role, "content": msg.content}));
        }

        let model = params
            .model_id
            .as_deref()
            .unwrap_or(&self.config.model_id);
        serde_json::json!({
            "model": model,
            "messages": wire,
            "temperature": params.temperature,
            "max_tokens": params.max_output_tokens,
            "stream": stream,
        })
    }

    async fn post_completion(&self, body: &serde_json::Value) -> Result<reqwest::Response> {
        let url = format!("{}/v1/chat/completions", self.config.base_url);
        let response = self
            .http
            .post(&url)
            .header("authorization", format!("Bearer {}", self.config.api_key))
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::ProviderTimeout(format!("chat completion timed out: {e}"))
                } else {
                    Error::ProviderOther(format!("connection error: {e}"))
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body_text = response.text().await.unwrap_or_default();
        Err(map_provider_error(status.as_u16(), &body_text))
    }

    async fn post_with_retry(&self, body: &serde_json::Value) -> Result<reqwest::Response> {
        let mut last_err = Error::ProviderOther("no attempt made".into());
        for attempt in 0..self.config.max_attempts {
            if attempt > 0 {
                let delay = backoff_delay(attempt);
                tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, "retrying LLM call");
                tokio::time::sleep(delay).await;
            }
            match self.post_completion(body).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() => last_err = e,
                Err(e) => return Err(e),
            }
        }
        Err(last_err)
    }
}

#[async_trait]
impl LlmClient for OpenRouterClient {
    async fn chat(&self, messages: &[ChatMessage], params: &ChatParams) -> Result<String> {
        let model = params.model_id.as_deref().unwrap_or(&self.config.model_id);
        tracing::debug!(model, messages = messages.len(), "chat completion request");

        let body = self.request_body(messages, params, false);
        let response = self.post_with_retry(&body).await?;
        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| Error::ProviderOther(format!("malformed completion response: {e}")))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::ProviderOther("completion had no choices".into()))?;
        if choice.finish_reason.as_deref() == Some("content_filter") {
            return Err(Error::ProviderContentFiltered(
                "completion stopped by content filter".into(),
            ));
        }
        choice
            .message
            .content
            .ok_or_else(|| Error::ProviderOther("completion had no content".into()))
    }

    async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        params: &ChatParams,
    ) -> Result<TextDeltaStream> {
        let body = self.request_body(messages, params, true);
        let response = self.post_with_retry(&body).await?;

        let byte_stream = response.bytes_stream();
        let deltas = futures_util::stream::unfold(
            (byte_stream, SseFeed::new(), Vec::<String>::new(), false),
            |(mut bytes, mut feed, mut pending, mut done)| async move {
                loop {
                    if let Some(delta) = pending.pop() {
                        return Some((Ok(delta), (bytes, feed, pending, done)));
                    }
                    if done {
                        return None;
                    }
                    match bytes.next().await {
                        Some(Ok(chunk)) => {
                            for event in feed.push(&chunk) {
                                if event.is_done() {
                                    done = true;
                                    continue;
                                }
                                if let Some(text) = delta_text(&event.data) {
                                    if !text.is_empty() {
                                        pending.push(text);
                                    }
                                }
                            }
                            // Yield in arrival order: pending is popped from
                            // the back, so reverse the batch.
                            pending.reverse();
                        }
                        Some(Err(e)) => {
                            return Some((
                                Err(Error::ProviderOther(format!("stream read error: {e}"))),
                                (bytes, feed, pending, true),
                            ));
                        }
                        None => return None,
                    }
                }
            },
        );
        Ok(Box::pin(deltas))
    }
}

/// Extract the text delta from a chat-completions stream chunk.
fn delta_text(data: &str) -> Option<String> {
    let json: serde_json::Value = serde_json::from_str(data).ok()?;
    json.pointer("/choices/0/delta/content")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
}

/// Map a provider HTTP error to a typed error.
fn map_provider_error(status: u16, body: &str) -> Error {
    let detail: String = body.chars().take(500).collect();
    match status {
        429 => Error::ProviderRateLimited(format!("provider rate limit: {detail}")),
        408 | 504 => Error::ProviderTimeout(format!("provider timeout: {detail}")),
        400 if body.contains("content_filter") || body.contains("content policy") => {
            Error::ProviderContentFiltered(detail)
        }
        s if (400..500).contains(&s) => Error::ProviderOther(format!("HTTP {s}: {detail}")),
        s => Error::ProviderOther(format!("provider error {s}: {detail}")),
    }
}

/// Exponential backoff with jitter: 500ms base doubling, ±25%.
fn backoff_delay(attempt: u32) -> Duration {
    use rand::Rng;
    let base_ms = 500u64.saturating_mul(1 << attempt.min(4));
    let jitter = rand::thread_rng().gen_range(0..=base_ms / 2);
    Duration::from_millis(base_ms / 4 * 3 + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatMessage;

    fn client() -> OpenRouterClient {
        OpenRouterClient::new(LlmConfig {
            api_key: "test-key".into(),
            ..LlmConfig::default()
        })
        .expect("client")
    }

    #[test]
    fn body_includes_model_and_messages() {
        let client = client();
        let body = client.request_body(
            &[ChatMessage::user("hello")],
            &ChatParams::default(),
            false,
        );
        assert_eq!(body["model"], "qwen/qwen3-32b");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "hello");
        assert_eq!(body["stream"], false);
    }

    #[test]
    fn body_prepends_system_override() {
        let client = client();
        let params = ChatParams::default().with_system("be brief");
        let body = client.request_body(&[ChatMessage::user("hi")], &params, false);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "be brief");
        assert_eq!(body["messages"][1]["role"], "user");
    }

    #[test]
    fn body_honors_model_override() {
        let client = client();
        let params = ChatParams {
            model_id: Some("other/model".into()),
            ..ChatParams::default()
        };
        let body = client.request_body(&[ChatMessage::user("hi")], &params, true);
        assert_eq!(body["model"], "other/model");
        assert_eq!(body["stream"], true);
    }

    #[test]
    fn delta_text_extracts_content() {
        let data = r#"{"choices":[{"delta":{"content":"Hi "}}]}"#;
        assert_eq!(delta_text(data).as_deref(), Some("Hi "));
    }

    #[test]
    fn delta_text_absent_for_role_chunk() {
        let data = r#"{"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert!(delta_text(data).is_none());
    }

    #[test]
    fn delta_text_ignores_garbage() {
        assert!(delta_text("not json").is_none());
    }

    #[test]
    fn provider_error_mapping() {
        assert_eq!(
            map_provider_error(429, "slow down").code(),
            "provider_rate_limited"
        );
        assert_eq!(map_provider_error(408, "").code(), "provider_timeout");
        assert_eq!(map_provider_error(504, "").code(), "provider_timeout");
        assert_eq!(
            map_provider_error(400, r#"{"error":"content_filter"}"#).code(),
            "provider_content_filtered"
        );
        assert_eq!(map_provider_error(400, "bad request").code(), "provider_other");
        assert_eq!(map_provider_error(500, "boom").code(), "provider_other");
    }

    #[test]
    fn backoff_grows_with_attempts() {
        // Jitter makes exact values nondeterministic; check coarse bounds.
        for _ in 0..16 {
            let first = backoff_delay(1);
            let third = backoff_delay(3);
            assert!(first >= Duration::from_millis(500 * 2 * 3 / 4));
            assert!(first <= Duration::from_millis(500 * 2 * 3 / 4 + 500));
            assert!(third > first);
        }
    }
}
