//! LLM orchestration.
//!
//! A single abstraction over the chat-completions provider: [`LlmClient`]
//! exposes a blocking `chat` and a delta-streaming `chat_stream`. Provider
//! auth, base URL, and retry policy all live behind the trait; the prompt
//! chains never see HTTP.

pub mod client;
pub mod sse;
pub mod stub;

use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::error::Result;

pub use client::OpenRouterClient;
pub use stub::RecordedLlm;

/// Message author role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message in a chat conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Uniform generation parameters.
#[derive(Debug, Clone)]
pub struct ChatParams {
    /// Model override; `None` uses the client's configured model.
    pub model_id: Option<String>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum tokens to generate.
    pub max_output_tokens: usize,
    /// Optional system prompt prepended to the message list.
    pub system: Option<String>,
}

impl Default for ChatParams {
    fn default() -> Self {
        Self {
            model_id: None,
            temperature: 0.7,
            max_output_tokens: 2_048,
            system: None,
        }
    }
}

impl ChatParams {
    /// Set the temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the output token cap.
    pub fn with_max_output_tokens(mut self, max: usize) -> Self {
        self.max_output_tokens = max;
        self
    }

    /// Set a system prompt.
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

/// A stream of response text deltas.
pub type TextDeltaStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Strip a surrounding markdown code fence from model output, if any.
pub fn strip_code_fences(raw: &str) -> String {
    let trimmed = raw.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_owned();
    }
    trimmed
        .lines()
        .filter(|l| !l.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Abstraction over the LLM provider.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Run a chat completion and return the full response text.
    async fn chat(&self, messages: &[ChatMessage], params: &ChatParams) -> Result<String>;

    /// Run a streaming chat completion, yielding text deltas.
    async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        params: &ChatParams,
    ) -> Result<TextDeltaStream>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructors_set_roles() {
        assert_eq!(ChatMessage::system("s").role, Role::System);
        assert_eq!(ChatMessage::user("u").role, Role::User);
        assert_eq!(ChatMessage::assistant("a").role, Role::Assistant);
    }

    #[test]
    fn role_serializes_lowercase() {
        let msg = ChatMessage::user("hi");
        let json = serde_json::to_string(&msg).expect("serialize");
        assert!(json.contains(r#""role":"user""#));
    }

    #[test]
    fn params_builder() {
        let params = ChatParams::default()
            .with_temperature(0.0)
            .with_max_output_tokens(512)
            .with_system("be terse");
        assert_eq!(params.temperature, 0.0);
        assert_eq!(params.max_output_tokens, 512);
        assert_eq!(params.system.as_deref(), Some("be terse"));
    }

    #[test]
    fn default_params() {
        let params = ChatParams::default();
        assert!(params.model_id.is_none());
        assert_eq!(params.max_output_tokens, 2_048);
    }

    #[test]
    fn strip_code_fences_removes_wrapping() {
        assert_eq!(strip_code_fences("```json\n[1]\n```"), "[1]");
        assert_eq!(strip_code_fences("plain"), "plain");
        assert_eq!(strip_code_fences("  padded  "), "padded");
    }
}
