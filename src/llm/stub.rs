//! Recorded-response LLM for tests.
//!
//! Prompt chains are sequences of pure functions around LLM calls; feeding
//! them canned responses makes each stage testable without a network. The
//! stub replays queued responses in order and records every request it saw.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use super::{ChatMessage, ChatParams, LlmClient, TextDeltaStream};
use crate::error::{Error, Result};

/// An [`LlmClient`] that replays recorded responses.
#[derive(Debug, Default)]
pub struct RecordedLlm {
    responses: Mutex<VecDeque<Result<String>>>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl RecordedLlm {
    /// Create a stub with a queue of successful responses.
    pub fn with_responses<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let queue = responses.into_iter().map(|s| Ok(s.into())).collect();
        Self {
            responses: Mutex::new(queue),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue an additional response.
    pub fn push_response(&self, response: impl Into<String>) {
        if let Ok(mut queue) = self.responses.lock() {
            queue.push_back(Ok(response.into()));
        }
    }

    /// Queue an error response.
    pub fn push_error(&self, error: Error) {
        if let Ok(mut queue) = self.responses.lock() {
            queue.push_back(Err(error));
        }
    }

    /// Number of calls made so far.
    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// The message list of the `n`th call.
    pub fn request(&self, n: usize) -> Option<Vec<ChatMessage>> {
        self.requests.lock().ok()?.get(n).cloned()
    }

    fn next(&self, messages: &[ChatMessage]) -> Result<String> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(messages.to_vec());
        }
        let mut queue = self
            .responses
            .lock()
            .map_err(|_| Error::Internal("stub lock poisoned".into()))?;
        queue
            .pop_front()
            .unwrap_or_else(|| Err(Error::Internal("recorded responses exhausted".into())))
    }
}

#[async_trait]
impl LlmClient for RecordedLlm {
    async fn chat(&self, messages: &[ChatMessage], _params: &ChatParams) -> Result<String> {
        self.next(messages)
    }

    async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        _params: &ChatParams,
    ) -> Result<TextDeltaStream> {
        // Stream the recorded response as word-sized deltas.
        let text = self.next(messages)?;
        let deltas: Vec<Result<String>> = text
            .split_inclusive(' ')
            .map(|word| Ok(word.to_owned()))
            .collect();
        Ok(Box::pin(futures_util::stream::iter(deltas)))
    }
}
