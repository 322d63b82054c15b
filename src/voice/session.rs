//! Voice session state.
//!
//! One [`VoiceSession`] per client, tracked by an explicit session id (the
//! `X-Session-Id` header). History is bounded: the system context stays
//! pinned at index 0 and the oldest user/assistant pairs fall off first.
//! Interruption hands a fresh cancellation token to each synthesis; the
//! old token is cancelled when the client taps.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::llm::{ChatMessage, Role};

/// Client-observable turn state, mirrored server-side for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnState {
    Idle,
    Listening,
    Thinking,
    Speaking,
}

/// Per-connection conversational state.
pub struct VoiceSession {
    pub id: String,
    pub repo_name: String,
    pub repo_description: String,
    /// Canonical URL of the analyzed repository.
    pub repo_url: String,
    /// Paths retained from the analyzed snapshot's tree, for matching
    /// files a question names.
    pub tree_paths: Vec<String>,
    /// Compressed repository summary, computed once at analyze time.
    pub analysis_summary: String,
    pub introduction_text: String,
    /// Pre-synthesized introduction audio (WAV bytes).
    pub introduction_audio: Vec<u8>,
    history: Vec<ChatMessage>,
    history_pairs: usize,
    state: TurnState,
    speaking: CancellationToken,
}

impl VoiceSession {
    /// Create an empty session bounded to `history_pairs` exchanges.
    pub fn new(id: impl Into<String>, history_pairs: usize) -> Self {
        Self {
            id: id.into(),
            repo_name: String::new(),
            repo_description: String::new(),
            repo_url: String::new(),
            tree_paths: Vec::new(),
            analysis_summary: String::new(),
            introduction_text: String::new(),
            introduction_audio: Vec::new(),
            history: Vec::new(),
            history_pairs,
            state: TurnState::Idle,
            speaking: CancellationToken::new(),
        }
    }

    /// Replace the system context (kept at history index 0) and clear the
    /// conversation.
    pub fn reset_with_system(&mut self, system: impl Into<String>) {
        self.history.clear();
        self.history.push(ChatMessage::system(system));
        self.state = TurnState::Idle;
    }

    /// Append a user message, truncating the oldest pair if over bound.
    pub fn push_user(&mut self, content: impl Into<String>) {
        self.history.push(ChatMessage::user(content));
        self.truncate();
    }

    /// Append an assistant reply, truncating the oldest pair if over bound.
    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.history.push(ChatMessage::assistant(content));
        self.truncate();
    }

    /// The bounded history, system entry first.
    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    /// Current turn state.
    pub fn state(&self) -> TurnState {
        self.state
    }

    /// Transition the turn state.
    pub fn set_state(&mut self, state: TurnState) {
        self.state = state;
    }

    /// Token guarding the current outbound synthesis.
    pub fn speaking_token(&self) -> CancellationToken {
        self.speaking.clone()
    }

    /// Interrupt: cancel the active synthesis and return to listening.
    pub fn interrupt(&mut self) {
        self.speaking.cancel();
        self.speaking = CancellationToken::new();
        self.state = TurnState::Listening;
    }

    /// Drop oldest non-system messages beyond the pair bound.
    fn truncate(&mut self) {
        let has_system = self
            .history
            .first()
            .map(|m| m.role == Role::System)
            .unwrap_or(false);
        let head = usize::from(has_system);
        let max_tail = self.history_pairs * 2;
        while self.history.len() - head > max_tail {
            self.history.remove(head);
        }
    }
}

/// Process-wide session registry keyed by session id.
#[derive(Clone, Default)]
pub struct SessionManager {
    sessions: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<VoiceSession>>>>>,
    history_pairs: usize,
}

impl SessionManager {
    /// Create a manager whose sessions keep `history_pairs` exchanges.
    pub fn new(history_pairs: usize) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            history_pairs,
        }
    }

    /// Fetch or create the session for `id`.
    pub fn get_or_create(&self, id: &str) -> Arc<tokio::sync::Mutex<VoiceSession>> {
        let mut sessions = match self.sessions.lock() {
            Ok(sessions) => sessions,
            Err(poisoned) => poisoned.into_inner(),
        };
        sessions
            .entry(id.to_owned())
            .or_insert_with(|| {
                Arc::new(tokio::sync::Mutex::new(VoiceSession::new(
                    id,
                    self.history_pairs,
                )))
            })
            .clone()
    }
}
