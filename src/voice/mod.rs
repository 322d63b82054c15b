//! Voice conversation over a repository.
//!
//! Session lifecycle: `analyze_repo` builds the QA context, seeds the
//! conversation history with a system message, and pre-synthesizes a spoken
//! introduction; `stt` trims silence and transcribes; `ask` runs the
//! bounded-history Q&A chain, pulling in any file the question names from
//! the analyzed tree; `tts` speaks a reply under the session's cancellation
//! token so a client tap can interrupt playback without touching the
//! in-flight LLM call.

pub mod session;
pub mod stt;
pub mod vad;

use serde::Serialize;
use std::sync::Arc;

use crate::config::VoiceConfig;
use crate::context::{paths_referenced, ContextBuilder, Purpose};
use crate::error::{Error, Result};
use crate::ingest::{RepoIngestor, RepoUrl};
use crate::llm::{strip_code_fences, ChatParams, LlmClient};
use crate::podcast::audio;
use crate::podcast::tts::{SpeechClient, VoiceSettings};
use session::{SessionManager, TurnState};
use stt::SttClient;

/// At most this many question-named files are pulled into one answer.
const MAX_QUESTION_FILES: usize = 2;

/// Character cap on each question-named file woven into a call.
const QUESTION_FILE_MAX_CHARS: usize = 6_000;

/// Fallback conversational system prompt for sessions that ask before
/// analyzing a repository.
const CONVERSATIONAL_SYSTEM: &str = "You are a friendly voice assistant for \
developers. Answer in one to three short, speakable sentences. Use \
contractions, stay warm and concrete, and ask a clarifying question when \
context is missing.";

/// Result of analyzing a repository for a voice session.
#[derive(Debug, Clone, Serialize)]
pub struct AnalyzeOutcome {
    pub success: bool,
    pub repo_name: String,
    pub repo_description: String,
    pub analysis_summary: String,
    pub introduction_text: String,
    pub introduction_audio_size: usize,
}

/// Orchestrates the per-session voice loop.
pub struct VoiceService {
    ingestor: Arc<RepoIngestor>,
    contexts: ContextBuilder,
    llm: Arc<dyn LlmClient>,
    speech: Arc<SpeechClient>,
    transcriber: SttClient,
    sessions: SessionManager,
    config: VoiceConfig,
}

impl VoiceService {
    /// Create the service.
    pub fn new(
        ingestor: Arc<RepoIngestor>,
        contexts: ContextBuilder,
        llm: Arc<dyn LlmClient>,
        speech: Arc<SpeechClient>,
        transcriber: SttClient,
        config: VoiceConfig,
    ) -> Self {
        let sessions = SessionManager::new(config.history_pairs);
        Self {
            ingestor,
            contexts,
            llm,
            speech,
            transcriber,
            sessions,
            config,
        }
    }

    /// Current turn state for a session.
    pub async fn state(&self, session_id: &str) -> TurnState {
        let session = self.sessions.get_or_create(session_id);
        let session = session.lock().await;
        session.state()
    }

    /// Interrupt the session's outbound speech.
    pub async fn interrupt(&self, session_id: &str) {
        let session = self.sessions.get_or_create(session_id);
        let mut session = session.lock().await;
        session.interrupt();
    }

    /// Analyze a repository and seed the session with its context.
    ///
    /// # Errors
    ///
    /// Ingestion and provider failures pass through; a synthesis failure
    /// for the introduction is terminal here because the client's next call
    /// depends on the cached audio.
    pub async fn analyze_repo(&self, session_id: &str, repo_url: &str) -> Result<AnalyzeOutcome> {
        let snapshot = self.ingestor.parse(repo_url).await?;
        let context = self.contexts.build(&snapshot, Purpose::Qa);

        let prompt = format!(
            "You are preparing a voice assistant to discuss the repository \
             {name}. Reply with JSON only: {{\"summary\": \"one paragraph on \
             what the project is and how it is built\", \"introduction\": \"a \
             spoken greeting of at most 80 words inviting questions about \
             {name}\"}}.\n\n<file_tree>\n{tree}\n</file_tree>\n<readme>\n{readme}\n</readme>",
            name = snapshot.info.name,
            tree = context.tree_text,
            readme = context.readme_text,
        );
        let params = ChatParams::default().with_max_output_tokens(800);
        let raw = self
            .llm
            .chat(&[crate::llm::ChatMessage::user(prompt)], &params)
            .await?;
        let (summary, introduction) = parse_analysis(&raw, &snapshot.info.name);

        let system_context = format!(
            "You are a voice assistant with deep knowledge of the repository \
             {name}.\n\nDescription: {description}\n\nSummary:\n{summary}\n\n\
             File structure:\n{tree}\n\nAnswer questions about this \
             repository conversationally, in short speakable sentences, and \
             reference concrete files when relevant.",
            name = snapshot.info.name,
            description = snapshot.info.description.as_deref().unwrap_or("none"),
            summary = summary,
            tree = context.tree_text,
        );

        let samples = self
            .speech
            .synthesize(&introduction, &self.config.voice_id, &VoiceSettings::default())
            .await?;
        let intro_audio = audio::encode_wav(&samples)?;

        let session = self.sessions.get_or_create(session_id);
        let mut session = session.lock().await;
        session.reset_with_system(system_context);
        session.repo_name = snapshot.info.name.clone();
        session.repo_description = snapshot.info.description.clone().unwrap_or_default();
        session.repo_url = snapshot.url.clone();
        session.tree_paths = snapshot.tree.paths();
        session.analysis_summary = summary.clone();
        session.introduction_text = introduction.clone();
        session.introduction_audio = intro_audio;

        tracing::info!(session = session_id, repo = %snapshot.info.name, "voice session seeded");
        Ok(AnalyzeOutcome {
            success: true,
            repo_name: session.repo_name.clone(),
            repo_description: session.repo_description.clone(),
            analysis_summary: summary,
            introduction_text: introduction,
            introduction_audio_size: session.introduction_audio.len(),
        })
    }

    /// The pre-synthesized introduction audio for a session.
    ///
    /// # Errors
    ///
    /// `upstream_not_found` when the session has not analyzed a repository.
    pub async fn introduction_audio(&self, session_id: &str) -> Result<Vec<u8>> {
        let session = self.sessions.get_or_create(session_id);
        let session = session.lock().await;
        if session.introduction_audio.is_empty() {
            return Err(Error::UpstreamNotFound(
                "no introduction prepared; call analyze-repo first".into(),
            ));
        }
        Ok(session.introduction_audio.clone())
    }

    /// Transcribe an uploaded WAV clip.
    ///
    /// Silence (per the VAD) short-circuits to an empty transcript without
    /// calling the provider.
    ///
    /// # Errors
    ///
    /// `invalid_input` for undecodable audio; `provider_*` from the STT
    /// provider.
    pub async fn transcribe(&self, session_id: &str, wav_bytes: &[u8]) -> Result<String> {
        let session_handle = self.sessions.get_or_create(session_id);
        {
            let mut session = session_handle.lock().await;
            session.set_state(TurnState::Listening);
        }

        let (samples, sample_rate) = audio::decode_wav(wav_bytes)?;
        let trimmed = match vad::trim_silence(&samples, sample_rate, &self.config) {
            Some(trimmed) => trimmed,
            None => {
                tracing::debug!(session = session_id, "no speech detected");
                let mut session = session_handle.lock().await;
                session.set_state(TurnState::Idle);
                return Ok(String::new());
            }
        };

        let clip = audio::encode_wav_at(&trimmed, sample_rate)?;
        let result = self.transcriber.transcribe(clip).await;

        // Recoverable either way: the session returns to idle.
        let mut session = session_handle.lock().await;
        session.set_state(TurnState::Idle);
        result
    }

    /// Answer a transcript with the session's bounded history.
    ///
    /// Files the transcript names are matched against the analyzed tree,
    /// fetched, and attached to this call only; the persisted history stays
    /// bounded and file-free. History is appended only after the reply
    /// returns, so an interrupt mid-call never corrupts it. Empty
    /// transcripts return empty replies without touching the LLM.
    ///
    /// # Errors
    ///
    /// Provider failures pass through; the session returns to idle.
    pub async fn ask(&self, session_id: &str, transcript: &str) -> Result<String> {
        let transcript = transcript.trim();
        if transcript.is_empty() {
            return Ok(String::new());
        }

        let session_handle = self.sessions.get_or_create(session_id);
        let (mut messages, repo_url, tree_paths) = {
            let mut session = session_handle.lock().await;
            session.set_state(TurnState::Thinking);
            if session.history().is_empty() {
                session.reset_with_system(CONVERSATIONAL_SYSTEM);
                session.set_state(TurnState::Thinking);
            }
            (
                session.history().to_vec(),
                session.repo_url.clone(),
                session.tree_paths.clone(),
            )
        };

        for path in paths_referenced(transcript, &tree_paths)
            .into_iter()
            .take(MAX_QUESTION_FILES)
        {
            if let Some(content) = self.question_file(&repo_url, &path).await {
                messages.push(crate::llm::ChatMessage::system(format!(
                    "The user's question mentions {path}. Its contents:\n{content}"
                )));
            }
        }
        messages.push(crate::llm::ChatMessage::user(transcript));

        let params = ChatParams::default().with_max_output_tokens(600);
        let reply = match self.llm.chat(&messages, &params).await {
            Ok(reply) => reply,
            Err(e) => {
                let mut session = session_handle.lock().await;
                session.set_state(TurnState::Idle);
                return Err(e);
            }
        };

        let mut session = session_handle.lock().await;
        session.push_user(transcript);
        session.push_assistant(reply.clone());
        session.set_state(TurnState::Speaking);
        Ok(reply)
    }

    /// Fetch a question-named file, truncated for prompt use.
    ///
    /// Fetch failures never fail the answer; the question is just answered
    /// without the file.
    async fn question_file(&self, repo_url: &str, path: &str) -> Option<String> {
        if repo_url.is_empty() {
            return None;
        }
        let repo = RepoUrl::parse(repo_url).ok()?;
        match self.ingestor.fetch_file(&repo, path).await {
            Ok(Some(content)) => {
                if content.chars().count() <= QUESTION_FILE_MAX_CHARS {
                    return Some(content);
                }
                let mut capped: String =
                    content.chars().take(QUESTION_FILE_MAX_CHARS).collect();
                capped.push_str("\n… (truncated)");
                Some(capped)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::debug!(path, error = %e, "question file fetch failed");
                None
            }
        }
    }

    /// Synthesize `text` for the session, returning WAV bytes.
    ///
    /// Returns `None` when the session was interrupted mid-synthesis; the
    /// in-flight LLM call (if any) is never cancelled here.
    ///
    /// # Errors
    ///
    /// `provider_*` from the synthesis provider.
    pub async fn speak(
        &self,
        session_id: &str,
        text: &str,
        voice_id: Option<&str>,
    ) -> Result<Option<Vec<u8>>> {
        let session_handle = self.sessions.get_or_create(session_id);
        let token = {
            let mut session = session_handle.lock().await;
            session.set_state(TurnState::Speaking);
            session.speaking_token()
        };

        let voice = voice_id.unwrap_or(&self.config.voice_id);
        let settings = VoiceSettings::default();
        let synthesis = self.speech.synthesize(text, voice, &settings);

        let samples = tokio::select! {
            result = synthesis => result?,
            _ = token.cancelled() => {
                tracing::debug!(session = session_id, "synthesis interrupted");
                return Ok(None);
            }
        };

        let wav = audio::encode_wav(&samples)?;
        let mut session = session_handle.lock().await;
        session.set_state(TurnState::Idle);
        Ok(Some(wav))
    }
}

/// Parse the analysis JSON, falling back to the raw text as summary.
fn parse_analysis(raw: &str, repo_name: &str) -> (String, String) {
    let cleaned = strip_code_fences(raw);
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(cleaned.trim()) {
        let summary = value
            .get("summary")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .trim()
            .to_owned();
        let introduction = value
            .get("introduction")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .trim()
            .to_owned();
        if !summary.is_empty() && !introduction.is_empty() {
            return (summary, introduction);
        }
    }
    (
        cleaned.trim().to_owned(),
        format!(
            "Hello! I've analyzed the {repo_name} repository and I'm ready \
             to answer your questions about it. What would you like to know?"
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analysis_json_parses() {
        let raw = r#"{"summary": "A CLI tool.", "introduction": "Hi there!"}"#;
        let (summary, intro) = parse_analysis(raw, "widget");
        assert_eq!(summary, "A CLI tool.");
        assert_eq!(intro, "Hi there!");
    }

    #[test]
    fn analysis_fallback_uses_raw_text() {
        let (summary, intro) = parse_analysis("just prose, no JSON", "widget");
        assert_eq!(summary, "just prose, no JSON");
        assert!(intro.contains("widget"));
    }

    #[test]
    fn analysis_fallback_on_partial_json() {
        let raw = r#"{"summary": "only a summary"}"#;
        let (_, intro) = parse_analysis(raw, "widget");
        assert!(intro.contains("widget"));
    }
}
