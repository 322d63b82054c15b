//! Configuration types for the repocast service.
//!
//! All settings live in a [`Config`] tree of plain structs with sensible
//! defaults. [`Config::from_env()`] populates the tree from environment
//! variables at process start; nothing reads the environment after that.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Error, Result};

/// Top-level configuration for the service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server settings.
    pub server: ServerConfig,
    /// Repository ingestion settings.
    pub ingest: IngestConfig,
    /// LLM provider settings.
    pub llm: LlmConfig,
    /// Text-to-speech provider settings.
    pub tts: TtsConfig,
    /// Speech-to-text provider settings.
    pub stt: SttConfig,
    /// Artifact storage settings.
    pub store: StoreConfig,
    /// Podcast generation settings.
    pub podcast: PodcastConfig,
    /// Voice conversation settings.
    pub voice: VoiceConfig,
}

/// HTTP server bind settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 8000,
        }
    }
}

/// Repository host (GitHub REST) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Base URL of the hosting provider's REST API.
    pub api_base: String,
    /// Optional access token. Lifts anonymous rate limits.
    pub token: Option<String>,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Files larger than this are never read into the snapshot.
    pub max_file_bytes: usize,
    /// Trees with more entries than this are truncated.
    pub max_tree_nodes: usize,
    /// Depth below which entries are elided when the tree is over the cap.
    pub truncate_depth: usize,
    /// Upper bound on the number of selected source files per snapshot.
    pub max_selected_files: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.github.com".to_owned(),
            token: None,
            timeout_secs: 30,
            max_file_bytes: 64 * 1024,
            max_tree_nodes: 5_000,
            truncate_depth: 3,
            max_selected_files: 12,
        }
    }
}

/// LLM provider settings (OpenAI-compatible chat completions).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider API key.
    pub api_key: String,
    /// Base URL of the provider API.
    pub base_url: String,
    /// Default model identifier.
    pub model_id: String,
    /// Advertised model context window in tokens.
    pub context_window: usize,
    /// Per-call timeout in seconds.
    pub timeout_secs: u64,
    /// Total attempts for retryable failures (first try included).
    pub max_attempts: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://openrouter.ai/api".to_owned(),
            model_id: "qwen/qwen3-32b".to_owned(),
            context_window: 32_768,
            timeout_secs: 60,
            max_attempts: 3,
        }
    }
}

/// Text-to-speech provider settings (ElevenLabs-style REST API).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    /// Provider API key.
    pub api_key: String,
    /// Base URL of the provider API.
    pub base_url: String,
    /// Synthesis model identifier.
    pub model_id: String,
    /// Per-call timeout in seconds.
    pub timeout_secs: u64,
    /// Total attempts per turn (first try + 2 retries).
    pub max_attempts: u32,
    /// Default host voice.
    pub default_host_voice: String,
    /// Default expert voice.
    pub default_expert_voice: String,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.elevenlabs.io".to_owned(),
            model_id: "eleven_multilingual_v2".to_owned(),
            timeout_secs: 30,
            max_attempts: 3,
            default_host_voice: "zGjIP4SZlMnY9m93k97r".to_owned(),
            default_expert_voice: "L0Dsvb3SLTyegXwtm47J".to_owned(),
        }
    }
}

/// Speech-to-text provider settings (Whisper-style transcription API).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttConfig {
    /// Provider API key.
    pub api_key: String,
    /// Base URL of the provider API.
    pub base_url: String,
    /// Transcription model identifier.
    pub model_id: String,
    /// Per-call timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com".to_owned(),
            model_id: "whisper-1".to_owned(),
            timeout_secs: 30,
        }
    }
}

/// Artifact storage settings.
///
/// The object-store backend is selected when `bucket` plus both credential
/// fields are present; otherwise artifacts land under `root` on local disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Root directory for the local backend.
    pub root: PathBuf,
    /// Object-store bucket name.
    pub bucket: Option<String>,
    /// Object-store region.
    pub region: String,
    /// Access key id for the object store.
    pub access_key_id: Option<String>,
    /// Secret access key for the object store.
    pub secret_access_key: Option<String>,
    /// Custom endpoint URL for S3-compatible stores (MinIO, LocalStack).
    pub endpoint_url: Option<String>,
    /// Default presigned-URL lifetime in seconds.
    pub presign_ttl_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("storage"),
            bucket: None,
            region: "us-east-1".to_owned(),
            access_key_id: None,
            secret_access_key: None,
            endpoint_url: None,
            presign_ttl_secs: 3_600,
        }
    }
}

impl StoreConfig {
    /// Whether the object-store backend should be used.
    pub fn object_store_configured(&self) -> bool {
        self.bucket.is_some() && self.access_key_id.is_some() && self.secret_access_key.is_some()
    }
}

/// Podcast pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodcastConfig {
    /// End-to-end generation timeout in seconds.
    pub generation_timeout_secs: u64,
    /// Silence inserted between turns in the combined file, in milliseconds.
    pub gap_ms: u64,
    /// Bound on the per-request event queue.
    pub event_queue_depth: usize,
    /// Assumed speaking rate for duration estimates.
    pub words_per_minute: u64,
}

impl Default for PodcastConfig {
    fn default() -> Self {
        Self {
            generation_timeout_secs: 600,
            gap_ms: 200,
            event_queue_depth: 4,
            words_per_minute: 150,
        }
    }
}

/// Voice conversation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    /// Maximum retained user/assistant pairs in a session history.
    pub history_pairs: usize,
    /// Voice used for spoken introductions and answers.
    pub voice_id: String,
    /// VAD energy threshold (RMS, on normalized samples).
    pub vad_threshold: f32,
    /// Padding kept around detected speech, in milliseconds.
    pub vad_pad_ms: u32,
    /// Minimum speech duration to count as speech, in milliseconds.
    pub vad_min_speech_ms: u32,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            history_pairs: 16,
            voice_id: "L0Dsvb3SLTyegXwtm47J".to_owned(),
            vad_threshold: 0.015,
            vad_pad_ms: 100,
            vad_min_speech_ms: 200,
        }
    }
}

impl Config {
    /// Build a config from environment variables.
    ///
    /// `REPOCAST_LLM_API_KEY` is required; everything else falls back to
    /// defaults. Recognized variables:
    ///
    /// - `REPOCAST_LLM_API_KEY`, `REPOCAST_LLM_BASE_URL`, `REPOCAST_MODEL`,
    ///   `REPOCAST_CONTEXT_WINDOW`
    /// - `REPOCAST_GITHUB_TOKEN`
    /// - `REPOCAST_TTS_API_KEY`, `REPOCAST_TTS_BASE_URL`
    /// - `REPOCAST_STT_API_KEY`, `REPOCAST_STT_BASE_URL`
    /// - `REPOCAST_STORE_ROOT`, `REPOCAST_BUCKET`, `AWS_REGION`,
    ///   `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, `REPOCAST_S3_ENDPOINT`
    /// - `REPOCAST_HOST`, `REPOCAST_PORT`
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] when the LLM key is missing or a
    /// numeric variable fails to parse.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        config.llm.api_key = std::env::var("REPOCAST_LLM_API_KEY")
            .map_err(|_| Error::InvalidInput("REPOCAST_LLM_API_KEY is not set".into()))?;
        if let Ok(url) = std::env::var("REPOCAST_LLM_BASE_URL") {
            config.llm.base_url = url;
        }
        if let Ok(model) = std::env::var("REPOCAST_MODEL") {
            config.llm.model_id = model;
        }
        if let Ok(window) = std::env::var("REPOCAST_CONTEXT_WINDOW") {
            config.llm.context_window = window.parse().map_err(|_| {
                Error::InvalidInput(format!("REPOCAST_CONTEXT_WINDOW is not a number: {window}"))
            })?;
        }

        config.ingest.token = std::env::var("REPOCAST_GITHUB_TOKEN").ok();

        if let Ok(key) = std::env::var("REPOCAST_TTS_API_KEY") {
            config.tts.api_key = key;
        }
        if let Ok(url) = std::env::var("REPOCAST_TTS_BASE_URL") {
            config.tts.base_url = url;
        }
        if let Ok(key) = std::env::var("REPOCAST_STT_API_KEY") {
            config.stt.api_key = key;
        }
        if let Ok(url) = std::env::var("REPOCAST_STT_BASE_URL") {
            config.stt.base_url = url;
        }

        if let Ok(root) = std::env::var("REPOCAST_STORE_ROOT") {
            config.store.root = PathBuf::from(root);
        }
        config.store.bucket = std::env::var("REPOCAST_BUCKET").ok();
        if let Ok(region) = std::env::var("AWS_REGION") {
            config.store.region = region;
        }
        config.store.access_key_id = std::env::var("AWS_ACCESS_KEY_ID").ok();
        config.store.secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY").ok();
        config.store.endpoint_url = std::env::var("REPOCAST_S3_ENDPOINT").ok();

        if let Ok(host) = std::env::var("REPOCAST_HOST") {
            config.server.host = host;
        }
        if let Ok(port) = std::env::var("REPOCAST_PORT") {
            config.server.port = port.parse().map_err(|_| {
                Error::InvalidInput(format!("REPOCAST_PORT is not a port number: {port}"))
            })?;
        }

        Ok(config)
    }
}
