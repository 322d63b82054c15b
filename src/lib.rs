//! Repocast: repository URL in, derived artifacts out.
//!
//! Three coupled pipelines share one backbone: ingest a repository's
//! textual surface, compress it to a model-sized context, run staged LLM
//! prompt chains.
//! - **Diagram**: explanation → component/path mapping → validated
//!   flowchart text
//! - **Podcast**: script chain → per-turn speech synthesis → progressive
//!   SSE delivery with content-addressed caching
//! - **Voice**: analyze → spoken introduction → VAD/STT → bounded-history
//!   Q&A → interruptible TTS
//!
//! # Architecture
//!
//! Dependencies are constructed once at startup and threaded through an
//! axum state struct: the repository ingestor, the LLM client, the speech
//! and transcription clients, and a storage backend (local filesystem or
//! S3-compatible, selected by configuration).

pub mod config;
pub mod context;
pub mod diagram;
pub mod error;
pub mod ingest;
pub mod llm;
pub mod podcast;
pub mod server;
pub mod store;
pub mod voice;

pub use config::Config;
pub use error::{Error, Result};
