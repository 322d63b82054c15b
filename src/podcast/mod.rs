//! Podcast generation.
//!
//! Script synthesis ([`script`]), per-turn speech synthesis ([`tts`]), PCM
//! assembly ([`audio`]), the streaming event model ([`stream`]), and the
//! end-to-end pipeline with caching and single-flight builds
//! ([`pipeline`]).

pub mod audio;
pub mod pipeline;
pub mod script;
pub mod stream;
pub mod tts;

pub use pipeline::{PodcastPipeline, PodcastRequest};
pub use stream::PodcastEvent;
pub use tts::VoiceSettings;
