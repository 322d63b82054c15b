//! HTTP server assembly.
//!
//! All dependencies are constructed once at startup into an [`AppState`] of
//! `Arc`'d components and handed to every handler through axum state; no
//! module-level singletons.

pub mod routes;

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::config::Config;
use crate::context::ContextBuilder;
use crate::diagram::DiagramPipeline;
use crate::error::{Error, Result};
use crate::ingest::RepoIngestor;
use crate::llm::{LlmClient, OpenRouterClient};
use crate::podcast::pipeline::PodcastPipeline;
use crate::podcast::script::ScriptSynthesizer;
use crate::podcast::tts::SpeechClient;
use crate::store::backend_from_config;
use crate::voice::stt::SttClient;
use crate::voice::VoiceService;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub ingestor: Arc<RepoIngestor>,
    pub diagrams: Arc<DiagramPipeline>,
    pub podcasts: Arc<PodcastPipeline>,
    pub voice: Arc<VoiceService>,
}

/// Construct every dependency from configuration.
///
/// # Errors
///
/// Fails when a client cannot be built or the cache index is corrupt.
pub async fn build_state(config: &Config) -> Result<AppState> {
    let ingestor = Arc::new(RepoIngestor::new(config.ingest.clone())?);
    let contexts = ContextBuilder::new(config.llm.context_window);

    let llm: Arc<dyn LlmClient> = Arc::new(OpenRouterClient::new(config.llm.clone())?);
    let diagrams = Arc::new(DiagramPipeline::new(
        Arc::clone(&llm),
        config.llm.model_id.clone(),
    ));

    let speech = Arc::new(SpeechClient::new(config.tts.clone())?);
    let backend = backend_from_config(&config.store)?;
    let podcasts = Arc::new(
        PodcastPipeline::new(
            Arc::clone(&ingestor),
            contexts.clone(),
            ScriptSynthesizer::new(Arc::clone(&llm)),
            Arc::clone(&speech),
            backend,
            config.podcast.clone(),
            config.store.presign_ttl_secs,
        )
        .await?,
    );

    let voice = Arc::new(VoiceService::new(
        Arc::clone(&ingestor),
        contexts,
        llm,
        speech,
        SttClient::new(config.stt.clone())?,
        config.voice.clone(),
    ));

    Ok(AppState {
        ingestor,
        diagrams,
        podcasts,
        voice,
    })
}

/// The full route table.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/parse-repo", post(routes::parse_repo))
        .route("/generate-diagram", post(routes::generate_diagram))
        .route("/generate-podcast", post(routes::generate_podcast))
        .route(
            "/generate-podcast-stream",
            post(routes::generate_podcast_stream),
        )
        .route("/podcast-audio/{cache_key}", get(routes::podcast_audio))
        .route("/podcast-script/{cache_key}", get(routes::podcast_script))
        .route("/cached-podcasts", get(routes::cached_podcasts))
        .route("/voice/analyze-repo", post(routes::voice_analyze_repo))
        .route(
            "/voice/introduction-audio",
            get(routes::voice_introduction_audio),
        )
        .route("/voice/stt", post(routes::voice_stt))
        .route("/voice/ask", post(routes::voice_ask))
        .route("/voice/tts", post(routes::voice_tts))
        .route("/voice/interrupt", post(routes::voice_interrupt))
        .route("/voice/status", get(routes::voice_status))
        .route("/files/{*key}", get(routes::serve_file))
        .route("/health", get(routes::health))
        .with_state(state)
}

/// Bind and serve until the process exits.
///
/// # Errors
///
/// Returns [`Error::Internal`] if the listener cannot bind.
pub async fn serve(config: Config) -> Result<()> {
    let state = build_state(&config).await?;
    let app = router(state);

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| Error::Internal(format!("bind {bind_addr}: {e}")))?;
    let addr = listener
        .local_addr()
        .map_err(|e| Error::Internal(format!("local addr: {e}")))?;
    tracing::info!("listening on http://{addr}");

    axum::serve(listener, app)
        .await
        .map_err(|e| Error::Internal(format!("server error: {e}")))
}
