//! Request handlers.
//!
//! Error mapping: 400 for invalid input, 404 for unknown repositories and
//! cache keys, 429 for exhausted upstream rate limits, otherwise 500 with
//! the stable error code in the body. The streaming endpoint is the
//! exception: it always answers 200 and reports failures as terminal
//! `error` events.

use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;

use super::AppState;
use crate::error::Error;
use crate::ingest::RepoInfo;
use crate::podcast::PodcastRequest;
use crate::store::cache::PodcastRecord;

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = serde_json::json!({
            "error": self.code(),
            "detail": self.message(),
        });
        (status, Json(body)).into_response()
    }
}

/// Session id threaded through all `/voice/*` calls.
fn session_id(headers: &HeaderMap) -> String {
    headers
        .get("x-session-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| "default".to_owned())
}

fn audio_response(bytes: Vec<u8>) -> Response {
    ([(header::CONTENT_TYPE, "audio/wav")], bytes).into_response()
}

// ── Repository parsing ────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ParseRepoRequest {
    pub repo_url: String,
}

#[derive(Debug, Serialize)]
pub struct ParseRepoResponse {
    pub file_tree: String,
    pub readme_content: String,
    pub repo_info: RepoInfo,
}

/// `POST /parse-repo`
pub async fn parse_repo(
    State(state): State<AppState>,
    Json(request): Json<ParseRepoRequest>,
) -> Result<Json<ParseRepoResponse>, Error> {
    let snapshot = state.ingestor.parse(&request.repo_url).await?;
    Ok(Json(ParseRepoResponse {
        file_tree: snapshot.tree.render(),
        readme_content: snapshot.readme,
        repo_info: snapshot.info,
    }))
}

// ── Diagram ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct GenerateDiagramRequest {
    pub file_tree: String,
    #[serde(default)]
    pub readme_content: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GenerateDiagramResponse {
    pub diagram_code: String,
    pub explanation: String,
}

/// `POST /generate-diagram`
pub async fn generate_diagram(
    State(state): State<AppState>,
    Json(request): Json<GenerateDiagramRequest>,
) -> Result<Json<GenerateDiagramResponse>, Error> {
    if request.file_tree.trim().is_empty() {
        return Err(Error::InvalidInput("file_tree is required".into()));
    }
    let readme = request.readme_content.unwrap_or_default();
    let result = state
        .diagrams
        .generate(&request.file_tree, &readme, None)
        .await?;
    Ok(Json(GenerateDiagramResponse {
        diagram_code: result.diagram_code,
        explanation: result.explanation,
    }))
}

// ── Podcast ───────────────────────────────────────────────────

/// `POST /generate-podcast`
pub async fn generate_podcast(
    State(state): State<AppState>,
    Json(request): Json<PodcastRequest>,
) -> Result<Json<PodcastRecord>, Error> {
    let record = state.podcasts.generate(&request).await?;
    Ok(Json(record))
}

/// `POST /generate-podcast-stream`
pub async fn generate_podcast_stream(
    State(state): State<AppState>,
    Json(request): Json<PodcastRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.podcasts.stream(&request).await;
    let stream = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            let terminal = event.is_terminal();
            let json = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_owned());
            yield Ok(Event::default().data(json));
            if terminal {
                break;
            }
        }
    };
    Sse::new(stream)
}

/// `GET /podcast-audio/{cache_key}`
pub async fn podcast_audio(
    State(state): State<AppState>,
    Path(cache_key): Path<String>,
) -> Result<Response, Error> {
    let record = state
        .podcasts
        .record(&cache_key)
        .ok_or_else(|| Error::UpstreamNotFound(format!("no podcast for key {cache_key}")))?;
    let bytes = state.podcasts.artifact(&record.files.audio).await?;
    Ok(audio_response(bytes))
}

#[derive(Debug, Serialize)]
pub struct PodcastScriptResponse {
    pub cache_key: String,
    pub script: serde_json::Value,
    pub metadata: crate::podcast::script::EpisodeMetadata,
    pub files: crate::store::cache::PodcastFiles,
}

/// `GET /podcast-script/{cache_key}`
pub async fn podcast_script(
    State(state): State<AppState>,
    Path(cache_key): Path<String>,
) -> Result<Json<PodcastScriptResponse>, Error> {
    let record = state
        .podcasts
        .record(&cache_key)
        .ok_or_else(|| Error::UpstreamNotFound(format!("no podcast for key {cache_key}")))?;
    let bytes = state.podcasts.artifact(&record.files.script).await?;
    let script: serde_json::Value = serde_json::from_slice(&bytes)
        .map_err(|e| Error::StorageFailed(format!("corrupt script artifact: {e}")))?;
    Ok(Json(PodcastScriptResponse {
        cache_key: record.cache_key,
        script,
        metadata: record.metadata,
        files: record.files,
    }))
}

#[derive(Debug, Deserialize)]
pub struct CachedPodcastsQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

/// `GET /cached-podcasts?limit=N`
pub async fn cached_podcasts(
    State(state): State<AppState>,
    Query(query): Query<CachedPodcastsQuery>,
) -> Json<Vec<PodcastRecord>> {
    Json(state.podcasts.recent_records(query.limit))
}

// ── Voice ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct VoiceAnalyzeRequest {
    pub repo_url: String,
}

/// `POST /voice/analyze-repo`
pub async fn voice_analyze_repo(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<VoiceAnalyzeRequest>,
) -> Result<Json<crate::voice::AnalyzeOutcome>, Error> {
    let session = session_id(&headers);
    let outcome = state.voice.analyze_repo(&session, &request.repo_url).await?;
    Ok(Json(outcome))
}

/// `GET /voice/introduction-audio`
pub async fn voice_introduction_audio(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, Error> {
    let session = session_id(&headers);
    let bytes = state.voice.introduction_audio(&session).await?;
    Ok(audio_response(bytes))
}

#[derive(Debug, Serialize)]
pub struct SttResponse {
    pub transcript: String,
}

/// `POST /voice/stt`: multipart with an `audio` field.
pub async fn voice_stt(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<SttResponse>, Error> {
    let session = session_id(&headers);

    let mut audio: Option<Vec<u8>> = None;
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() == Some("audio") {
            audio = field.bytes().await.ok().map(|b| b.to_vec());
            break;
        }
    }
    let audio = audio.ok_or_else(|| Error::InvalidInput("missing `audio` field".into()))?;

    let transcript = state.voice.transcribe(&session, &audio).await?;
    Ok(Json(SttResponse { transcript }))
}

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub transcript: String,
}

#[derive(Debug, Serialize)]
pub struct AskResponse {
    pub response: String,
}

/// `POST /voice/ask`
pub async fn voice_ask(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<AskRequest>,
) -> Result<Json<AskResponse>, Error> {
    let session = session_id(&headers);
    let response = state.voice.ask(&session, &request.transcript).await?;
    Ok(Json(AskResponse { response }))
}

#[derive(Debug, Deserialize)]
pub struct TtsRequest {
    pub text: String,
    #[serde(default)]
    pub voice_id: Option<String>,
}

/// `POST /voice/tts`
pub async fn voice_tts(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<TtsRequest>,
) -> Result<Response, Error> {
    if request.text.trim().is_empty() {
        return Err(Error::InvalidInput("text is required".into()));
    }
    let session = session_id(&headers);
    match state
        .voice
        .speak(&session, &request.text, request.voice_id.as_deref())
        .await?
    {
        Some(bytes) => Ok(audio_response(bytes)),
        // Interrupted mid-synthesis: nothing to play.
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

/// `POST /voice/interrupt`
pub async fn voice_interrupt(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Json<serde_json::Value> {
    let session = session_id(&headers);
    state.voice.interrupt(&session).await;
    Json(serde_json::json!({"status": "interrupted"}))
}

/// `GET /voice/status`
pub async fn voice_status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Json<serde_json::Value> {
    let session = session_id(&headers);
    let state_name = state.voice.state(&session).await;
    Json(serde_json::json!({"state": state_name}))
}

// ── Artifacts & liveness ──────────────────────────────────────

/// `GET /files/{*key}`: serves local-backend presigned paths.
pub async fn serve_file(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Response, Error> {
    let bytes = state.podcasts.artifact(&key).await?;
    Ok(([(header::CONTENT_TYPE, content_type_for(&key))], bytes).into_response())
}

/// `GET /health`
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "healthy"}))
}

/// Content type from a storage key's extension.
fn content_type_for(key: &str) -> &'static str {
    match key.rsplit('.').next() {
        Some("wav") => "audio/wav",
        Some("mp3") => "audio/mpeg",
        Some("json") => "application/json",
        Some("txt") | Some("md") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}
