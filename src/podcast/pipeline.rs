//! End-to-end podcast generation.
//!
//! One request flows: cache lookup (with content-hash freshness check) →
//! script chain → serial TTS batcher with depth-1 post-processing overlap →
//! combined-file assembly → artifact persistence → cache record. Events go
//! through a [`SharedBuild`] so concurrent requests for the same cache key
//! attach to the one in-flight build instead of starting another.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use super::audio::{self, AudioSegment};
use super::script::{PodcastScript, ScriptSynthesizer, Speaker};
use super::stream::{PodcastEvent, SharedBuild};
use super::tts::{estimate_cost, SpeechClient, VoiceSettings};
use crate::config::PodcastConfig;
use crate::context::{ContextBuilder, Purpose};
use crate::error::{Error, Result};
use crate::ingest::RepoIngestor;
use crate::store::cache::{artifact_keys, cache_key, CacheStore, PodcastRecord};
use crate::store::{cache::CacheIndex, StorageBackend};

/// A validated podcast generation request.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct PodcastRequest {
    pub repo_url: String,
    pub duration_minutes: u32,
    #[serde(default)]
    pub voice_settings: Option<VoiceSettings>,
}

impl PodcastRequest {
    /// Validate ranges and resolve defaulted voice settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for out-of-range parameters.
    pub fn validated(&self) -> Result<(String, u32, VoiceSettings)> {
        if !(1..=15).contains(&self.duration_minutes) {
            return Err(Error::InvalidInput(format!(
                "duration_minutes must be within 1..=15, got {}",
                self.duration_minutes
            )));
        }
        crate::ingest::RepoUrl::parse(&self.repo_url)?;
        let settings = self.voice_settings.clone().unwrap_or_default();
        settings.validate()?;
        Ok((self.repo_url.clone(), self.duration_minutes, settings))
    }
}

/// Process-wide mutable state: the cache index plus the per-key
/// single-flight map, guarded by one mutex.
#[derive(Default)]
struct Shared {
    index: CacheIndex,
    builds: HashMap<String, Arc<SharedBuild>>,
}

/// The podcast generation pipeline.
pub struct PodcastPipeline {
    ingestor: Arc<RepoIngestor>,
    contexts: ContextBuilder,
    scripts: ScriptSynthesizer,
    tts: Arc<SpeechClient>,
    backend: Arc<dyn StorageBackend>,
    cache: CacheStore,
    config: PodcastConfig,
    presign_ttl: u64,
    state: Mutex<Shared>,
}

impl PodcastPipeline {
    /// Create the pipeline and load the persisted cache index.
    ///
    /// # Errors
    ///
    /// Fails when the index exists but cannot be read.
    pub async fn new(
        ingestor: Arc<RepoIngestor>,
        contexts: ContextBuilder,
        scripts: ScriptSynthesizer,
        tts: Arc<SpeechClient>,
        backend: Arc<dyn StorageBackend>,
        config: PodcastConfig,
        presign_ttl: u64,
    ) -> Result<Self> {
        let cache = CacheStore::new(backend.clone());
        let index = cache.load().await?;
        tracing::info!(entries = index.entries.len(), "cache index loaded");
        Ok(Self {
            ingestor,
            contexts,
            scripts,
            tts,
            backend,
            cache,
            config,
            presign_ttl,
            state: Mutex::new(Shared {
                index,
                builds: HashMap::new(),
            }),
        })
    }

    /// The cached records, most recently accessed first.
    pub fn recent_records(&self, limit: usize) -> Vec<PodcastRecord> {
        match self.state.lock() {
            Ok(state) => state.index.recent(limit),
            Err(_) => Vec::new(),
        }
    }

    /// Look up one record by cache key.
    pub fn record(&self, cache_key: &str) -> Option<PodcastRecord> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.index.entries.get(cache_key).cloned())
    }

    /// Generate (or reuse) a podcast, waiting for completion.
    ///
    /// Respects the single-flight rule: when a build for the same key is in
    /// flight, this attaches to it and waits for its terminal event.
    pub async fn generate(&self, request: &PodcastRequest) -> Result<PodcastRecord> {
        let (repo_url, duration, settings) = request.validated()?;
        let key = cache_key(&repo_url, duration, &settings);

        let (build, is_new) = self.acquire_build(&key);
        if !is_new {
            let completed_key = wait_for_terminal(build.subscribe()).await?;
            return self
                .record(&completed_key)
                .ok_or_else(|| Error::Internal("build finished without a record".into()));
        }

        let result = self
            .run_with_timeout(&repo_url, duration, &settings, &key, &build)
            .await;
        self.finish_build(&key, &build, &result).await;
        result
    }

    /// Start (or attach to) a generation and stream its events.
    ///
    /// Never fails: invalid input surfaces as a terminal `error` event on
    /// the returned stream, matching the always-200 streaming contract.
    pub async fn stream(self: &Arc<Self>, request: &PodcastRequest) -> mpsc::Receiver<PodcastEvent> {
        let (repo_url, duration, settings) = match request.validated() {
            Ok(parts) => parts,
            Err(e) => {
                let build = SharedBuild::new();
                build.publish(PodcastEvent::Error {
                    message: e.message().to_owned(),
                });
                return Arc::new(build).subscribe();
            }
        };
        let key = cache_key(&repo_url, duration, &settings);

        let (build, is_new) = self.acquire_build(&key);
        let receiver = build.subscribe();
        if is_new {
            let pipeline = Arc::clone(self);
            let build_task = Arc::clone(&build);
            tokio::spawn(async move {
                let result = pipeline
                    .run_with_timeout(&repo_url, duration, &settings, &key, &build_task)
                    .await;
                pipeline.finish_build(&key, &build_task, &result).await;
            });
        }
        receiver
    }

    fn acquire_build(&self, key: &str) -> (Arc<SharedBuild>, bool) {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        match state.builds.get(key) {
            Some(build) => (Arc::clone(build), false),
            None => {
                let build = Arc::new(SharedBuild::new());
                state.builds.insert(key.to_owned(), Arc::clone(&build));
                (build, true)
            }
        }
    }

    /// Publish the terminal event and release the single-flight slot.
    async fn finish_build(
        &self,
        key: &str,
        build: &Arc<SharedBuild>,
        result: &Result<PodcastRecord>,
    ) {
        match result {
            Ok(record) => {
                let audio_url = self.url_for(&record.files.audio).await;
                let script_url = self.url_for(&record.files.script).await;
                build.publish(PodcastEvent::Complete {
                    cache_key: record.cache_key.clone(),
                    audio_url,
                    script_url,
                    progress: 1.0,
                });
            }
            Err(e) => {
                tracing::error!(key, error = %e, "podcast generation failed");
                build.publish(PodcastEvent::Error {
                    message: e.message().to_owned(),
                });
            }
        }
        if let Ok(mut state) = self.state.lock() {
            state.builds.remove(key);
        }
    }

    async fn run_with_timeout(
        &self,
        repo_url: &str,
        duration: u32,
        settings: &VoiceSettings,
        key: &str,
        build: &Arc<SharedBuild>,
    ) -> Result<PodcastRecord> {
        let budget = Duration::from_secs(self.config.generation_timeout_secs);
        match tokio::time::timeout(budget, self.run_build(repo_url, duration, settings, key, build))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(Error::Internal(format!(
                "podcast generation exceeded {}s",
                budget.as_secs()
            ))),
        }
    }

    async fn run_build(
        &self,
        repo_url: &str,
        duration: u32,
        settings: &VoiceSettings,
        key: &str,
        build: &Arc<SharedBuild>,
    ) -> Result<PodcastRecord> {
        build.publish(processing(0.05, "Fetching repository"));
        let snapshot = self.ingestor.parse(repo_url).await?;

        // Cache lookup: entry present, files present, snapshot unchanged.
        if let Some(record) = self.record(key) {
            if record.content_hash == snapshot.content_hash
                && self.cache.files_exist(&record).await.unwrap_or(false)
            {
                tracing::info!(key, "cache hit, reusing podcast");
                return self.touch_record(key).await;
            }
            tracing::info!(key, "cache entry stale, regenerating");
            self.remove_record(key).await;
        }

        build.publish(processing(0.15, "Building prompt context"));
        let context = self.contexts.build(&snapshot, Purpose::Podcast);

        build.publish(processing(0.3, "Generating script"));
        let mut script = self
            .scripts
            .generate(&context, &snapshot.info.name, duration)
            .await?;
        let total_segments = script.turns.len();
        build.publish(PodcastEvent::Processing {
            progress: 0.4,
            message: format!("Synthesizing {total_segments} segments"),
            segment_index: None,
            total_segments: Some(total_segments),
        });

        let segments = self
            .synthesize_segments(&mut script, settings, key, total_segments, build)
            .await?;

        build.publish(processing(0.92, "Assembling audio"));
        let record = self
            .persist(repo_url, duration, settings, key, &snapshot.content_hash, script, segments)
            .await?;
        Ok(record)
    }

    /// Serial synthesis in turn order; each segment's store + event emit
    /// overlaps the next turn's synthesis (pipelining of depth 1).
    async fn synthesize_segments(
        &self,
        script: &mut PodcastScript,
        settings: &VoiceSettings,
        key: &str,
        total_segments: usize,
        build: &Arc<SharedBuild>,
    ) -> Result<Vec<AudioSegment>> {
        let mut segments: Vec<AudioSegment> = Vec::with_capacity(total_segments);
        let mut offset_ms: u64 = 0;
        let mut previous: Option<tokio::task::JoinHandle<()>> = None;

        for turn in &mut script.turns {
            let voice_id = match turn.speaker {
                Speaker::Host => settings.host_voice_id.clone(),
                Speaker::Expert => settings.expert_voice_id.clone(),
            };

            let (samples, synthesized) =
                match self.tts.synthesize(&turn.text, &voice_id, settings).await {
                    Ok(samples) => (samples, true),
                    Err(e) => {
                        let ms = audio::silence_ms_for_words(turn.words());
                        tracing::warn!(turn = turn.index, error = %e, "substituting silence");
                        script.metadata.warnings.push(format!(
                            "turn {}: synthesis failed ({}), substituted {ms}ms of silence",
                            turn.index,
                            e.code()
                        ));
                        (audio::silence(ms), false)
                    }
                };

            let segment = AudioSegment {
                turn_index: turn.index,
                voice_id,
                samples,
                synthesized,
            };
            let duration_ms = segment.duration_ms();
            turn.start_ms = Some(offset_ms);
            turn.end_ms = Some(offset_ms + duration_ms);
            offset_ms += duration_ms + self.config.gap_ms;

            // Wait for the previous segment's post-processing before
            // starting this one's, so segment_ready order matches index
            // order with at most one task in flight.
            if let Some(task) = previous.take() {
                let _ = task.await;
            }
            let post = self.spawn_segment_post(
                segment.clone(),
                key.to_owned(),
                total_segments,
                Arc::clone(build),
            );
            previous = Some(post);
            segments.push(segment);
        }

        if let Some(task) = previous {
            let _ = task.await;
        }
        Ok(segments)
    }

    fn spawn_segment_post(
        &self,
        segment: AudioSegment,
        key: String,
        total_segments: usize,
        build: Arc<SharedBuild>,
    ) -> tokio::task::JoinHandle<()> {
        let backend = Arc::clone(&self.backend);
        let presign_ttl = self.presign_ttl;
        tokio::spawn(async move {
            let index = segment.turn_index;
            let duration_ms = segment.duration_ms();
            let segment_key = format!("podcasts/segments/{key}/segment_{index:03}.wav");

            let wav = match audio::encode_wav(&segment.samples) {
                Ok(wav) => wav,
                Err(e) => {
                    tracing::warn!(index, error = %e, "segment encode failed");
                    return;
                }
            };
            if let Err(e) = backend.put(&segment_key, wav, "audio/wav").await {
                tracing::warn!(index, error = %e, "segment store failed");
                return;
            }
            let segment_url = backend
                .presign(&segment_key, presign_ttl)
                .await
                .unwrap_or_else(|_| format!("/files/{segment_key}"));

            let progress = 0.4 + 0.5 * (index + 1) as f32 / total_segments as f32;
            build.publish(PodcastEvent::SegmentReady {
                segment_index: index,
                total_segments,
                segment_url,
                duration_ms,
                progress,
            });
        })
    }

    /// Concatenate, persist the three artifacts, and record the cache entry.
    #[allow(clippy::too_many_arguments)]
    async fn persist(
        &self,
        repo_url: &str,
        duration: u32,
        settings: &VoiceSettings,
        key: &str,
        content_hash: &str,
        mut script: PodcastScript,
        segments: Vec<AudioSegment>,
    ) -> Result<PodcastRecord> {
        let gap_ms = self.config.gap_ms;
        let combined = tokio::task::spawn_blocking(move || {
            let samples = audio::concat_segments(&segments, gap_ms);
            audio::encode_wav(&samples)
        })
        .await
        .map_err(|e| Error::AssemblyFailed(format!("audio assembly task failed: {e}")))??;

        let files = artifact_keys(key, Utc::now());
        self.backend
            .put(&files.audio, combined, "audio/wav")
            .await?;

        let script_json = serde_json::to_vec_pretty(&script.turns)
            .map_err(|e| Error::Internal(format!("encode script: {e}")))?;
        self.backend
            .put(&files.script, script_json, "application/json")
            .await?;

        script.metadata.turn_count = script.turns.len();
        let metadata_json = serde_json::to_vec_pretty(&script.metadata)
            .map_err(|e| Error::Internal(format!("encode metadata: {e}")))?;
        self.backend
            .put(&files.metadata, metadata_json, "application/json")
            .await?;

        let characters: usize = script.turns.iter().map(|t| t.text.chars().count()).sum();
        let now = Utc::now();
        let record = PodcastRecord {
            cache_key: key.to_owned(),
            repo_url: repo_url.to_owned(),
            duration_minutes: duration,
            voice_settings: settings.clone(),
            files,
            metadata: script.metadata,
            created_at: now,
            last_accessed: now,
            access_count: 1,
            content_hash: content_hash.to_owned(),
            estimated_cost: estimate_cost(characters),
        };

        let index_copy = {
            let mut state = match self.state.lock() {
                Ok(state) => state,
                Err(poisoned) => poisoned.into_inner(),
            };
            state
                .index
                .entries
                .insert(key.to_owned(), record.clone());
            state.index.clone()
        };
        self.cache.save(&index_copy).await?;
        Ok(record)
    }

    /// Update reuse bookkeeping and persist the index.
    async fn touch_record(&self, key: &str) -> Result<PodcastRecord> {
        let (record, index_copy) = {
            let mut state = match self.state.lock() {
                Ok(state) => state,
                Err(poisoned) => poisoned.into_inner(),
            };
            let record = state
                .index
                .entries
                .get_mut(key)
                .map(|record| {
                    record.touch();
                    record.clone()
                })
                .ok_or_else(|| Error::Internal("cache entry vanished".into()))?;
            (record, state.index.clone())
        };
        if let Err(e) = self.cache.save(&index_copy).await {
            tracing::warn!(error = %e, "failed to persist cache bookkeeping");
        }
        Ok(record)
    }

    async fn remove_record(&self, key: &str) {
        let index_copy = {
            let mut state = match self.state.lock() {
                Ok(state) => state,
                Err(poisoned) => poisoned.into_inner(),
            };
            state.index.entries.remove(key);
            state.index.clone()
        };
        if let Err(e) = self.cache.save(&index_copy).await {
            tracing::warn!(error = %e, "failed to persist cache invalidation");
        }
    }

    /// Resolve a storage handle to a client-facing URL.
    pub async fn url_for(&self, key: &str) -> String {
        self.backend
            .presign(key, self.presign_ttl)
            .await
            .unwrap_or_else(|_| format!("/files/{key}"))
    }

    /// Read an artifact's bytes (for the serving endpoints).
    pub async fn artifact(&self, key: &str) -> Result<Vec<u8>> {
        self.backend.get(key).await
    }
}

fn processing(progress: f32, message: &str) -> PodcastEvent {
    PodcastEvent::Processing {
        progress,
        message: message.to_owned(),
        segment_index: None,
        total_segments: None,
    }
}

/// Drain a receiver until the terminal event, returning the cache key on
/// success.
async fn wait_for_terminal(mut rx: mpsc::Receiver<PodcastEvent>) -> Result<String> {
    while let Some(event) = rx.recv().await {
        match event {
            PodcastEvent::Complete { cache_key, .. } => return Ok(cache_key),
            PodcastEvent::Error { message } => return Err(Error::Internal(message)),
            _ => {}
        }
    }
    Err(Error::Internal("stream ended without a terminal event".into()))
}
