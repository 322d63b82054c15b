//! Podcast cache index and cache keys.
//!
//! The index is one JSON document (`cache/index.json`) in the storage
//! backend mapping `cache_key` to a [`PodcastRecord`]. The key is a pure
//! function of the normalized inputs, so identical requests hash to the
//! same artifact set in every process. Nothing evicts entries; they persist
//! until an operator deletes them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::StorageBackend;
use crate::error::{Error, Result};
use crate::ingest::hex;
use crate::podcast::script::EpisodeMetadata;
use crate::podcast::tts::VoiceSettings;

/// Storage key of the cache index document.
pub const INDEX_KEY: &str = "cache/index.json";

/// Storage handles of one podcast's three artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodcastFiles {
    pub audio: String,
    pub script: String,
    pub metadata: String,
}

/// One persisted podcast artifact set with access bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodcastRecord {
    pub cache_key: String,
    pub repo_url: String,
    pub duration_minutes: u32,
    pub voice_settings: VoiceSettings,
    pub files: PodcastFiles,
    pub metadata: EpisodeMetadata,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,
    /// Hash of the repository snapshot the podcast was generated from.
    pub content_hash: String,
    pub estimated_cost: f64,
}

impl PodcastRecord {
    /// Record one reuse.
    pub fn touch(&mut self) {
        self.last_accessed = Utc::now();
        self.access_count += 1;
    }
}

/// The process-wide cache index. Guarded by one mutex at the pipeline
/// level; operations here are plain data manipulation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheIndex {
    #[serde(default)]
    pub entries: BTreeMap<String, PodcastRecord>,
}

impl CacheIndex {
    /// Records ordered by `last_accessed`, most recent first, capped at
    /// `limit`.
    pub fn recent(&self, limit: usize) -> Vec<PodcastRecord> {
        let mut records: Vec<PodcastRecord> = self.entries.values().cloned().collect();
        records.sort_by(|a, b| b.last_accessed.cmp(&a.last_accessed));
        records.truncate(limit);
        records
    }
}

/// Normalize a repository URL for hashing: lowercase scheme and host, strip
/// trailing slashes and a `.git` suffix.
pub fn normalize_repo_url(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);

    match trimmed.find("://") {
        Some(scheme_end) => {
            let (scheme, rest) = trimmed.split_at(scheme_end + 3);
            match rest.find('/') {
                Some(host_end) => {
                    let (host, path) = rest.split_at(host_end);
                    format!(
                        "{}{}{}",
                        scheme.to_lowercase(),
                        host.to_lowercase(),
                        path
                    )
                }
                None => format!("{}{}", scheme.to_lowercase(), rest.to_lowercase()),
            }
        }
        None => trimmed.to_owned(),
    }
}

/// Deterministic cache key:
/// `SHA256(normalize(repo_url) ∥ duration_minutes ∥ canonical_json(voice_settings))`.
pub fn cache_key(repo_url: &str, duration_minutes: u32, settings: &VoiceSettings) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_repo_url(repo_url).as_bytes());
    hasher.update(duration_minutes.to_string().as_bytes());
    hasher.update(settings.canonical_json().as_bytes());
    hex(&hasher.finalize())
}

/// Dated artifact keys for one generation.
pub fn artifact_keys(cache_key: &str, now: DateTime<Utc>) -> PodcastFiles {
    let stamp = now.format("%Y%m%d_%H%M%S");
    PodcastFiles {
        audio: format!("podcasts/audio/podcast_{cache_key}_{stamp}.wav"),
        script: format!("podcasts/scripts/script_{cache_key}_{stamp}.json"),
        metadata: format!("podcasts/metadata/meta_{cache_key}_{stamp}.json"),
    }
}

/// Loads and saves the index through a storage backend.
pub struct CacheStore {
    backend: Arc<dyn StorageBackend>,
}

impl CacheStore {
    /// Create a store over `backend`.
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Load the index; a missing document is an empty index.
    pub async fn load(&self) -> Result<CacheIndex> {
        if !self.backend.exists(INDEX_KEY).await? {
            return Ok(CacheIndex::default());
        }
        let bytes = self.backend.get(INDEX_KEY).await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::StorageFailed(format!("corrupt cache index: {e}")))
    }

    /// Persist the index.
    pub async fn save(&self, index: &CacheIndex) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(index)
            .map_err(|e| Error::StorageFailed(format!("encode cache index: {e}")))?;
        self.backend
            .put(INDEX_KEY, bytes, "application/json")
            .await?;
        Ok(())
    }

    /// Whether all three artifact files of `record` still exist.
    pub async fn files_exist(&self, record: &PodcastRecord) -> Result<bool> {
        for key in [
            &record.files.audio,
            &record.files.script,
            &record.files.metadata,
        ] {
            if !self.backend.exists(key).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LocalStore;

    fn record(key: &str, accessed: DateTime<Utc>) -> PodcastRecord {
        PodcastRecord {
            cache_key: key.into(),
            repo_url: "https://github.com/a/b".into(),
            duration_minutes: 3,
            voice_settings: VoiceSettings::default(),
            files: artifact_keys(key, accessed),
            metadata: EpisodeMetadata {
                repo_name: "b".into(),
                episode_title: "Inside b".into(),
                estimated_duration: "03:00".into(),
                key_topics: vec![],
                generated_at: accessed,
                turn_count: 12,
                warnings: vec![],
            },
            created_at: accessed,
            last_accessed: accessed,
            access_count: 1,
            content_hash: "h".into(),
            estimated_cost: 0.01,
        }
    }

    // ── URL normalization ─────────────────────────────────────

    #[test]
    fn normalize_lowercases_host_only() {
        assert_eq!(
            normalize_repo_url("HTTPS://GitHub.COM/Octo/Hello-World"),
            "https://github.com/Octo/Hello-World"
        );
    }

    #[test]
    fn normalize_strips_git_and_slashes() {
        assert_eq!(
            normalize_repo_url("https://github.com/a/b.git"),
            "https://github.com/a/b"
        );
        assert_eq!(
            normalize_repo_url("https://github.com/a/b///"),
            "https://github.com/a/b"
        );
    }

    // ── Cache key ─────────────────────────────────────────────

    #[test]
    fn cache_key_is_pure() {
        let settings = VoiceSettings::default();
        let a = cache_key("https://github.com/a/b", 3, &settings);
        let b = cache_key("https://GITHUB.com/a/b.git/", 3, &settings);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn cache_key_varies_with_inputs() {
        let settings = VoiceSettings::default();
        let base = cache_key("https://github.com/a/b", 3, &settings);
        assert_ne!(base, cache_key("https://github.com/a/c", 3, &settings));
        assert_ne!(base, cache_key("https://github.com/a/b", 5, &settings));

        let other = VoiceSettings {
            stability: 0.9,
            ..VoiceSettings::default()
        };
        assert_ne!(base, cache_key("https://github.com/a/b", 3, &other));
    }

    #[test]
    fn cache_key_ignores_sub_tenth_of_a_thousandth() {
        // Rounding to 4 decimals makes near-identical settings collide.
        let a = VoiceSettings {
            stability: 0.750_04,
            ..VoiceSettings::default()
        };
        let b = VoiceSettings {
            stability: 0.750_044,
            ..VoiceSettings::default()
        };
        assert_eq!(
            cache_key("https://github.com/a/b", 3, &a),
            cache_key("https://github.com/a/b", 3, &b)
        );
    }

    // ── Artifact layout ───────────────────────────────────────

    #[test]
    fn artifact_keys_follow_layout() {
        let now = Utc::now();
        let files = artifact_keys("abc123", now);
        assert!(files.audio.starts_with("podcasts/audio/podcast_abc123_"));
        assert!(files.audio.ends_with(".wav"));
        assert!(files.script.starts_with("podcasts/scripts/script_abc123_"));
        assert!(files.script.ends_with(".json"));
        assert!(files.metadata.starts_with("podcasts/metadata/meta_abc123_"));
    }

    // ── Index ─────────────────────────────────────────────────

    #[test]
    fn recent_orders_by_last_accessed() {
        let mut index = CacheIndex::default();
        let old = Utc::now() - chrono::Duration::hours(2);
        let new = Utc::now();
        index.entries.insert("old".into(), record("old", old));
        index.entries.insert("new".into(), record("new", new));

        let recent = index.recent(10);
        assert_eq!(recent[0].cache_key, "new");
        assert_eq!(recent[1].cache_key, "old");
        assert_eq!(index.recent(1).len(), 1);
    }

    #[test]
    fn touch_updates_bookkeeping() {
        let mut rec = record("k", Utc::now() - chrono::Duration::hours(1));
        let before = rec.last_accessed;
        rec.touch();
        assert_eq!(rec.access_count, 2);
        assert!(rec.last_accessed > before);
    }

    #[tokio::test]
    async fn index_round_trips_through_backend() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend: Arc<dyn StorageBackend> =
            Arc::new(LocalStore::new(dir.path().to_path_buf()));
        let store = CacheStore::new(backend);

        // Missing index loads as empty.
        let index = store.load().await.expect("load");
        assert!(index.entries.is_empty());

        let mut index = CacheIndex::default();
        index.entries.insert("k".into(), record("k", Utc::now()));
        store.save(&index).await.expect("save");

        let loaded = store.load().await.expect("reload");
        assert_eq!(loaded.entries.len(), 1);
        assert_eq!(loaded.entries["k"].cache_key, "k");
    }

    #[tokio::test]
    async fn files_exist_checks_all_three() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend: Arc<dyn StorageBackend> =
            Arc::new(LocalStore::new(dir.path().to_path_buf()));
        let store = CacheStore::new(backend.clone());
        let rec = record("k", Utc::now());

        assert!(!store.files_exist(&rec).await.expect("check"));

        for key in [&rec.files.audio, &rec.files.script, &rec.files.metadata] {
            backend
                .put(key, b"x".to_vec(), "application/octet-stream")
                .await
                .expect("put");
        }
        assert!(store.files_exist(&rec).await.expect("check"));
    }
}
