//! Text-to-speech client.
//!
//! Talks to an ElevenLabs-style REST API
//! (`POST {base}/v1/text-to-speech/{voice_id}`) requesting raw 16-bit mono
//! PCM so segments feed straight into assembly. Retryable failures back off
//! up to the configured attempt count; callers substitute silence after
//! that.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::audio;
use crate::config::TtsConfig;
use crate::error::{Error, Result};

/// Cost per synthesized character in USD, for the record's estimate.
const COST_PER_CHARACTER: f64 = 0.000_03;

/// Voice pair and quality parameters for one podcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceSettings {
    pub host_voice_id: String,
    pub expert_voice_id: String,
    pub stability: f64,
    pub similarity_boost: f64,
    pub style: f64,
    pub use_speaker_boost: bool,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            host_voice_id: "zGjIP4SZlMnY9m93k97r".to_owned(),
            expert_voice_id: "L0Dsvb3SLTyegXwtm47J".to_owned(),
            stability: 0.75,
            similarity_boost: 0.75,
            style: 0.5,
            use_speaker_boost: true,
        }
    }
}

impl VoiceSettings {
    /// Canonical JSON for cache-key hashing: keys sorted, floats fixed to
    /// four decimals. Byte-identical across processes for equal settings.
    pub fn canonical_json(&self) -> String {
        format!(
            "{{\"expert_voice_id\":\"{}\",\"host_voice_id\":\"{}\",\
             \"similarity_boost\":{:.4},\"stability\":{:.4},\"style\":{:.4},\
             \"use_speaker_boost\":{}}}",
            self.expert_voice_id,
            self.host_voice_id,
            self.similarity_boost,
            self.stability,
            self.style,
            self.use_speaker_boost,
        )
    }

    /// Validate ranges: quality parameters in `[0, 1]`, non-empty voices.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.host_voice_id.is_empty() || self.expert_voice_id.is_empty() {
            return Err(Error::InvalidInput("voice ids must not be empty".into()));
        }
        for (name, value) in [
            ("stability", self.stability),
            ("similarity_boost", self.similarity_boost),
            ("style", self.style),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::InvalidInput(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// Estimated synthesis cost in USD for the given script text length.
pub fn estimate_cost(total_characters: usize) -> f64 {
    let cost = total_characters as f64 * COST_PER_CHARACTER;
    (cost * 10_000.0).round() / 10_000.0
}

/// REST client for the speech-synthesis provider.
pub struct SpeechClient {
    http: reqwest::Client,
    config: TtsConfig,
}

impl SpeechClient {
    /// Create a client from provider config.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if the HTTP client cannot be built.
    pub fn new(config: TtsConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, config })
    }

    /// Synthesize one utterance to PCM samples, retrying transient failures.
    ///
    /// # Errors
    ///
    /// `provider_*` once retries are exhausted or on a fatal response.
    pub async fn synthesize(
        &self,
        text: &str,
        voice_id: &str,
        settings: &VoiceSettings,
    ) -> Result<Vec<i16>> {
        let mut last_err = Error::ProviderOther("no attempt made".into());
        for attempt in 0..self.config.max_attempts {
            if attempt > 0 {
                tokio::time::sleep(backoff_delay(attempt)).await;
            }
            match self.synthesize_once(text, voice_id, settings).await {
                Ok(samples) => return Ok(samples),
                Err(e) if e.is_retryable() => {
                    tracing::warn!(attempt, voice_id, error = %e, "retrying synthesis");
                    last_err = e;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err)
    }

    async fn synthesize_once(
        &self,
        text: &str,
        voice_id: &str,
        settings: &VoiceSettings,
    ) -> Result<Vec<i16>> {
        let url = format!(
            "{}/v1/text-to-speech/{}?output_format=pcm_16000",
            self.config.base_url, voice_id
        );
        let body = serde_json::json!({
            "text": text,
            "model_id": self.config.model_id,
            "voice_settings": {
                "stability": settings.stability,
                "similarity_boost": settings.similarity_boost,
                "style": settings.style,
                "use_speaker_boost": settings.use_speaker_boost,
            },
        });

        let response = self
            .http
            .post(&url)
            .header("xi-api-key", &self.config.api_key)
            .header("accept", "audio/pcm")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::ProviderTimeout(format!("synthesis timed out: {e}"))
                } else {
                    Error::ProviderOther(format!("synthesis connection error: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_tts_error(status.as_u16(), &body));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::ProviderOther(format!("failed to read audio body: {e}")))?;
        Ok(audio::pcm_from_bytes(&bytes))
    }
}

fn map_tts_error(status: u16, body: &str) -> Error {
    let detail: String = body.chars().take(300).collect();
    match status {
        429 => Error::ProviderRateLimited(format!("synthesis rate limit: {detail}")),
        408 | 504 => Error::ProviderTimeout(format!("synthesis timeout: {detail}")),
        s if (400..500).contains(&s) => {
            Error::ProviderOther(format!("synthesis rejected ({s}): {detail}"))
        }
        s => Error::ProviderOther(format!("synthesis provider error {s}: {detail}")),
    }
}

/// Exponential backoff with jitter: 500ms base doubling, ±25%.
fn backoff_delay(attempt: u32) -> Duration {
    use rand::Rng;
    let base_ms = 500u64.saturating_mul(1 << attempt.min(4));
    let jitter = rand::thread_rng().gen_range(0..=base_ms / 2);
    Duration::from_millis(base_ms / 4 * 3 + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_are_valid() {
        VoiceSettings::default().validate().expect("valid");
    }

    #[test]
    fn out_of_range_stability_rejected() {
        let settings = VoiceSettings {
            stability: 1.5,
            ..VoiceSettings::default()
        };
        let err = settings.validate().expect_err("rejected");
        assert_eq!(err.code(), "invalid_input");
        assert!(err.message().contains("stability"));
    }

    #[test]
    fn empty_voice_id_rejected() {
        let settings = VoiceSettings {
            host_voice_id: String::new(),
            ..VoiceSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn canonical_json_sorts_keys_and_rounds() {
        let settings = VoiceSettings {
            host_voice_id: "h".into(),
            expert_voice_id: "e".into(),
            stability: 0.123_456,
            similarity_boost: 0.75,
            style: 0.5,
            use_speaker_boost: true,
        };
        let json = settings.canonical_json();
        assert_eq!(
            json,
            "{\"expert_voice_id\":\"e\",\"host_voice_id\":\"h\",\
             \"similarity_boost\":0.7500,\"stability\":0.1235,\"style\":0.5000,\
             \"use_speaker_boost\":true}"
        );
        // Keys appear in sorted order.
        let expert = json.find("expert_voice_id").expect("key");
        let host = json.find("host_voice_id").expect("key");
        assert!(expert < host);
    }

    #[test]
    fn canonical_json_is_stable_across_equal_settings() {
        let a = VoiceSettings::default();
        let b = VoiceSettings::default();
        assert_eq!(a.canonical_json(), b.canonical_json());
    }

    #[test]
    fn serde_round_trip() {
        let settings = VoiceSettings::default();
        let json = serde_json::to_string(&settings).expect("serialize");
        let parsed: VoiceSettings = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, settings);
    }

    #[test]
    fn cost_estimate_rounds_to_four_decimals() {
        // 1000 characters at $0.03/1000.
        let cost = estimate_cost(1_000);
        assert!((cost - 0.03).abs() < f64::EPSILON);
        assert_eq!(estimate_cost(0), 0.0);
    }

    #[test]
    fn tts_error_mapping() {
        assert_eq!(map_tts_error(429, "").code(), "provider_rate_limited");
        assert_eq!(map_tts_error(504, "").code(), "provider_timeout");
        assert_eq!(map_tts_error(422, "bad voice").code(), "provider_other");
        assert_eq!(map_tts_error(500, "").code(), "provider_other");
    }
}
