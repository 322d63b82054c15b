//! Speech-to-text client.
//!
//! Whisper-style transcription endpoint
//! (`POST {base}/v1/audio/transcriptions`, multipart with a WAV part).
//! Callers run VAD first; a clip that reaches this client is believed to
//! contain speech, but an empty transcript from the provider is still a
//! normal (non-error) outcome.

use serde::Deserialize;
use std::time::Duration;

use crate::config::SttConfig;
use crate::error::{Error, Result};

/// REST client for the transcription provider.
pub struct SttClient {
    http: reqwest::Client,
    config: SttConfig,
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

impl SttClient {
    /// Create a client from provider config.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if the HTTP client cannot be built.
    pub fn new(config: SttConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, config })
    }

    /// Transcribe a WAV clip to text. Whitespace-only results collapse to
    /// the empty string.
    ///
    /// # Errors
    ///
    /// `provider_*` on transport or provider failures.
    pub async fn transcribe(&self, wav_bytes: Vec<u8>) -> Result<String> {
        let url = format!("{}/v1/audio/transcriptions", self.config.base_url);
        let part = reqwest::multipart::Part::bytes(wav_bytes)
            .file_name("clip.wav")
            .mime_str("audio/wav")
            .map_err(|e| Error::Internal(format!("multipart part: {e}")))?;
        let form = reqwest::multipart::Form::new()
            .text("model", self.config.model_id.clone())
            .part("file", part);

        let response = self
            .http
            .post(&url)
            .header("authorization", format!("Bearer {}", self.config.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::ProviderTimeout(format!("transcription timed out: {e}"))
                } else {
                    Error::ProviderOther(format!("transcription connection error: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail: String = body.chars().take(300).collect();
            return Err(match status.as_u16() {
                429 => Error::ProviderRateLimited(format!("transcription rate limit: {detail}")),
                s => Error::ProviderOther(format!("transcription failed ({s}): {detail}")),
            });
        }

        let parsed: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| Error::ProviderOther(format!("malformed transcription response: {e}")))?;
        Ok(parsed.text.trim().to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_builds_from_default_config() {
        assert!(SttClient::new(SttConfig::default()).is_ok());
    }

    #[test]
    fn transcription_response_parses() {
        let parsed: TranscriptionResponse =
            serde_json::from_str(r#"{"text": " hello world "}"#).expect("parse");
        assert_eq!(parsed.text, " hello world ");
    }
}
