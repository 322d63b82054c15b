//! Speech-synthesis client contract tests.

use repocast::config::TtsConfig;
use repocast::podcast::tts::{SpeechClient, VoiceSettings};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer, attempts: u32) -> SpeechClient {
    SpeechClient::new(TtsConfig {
        api_key: "xi-test".into(),
        base_url: server.uri(),
        max_attempts: attempts,
        ..TtsConfig::default()
    })
    .expect("client")
}

/// 100 ms of PCM at 16 kHz: 1600 samples, little-endian value 1.
fn pcm_body() -> Vec<u8> {
    [1u8, 0u8].repeat(1_600)
}

#[tokio::test]
async fn synthesize_sends_key_settings_and_pcm_format() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/text-to-speech/voice-a"))
        .and(query_param("output_format", "pcm_16000"))
        .and(header("xi-api-key", "xi-test"))
        .and(body_partial_json(json!({
            "text": "Hello listeners",
            "voice_settings": {
                "stability": 0.75,
                "similarity_boost": 0.75,
                "style": 0.5,
                "use_speaker_boost": true,
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(pcm_body()))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, 3);
    let samples = client
        .synthesize("Hello listeners", "voice-a", &VoiceSettings::default())
        .await
        .expect("synthesize");
    assert_eq!(samples.len(), 1_600);
    assert!(samples.iter().all(|&s| s == 1));
}

#[tokio::test]
async fn transient_failure_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_string("busy"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(pcm_body()))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, 3);
    let samples = client
        .synthesize("again", "voice-a", &VoiceSettings::default())
        .await
        .expect("retried");
    assert!(!samples.is_empty());
}

#[tokio::test]
async fn definitive_failure_surfaces_after_retries() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_string("no luck"))
        .expect(2)
        .mount(&server)
        .await;

    let client = client_for(&server, 2);
    let err = client
        .synthesize("never", "voice-a", &VoiceSettings::default())
        .await
        .expect_err("exhausted");
    assert_eq!(err.code(), "provider_rate_limited");
}

#[tokio::test]
async fn client_error_is_fatal_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(422).set_body_string("unknown voice"))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, 3);
    let err = client
        .synthesize("text", "ghost-voice", &VoiceSettings::default())
        .await
        .expect_err("fatal");
    assert_eq!(err.code(), "provider_other");
}
