//! Energy-based voice activity detection.
//!
//! Batch trimming for uploaded clips: RMS energy per 30 ms frame against a
//! threshold, keeping a padding window around the detected speech. Clips
//! with no frame above threshold (or with less speech than the minimum) are
//! classified as silence and never reach the transcription provider.

use crate::config::VoiceConfig;

/// Frame size used for energy analysis.
const FRAME_MS: u32 = 30;

/// Trim leading and trailing silence from mono samples.
///
/// Returns `None` when no speech is detected, `Some(trimmed)` otherwise.
pub fn trim_silence(samples: &[i16], sample_rate: u32, config: &VoiceConfig) -> Option<Vec<i16>> {
    if samples.is_empty() {
        return None;
    }
    let frame_len = (sample_rate * FRAME_MS / 1_000) as usize;
    if frame_len == 0 {
        return None;
    }

    let speech_frames: Vec<bool> = samples
        .chunks(frame_len)
        .map(|frame| rms(frame) > config.vad_threshold)
        .collect();

    let first = speech_frames.iter().position(|&s| s)?;
    let last = speech_frames.iter().rposition(|&s| s)?;

    let speech_ms = (last - first + 1) as u32 * FRAME_MS;
    if speech_ms < config.vad_min_speech_ms {
        return None;
    }

    let pad_samples = (sample_rate * config.vad_pad_ms / 1_000) as usize;
    let start = (first * frame_len).saturating_sub(pad_samples);
    let end = ((last + 1) * frame_len + pad_samples).min(samples.len());
    Some(samples[start..end].to_vec())
}

/// RMS energy of a frame, on samples normalized to `[-1, 1]`.
fn rms(frame: &[i16]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    let sum: f32 = frame
        .iter()
        .map(|&s| {
            let x = s as f32 / i16::MAX as f32;
            x * x
        })
        .sum();
    (sum / frame.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 16_000;

    fn config() -> VoiceConfig {
        VoiceConfig::default()
    }

    /// `ms` of loud square-ish tone.
    fn tone(ms: u32) -> Vec<i16> {
        let count = (RATE * ms / 1_000) as usize;
        (0..count)
            .map(|i| if i % 40 < 20 { 8_000 } else { -8_000 })
            .collect()
    }

    fn quiet(ms: u32) -> Vec<i16> {
        vec![0i16; (RATE * ms / 1_000) as usize]
    }

    #[test]
    fn pure_silence_yields_none() {
        assert!(trim_silence(&quiet(1_000), RATE, &config()).is_none());
    }

    #[test]
    fn empty_input_yields_none() {
        assert!(trim_silence(&[], RATE, &config()).is_none());
    }

    #[test]
    fn speech_surrounded_by_silence_is_trimmed() {
        let mut samples = quiet(500);
        samples.extend(tone(600));
        samples.extend(quiet(500));

        let trimmed = trim_silence(&samples, RATE, &config()).expect("speech");
        let trimmed_ms = trimmed.len() as u32 * 1_000 / RATE;
        // 600ms of speech plus at most 2× pad plus frame rounding.
        assert!(trimmed_ms >= 600);
        assert!(trimmed_ms <= 600 + 2 * config().vad_pad_ms + 2 * FRAME_MS);
    }

    #[test]
    fn too_short_a_burst_counts_as_silence() {
        let mut samples = quiet(400);
        samples.extend(tone(60)); // below vad_min_speech_ms
        samples.extend(quiet(400));
        assert!(trim_silence(&samples, RATE, &config()).is_none());
    }

    #[test]
    fn all_speech_passes_through() {
        let samples = tone(500);
        let trimmed = trim_silence(&samples, RATE, &config()).expect("speech");
        assert_eq!(trimmed.len(), samples.len());
    }

    #[test]
    fn rms_of_silence_is_zero() {
        assert_eq!(rms(&[0, 0, 0]), 0.0);
        assert!(rms(&[8_000, -8_000]) > 0.2);
    }
}
