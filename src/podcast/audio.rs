//! PCM audio segment handling.
//!
//! All synthesis requests ask the provider for 16-bit mono PCM at
//! [`SAMPLE_RATE`], so segments concatenate without transcoding. WAV
//! encode/decode goes through `hound`; the combined-file assembly runs on a
//! blocking thread because it touches megabytes of samples.

use std::io::Cursor;

use crate::error::{Error, Result};

/// Fixed session sample rate in Hz.
pub const SAMPLE_RATE: u32 = 16_000;

/// Speaking rate assumed for silence substitution and duration estimates.
pub const WORDS_PER_MINUTE: u64 = 150;

/// One synthesized (or substituted) utterance for one script turn.
#[derive(Debug, Clone)]
pub struct AudioSegment {
    /// Index of the turn this segment realizes.
    pub turn_index: usize,
    /// Voice used, or the would-be voice for silence substitutes.
    pub voice_id: String,
    /// 16-bit mono samples at [`SAMPLE_RATE`].
    pub samples: Vec<i16>,
    /// False when synthesis failed and silence was substituted.
    pub synthesized: bool,
}

impl AudioSegment {
    /// Duration of this segment in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        samples_duration_ms(self.samples.len())
    }
}

/// Duration in milliseconds of a sample count at [`SAMPLE_RATE`].
pub fn samples_duration_ms(samples: usize) -> u64 {
    samples as u64 * 1_000 / SAMPLE_RATE as u64
}

/// Silence of the given duration.
pub fn silence(duration_ms: u64) -> Vec<i16> {
    let count = (duration_ms * SAMPLE_RATE as u64 / 1_000) as usize;
    vec![0i16; count]
}

/// Silence duration substituted for a failed turn: the time the words would
/// have taken at the assumed speaking rate.
pub fn silence_ms_for_words(words: usize) -> u64 {
    words as u64 * 60 * 1_000 / WORDS_PER_MINUTE
}

/// Encode mono samples as a WAV file at [`SAMPLE_RATE`].
///
/// # Errors
///
/// Returns [`Error::AssemblyFailed`] if encoding fails.
pub fn encode_wav(samples: &[i16]) -> Result<Vec<u8>> {
    encode_wav_at(samples, SAMPLE_RATE)
}

/// Encode mono samples as a WAV file at an explicit sample rate.
///
/// # Errors
///
/// Returns [`Error::AssemblyFailed`] if encoding fails.
pub fn encode_wav_at(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| Error::AssemblyFailed(format!("WAV writer: {e}")))?;
        for &sample in samples {
            writer
                .write_sample(sample)
                .map_err(|e| Error::AssemblyFailed(format!("WAV write: {e}")))?;
        }
        writer
            .finalize()
            .map_err(|e| Error::AssemblyFailed(format!("WAV finalize: {e}")))?;
    }
    Ok(cursor.into_inner())
}

/// Decode a WAV file to mono samples at the file's own rate.
///
/// Stereo input is averaged to mono. Returns `(samples, sample_rate)`.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] for unparseable or non-16-bit input.
pub fn decode_wav(bytes: &[u8]) -> Result<(Vec<i16>, u32)> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| Error::InvalidInput(format!("not a WAV file: {e}")))?;
    let spec = reader.spec();
    if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
        return Err(Error::InvalidInput(format!(
            "unsupported WAV format: {}-bit {:?}",
            spec.bits_per_sample, spec.sample_format
        )));
    }

    let raw: Vec<i16> = reader
        .samples::<i16>()
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| Error::InvalidInput(format!("corrupt WAV data: {e}")))?;

    let mono = if spec.channels == 2 {
        raw.chunks_exact(2)
            .map(|pair| ((pair[0] as i32 + pair[1] as i32) / 2) as i16)
            .collect()
    } else {
        raw
    };
    Ok((mono, spec.sample_rate))
}

/// Interpret provider bytes as raw 16-bit little-endian PCM.
pub fn pcm_from_bytes(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Concatenate segments in order with a fixed silence gap between them.
pub fn concat_segments(segments: &[AudioSegment], gap_ms: u64) -> Vec<i16> {
    let gap = silence(gap_ms);
    let total: usize = segments.iter().map(|s| s.samples.len()).sum::<usize>()
        + gap.len() * segments.len().saturating_sub(1);
    let mut out = Vec::with_capacity(total);
    for (i, segment) in segments.iter().enumerate() {
        if i > 0 {
            out.extend_from_slice(&gap);
        }
        out.extend_from_slice(&segment.samples);
    }
    out
}
