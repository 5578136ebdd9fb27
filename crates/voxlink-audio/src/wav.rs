//! Minimal RIFF/WAVE container around raw PCM16 segments, and the decode
//! step that turns such a container back into playable samples.

use std::io::Cursor;
use voxlink_core::{DecodeError, BITS_PER_SAMPLE, CHANNELS, SAMPLE_RATE};

pub const HEADER_LEN: usize = 44;

/// Prepend a 44-byte WAV header describing mono 24 kHz PCM16 to `raw`.
/// A trailing odd byte is dropped so the payload holds whole samples.
pub fn wrap(raw: &[u8]) -> Vec<u8> {
    let payload = &raw[..raw.len() & !1];
    let data_len = payload.len() as u32;

    let block_align: u16 = CHANNELS * BITS_PER_SAMPLE / 8;
    let byte_rate: u32 = SAMPLE_RATE * block_align as u32;

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&CHANNELS.to_le_bytes());
    out.extend_from_slice(&SAMPLE_RATE.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&BITS_PER_SAMPLE.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    out.extend_from_slice(payload);
    out
}

/// Parse a WAV container into f32 samples in [-1.0, 1.0].
pub fn decode(container: &[u8]) -> Result<Vec<f32>, DecodeError> {
    let reader = hound::WavReader::new(Cursor::new(container))
        .map_err(|e| DecodeError::Container(e.to_string()))?;

    let spec = reader.spec();
    if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(DecodeError::Format(format!(
            "expected 16-bit integer PCM, got {}-bit {:?}",
            spec.bits_per_sample, spec.sample_format
        )));
    }

    reader
        .into_samples::<i16>()
        .map(|s| {
            s.map(|v| v as f32 / 32768.0)
                .map_err(|e| DecodeError::Container(e.to_string()))
        })
        .collect()
}
