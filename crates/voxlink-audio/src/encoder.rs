use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use voxlink_core::{SampleFrame, WireAudioChunk};

/// Input bytes per base64 call. A multiple of 3, so no padding lands
/// mid-stream and chunked output equals one-shot output.
const ENCODE_CHUNK_BYTES: usize = 32_766;

/// Scale one sample to i16. Negative values use 32768 and positive 32767 so
/// both -1.0 and 1.0 land exactly on the i16 bounds.
pub fn sample_to_i16(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

/// Samples as 16-bit little-endian PCM bytes.
pub fn pcm16_bytes(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        bytes.extend_from_slice(&sample_to_i16(s).to_le_bytes());
    }
    bytes
}

/// Encode one captured frame into its wire representation.
pub fn encode(frame: &SampleFrame) -> WireAudioChunk {
    let bytes = pcm16_bytes(frame.samples());
    let mut encoded = String::with_capacity(bytes.len().div_ceil(3) * 4);
    for chunk in bytes.chunks(ENCODE_CHUNK_BYTES) {
        STANDARD.encode_string(chunk, &mut encoded);
    }
    WireAudioChunk::new(encoded)
}
