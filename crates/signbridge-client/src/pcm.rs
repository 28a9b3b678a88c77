//! Wire codec for raw audio: linear f32 samples to and from the base64
//! PCM16LE payloads the remote service exchanges.

use crate::error::{BridgeError, Result};
use crate::protocol::MediaChunk;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

/// Microphone capture rate on the wire.
pub const CAPTURE_SAMPLE_RATE_HZ: u32 = 16_000;
/// Rate of model audio coming back.
pub const PLAYBACK_SAMPLE_RATE_HZ: u32 = 24_000;

pub const PCM_MIME_TYPE: &str = "audio/pcm;rate=16000";
pub const JPEG_MIME_TYPE: &str = "image/jpeg";

/// Non-finite samples are not an error: NaN maps to silence and infinities
/// clamp to full scale, then everything clamps into [-1, 1].
fn sanitize(sample: f32) -> f32 {
    if sample.is_nan() {
        0.0
    } else {
        sample.clamp(-1.0, 1.0)
    }
}

pub fn encode_pcm16le(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let quantized = (sanitize(sample) * 32767.0) as i16;
        bytes.extend_from_slice(&quantized.to_le_bytes());
    }
    bytes
}

/// Encode one captured audio block as an outbound media chunk.
pub fn encode_media_chunk(samples: &[f32]) -> MediaChunk {
    MediaChunk {
        data: BASE64.encode(encode_pcm16le(samples)),
        mime_type: PCM_MIME_TYPE.to_string(),
    }
}

/// Encode one captured camera frame as an outbound media chunk.
pub fn encode_jpeg_chunk(jpeg: &[u8]) -> MediaChunk {
    MediaChunk {
        data: BASE64.encode(jpeg),
        mime_type: JPEG_MIME_TYPE.to_string(),
    }
}

/// Decode an inbound base64 PCM16LE payload into normalized f32 samples.
pub fn decode_pcm_payload(data: &str) -> Result<Vec<f32>> {
    let bytes = BASE64
        .decode(data)
        .map_err(|e| BridgeError::Decode(format!("invalid base64 audio: {e}")))?;

    if bytes.len() % 2 != 0 {
        return Err(BridgeError::Decode(format!(
            "pcm16 payload has odd length {}",
            bytes.len()
        )));
    }

    let mut samples = Vec::with_capacity(bytes.len() / 2);
    for pair in bytes.chunks_exact(2) {
        let value = i16::from_le_bytes([pair[0], pair[1]]);
        samples.push(value as f32 / 32768.0);
    }
    Ok(samples)
}
