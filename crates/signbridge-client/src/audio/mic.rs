//! Microphone capture: whatever the default input device produces is
//! downmixed to mono, resampled to the wire rate, and chunked into fixed
//! blocks on a bounded channel. The capture callback never blocks; if the
//! consumer stalls, pending audio is dropped.

use crate::audio::{AudioChunk, LinearResampler};
use crate::error::{BridgeError, Result};
use crate::pcm::CAPTURE_SAMPLE_RATE_HZ;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, StreamConfig};
use tokio::sync::mpsc;
use tracing::warn;

/// 100 ms blocks at the capture rate.
pub const CAPTURE_CHUNK_SAMPLES: usize = 1_600;

pub struct MicCapture {
    rx: Option<mpsc::Receiver<AudioChunk>>,
    _stream: cpal::Stream,
}

impl MicCapture {
    /// Open the default input device and start capturing. Dropping the
    /// returned value releases the device and stops the stream.
    pub fn start_default() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| BridgeError::Microphone("no default input device".to_string()))?;

        let config = device
            .default_input_config()
            .map_err(|e| BridgeError::Microphone(e.to_string()))?;

        let input_rate_hz = config.sample_rate().0;
        let channels = config.channels() as usize;
        let stream_config: StreamConfig = config.clone().into();

        let (tx, rx) = mpsc::channel::<AudioChunk>(8);

        let stream = match config.sample_format() {
            SampleFormat::F32 => {
                build_stream::<f32>(&device, &stream_config, channels, input_rate_hz, tx)?
            }
            SampleFormat::I16 => {
                build_stream::<i16>(&device, &stream_config, channels, input_rate_hz, tx)?
            }
            SampleFormat::U16 => {
                build_stream::<u16>(&device, &stream_config, channels, input_rate_hz, tx)?
            }
            other => {
                return Err(BridgeError::Microphone(format!(
                    "unsupported input sample format: {other:?}"
                )));
            }
        };

        stream
            .play()
            .map_err(|e| BridgeError::Microphone(e.to_string()))?;

        Ok(Self {
            rx: Some(rx),
            _stream: stream,
        })
    }

    /// Hand the chunk receiver to the forwarding task. The capture stream
    /// itself stays with this struct so teardown is a synchronous drop.
    pub fn take_chunks(&mut self) -> Option<mpsc::Receiver<AudioChunk>> {
        self.rx.take()
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    channels: usize,
    input_rate_hz: u32,
    tx: mpsc::Sender<AudioChunk>,
) -> Result<cpal::Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let mut resampler = (input_rate_hz != CAPTURE_SAMPLE_RATE_HZ)
        .then(|| LinearResampler::new(input_rate_hz, CAPTURE_SAMPLE_RATE_HZ));
    let mut mono_buf = Vec::<f32>::new();
    let mut resample_buf = Vec::<f32>::new();
    let mut pending = Vec::<f32>::new();

    device
        .build_input_stream(
            config,
            move |data: &[T], _info| {
                downmix_to_mono(data, channels, &mut mono_buf);

                let samples = match resampler.as_mut() {
                    Some(r) => {
                        r.process_into(&mono_buf, &mut resample_buf);
                        resample_buf.as_slice()
                    }
                    None => mono_buf.as_slice(),
                };

                if samples.is_empty() {
                    return;
                }
                pending.extend_from_slice(samples);

                while pending.len() >= CAPTURE_CHUNK_SAMPLES {
                    let chunk: Vec<f32> = pending.drain(..CAPTURE_CHUNK_SAMPLES).collect();
                    if tx
                        .try_send(AudioChunk {
                            samples: chunk,
                            sample_rate_hz: CAPTURE_SAMPLE_RATE_HZ,
                        })
                        .is_err()
                    {
                        pending.clear();
                        break;
                    }
                }
            },
            move |err| {
                warn!(error = %err, "mic input stream error");
            },
            None,
        )
        .map_err(|e| BridgeError::Microphone(e.to_string()))
}

fn downmix_to_mono<T>(data: &[T], channels: usize, out: &mut Vec<f32>)
where
    T: SizedSample,
    f32: FromSample<T>,
{
    out.clear();
    if channels <= 1 {
        out.reserve(data.len());
        for &sample in data {
            out.push(f32::from_sample(sample));
        }
        return;
    }

    let frames = data.len() / channels;
    out.reserve(frames);
    for frame_idx in 0..frames {
        let base = frame_idx * channels;
        let mut sum = 0.0f32;
        for ch in 0..channels {
            sum += f32::from_sample(data[base + ch]);
        }
        out.push(sum / channels as f32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stereo_downmix_averages_frames() {
        let mut out = Vec::new();
        downmix_to_mono(&[0.5f32, -0.5, 1.0, 0.0], 2, &mut out);
        assert_eq!(out, vec![0.0, 0.5]);
    }

    #[test]
    fn i16_samples_normalize_to_unit_range() {
        let mut out = Vec::new();
        downmix_to_mono(&[i16::MAX, i16::MIN, 0], 1, &mut out);

        assert!((out[0] - 1.0).abs() < 1e-3);
        assert!((out[1] + 1.0).abs() < 1e-3);
        assert_eq!(out[2], 0.0);
    }

    #[test]
    fn trailing_partial_frame_is_ignored() {
        let mut out = Vec::new();
        downmix_to_mono(&[0.2f32, 0.4, 0.6], 2, &mut out);
        assert_eq!(out.len(), 1);
    }
}
