//! Camera acquisition for the CLI: an external capture command (ffmpeg by
//! default) writes an MJPEG stream to stdout, and a reader task keeps the
//! newest complete frame for the sampler to pick up.

use anyhow::{Context, Result};
use signbridge_client::frames::FrameSource;
use signbridge_client::BridgeError;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::debug;

const SOI: [u8; 3] = [0xFF, 0xD8, 0xFF];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Build the default v4l2 capture command. `quality` in [0, 1] maps onto
/// ffmpeg's mjpeg q scale (2 best .. 31 worst).
pub fn default_capture_command(device: &str, fps: f64, quality: f32) -> Vec<String> {
    let q = 2 + ((1.0 - quality.clamp(0.0, 1.0)) * 29.0).round() as u32;
    [
        "ffmpeg",
        "-loglevel",
        "error",
        "-f",
        "v4l2",
        "-i",
        device,
        "-vf",
        &format!("fps={fps}"),
        "-q:v",
        &q.to_string(),
        "-f",
        "mjpeg",
        "-",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

pub struct MjpegPipeSource {
    child: Child,
    latest: Arc<Mutex<Option<Vec<u8>>>>,
    failure: Arc<Mutex<Option<String>>>,
    _reader: JoinHandle<()>,
}

impl MjpegPipeSource {
    pub fn start(command: &[String]) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .context("empty camera capture command")?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("failed to spawn capture command {program}"))?;

        let mut stdout = child
            .stdout
            .take()
            .context("capture command has no stdout")?;

        let latest = Arc::new(Mutex::new(None));
        let failure = Arc::new(Mutex::new(None));

        let latest_writer = latest.clone();
        let failure_writer = failure.clone();
        let reader = tokio::spawn(async move {
            let mut pending = Vec::<u8>::new();
            let mut read_buf = vec![0u8; 16 * 1024];

            loop {
                match stdout.read(&mut read_buf).await {
                    Ok(0) => {
                        *failure_writer.lock().unwrap() =
                            Some("capture command closed its output".to_string());
                        break;
                    }
                    Ok(n) => {
                        pending.extend_from_slice(&read_buf[..n]);
                        if let Some(frame) = split_jpeg_frames(&mut pending).pop() {
                            debug!(bytes = frame.len(), "camera frame captured");
                            *latest_writer.lock().unwrap() = Some(frame);
                        }
                    }
                    Err(e) => {
                        *failure_writer.lock().unwrap() = Some(e.to_string());
                        break;
                    }
                }
            }
        });

        Ok(Self {
            child,
            latest,
            failure,
            _reader: reader,
        })
    }
}

impl FrameSource for MjpegPipeSource {
    fn latest_jpeg(&mut self) -> signbridge_client::Result<Option<Vec<u8>>> {
        if let Some(message) = self.failure.lock().unwrap().take() {
            return Err(BridgeError::Camera(message));
        }
        Ok(self.latest.lock().unwrap().take())
    }
}

impl Drop for MjpegPipeSource {
    fn drop(&mut self) {
        let _ = self.child.start_kill();
    }
}

/// Pull complete JPEG frames off the front of `pending`, leaving any partial
/// trailing frame in place. JPEG byte stuffing guarantees the SOI/EOI byte
/// sequences cannot occur inside entropy-coded data.
fn split_jpeg_frames(pending: &mut Vec<u8>) -> Vec<Vec<u8>> {
    let mut frames = Vec::new();

    loop {
        let Some(soi) = find(pending, &SOI) else {
            break;
        };
        if soi > 0 {
            pending.drain(..soi);
        }

        let Some(eoi) = find(&pending[SOI.len()..], &EOI).map(|i| i + SOI.len()) else {
            break;
        };

        let frame: Vec<u8> = pending.drain(..eoi + EOI.len()).collect();
        frames.push(frame);
    }

    frames
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_frame(payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![0xFF, 0xD8, 0xFF, 0xE0];
        frame.extend_from_slice(payload);
        frame.extend_from_slice(&EOI);
        frame
    }

    #[test]
    fn splits_back_to_back_frames() {
        let a = fake_frame(b"one");
        let b = fake_frame(b"two");

        let mut pending = Vec::new();
        pending.extend_from_slice(&a);
        pending.extend_from_slice(&b);

        let frames = split_jpeg_frames(&mut pending);
        assert_eq!(frames, vec![a, b]);
        assert!(pending.is_empty());
    }

    #[test]
    fn keeps_a_partial_trailing_frame() {
        let a = fake_frame(b"whole");
        let mut pending = a.clone();
        pending.extend_from_slice(&[0xFF, 0xD8, 0xFF, 0xE0, b'p', b'a', b'r']);

        let frames = split_jpeg_frames(&mut pending);
        assert_eq!(frames, vec![a]);
        assert_eq!(&pending[..3], &SOI[..]);
    }

    #[test]
    fn discards_garbage_before_the_first_frame() {
        let a = fake_frame(b"data");
        let mut pending = vec![0x00, 0x01, 0x02];
        pending.extend_from_slice(&a);

        let frames = split_jpeg_frames(&mut pending);
        assert_eq!(frames, vec![a]);
    }

    #[test]
    fn quality_maps_onto_ffmpeg_q_scale() {
        let best = default_capture_command("/dev/video0", 2.0, 1.0);
        let default = default_capture_command("/dev/video0", 2.0, 0.6);
        let worst = default_capture_command("/dev/video0", 2.0, 0.0);

        let q_of = |cmd: &[String]| {
            let idx = cmd.iter().position(|a| a == "-q:v").unwrap();
            cmd[idx + 1].parse::<u32>().unwrap()
        };

        assert_eq!(q_of(&best), 2);
        assert_eq!(q_of(&default), 14);
        assert_eq!(q_of(&worst), 31);
    }
}
