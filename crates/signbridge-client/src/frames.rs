//! Periodic camera sampling. Frame acquisition itself is a platform
//! primitive behind the `FrameSource` seam; the sampler owns the timer,
//! the camera gate and the handoff to the session channel.

use crate::error::Result;
use crate::ws::LiveSender;

use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::error;

pub const DEFAULT_FRAMES_PER_SECOND: f64 = 2.0;
pub const DEFAULT_JPEG_QUALITY: f32 = 0.6;

/// A camera backend that can hand over its most recent JPEG-encoded frame.
/// `Ok(None)` means no new frame since the last call.
pub trait FrameSource: Send {
    fn latest_jpeg(&mut self) -> Result<Option<Vec<u8>>>;
}

#[derive(Clone, Copy, Debug)]
pub struct FrameSamplerConfig {
    pub frames_per_second: f64,
}

impl Default for FrameSamplerConfig {
    fn default() -> Self {
        Self {
            frames_per_second: DEFAULT_FRAMES_PER_SECOND,
        }
    }
}

/// Run the fixed-rate sampling loop until the shutdown signal fires. Ticks
/// while the camera toggle is off capture nothing; a failing source stops
/// the sampler (camera modality only) and is reported in the log.
pub fn spawn_sampler(
    mut source: Box<dyn FrameSource>,
    config: FrameSamplerConfig,
    sender: LiveSender,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = Duration::from_secs_f64(1.0 / config.frames_per_second.max(0.001));
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    break;
                }
                _ = ticker.tick() => {
                    if !sender.cam_enabled() {
                        continue;
                    }

                    match source.latest_jpeg() {
                        Ok(Some(jpeg)) => sender.send_frame(&jpeg),
                        Ok(None) => {}
                        Err(e) => {
                            error!(error = %e, "camera capture failed, stopping frame sampler");
                            break;
                        }
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pcm::JPEG_MIME_TYPE;
    use crate::ws::SendCmd;

    struct CountingSource {
        captures: u32,
    }

    impl FrameSource for CountingSource {
        fn latest_jpeg(&mut self) -> Result<Option<Vec<u8>>> {
            self.captures += 1;
            Ok(Some(vec![0xFF, 0xD8, self.captures as u8, 0xFF, 0xD9]))
        }
    }

    fn drain_frames(rx: &mut tokio::sync::mpsc::Receiver<SendCmd>) -> usize {
        let mut count = 0;
        while let Ok(cmd) = rx.try_recv() {
            match cmd {
                SendCmd::Media(media) => {
                    assert_eq!(media.mime_type, JPEG_MIME_TYPE);
                    count += 1;
                }
                other => panic!("unexpected command: {other:?}"),
            }
        }
        count
    }

    #[tokio::test(start_paused = true)]
    async fn sampler_sends_frames_and_respects_camera_toggle() {
        let (sender, mut rx) = LiveSender::test_pair(64);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = spawn_sampler(
            Box::new(CountingSource { captures: 0 }),
            FrameSamplerConfig {
                frames_per_second: 10.0,
            },
            sender.clone(),
            shutdown_rx,
        );

        tokio::time::sleep(Duration::from_millis(550)).await;
        assert!(drain_frames(&mut rx) >= 4);

        sender.set_cam_enabled(false);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(drain_frames(&mut rx), 0);

        sender.set_cam_enabled(true);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(drain_frames(&mut rx) >= 4);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_the_timer() {
        let (sender, mut rx) = LiveSender::test_pair(64);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = spawn_sampler(
            Box::new(CountingSource { captures: 0 }),
            FrameSamplerConfig::default(),
            sender,
            shutdown_rx,
        );

        tokio::time::sleep(Duration::from_secs(2)).await;
        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
        drain_frames(&mut rx);

        // No captures leak after teardown.
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(drain_frames(&mut rx), 0);
    }
}
