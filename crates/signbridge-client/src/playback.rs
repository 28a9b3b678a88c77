//! Gapless scheduling of decoded model audio onto one output device.
//!
//! The scheduler owns the playback cursor (the next buffer's earliest start
//! time) and the set of scheduled-but-unfinished buffers. Buffers arriving
//! faster than the device clock play back-to-back; if playback falls behind,
//! the cursor snaps forward to the device's current time, never backward.
//! An interruption discards every pending buffer and resets the cursor to
//! zero in one step.

use crate::audio::LinearResampler;
use crate::error::{BridgeError, Result};

use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Seam over the output device: a monotonic clock plus a sample queue that
/// plays enqueued audio at (or as close as possible to) the requested start
/// time.
pub trait AudioSink {
    /// Seconds of audio the device has rendered since the sink started.
    fn now(&self) -> f64;

    /// Queue `samples` so they begin playing at `start` seconds. `start` is
    /// never earlier than `now()` when called from the scheduler.
    fn enqueue_at(&mut self, start: f64, samples: &[f32]);

    /// Discard everything queued but not yet rendered.
    fn cancel_all(&mut self);
}

#[derive(Clone, Copy, Debug)]
struct Scheduled {
    id: u64,
    end: f64,
}

pub struct PlaybackScheduler<S: AudioSink> {
    sink: S,
    sample_rate_hz: u32,
    next_start: f64,
    scheduled: Vec<Scheduled>,
    next_id: u64,
}

impl<S: AudioSink> PlaybackScheduler<S> {
    pub fn new(sink: S, sample_rate_hz: u32) -> Self {
        Self {
            sink,
            sample_rate_hz,
            next_start: 0.0,
            scheduled: Vec::new(),
            next_id: 0,
        }
    }

    /// Schedule one decoded buffer after everything already queued.
    pub fn schedule(&mut self, samples: &[f32]) {
        if samples.is_empty() {
            return;
        }

        self.reap_finished();

        let start = self.next_start.max(self.sink.now());
        let duration = samples.len() as f64 / self.sample_rate_hz as f64;

        self.sink.enqueue_at(start, samples);
        self.scheduled.push(Scheduled {
            id: self.next_id,
            end: start + duration,
        });
        self.next_id += 1;
        self.next_start = start + duration;
    }

    /// Stop and discard all scheduled buffers and reset the cursor to zero,
    /// so the next buffer starts immediately relative to the device clock.
    pub fn interrupt(&mut self) {
        self.sink.cancel_all();
        self.scheduled.clear();
        self.next_start = 0.0;
    }

    /// Drop entries whose playback has naturally finished.
    pub fn reap_finished(&mut self) {
        let now = self.sink.now();
        self.scheduled.retain(|s| s.end > now);
    }

    pub fn cursor(&self) -> f64 {
        self.next_start
    }

    pub fn scheduled_len(&self) -> usize {
        self.scheduled.len()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    #[cfg(test)]
    fn scheduled_ids(&self) -> Vec<u64> {
        self.scheduled.iter().map(|s| s.id).collect()
    }
}

/// Real output sink: a cpal stream fed from an SPSC ring buffer. Mono
/// source samples are resampled to the device rate and fanned out across
/// the device's channels inside the realtime callback.
pub struct CpalSink {
    _stream: cpal::Stream,
    producer: HeapProd<f32>,
    resampler: Option<LinearResampler>,
    resample_buf: Vec<f32>,
    device_rate_hz: u32,
    /// Frames the device has rendered (including silence on underrun).
    frames_out: Arc<AtomicUsize>,
    /// Samples pushed but not yet popped by the callback.
    queued: Arc<AtomicUsize>,
    cancel: Arc<AtomicBool>,
}

const MAX_QUEUED_SECONDS: usize = 20;

impl CpalSink {
    pub fn start_default(source_rate_hz: u32) -> Result<Self> {
        use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| BridgeError::Playback("no default output device".to_string()))?;

        let config = device
            .default_output_config()
            .map_err(|e| BridgeError::Playback(e.to_string()))?;
        let stream_config: cpal::StreamConfig = config.into();
        let device_rate_hz = stream_config.sample_rate.0;
        let channels = stream_config.channels as usize;

        let rb = HeapRb::<f32>::new(device_rate_hz as usize * MAX_QUEUED_SECONDS);
        let (producer, mut consumer) = rb.split();

        let frames_out = Arc::new(AtomicUsize::new(0));
        let queued = Arc::new(AtomicUsize::new(0));
        let cancel = Arc::new(AtomicBool::new(false));

        let frames_out_cb = frames_out.clone();
        let queued_cb = queued.clone();
        let cancel_cb = cancel.clone();

        let stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    data.fill(0.0);

                    if cancel_cb.swap(false, Ordering::AcqRel) {
                        let mut drained = 0usize;
                        while consumer.try_pop().is_some() {
                            drained += 1;
                        }
                        if drained > 0 {
                            queued_cb.fetch_sub(drained, Ordering::AcqRel);
                        }
                    }

                    let mut popped = 0usize;
                    let mut current = 0.0f32;
                    for (idx, slot) in data.iter_mut().enumerate() {
                        if idx % channels == 0 {
                            match consumer.try_pop() {
                                Some(v) => {
                                    current = v;
                                    popped += 1;
                                }
                                None => break,
                            }
                        }
                        *slot = current;
                    }

                    if popped > 0 {
                        queued_cb.fetch_sub(popped, Ordering::AcqRel);
                    }
                    frames_out_cb.fetch_add(data.len() / channels.max(1), Ordering::AcqRel);
                },
                move |err| {
                    warn!(error = %err, "audio output stream error");
                },
                None,
            )
            .map_err(|e| BridgeError::Playback(e.to_string()))?;

        stream
            .play()
            .map_err(|e| BridgeError::Playback(e.to_string()))?;

        let resampler = (source_rate_hz != device_rate_hz)
            .then(|| LinearResampler::new(source_rate_hz, device_rate_hz));

        Ok(Self {
            _stream: stream,
            producer,
            resampler,
            resample_buf: Vec::new(),
            device_rate_hz,
            frames_out,
            queued,
            cancel,
        })
    }

    fn push(&mut self, samples: &[f32]) {
        let mut pushed = 0usize;
        for &sample in samples {
            if self.producer.try_push(sample).is_err() {
                break;
            }
            pushed += 1;
        }
        if pushed < samples.len() {
            warn!(
                dropped = samples.len() - pushed,
                "output ring full, dropping audio"
            );
        }
        if pushed > 0 {
            self.queued.fetch_add(pushed, Ordering::AcqRel);
        }
    }
}

impl AudioSink for CpalSink {
    fn now(&self) -> f64 {
        self.frames_out.load(Ordering::Acquire) as f64 / self.device_rate_hz as f64
    }

    fn enqueue_at(&mut self, start: f64, samples: &[f32]) {
        // A sample at queue depth q renders q/rate seconds from now, so the
        // requested lead time translates into a target depth; any shortfall
        // is padded with silence.
        let lead = (start - self.now()).max(0.0);
        let target_depth = (lead * self.device_rate_hz as f64).round() as usize;
        let queued = self.queued.load(Ordering::Acquire);
        let gap = target_depth.saturating_sub(queued);
        if gap > 0 {
            let zeros = vec![0.0f32; gap];
            self.push(&zeros);
        }

        match self.resampler.as_mut() {
            Some(r) => {
                let mut out = std::mem::take(&mut self.resample_buf);
                r.process_into(samples, &mut out);
                self.push(&out);
                self.resample_buf = out;
            }
            None => self.push(samples),
        }
    }

    fn cancel_all(&mut self) {
        self.cancel.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct FakeSink {
        now: f64,
        enqueued: Vec<(f64, usize)>,
        cancels: usize,
    }

    impl AudioSink for FakeSink {
        fn now(&self) -> f64 {
            self.now
        }

        fn enqueue_at(&mut self, start: f64, samples: &[f32]) {
            self.enqueued.push((start, samples.len()));
        }

        fn cancel_all(&mut self) {
            self.cancels += 1;
        }
    }

    const RATE: u32 = 24_000;

    fn buffer(seconds: f64) -> Vec<f32> {
        vec![0.1; (seconds * RATE as f64) as usize]
    }

    #[test]
    fn fast_arrivals_play_back_to_back() {
        let mut scheduler = PlaybackScheduler::new(FakeSink::default(), RATE);

        scheduler.schedule(&buffer(0.5));
        scheduler.schedule(&buffer(0.25));
        scheduler.schedule(&buffer(1.0));

        assert_eq!(scheduler.cursor(), 1.75);
        assert_eq!(scheduler.scheduled_len(), 3);

        let starts: Vec<f64> = scheduler.sink().enqueued.iter().map(|e| e.0).collect();
        assert_eq!(starts, vec![0.0, 0.5, 0.75]);
    }

    #[test]
    fn cursor_snaps_forward_when_playback_falls_behind() {
        let mut scheduler = PlaybackScheduler::new(FakeSink::default(), RATE);

        scheduler.schedule(&buffer(1.0));
        assert_eq!(scheduler.cursor(), 1.0);

        // Device clock has passed the end of everything scheduled.
        scheduler.sink.now = 5.0;
        scheduler.schedule(&buffer(0.5));

        assert_eq!(scheduler.sink().enqueued.last().unwrap().0, 5.0);
        assert_eq!(scheduler.cursor(), 5.5);
        // The first buffer finished naturally and left the tracked set.
        assert_eq!(scheduler.scheduled_len(), 1);
    }

    #[test]
    fn interruption_clears_everything_and_resets_cursor() {
        let mut scheduler = PlaybackScheduler::new(FakeSink::default(), RATE);

        scheduler.schedule(&buffer(1.0));
        scheduler.schedule(&buffer(1.0));
        scheduler.schedule(&buffer(1.0));
        assert_eq!(scheduler.scheduled_len(), 3);

        scheduler.interrupt();

        assert_eq!(scheduler.sink().cancels, 1);
        assert_eq!(scheduler.scheduled_len(), 0);
        assert_eq!(scheduler.cursor(), 0.0);

        // Next buffer starts immediately relative to the device clock.
        scheduler.sink.now = 2.0;
        scheduler.schedule(&buffer(0.5));
        assert_eq!(scheduler.sink().enqueued.last().unwrap().0, 2.0);
        assert_eq!(scheduler.cursor(), 2.5);
    }

    #[test]
    fn finished_buffers_remove_themselves() {
        let mut scheduler = PlaybackScheduler::new(FakeSink::default(), RATE);

        scheduler.schedule(&buffer(0.5));
        scheduler.schedule(&buffer(0.5));
        let ids = scheduler.scheduled_ids();
        assert_eq!(ids.len(), 2);

        scheduler.sink.now = 0.6;
        scheduler.reap_finished();
        assert_eq!(scheduler.scheduled_ids(), vec![ids[1]]);

        scheduler.sink.now = 1.1;
        scheduler.reap_finished();
        assert!(scheduler.scheduled_ids().is_empty());
    }

    #[test]
    fn empty_buffers_are_ignored() {
        let mut scheduler = PlaybackScheduler::new(FakeSink::default(), RATE);
        scheduler.schedule(&[]);
        assert_eq!(scheduler.scheduled_len(), 0);
        assert_eq!(scheduler.cursor(), 0.0);
        assert!(scheduler.sink().enqueued.is_empty());
    }
}
