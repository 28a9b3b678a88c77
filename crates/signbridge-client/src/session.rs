//! Session lifecycle and inbound dispatch. The controller owns the
//! microphone stream, the frame sampler task, the playback scheduler with
//! its cursor, the transcript store and the in-progress turn buffers. It is
//! created once, connects, and resets in place on close or error.

use crate::audio::MicCapture;
use crate::error::Result;
use crate::frames::{spawn_sampler, FrameSamplerConfig, FrameSource};
use crate::pcm::{decode_pcm_payload, PLAYBACK_SAMPLE_RATE_HZ};
use crate::playback::{AudioSink, PlaybackScheduler};
use crate::protocol::{ServerContent, SessionSetup};
use crate::transcript::{TranscriptStore, TurnAccumulator};
use crate::types::BridgeEvent;
use crate::ws::{InboundEvent, LiveChannel, LiveClientBuilder};

use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub const DEFAULT_LIVE_URL: &str =
    "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-native-audio-preview-12-2025";
pub const DEFAULT_VOICE: &str = "Puck";

pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "\
You are a world-class real-time accessibility bridge for deaf, mute, and hearing individuals.
Your mission is to provide seamless communication between Sign Language and Auditory Language.

MODE 1: SIGN TO SPEECH
- You will receive a stream of image frames from the user's camera.
- Recognize hand gestures and signs (ASL or common gestures).
- Immediately convert these into natural English speech and provide the text transcription.
- If a sign is unclear, ask for clarification politely.

MODE 2: SPEECH TO SIGN
- You will receive audio from the user.
- Transcribe the audio.
- For each important word or phrase, provide a detailed visual description of how to perform the sign in the text output.
- Keep the tone helpful, professional, and friendly.

Always respond in a way that can be both heard (audio output) and read (text transcription).
When describing a sign visually, use clear step-by-step markers like [SIGN: \"Hello\" -> Flat hand moves from forehead outwards].";

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub url: String,
    pub api_key: String,
    pub model: String,
    pub voice: String,
    pub system_instruction: String,
    pub frames_per_second: f64,
}

impl SessionConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            url: DEFAULT_LIVE_URL.to_string(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            frames_per_second: crate::frames::DEFAULT_FRAMES_PER_SECOND,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Active,
    Error,
}

/// Cloneable handle on the mic/camera gates, usable while the controller is
/// busy driving the session.
#[derive(Clone, Debug)]
pub struct Toggles {
    mic: Arc<AtomicBool>,
    cam: Arc<AtomicBool>,
}

impl Toggles {
    pub fn set_mic_enabled(&self, enabled: bool) {
        self.mic.store(enabled, std::sync::atomic::Ordering::Relaxed);
    }

    pub fn mic_enabled(&self) -> bool {
        self.mic.load(std::sync::atomic::Ordering::Relaxed)
    }

    pub fn set_cam_enabled(&self, enabled: bool) {
        self.cam.store(enabled, std::sync::atomic::Ordering::Relaxed);
    }

    pub fn cam_enabled(&self) -> bool {
        self.cam.load(std::sync::atomic::Ordering::Relaxed)
    }
}

pub struct SessionController<S: AudioSink> {
    config: SessionConfig,
    state: SessionState,
    scheduler: PlaybackScheduler<S>,
    store: TranscriptStore,
    turns: TurnAccumulator,
    pending: VecDeque<BridgeEvent>,
    mic_enabled: Arc<AtomicBool>,
    cam_enabled: Arc<AtomicBool>,
    channel: Option<LiveChannel>,
    mic: Option<MicCapture>,
    shutdown_tx: Option<watch::Sender<bool>>,
    mic_task: Option<JoinHandle<()>>,
    sampler_task: Option<JoinHandle<()>>,
}

impl<S: AudioSink> SessionController<S> {
    pub fn new(config: SessionConfig, sink: S) -> Self {
        Self {
            config,
            state: SessionState::Idle,
            scheduler: PlaybackScheduler::new(sink, PLAYBACK_SAMPLE_RATE_HZ),
            store: TranscriptStore::new(),
            turns: TurnAccumulator::new(),
            pending: VecDeque::new(),
            mic_enabled: Arc::new(AtomicBool::new(true)),
            cam_enabled: Arc::new(AtomicBool::new(true)),
            channel: None,
            mic: None,
            shutdown_tx: None,
            mic_task: None,
            sampler_task: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn transcript(&self) -> &TranscriptStore {
        &self.store
    }

    pub fn set_mic_enabled(&self, enabled: bool) {
        self.mic_enabled
            .store(enabled, std::sync::atomic::Ordering::Relaxed);
    }

    pub fn mic_enabled(&self) -> bool {
        self.mic_enabled.load(std::sync::atomic::Ordering::Relaxed)
    }

    pub fn set_cam_enabled(&self, enabled: bool) {
        self.cam_enabled
            .store(enabled, std::sync::atomic::Ordering::Relaxed);
    }

    pub fn cam_enabled(&self) -> bool {
        self.cam_enabled.load(std::sync::atomic::Ordering::Relaxed)
    }

    pub fn toggles(&self) -> Toggles {
        Toggles {
            mic: self.mic_enabled.clone(),
            cam: self.cam_enabled.clone(),
        }
    }

    /// Acquire the microphone, open the channel with the session setup, and
    /// start streaming. No-op when already active; no automatic retry on
    /// failure — the controller lands in the error state.
    pub async fn connect(&mut self, frame_source: Option<Box<dyn FrameSource>>) -> Result<()> {
        if self.state == SessionState::Active {
            return Ok(());
        }

        self.state = SessionState::Connecting;

        let mut mic = match MicCapture::start_default() {
            Ok(mic) => mic,
            Err(e) => {
                self.state = SessionState::Error;
                return Err(e);
            }
        };

        let setup = SessionSetup::new(
            &self.config.model,
            &self.config.system_instruction,
            &self.config.voice,
        );

        let channel = match LiveClientBuilder::new()
            .url(&self.config.url)
            .api_key(&self.config.api_key)
            .setup(setup)
            .gates(self.mic_enabled.clone(), self.cam_enabled.clone())
            .connect()
            .await
        {
            Ok(channel) => channel,
            Err(e) => {
                self.state = SessionState::Error;
                return Err(e);
            }
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sender = channel.sender();

        // Mic forwarder: capture callback -> bounded channel -> encoder ->
        // session channel. Chunks while the mic toggle is off are dropped
        // inside the sender before they reach the encoder.
        if let Some(mut chunks) = mic.take_chunks() {
            let mic_sender = sender.clone();
            let mut mic_shutdown = shutdown_rx.clone();
            self.mic_task = Some(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = mic_shutdown.changed() => break,
                        chunk = chunks.recv() => {
                            let Some(chunk) = chunk else { break };
                            mic_sender.send_audio_chunk(&chunk.samples);
                        }
                    }
                }
            }));
        }

        if let Some(source) = frame_source {
            self.sampler_task = Some(spawn_sampler(
                source,
                FrameSamplerConfig {
                    frames_per_second: self.config.frames_per_second,
                },
                sender,
                shutdown_rx,
            ));
        }

        self.channel = Some(channel);
        self.mic = Some(mic);
        self.shutdown_tx = Some(shutdown_tx);
        self.state = SessionState::Active;
        info!(model = %self.config.model, "session active");
        Ok(())
    }

    /// Next user-visible event. Resolves `None` once no session is running
    /// and nothing is pending.
    pub async fn next_event(&mut self) -> Option<BridgeEvent> {
        loop {
            if let Some(ev) = self.pending.pop_front() {
                return Some(ev);
            }

            let channel = self.channel.as_mut()?;
            match channel.recv().await {
                Some(InboundEvent::Content(content)) => self.apply_content(content),
                Some(InboundEvent::Closed { reason }) => {
                    info!(%reason, "remote closed the session");
                    self.teardown(SessionState::Idle).await;
                    self.pending.push_back(BridgeEvent::Closed { reason });
                }
                Some(InboundEvent::TransportError { message }) => {
                    warn!(%message, "transport error, ending session");
                    self.teardown(SessionState::Error).await;
                    self.pending.push_back(BridgeEvent::Error { message });
                }
                Some(InboundEvent::DecodeError { message }) => {
                    warn!(%message, "protocol decode error, ending session");
                    self.teardown(SessionState::Error).await;
                    self.pending.push_back(BridgeEvent::Error { message });
                }
                None => {
                    self.teardown(SessionState::Idle).await;
                    return None;
                }
            }
        }
    }

    /// Apply one server message in field order: inline audio, transcription
    /// accumulation, turn completion, interruption. A message may carry any
    /// combination.
    fn apply_content(&mut self, content: ServerContent) {
        for media in content.audio_payloads() {
            match decode_pcm_payload(&media.data) {
                Ok(samples) => self.scheduler.schedule(&samples),
                Err(e) => {
                    warn!(error = %e, "malformed inbound audio, ending session");
                    self.state = SessionState::Error;
                    self.pending.push_back(BridgeEvent::Error {
                        message: e.to_string(),
                    });
                    return;
                }
            }
        }

        if let Some(part) = &content.output_transcription {
            self.turns.push_output(&part.text);
        }
        if let Some(part) = &content.input_transcription {
            self.turns.push_input(&part.text);
        }

        if content.turn_complete {
            for entry in self.turns.finish_turn(&mut self.store) {
                self.pending.push_back(BridgeEvent::EntryAdded(entry));
            }
        }

        if content.interrupted {
            self.scheduler.interrupt();
            self.pending.push_back(BridgeEvent::Interrupted);
        }
    }

    /// End the session and reset in place: stop sampling, release the
    /// microphone, close the channel. The transcript survives for rendering.
    pub async fn close(&mut self) {
        if let Some(channel) = self.channel.take() {
            channel.shutdown().await;
        }
        self.teardown(SessionState::Idle).await;
    }

    async fn teardown(&mut self, state: SessionState) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        if let Some(task) = self.sampler_task.take() {
            let _ = task.await;
        }
        if let Some(task) = self.mic_task.take() {
            let _ = task.await;
        }
        // Dropping the capture stream releases the device.
        self.mic = None;
        self.channel = None;
        self.state = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{MediaChunk, ModelTurn, TranscriptionPart, TurnPart};
    use crate::types::{EntryKind, Speaker};

    struct NullSink;

    impl AudioSink for NullSink {
        fn now(&self) -> f64 {
            0.0
        }

        fn enqueue_at(&mut self, _start: f64, _samples: &[f32]) {}

        fn cancel_all(&mut self) {}
    }

    fn controller() -> SessionController<NullSink> {
        SessionController::new(SessionConfig::new("test-key"), NullSink)
    }

    fn text_content(input: Option<&str>, output: Option<&str>) -> ServerContent {
        ServerContent {
            input_transcription: input.map(|t| TranscriptionPart { text: t.to_string() }),
            output_transcription: output.map(|t| TranscriptionPart { text: t.to_string() }),
            ..Default::default()
        }
    }

    fn audio_content(samples: &[f32]) -> ServerContent {
        ServerContent {
            model_turn: Some(ModelTurn {
                parts: vec![TurnPart {
                    inline_data: Some(crate::pcm::encode_media_chunk(samples)),
                }],
            }),
            ..Default::default()
        }
    }

    #[test]
    fn turn_complete_flushes_accumulated_text_and_resets() {
        let mut c = controller();

        c.apply_content(text_content(Some("Hello"), None));
        c.apply_content(text_content(Some(" world"), None));
        assert!(c.pending.is_empty());

        c.apply_content(ServerContent {
            turn_complete: true,
            ..Default::default()
        });

        match c.pending.pop_front() {
            Some(BridgeEvent::EntryAdded(entry)) => {
                assert_eq!(entry.speaker, Speaker::Local);
                assert_eq!(entry.kind, EntryKind::Speech);
                assert_eq!(entry.text, "Hello world");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(c.pending.is_empty());
        assert_eq!(c.transcript().len(), 1);

        // A turn-complete with nothing new produces nothing.
        c.apply_content(ServerContent {
            turn_complete: true,
            ..Default::default()
        });
        assert!(c.pending.is_empty());
        assert_eq!(c.transcript().len(), 1);
    }

    #[test]
    fn whitespace_only_transcription_never_becomes_an_entry() {
        let mut c = controller();

        c.apply_content(text_content(Some("   \n"), None));
        c.apply_content(ServerContent {
            turn_complete: true,
            ..Default::default()
        });

        assert!(c.pending.is_empty());
        assert!(c.transcript().is_empty());
    }

    #[test]
    fn combined_message_is_applied_in_field_order() {
        let mut c = controller();

        c.apply_content(text_content(Some("Hi"), Some("Hello back")));
        let mut content = ServerContent {
            turn_complete: true,
            interrupted: true,
            ..Default::default()
        };
        content.model_turn = audio_content(&[0.1, 0.2, 0.3]).model_turn;
        c.apply_content(content);

        let events: Vec<BridgeEvent> = c.pending.drain(..).collect();
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], BridgeEvent::EntryAdded(e) if e.speaker == Speaker::Local));
        assert!(matches!(&events[1], BridgeEvent::EntryAdded(e) if e.speaker == Speaker::Remote));
        assert!(matches!(&events[2], BridgeEvent::Interrupted));

        // The interruption cleared what the same message scheduled.
        assert_eq!(c.scheduler.scheduled_len(), 0);
        assert_eq!(c.scheduler.cursor(), 0.0);
    }

    #[test]
    fn inbound_audio_schedules_and_interruption_resets() {
        let mut c = controller();

        c.apply_content(audio_content(&[0.5; 2400]));
        c.apply_content(audio_content(&[0.5; 2400]));
        assert_eq!(c.scheduler.scheduled_len(), 2);
        assert!((c.scheduler.cursor() - 0.2).abs() < 1e-9);

        c.apply_content(ServerContent {
            interrupted: true,
            ..Default::default()
        });
        assert_eq!(c.scheduler.scheduled_len(), 0);
        assert_eq!(c.scheduler.cursor(), 0.0);
        assert!(matches!(
            c.pending.pop_front(),
            Some(BridgeEvent::Interrupted)
        ));
    }

    #[test]
    fn malformed_inbound_audio_is_terminal() {
        let mut c = controller();

        let content = ServerContent {
            model_turn: Some(ModelTurn {
                parts: vec![TurnPart {
                    inline_data: Some(MediaChunk {
                        data: "!!!not-base64!!!".to_string(),
                        mime_type: "audio/pcm;rate=24000".to_string(),
                    }),
                }],
            }),
            ..Default::default()
        };
        c.apply_content(content);

        assert_eq!(c.state(), SessionState::Error);
        assert!(matches!(
            c.pending.pop_front(),
            Some(BridgeEvent::Error { .. })
        ));
    }
}
