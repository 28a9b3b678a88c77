//! The bidirectional channel to the remote service: one WebSocket with a
//! command-driven send loop and a single ordered inbound loop. All inbound
//! traffic funnels through one receiver so the consumer sees messages in
//! arrival order.

use crate::error::{BridgeError, Result};
use crate::pcm::{encode_jpeg_chunk, encode_media_chunk};
use crate::protocol::{decode_server_msg, encode_client_msg, ClientMessage, MediaChunk, ServerContent, SessionSetup};

use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info};
use url::Url;

const OUTBOUND_QUEUE_CAPACITY: usize = 128;
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug)]
pub(crate) enum SendCmd {
    Media(MediaChunk),
    Ping,
    Close,
}

/// What the inbound loop hands to the session controller, in arrival order.
#[derive(Clone, Debug)]
pub enum InboundEvent {
    Content(ServerContent),
    Closed { reason: String },
    TransportError { message: String },
    DecodeError { message: String },
}

#[derive(Clone, Debug, Default)]
pub struct LiveClientBuilder {
    url: Option<String>,
    api_key: Option<String>,
    setup: Option<SessionSetup>,
    mic_enabled: Option<Arc<AtomicBool>>,
    cam_enabled: Option<Arc<AtomicBool>>,
}

impl LiveClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn setup(mut self, setup: SessionSetup) -> Self {
        self.setup = Some(setup);
        self
    }

    /// Share externally owned mic/camera gates, so toggles outlive the
    /// channel itself.
    pub fn gates(mut self, mic: Arc<AtomicBool>, cam: Arc<AtomicBool>) -> Self {
        self.mic_enabled = Some(mic);
        self.cam_enabled = Some(cam);
        self
    }

    pub async fn connect(self) -> Result<LiveChannel> {
        let url = self
            .url
            .ok_or_else(|| BridgeError::Connect("missing websocket url".to_string()))?;
        let setup = self
            .setup
            .ok_or_else(|| BridgeError::Connect("missing session setup".to_string()))?;

        let mut url = Url::parse(&url).map_err(|e| BridgeError::Connect(e.to_string()))?;
        if let Some(key) = self.api_key.as_deref() {
            url.query_pairs_mut().append_pair("key", key);
        }

        let req = url
            .to_string()
            .into_client_request()
            .map_err(|e| BridgeError::Connect(e.to_string()))?;

        let (ws_stream, _resp) = connect_async(req)
            .await
            .map_err(|e| BridgeError::Connect(e.to_string()))?;
        info!("live channel open");

        let (mut ws_write, mut ws_read) = ws_stream.split();

        // Session configuration goes out before any media.
        let setup_json = encode_client_msg(&ClientMessage::Setup { setup })?;
        ws_write
            .send(Message::Text(setup_json.into()))
            .await
            .map_err(|e| BridgeError::Connect(e.to_string()))?;

        let (tx, mut rx) = mpsc::channel::<SendCmd>(OUTBOUND_QUEUE_CAPACITY);
        let (out_tx, out_rx) = mpsc::channel::<InboundEvent>(OUTBOUND_QUEUE_CAPACITY);

        let send_loop: JoinHandle<()> = tokio::spawn(async move {
            loop {
                tokio::select! {
                    cmd = rx.recv() => {
                        let Some(cmd) = cmd else {
                            break;
                        };

                        let result = match cmd {
                            SendCmd::Media(media) => {
                                match encode_client_msg(&ClientMessage::Realtime { media }) {
                                    Ok(json) => ws_write.send(Message::Text(json.into())).await,
                                    Err(e) => {
                                        let _ = out_tx
                                            .send(InboundEvent::TransportError { message: e.to_string() })
                                            .await;
                                        break;
                                    }
                                }
                            }
                            SendCmd::Ping => ws_write.send(Message::Ping(Vec::new().into())).await,
                            SendCmd::Close => {
                                let _ = ws_write.send(Message::Close(None)).await;
                                break;
                            }
                        };

                        if let Err(e) = result {
                            let _ = out_tx
                                .send(InboundEvent::TransportError { message: e.to_string() })
                                .await;
                            break;
                        }
                    }
                    item = ws_read.next() => {
                        let Some(item) = item else {
                            let _ = out_tx
                                .send(InboundEvent::Closed { reason: "connection ended".to_string() })
                                .await;
                            break;
                        };

                        let msg = match item {
                            Ok(msg) => msg,
                            Err(e) => {
                                let _ = out_tx
                                    .send(InboundEvent::TransportError { message: e.to_string() })
                                    .await;
                                break;
                            }
                        };

                        let payload: &[u8] = match &msg {
                            Message::Text(text) => text.as_bytes(),
                            Message::Binary(bytes) => bytes.as_ref(),
                            Message::Close(frame) => {
                                let reason = frame
                                    .as_ref()
                                    .map(|f| format!("code {}: {}", u16::from(f.code), f.reason))
                                    .unwrap_or_else(|| "closed by remote".to_string());
                                let _ = out_tx.send(InboundEvent::Closed { reason }).await;
                                break;
                            }
                            _ => continue,
                        };

                        match decode_server_msg(payload) {
                            Ok(server_msg) => {
                                if let Some(content) = server_msg.server_content {
                                    if out_tx.send(InboundEvent::Content(content)).await.is_err() {
                                        break;
                                    }
                                }
                            }
                            Err(e) => {
                                let _ = out_tx
                                    .send(InboundEvent::DecodeError { message: e.to_string() })
                                    .await;
                                break;
                            }
                        }
                    }
                }
            }
        });

        let keepalive_tx = tx.clone();
        let keepalive_loop: JoinHandle<()> = tokio::spawn(async move {
            loop {
                sleep(KEEPALIVE_INTERVAL).await;
                if keepalive_tx.send(SendCmd::Ping).await.is_err() {
                    break;
                }
            }
        });

        Ok(LiveChannel {
            sender: LiveSender {
                tx,
                mic_enabled: self
                    .mic_enabled
                    .unwrap_or_else(|| Arc::new(AtomicBool::new(true))),
                cam_enabled: self
                    .cam_enabled
                    .unwrap_or_else(|| Arc::new(AtomicBool::new(true))),
            },
            send_loop,
            keepalive_loop,
            out_rx,
        })
    }
}

pub struct LiveChannel {
    sender: LiveSender,
    send_loop: JoinHandle<()>,
    keepalive_loop: JoinHandle<()>,
    out_rx: mpsc::Receiver<InboundEvent>,
}

impl LiveChannel {
    pub fn sender(&self) -> LiveSender {
        self.sender.clone()
    }

    /// Next inbound event, in arrival order. `None` once the loops end.
    pub async fn recv(&mut self) -> Option<InboundEvent> {
        self.out_rx.recv().await
    }

    pub async fn shutdown(self) {
        let _ = self.sender.close().await;
        self.keepalive_loop.abort();

        let mut send_loop = self.send_loop;
        if timeout(SHUTDOWN_TIMEOUT, &mut send_loop).await.is_err() {
            send_loop.abort();
        }
    }
}

/// Cloneable handle used by the capture paths. Sends are fire-and-forget:
/// a full outbound queue drops the payload rather than blocking a realtime
/// callback, and disabled toggles drop silently.
#[derive(Clone, Debug)]
pub struct LiveSender {
    tx: mpsc::Sender<SendCmd>,
    mic_enabled: Arc<AtomicBool>,
    cam_enabled: Arc<AtomicBool>,
}

impl LiveSender {
    pub fn send_audio_chunk(&self, samples: &[f32]) {
        if !self.mic_enabled.load(Ordering::Relaxed) {
            return;
        }

        let media = encode_media_chunk(samples);
        if self.tx.try_send(SendCmd::Media(media)).is_err() {
            debug!("outbound queue full, dropping audio chunk");
        }
    }

    pub fn send_frame(&self, jpeg: &[u8]) {
        if !self.cam_enabled.load(Ordering::Relaxed) {
            return;
        }

        let media = encode_jpeg_chunk(jpeg);
        if self.tx.try_send(SendCmd::Media(media)).is_err() {
            debug!("outbound queue full, dropping camera frame");
        }
    }

    pub fn set_mic_enabled(&self, enabled: bool) {
        self.mic_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn mic_enabled(&self) -> bool {
        self.mic_enabled.load(Ordering::Relaxed)
    }

    pub fn set_cam_enabled(&self, enabled: bool) {
        self.cam_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn cam_enabled(&self) -> bool {
        self.cam_enabled.load(Ordering::Relaxed)
    }

    pub async fn close(&self) -> Result<()> {
        self.tx
            .send(SendCmd::Close)
            .await
            .map_err(|_| BridgeError::ChannelClosed)?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn test_pair(capacity: usize) -> (Self, mpsc::Receiver<SendCmd>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx,
                mic_enabled: Arc::new(AtomicBool::new(true)),
                cam_enabled: Arc::new(AtomicBool::new(true)),
            },
            rx,
        )
    }
}
