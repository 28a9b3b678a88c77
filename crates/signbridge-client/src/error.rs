use thiserror::Error;

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Session-terminal failures. None of these are retried automatically; the
/// controller lands in the error state and the user restarts the session.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("microphone unavailable: {0}")]
    Microphone(String),

    #[error("camera capture failed: {0}")]
    Camera(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed inbound payload: {0}")]
    Decode(String),

    #[error("audio output unavailable: {0}")]
    Playback(String),

    #[error("session channel closed")]
    ChannelClosed,
}
