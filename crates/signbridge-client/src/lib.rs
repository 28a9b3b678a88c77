//! Client library for a realtime sign/speech accessibility bridge: it
//! streams microphone audio and camera frames to a multimodal AI service
//! over one WebSocket, plays the service's audio replies gaplessly, and
//! assembles its transcripts into an append-only conversation log.

mod error;

pub mod audio;
pub mod frames;
pub mod pcm;
pub mod playback;
pub mod protocol;
pub mod session;
pub mod transcript;
pub mod ws;

mod types;

pub use error::{BridgeError, Result};
pub use session::{SessionConfig, SessionController, SessionState, Toggles};
pub use types::{BridgeEvent, EntryId, EntryKind, Speaker, TranscriptionEntry};
pub use ws::{LiveChannel, LiveClientBuilder, LiveSender};
