use chrono::{DateTime, Utc};

/// Store-assigned identifier for a transcript entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(pub u64);

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Speaker {
    /// The person in front of the camera and microphone.
    Local,
    /// The remote assistant.
    Remote,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    Speech,
    Sign,
}

/// One finalized utterance. Immutable once appended; partial transcription
/// text never becomes an entry.
#[derive(Clone, Debug, PartialEq)]
pub struct TranscriptionEntry {
    pub id: EntryId,
    pub speaker: Speaker,
    pub kind: EntryKind,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Events surfaced to the presentation layer, in inbound-message order.
#[derive(Clone, Debug, PartialEq)]
pub enum BridgeEvent {
    EntryAdded(TranscriptionEntry),
    /// The user started speaking or signing over the assistant; all pending
    /// playback was discarded.
    Interrupted,
    /// The remote side closed the channel.
    Closed { reason: String },
    Error { message: String },
}
