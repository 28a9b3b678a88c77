//! Append-only conversation log plus the parser for embedded visual
//! sign-guide markers of the form `[SIGN: "word" -> description]`.

use crate::types::{EntryId, EntryKind, Speaker, TranscriptionEntry};

use chrono::Utc;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref SIGN_RE: Regex =
        Regex::new(r#"\[SIGN:\s*"([^"]*)"\s*->\s*([^\]]*)\]"#).unwrap();
}

#[derive(Debug, Default)]
pub struct TranscriptStore {
    entries: Vec<TranscriptionEntry>,
    next_id: u64,
}

impl TranscriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one finalized utterance. Empty or whitespace-only text is
    /// ignored and produces no entry.
    pub fn push(&mut self, speaker: Speaker, kind: EntryKind, text: &str) -> Option<&TranscriptionEntry> {
        if text.trim().is_empty() {
            return None;
        }

        let id = EntryId(self.next_id);
        self.next_id += 1;

        self.entries.push(TranscriptionEntry {
            id,
            speaker,
            kind,
            text: text.to_string(),
            timestamp: Utc::now(),
        });
        self.entries.last()
    }

    pub fn entries(&self) -> &[TranscriptionEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// In-progress utterance buffers for the current turn, one per direction.
/// Partial transcription text accumulates here and only reaches the store
/// when the remote side signals the turn is complete.
#[derive(Debug, Default)]
pub struct TurnAccumulator {
    input: String,
    output: String,
}

impl TurnAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_input(&mut self, text: &str) {
        self.input.push_str(text);
    }

    pub fn push_output(&mut self, text: &str) {
        self.output.push_str(text);
    }

    /// Flush both buffers into the store as finalized entries and reset
    /// them. Returns the entries that were actually added (blank buffers
    /// add nothing).
    pub fn finish_turn(&mut self, store: &mut TranscriptStore) -> Vec<TranscriptionEntry> {
        let input = std::mem::take(&mut self.input);
        let output = std::mem::take(&mut self.output);

        let mut added = Vec::new();
        if let Some(entry) = store.push(Speaker::Local, EntryKind::Speech, &input) {
            added.push(entry.clone());
        }
        if let Some(entry) = store.push(Speaker::Remote, EntryKind::Speech, &output) {
            added.push(entry.clone());
        }
        added
    }
}

/// One rendered piece of an entry's text, in source order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    SignGuide { word: String, description: String },
}

/// Split entry text into plain-text runs and sign-guide blocks, preserving
/// order. Malformed markers stay plain text.
pub fn parse_segments(text: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut cursor = 0;

    for caps in SIGN_RE.captures_iter(text) {
        let whole = caps.get(0).unwrap();
        if whole.start() > cursor {
            segments.push(Segment::Text(text[cursor..whole.start()].to_string()));
        }
        segments.push(Segment::SignGuide {
            word: caps[1].to_string(),
            description: caps[2].trim().to_string(),
        });
        cursor = whole.end();
    }

    if cursor < text.len() {
        segments.push(Segment::Text(text[cursor..].to_string()));
    }
    segments
}
