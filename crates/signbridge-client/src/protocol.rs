use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};

/// A base64 media payload with its declared MIME type, used for both
/// outbound microphone/camera data and inbound model audio.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MediaChunk {
    pub data: String,
    #[serde(default)]
    pub mime_type: String,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_name: String,
}

/// Marker for "transcription enabled"; the wire format wants an empty object.
#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct TranscriptionConfig {}

/// Session open configuration: audio-only responses, the dual-mode
/// translation prompt, a voice, and transcription in both directions.
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSetup {
    pub model: String,
    pub system_instruction: String,
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
    pub input_audio_transcription: TranscriptionConfig,
    pub output_audio_transcription: TranscriptionConfig,
}

impl SessionSetup {
    pub fn new(model: impl Into<String>, system_instruction: impl Into<String>, voice: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system_instruction: system_instruction.into(),
            response_modalities: vec!["AUDIO".to_string()],
            speech_config: SpeechConfig {
                voice_name: voice.into(),
            },
            input_audio_transcription: TranscriptionConfig {},
            output_audio_transcription: TranscriptionConfig {},
        }
    }
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(untagged)]
pub enum ClientMessage {
    Setup { setup: SessionSetup },

    Realtime { media: MediaChunk },
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<TurnPart>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct TurnPart {
    pub inline_data: Option<MediaChunk>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct TranscriptionPart {
    pub text: String,
}

/// One server message. Any combination of the fields may be present; the
/// dispatcher handles them independently and in order.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerContent {
    pub model_turn: Option<ModelTurn>,
    pub input_transcription: Option<TranscriptionPart>,
    pub output_transcription: Option<TranscriptionPart>,
    pub turn_complete: bool,
    pub interrupted: bool,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerMessage {
    pub server_content: Option<ServerContent>,
}

impl ServerContent {
    /// Inline audio payloads of this message, in part order.
    pub fn audio_payloads(&self) -> impl Iterator<Item = &MediaChunk> {
        self.model_turn
            .iter()
            .flat_map(|turn| turn.parts.iter())
            .filter_map(|part| part.inline_data.as_ref())
    }
}

pub fn encode_client_msg(msg: &ClientMessage) -> Result<String> {
    serde_json::to_string(msg).map_err(|e| BridgeError::Decode(e.to_string()))
}

pub fn decode_server_msg(bytes: &[u8]) -> Result<ServerMessage> {
    serde_json::from_slice::<ServerMessage>(bytes).map_err(|e| BridgeError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_message_serializes_flat() {
        let msg = ClientMessage::Realtime {
            media: MediaChunk {
                data: "AAAA".to_string(),
                mime_type: "audio/pcm;rate=16000".to_string(),
            },
        };

        let json = encode_client_msg(&msg).expect("encode should succeed");
        assert_eq!(
            json,
            r#"{"media":{"data":"AAAA","mimeType":"audio/pcm;rate=16000"}}"#
        );
    }

    #[test]
    fn setup_message_carries_modalities_and_transcription() {
        let msg = ClientMessage::Setup {
            setup: SessionSetup::new("models/test", "prompt", "Puck"),
        };

        let json = encode_client_msg(&msg).expect("encode should succeed");
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["setup"]["responseModalities"][0], "AUDIO");
        assert_eq!(value["setup"]["speechConfig"]["voiceName"], "Puck");
        assert!(value["setup"]["inputAudioTranscription"].is_object());
        assert!(value["setup"]["outputAudioTranscription"].is_object());
    }

    #[test]
    fn decode_combined_server_message() {
        let json = r#"{
            "serverContent": {
                "modelTurn": {"parts": [{"inlineData": {"data": "UklGRg==", "mimeType": "audio/pcm;rate=24000"}}]},
                "outputTranscription": {"text": "Hi there"},
                "turnComplete": true
            }
        }"#;

        let msg = decode_server_msg(json.as_bytes()).expect("decode should succeed");
        let content = msg.server_content.expect("content present");

        let audio: Vec<_> = content.audio_payloads().collect();
        assert_eq!(audio.len(), 1);
        assert_eq!(audio[0].data, "UklGRg==");
        assert_eq!(content.output_transcription.as_ref().unwrap().text, "Hi there");
        assert!(content.turn_complete);
        assert!(!content.interrupted);
        assert!(content.input_transcription.is_none());
    }

    #[test]
    fn decode_tolerates_unknown_fields() {
        let json = r#"{"setupComplete": {}, "usageMetadata": {"tokens": 3}}"#;
        let msg = decode_server_msg(json.as_bytes()).expect("decode should succeed");
        assert!(msg.server_content.is_none());
    }

    #[test]
    fn decode_rejects_malformed_json() {
        assert!(decode_server_msg(b"{not json").is_err());
    }
}
