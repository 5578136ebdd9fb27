//! JSON wire messages exchanged with the realtime relay.
//!
//! Outbound messages serialize from [`ClientMessage`]. Inbound text is decoded
//! once, at the transport boundary, into the closed [`InboundEvent`] enum;
//! unknown message types become [`InboundEvent::Unknown`] and anything that
//! does not parse is a [`ProtocolError`].

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use voxlink_core::{MessageKind, ProtocolError, Role, TransportError, WireAudioChunk};

const DEFAULT_ERROR_MESSAGE: &str = "communication error with the agent";

// ── Outbound ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioAppend { audio: String },

    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: OutboundItem },

    #[serde(rename = "response.create")]
    ResponseCreate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum OutboundItem {
    #[serde(rename = "message")]
    Message {
        role: Role,
        content: Vec<InputContent>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum InputContent {
    #[serde(rename = "input_text")]
    InputText { text: String },
}

impl ClientMessage {
    pub fn audio_append(chunk: WireAudioChunk) -> Self {
        ClientMessage::InputAudioAppend {
            audio: chunk.into_string(),
        }
    }

    pub fn user_text(text: impl Into<String>) -> Self {
        ClientMessage::ConversationItemCreate {
            item: OutboundItem::Message {
                role: Role::User,
                content: vec![InputContent::InputText { text: text.into() }],
            },
        }
    }

    /// Message type, for logs. Never log the audio payload itself.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::InputAudioAppend { .. } => "input_audio_buffer.append",
            ClientMessage::ConversationItemCreate { .. } => "conversation.item.create",
            ClientMessage::ResponseCreate => "response.create",
        }
    }

    pub fn to_json(&self) -> Result<String, TransportError> {
        serde_json::to_string(self).map_err(|e| TransportError::Send(e.to_string()))
    }
}

// ── Inbound ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    ConnectionStatus { status: String },
    AudioDelta { payload: Vec<u8> },
    AudioDone,
    TranscriptDelta { text: String },
    TranscriptDone,
    ConversationItemCreated {
        role: Option<Role>,
        content: String,
        kind: MessageKind,
    },
    SpeechStarted,
    SpeechStopped,
    Error { message: String },
    Unknown { kind: String },
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum ServerMessage {
    #[serde(rename = "connection_status")]
    ConnectionStatus { status: String },

    #[serde(rename = "response.audio.delta")]
    AudioDelta {
        #[serde(default)]
        delta: String,
    },

    #[serde(rename = "response.audio.done")]
    AudioDone,

    #[serde(rename = "response.audio_transcript.delta")]
    TranscriptDelta {
        #[serde(default)]
        delta: String,
    },

    #[serde(rename = "response.audio_transcript.done")]
    TranscriptDone,

    #[serde(rename = "conversation.item.created")]
    ItemCreated { item: ServerItem },

    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted,

    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped,

    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        error: Option<ErrorBody>,
        #[serde(default)]
        message: Option<String>,
    },

    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct ServerItem {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    content: Vec<ServerContent>,
}

#[derive(Deserialize)]
struct ServerContent {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    transcript: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

fn parse_role(role: &str) -> Option<Role> {
    match role {
        "user" => Some(Role::User),
        "assistant" => Some(Role::Assistant),
        "system" => Some(Role::System),
        _ => None,
    }
}

impl InboundEvent {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        let kind = value
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or(ProtocolError::MissingType)?
            .to_string();

        let invalid = |reason: String| ProtocolError::InvalidField {
            kind: kind.clone(),
            reason,
        };

        let message: ServerMessage =
            serde_json::from_value(value).map_err(|e| invalid(e.to_string()))?;

        let event = match message {
            ServerMessage::ConnectionStatus { status } => InboundEvent::ConnectionStatus { status },
            ServerMessage::AudioDelta { delta } => {
                let payload = STANDARD
                    .decode(delta.as_bytes())
                    .map_err(|e| invalid(format!("invalid base64 audio: {e}")))?;
                InboundEvent::AudioDelta { payload }
            }
            ServerMessage::AudioDone => InboundEvent::AudioDone,
            ServerMessage::TranscriptDelta { delta } => InboundEvent::TranscriptDelta { text: delta },
            ServerMessage::TranscriptDone => InboundEvent::TranscriptDone,
            ServerMessage::ItemCreated { item } => {
                let role = item.role.as_deref().and_then(parse_role);
                let first = item.content.into_iter().next();
                let (content, kind) = match first {
                    Some(c) => {
                        let kind = if c.kind.as_deref() == Some("input_audio") {
                            MessageKind::Audio
                        } else {
                            MessageKind::Text
                        };
                        (c.text.or(c.transcript).unwrap_or_default(), kind)
                    }
                    None => (String::new(), MessageKind::Text),
                };
                InboundEvent::ConversationItemCreated { role, content, kind }
            }
            ServerMessage::SpeechStarted => InboundEvent::SpeechStarted,
            ServerMessage::SpeechStopped => InboundEvent::SpeechStopped,
            ServerMessage::Error { error, message } => InboundEvent::Error {
                message: error
                    .and_then(|e| e.message)
                    .or(message)
                    .unwrap_or_else(|| DEFAULT_ERROR_MESSAGE.to_string()),
            },
            ServerMessage::Other => InboundEvent::Unknown { kind },
        };
        Ok(event)
    }
}
