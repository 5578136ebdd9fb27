use crate::protocol::InboundEvent;
use crate::transcript::TranscriptAssembler;
use voxlink_audio::SegmentSink;
use voxlink_core::{BackendStatus, Notification, ProtocolError, Role, SessionSnapshot};

/// Applies inbound events, in arrival order, to conversation state.
///
/// Owns the transcript and the activity flags. Received audio goes straight
/// to the playback sink.
#[derive(Debug)]
pub struct Dispatcher {
    transcript: TranscriptAssembler,
    ready_status: String,
    backend: BackendStatus,
    speaking: bool,
    user_speaking: bool,
    muted: bool,
}

impl Dispatcher {
    pub fn new(ready_status: impl Into<String>) -> Self {
        Self {
            transcript: TranscriptAssembler::new(),
            ready_status: ready_status.into(),
            backend: BackendStatus::Unknown,
            speaking: false,
            user_speaking: false,
            muted: false,
        }
    }

    /// Parse and apply one text frame. Frames that do not parse are logged
    /// and dropped.
    pub fn dispatch_text(&mut self, text: &str, playback: &dyn SegmentSink) -> Option<Notification> {
        match InboundEvent::parse(text) {
            Ok(event) => self.dispatch(event, playback),
            Err(e) => {
                log_protocol_error(&e);
                None
            }
        }
    }

    pub fn dispatch(&mut self, event: InboundEvent, playback: &dyn SegmentSink) -> Option<Notification> {
        match event {
            InboundEvent::ConnectionStatus { status } => {
                self.backend = if status == self.ready_status {
                    BackendStatus::Reachable
                } else {
                    BackendStatus::Unreachable
                };
                tracing::info!(%status, backend = ?self.backend, "relay connection status");
            }
            InboundEvent::AudioDelta { payload } => {
                if payload.is_empty() {
                    return None;
                }
                if self.muted {
                    tracing::trace!(bytes = payload.len(), "muted, dropping audio delta");
                } else {
                    playback.enqueue(payload);
                }
                self.speaking = true;
            }
            InboundEvent::AudioDone => self.speaking = false,
            InboundEvent::TranscriptDelta { text } => {
                self.transcript.apply_delta(Role::Assistant, &text);
            }
            InboundEvent::TranscriptDone => {
                if self
                    .transcript
                    .open_turn()
                    .is_some_and(|m| m.role == Role::Assistant)
                {
                    self.transcript.close_turn();
                }
            }
            InboundEvent::ConversationItemCreated { role, content, kind } => match role {
                Some(Role::User) if !content.is_empty() => {
                    self.transcript.push_turn(Role::User, content, kind);
                }
                Some(Role::User) => tracing::debug!("user item without content"),
                other => tracing::trace!(role = ?other, "ignoring conversation item"),
            },
            InboundEvent::SpeechStarted => self.user_speaking = true,
            InboundEvent::SpeechStopped => self.user_speaking = false,
            InboundEvent::Error { message } => {
                tracing::error!(%message, "agent reported an error");
                return Some(Notification::error("Error", message));
            }
            InboundEvent::Unknown { kind } => {
                tracing::debug!(%kind, "unhandled message type");
            }
        }
        None
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    /// Forget per-connection activity. The transcript is kept.
    pub fn reset_activity(&mut self) {
        self.speaking = false;
        self.user_speaking = false;
        self.backend = BackendStatus::Unknown;
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    pub fn user_speaking(&self) -> bool {
        self.user_speaking
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn backend(&self) -> BackendStatus {
        self.backend
    }

    pub fn transcript(&self) -> &TranscriptAssembler {
        &self.transcript
    }

    /// Copy conversation fields into `snapshot`, leaving lifecycle fields alone.
    pub fn fill(&self, snapshot: &mut SessionSnapshot) {
        snapshot.backend = self.backend;
        snapshot.is_speaking = self.speaking;
        snapshot.user_speaking = self.user_speaking;
        snapshot.muted = self.muted;
        if snapshot.turns.as_slice() != self.transcript.turns() {
            snapshot.turns = self.transcript.turns().to_vec();
        }
    }
}

fn log_protocol_error(e: &ProtocolError) {
    tracing::warn!("ignoring inbound frame: {e}");
}
