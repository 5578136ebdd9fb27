use crate::types::Message;

/// Connection lifecycle of a protocol session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl SessionState {
    /// `true` while a connection is open or being opened.
    pub fn is_active(self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Connected)
    }
}

/// Reachability of the agent behind the relay, as reported by `connection_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendStatus {
    #[default]
    Unknown,
    Reachable,
    Unreachable,
}

/// Aggregate session state broadcast via watch channel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub backend: BackendStatus,
    pub is_recording: bool,
    pub is_speaking: bool,
    pub user_speaking: bool,
    pub muted: bool,
    pub turns: Vec<Message>,
}
