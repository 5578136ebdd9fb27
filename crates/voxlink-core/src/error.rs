use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("failed to enumerate devices: {0}")]
    DeviceEnumeration(String),

    #[error("failed to build stream: {0}")]
    StreamBuild(String),

    #[error("stream error: {0}")]
    StreamError(String),
}

/// Microphone could not be opened or started. Terminal for the recording,
/// not for the session.
#[derive(Debug, Clone, Error)]
pub enum CaptureError {
    #[error("microphone unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("failed to start capture stream: {0}")]
    Stream(String),

    #[error("recording stopped before the microphone opened")]
    Cancelled,
}

impl From<AudioError> for CaptureError {
    fn from(e: AudioError) -> Self {
        match e {
            AudioError::DeviceNotFound(msg) | AudioError::DeviceEnumeration(msg) => {
                CaptureError::DeviceUnavailable(msg)
            }
            AudioError::StreamBuild(msg) | AudioError::StreamError(msg) => {
                CaptureError::Stream(msg)
            }
        }
    }
}

/// The duplex connection failed to open or closed unexpectedly.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("failed to open connection: {0}")]
    Open(String),

    #[error("connection lost: {0}")]
    Lost(String),

    #[error("failed to send message: {0}")]
    Send(String),

    #[error("connection attempt cancelled")]
    Cancelled,
}

/// One playback segment could not be decoded or played. Recovered locally.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid audio container: {0}")]
    Container(String),

    #[error("unsupported audio format: {0}")]
    Format(String),

    #[error("audio output unavailable: {0}")]
    Output(String),
}

/// Malformed or unexpected inbound message. Logged and ignored.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("missing message type")]
    MissingType,

    #[error("invalid field in '{kind}' message: {reason}")]
    InvalidField { kind: String, reason: String },
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session is not connected")]
    NotConnected,

    #[error("message text is empty")]
    EmptyText,

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("session task has stopped")]
    Closed,
}
