pub mod config;
pub mod error;
pub mod state;
pub mod types;

pub use config::AppConfig;
pub use error::{
    AudioError, CaptureError, ConfigError, DecodeError, ProtocolError, SessionError,
    TransportError,
};
pub use state::{BackendStatus, SessionSnapshot, SessionState};
pub use types::{
    Message, MessageKind, Notification, Role, SampleFrame, Severity, WireAudioChunk,
    BITS_PER_SAMPLE, CHANNELS, DEFAULT_BLOCK_SIZE, SAMPLE_RATE,
};
