pub mod dispatch;
pub mod protocol;
mod recorder;
pub mod session;
pub mod transcript;
pub mod transport;

pub use dispatch::Dispatcher;
pub use protocol::{ClientMessage, InboundEvent};
pub use session::{Session, SessionOptions};
pub use transcript::TranscriptAssembler;
pub use transport::{Connection, Connector, InboundStream, TransportSink, WebSocketConnector};
