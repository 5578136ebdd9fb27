use async_trait::async_trait;
use futures_util::stream::{BoxStream, SplitSink};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use voxlink_core::TransportError;

/// Text frames received from the relay. Ends on clean close.
pub type InboundStream = BoxStream<'static, Result<String, TransportError>>;

/// Write half of an open connection.
#[async_trait]
pub trait TransportSink: Send {
    async fn send(&mut self, text: String) -> Result<(), TransportError>;
    async fn close(&mut self);
}

pub struct Connection {
    pub sink: Box<dyn TransportSink>,
    pub inbound: InboundStream,
}

/// Opens connections to the relay.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self) -> Result<Connection, TransportError>;
}

// ── WebSocket ─────────────────────────────────────────────────

pub struct WebSocketConnector {
    url: String,
    auth_token: Option<String>,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>, auth_token: Option<String>) -> Self {
        Self {
            url: url.into(),
            auth_token,
        }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self) -> Result<Connection, TransportError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Open(e.to_string()))?;
        if let Some(token) = &self.auth_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| TransportError::Open(format!("invalid auth token: {e}")))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        tracing::debug!(url = %self.url, "opening websocket");
        let (ws, response) = connect_async(request)
            .await
            .map_err(|e| TransportError::Open(e.to_string()))?;
        tracing::debug!(status = %response.status(), "websocket handshake complete");

        let (sink, stream) = ws.split();
        let inbound = stream
            .filter_map(|frame| async move {
                match frame {
                    Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => Some(Ok(text)),
                        Err(_) => {
                            tracing::warn!(len = bytes.len(), "dropping non-UTF-8 binary frame");
                            None
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        tracing::debug!(?frame, "relay sent close");
                        None
                    }
                    Ok(_) => None,
                    Err(e) => Some(Err(TransportError::Lost(e.to_string()))),
                }
            })
            .boxed();

        Ok(Connection {
            sink: Box::new(WebSocketSink { inner: sink }),
            inbound,
        })
    }
}

struct WebSocketSink {
    inner: SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>,
}

#[async_trait]
impl TransportSink for WebSocketSink {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.inner
            .send(Message::text(text))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&mut self) {
        if let Err(e) = self.inner.close().await {
            tracing::debug!("websocket close: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_rejects_invalid_url() {
        let connector = WebSocketConnector::new("not a url", None);
        let result = connector.open().await;
        assert!(matches!(result, Err(TransportError::Open(_))));
    }

    #[tokio::test]
    async fn test_open_reports_refused_connection() {
        // Bind then drop to get a port with nothing listening.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let connector = WebSocketConnector::new(format!("ws://127.0.0.1:{port}/realtime-chat"), None);
        assert!(matches!(connector.open().await, Err(TransportError::Open(_))));
    }

    #[tokio::test]
    async fn test_open_rejects_bad_token_header() {
        let connector = WebSocketConnector::new("ws://127.0.0.1:9/x", Some("bad\ntoken".into()));
        match connector.open().await {
            Err(TransportError::Open(msg)) => assert!(msg.contains("auth token")),
            Err(other) => panic!("unexpected error {other:?}"),
            Ok(_) => panic!("expected failure"),
        }
    }
}
