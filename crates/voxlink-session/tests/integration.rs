use futures_util::{SinkExt, StreamExt};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::Message;
use voxlink_audio::{CaptureSource, FrameCallback, SegmentSink};
use voxlink_core::{BackendStatus, CaptureError, Role, SessionSnapshot, SessionState};
use voxlink_session::{Session, SessionOptions, WebSocketConnector};

/// Microphone that accepts start/stop and never produces audio.
#[derive(Default)]
struct SilentMic {
    active: bool,
}

impl CaptureSource for SilentMic {
    fn start(&mut self, _on_frame: FrameCallback) -> Result<(), CaptureError> {
        self.active = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.active = false;
    }

    fn is_active(&self) -> bool {
        self.active
    }
}

#[derive(Default)]
struct RecordingSink {
    segments: Mutex<Vec<Vec<u8>>>,
}

impl SegmentSink for RecordingSink {
    fn enqueue(&self, segment: Vec<u8>) {
        self.segments.lock().unwrap().push(segment);
    }

    fn clear(&self) {}
}

struct Relay {
    url: String,
    auth: Arc<Mutex<Option<String>>>,
    received: mpsc::UnboundedReceiver<String>,
}

/// Accept a single websocket client, replay `script` to it, then forward
/// everything it sends. Closes right after the script when `close_after`.
async fn start_relay(script: Vec<&'static str>, close_after: bool) -> Relay {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let auth = Arc::new(Mutex::new(None));
    let (forward, received) = mpsc::unbounded_channel();

    let seen_auth = Arc::clone(&auth);
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
            *seen_auth.lock().unwrap() = req
                .headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            Ok(resp)
        })
        .await
        .unwrap();
        let (mut tx, mut rx) = ws.split();

        for frame in script {
            tx.send(Message::text(frame)).await.unwrap();
        }
        if close_after {
            let _ = tx.close().await;
            return;
        }
        while let Some(Ok(msg)) = rx.next().await {
            match msg {
                Message::Text(text) => {
                    let _ = forward.send(text.as_str().to_owned());
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    Relay {
        url: format!("ws://{addr}/realtime-chat"),
        auth,
        received,
    }
}

async fn wait_for(session: &Session, pred: impl FnMut(&SessionSnapshot) -> bool) -> SessionSnapshot {
    let mut rx = session.subscribe();
    let snapshot = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(pred))
        .await
        .expect("timed out waiting for session state")
        .unwrap();
    snapshot.clone()
}

async fn next_json(relay: &mut Relay) -> serde_json::Value {
    let text = tokio::time::timeout(Duration::from_secs(5), relay.received.recv())
        .await
        .expect("timed out waiting for client frame")
        .expect("relay stopped");
    serde_json::from_str(&text).unwrap()
}

#[tokio::test]
async fn test_conversation_over_websocket() {
    let mut relay = start_relay(
        vec![
            r#"{"type":"connection_status","status":"connected_to_openai"}"#,
            r#"{"type":"session.created","session":{"id":"sess_1"}}"#,
            r#"{"type":"response.audio.delta","delta":"AQD/fw=="}"#,
            r#"{"type":"response.audio_transcript.delta","delta":"Bon"}"#,
            r#"{"type":"response.audio.delta","delta":"AAA="}"#,
            r#"{"type":"response.audio_transcript.delta","delta":"jour"}"#,
            r#"{"type":"response.audio.done"}"#,
            r#"{"type":"conversation.item.created","item":{"role":"user","content":[{"type":"input_text","text":"Salut"}]}}"#,
        ],
        false,
    )
    .await;

    let sink = Arc::new(RecordingSink::default());
    let (session, _notifications) = Session::spawn(
        Arc::new(WebSocketConnector::new(relay.url.clone(), Some("secret".into()))),
        Box::new(SilentMic::default()),
        sink.clone(),
        SessionOptions::default(),
    );

    session.connect().await.unwrap();
    let snapshot = wait_for(&session, |s| s.turns.len() == 2 && !s.is_speaking).await;

    assert_eq!(snapshot.state, SessionState::Connected);
    assert_eq!(snapshot.backend, BackendStatus::Reachable);
    assert_eq!(snapshot.turns[0].role, Role::Assistant);
    assert_eq!(snapshot.turns[0].content, "Bonjour");
    assert_eq!(snapshot.turns[1].role, Role::User);
    assert_eq!(snapshot.turns[1].content, "Salut");
    assert_eq!(
        *sink.segments.lock().unwrap(),
        vec![vec![0x01, 0x00, 0xff, 0x7f], vec![0x00, 0x00]]
    );
    assert_eq!(relay.auth.lock().unwrap().as_deref(), Some("Bearer secret"));

    session.send_text("Ça va ?").await.unwrap();
    let item = next_json(&mut relay).await;
    assert_eq!(item["type"], "conversation.item.create");
    assert_eq!(item["item"]["content"][0]["type"], "input_text");
    assert_eq!(item["item"]["content"][0]["text"], "Ça va ?");
    assert_eq!(next_json(&mut relay).await["type"], "response.create");

    session.disconnect().await;
    assert_eq!(session.snapshot().state, SessionState::Disconnected);
    session.shutdown().await;
}

#[tokio::test]
async fn test_relay_close_returns_to_disconnected() {
    let relay = start_relay(
        vec![r#"{"type":"connection_status","status":"connected_to_openai"}"#],
        true,
    )
    .await;

    let (session, _notifications) = Session::spawn(
        Arc::new(WebSocketConnector::new(relay.url.clone(), None)),
        Box::new(SilentMic::default()),
        Arc::new(RecordingSink::default()),
        SessionOptions::default(),
    );

    session.connect().await.unwrap();
    let snapshot = wait_for(&session, |s| s.state == SessionState::Disconnected).await;
    assert!(!snapshot.is_recording);
    assert_eq!(snapshot.backend, BackendStatus::Unknown);
    assert!(relay.auth.lock().unwrap().is_none());
}

#[tokio::test]
async fn test_unreachable_relay_reports_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let (session, mut notifications) = Session::spawn(
        Arc::new(WebSocketConnector::new(format!("ws://127.0.0.1:{port}/realtime-chat"), None)),
        Box::new(SilentMic::default()),
        Arc::new(RecordingSink::default()),
        SessionOptions::default(),
    );

    assert!(session.connect().await.is_err());
    assert_eq!(session.snapshot().state, SessionState::Disconnected);
    let n = notifications.recv().await.unwrap();
    assert_eq!(n.title, "Connection error");
}
