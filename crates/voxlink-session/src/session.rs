use crate::dispatch::Dispatcher;
use crate::protocol::ClientMessage;
use crate::recorder::{Recorder, Started};
use crate::transport::{Connection, Connector, InboundStream, TransportSink};
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use voxlink_audio::{encoder, CaptureSource, SegmentSink};
use voxlink_core::{
    AppConfig, CaptureError, Notification, SampleFrame, SessionError, SessionSnapshot,
    SessionState, TransportError, WireAudioChunk,
};

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// `connection_status` value meaning the agent behind the relay is up.
    pub ready_status: String,
    pub muted: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            ready_status: "connected_to_openai".to_string(),
            muted: false,
        }
    }
}

impl From<&AppConfig> for SessionOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            ready_status: config.connection.ready_status.clone(),
            muted: config.playback.muted,
        }
    }
}

type Reply = oneshot::Sender<Result<(), SessionError>>;

enum Command {
    Connect(Reply),
    Disconnect(Reply),
    StartRecording(Reply),
    StopRecording(Reply),
    SendText(String, Reply),
    SetMuted(bool, Reply),
    Shutdown(Reply),
}

// ── Session handle ────────────────────────────────────────────

/// Handle to a realtime voice conversation.
///
/// All state lives in one actor task. Methods post commands to it and wait
/// for the outcome; state changes are broadcast as [`SessionSnapshot`]s and
/// user-facing notices arrive on the receiver returned by [`Session::spawn`].
/// Dropping the handle shuts the actor down.
pub struct Session {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<SessionSnapshot>,
    task: JoinHandle<()>,
}

impl Session {
    pub fn spawn(
        connector: Arc<dyn Connector>,
        capture: Box<dyn CaptureSource>,
        playback: Arc<dyn SegmentSink>,
        options: SessionOptions,
    ) -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (notify, notifications) = mpsc::unbounded_channel();
        let (chunk_tx, chunks) = mpsc::unbounded_channel();
        let (recorder, recorder_events) = Recorder::spawn(capture);

        let mut dispatcher = Dispatcher::new(options.ready_status);
        dispatcher.set_muted(options.muted);
        let mut initial = SessionSnapshot::default();
        dispatcher.fill(&mut initial);
        let (snapshot_tx, snapshot) = watch::channel(initial.clone());

        let actor = Actor {
            connector,
            recorder,
            recorder_events,
            recording: Recording::Idle,
            generation: 0,
            start_waiters: Vec::new(),
            playback,
            dispatcher,
            snapshot: initial,
            snapshot_tx,
            notify,
            commands: command_rx,
            chunk_tx,
            chunks,
            opening: None,
            waiters: Vec::new(),
            sink: None,
            inbound: None,
        };
        let task = tokio::spawn(actor.run());

        (
            Self {
                commands,
                snapshot,
                task,
            },
            notifications,
        )
    }

    /// Open the connection. While an attempt is already in flight, or the
    /// session is connected, this waits for or returns that outcome instead
    /// of opening a second connection.
    pub async fn connect(&self) -> Result<(), SessionError> {
        self.request(Command::Connect).await
    }

    pub async fn disconnect(&self) {
        let _ = self.request(Command::Disconnect).await;
    }

    pub async fn start_recording(&self) -> Result<(), SessionError> {
        self.request(Command::StartRecording).await
    }

    pub async fn stop_recording(&self) {
        let _ = self.request(Command::StopRecording).await;
    }

    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), SessionError> {
        let text = text.into();
        self.request(|reply| Command::SendText(text, reply)).await
    }

    pub async fn set_muted(&self, muted: bool) {
        let _ = self.request(|reply| Command::SetMuted(muted, reply)).await;
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    /// Disconnect and wait for the actor to exit.
    pub async fn shutdown(self) {
        let _ = self.request(Command::Shutdown).await;
        if let Err(e) = self.task.await {
            tracing::error!("session task failed: {e}");
        }
    }

    async fn request(&self, make: impl FnOnce(Reply) -> Command) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(make(reply))
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)?
    }
}

// ── Actor ─────────────────────────────────────────────────────

type OpenTask = JoinHandle<Result<Connection, TransportError>>;

/// Microphone lifecycle. The number tags one start request and every chunk
/// captured under it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Recording {
    Idle,
    Starting(u64),
    Active(u64),
}

enum Wake {
    Command(Option<Command>),
    Opened(Result<Result<Connection, TransportError>, JoinError>),
    Inbound(Option<Result<String, TransportError>>),
    CaptureStarted(Started),
    Chunk(u64, WireAudioChunk),
}

struct Actor {
    connector: Arc<dyn Connector>,
    recorder: Recorder,
    recorder_events: mpsc::UnboundedReceiver<Started>,
    recording: Recording,
    generation: u64,
    start_waiters: Vec<Reply>,
    playback: Arc<dyn SegmentSink>,
    dispatcher: Dispatcher,
    snapshot: SessionSnapshot,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    notify: mpsc::UnboundedSender<Notification>,
    commands: mpsc::UnboundedReceiver<Command>,
    chunk_tx: mpsc::UnboundedSender<(u64, WireAudioChunk)>,
    chunks: mpsc::UnboundedReceiver<(u64, WireAudioChunk)>,
    opening: Option<OpenTask>,
    waiters: Vec<Reply>,
    sink: Option<Box<dyn TransportSink>>,
    inbound: Option<InboundStream>,
}

async fn wait_open(
    opening: &mut Option<OpenTask>,
) -> Result<Result<Connection, TransportError>, JoinError> {
    match opening {
        Some(task) => task.await,
        None => std::future::pending().await,
    }
}

async fn next_inbound(
    inbound: &mut Option<InboundStream>,
) -> Option<Result<String, TransportError>> {
    match inbound {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

impl Actor {
    async fn run(mut self) {
        loop {
            // Unbiased: a busy inbound stream must not hold back uploads.
            let wake = tokio::select! {
                cmd = self.commands.recv() => Wake::Command(cmd),
                opened = wait_open(&mut self.opening) => Wake::Opened(opened),
                frame = next_inbound(&mut self.inbound) => Wake::Inbound(frame),
                Some(started) = self.recorder_events.recv() => Wake::CaptureStarted(started),
                Some((generation, chunk)) = self.chunks.recv() => Wake::Chunk(generation, chunk),
            };

            match wake {
                Wake::Command(None) => {
                    self.teardown().await;
                    self.recorder.shutdown().await;
                    break;
                }
                Wake::Command(Some(Command::Shutdown(reply))) => {
                    self.teardown().await;
                    self.recorder.shutdown().await;
                    self.respond(reply, Ok(()));
                    break;
                }
                Wake::Command(Some(cmd)) => self.handle_command(cmd).await,
                Wake::Opened(result) => self.handle_opened(result).await,
                Wake::Inbound(frame) => self.handle_inbound(frame).await,
                Wake::CaptureStarted(started) => self.handle_capture_started(started),
                Wake::Chunk(generation, chunk) => self.send_chunk(generation, chunk).await,
            }
            self.publish();
        }
        tracing::debug!("session actor stopped");
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect(reply) => {
                if !self.snapshot.state.is_active() {
                    self.begin_connect();
                }
                if self.snapshot.state == SessionState::Connected {
                    self.respond(reply, Ok(()));
                } else {
                    self.waiters.push(reply);
                }
            }
            Command::Disconnect(reply) => {
                if self.snapshot.state != SessionState::Disconnected {
                    tracing::info!("disconnecting");
                }
                self.teardown().await;
                self.respond(reply, Ok(()));
            }
            Command::StartRecording(reply) => self.start_recording(reply),
            Command::StopRecording(reply) => {
                self.stop_recording();
                self.respond(reply, Ok(()));
            }
            Command::SendText(text, reply) => {
                let result = self.send_text(text).await;
                self.respond(reply, result);
            }
            Command::SetMuted(muted, reply) => {
                self.dispatcher.set_muted(muted);
                if muted {
                    self.playback.clear();
                }
                tracing::debug!(muted, "playback mute changed");
                self.respond(reply, Ok(()));
            }
            Command::Shutdown(reply) => self.respond(reply, Ok(())),
        }
    }

    /// Publish first so a caller woken by the reply sees the new state.
    fn respond(&mut self, reply: Reply, result: Result<(), SessionError>) {
        self.publish();
        let _ = reply.send(result);
    }

    fn resolve_waiters(&mut self, outcome: Result<(), TransportError>) {
        self.publish();
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(outcome.clone().map_err(SessionError::Transport));
        }
    }

    fn begin_connect(&mut self) {
        tracing::info!("connecting to relay");
        self.snapshot.state = SessionState::Connecting;
        let connector = Arc::clone(&self.connector);
        self.opening = Some(tokio::spawn(async move { connector.open().await }));
    }

    async fn handle_opened(&mut self, result: Result<Result<Connection, TransportError>, JoinError>) {
        self.opening = None;
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) if e.is_cancelled() => Err(TransportError::Cancelled),
            Err(e) => Err(TransportError::Open(e.to_string())),
        };

        match outcome {
            Ok(connection) => {
                self.sink = Some(connection.sink);
                self.inbound = Some(connection.inbound);
                self.snapshot.state = SessionState::Connected;
                tracing::info!("connected to relay");
                self.notify(Notification::info("Connected", "Realtime chat active"));
                self.resolve_waiters(Ok(()));
            }
            Err(e) => self.fail(e).await,
        }
    }

    async fn handle_inbound(&mut self, frame: Option<Result<String, TransportError>>) {
        match frame {
            Some(Ok(text)) => {
                if let Some(notification) = self.dispatcher.dispatch_text(&text, self.playback.as_ref()) {
                    self.notify(notification);
                }
            }
            Some(Err(e)) => self.fail(e).await,
            None => {
                tracing::info!("relay closed the connection");
                self.teardown().await;
            }
        }
    }

    /// Ask the recorder to open the microphone. The reply is held until the
    /// device has answered.
    fn start_recording(&mut self, reply: Reply) {
        if self.snapshot.state != SessionState::Connected {
            self.respond(reply, Err(SessionError::NotConnected));
            return;
        }
        match self.recording {
            Recording::Active(_) => self.respond(reply, Ok(())),
            Recording::Starting(_) => self.start_waiters.push(reply),
            Recording::Idle => {
                self.generation += 1;
                let generation = self.generation;
                let chunks = self.chunk_tx.clone();
                let on_frame = Box::new(move |frame: SampleFrame| {
                    let _ = chunks.send((generation, encoder::encode(&frame)));
                });
                match self.recorder.start(generation, on_frame) {
                    Ok(()) => {
                        tracing::debug!(generation, "opening microphone");
                        self.recording = Recording::Starting(generation);
                        self.start_waiters.push(reply);
                    }
                    Err(e) => {
                        self.capture_failed(&e);
                        self.respond(reply, Err(e.into()));
                    }
                }
            }
        }
    }

    fn handle_capture_started(&mut self, started: Started) {
        if self.recording != Recording::Starting(started.generation) {
            // Superseded by a stop, which the recorder runs after this start.
            tracing::debug!(generation = started.generation, "ignoring stale capture start");
            return;
        }
        match started.result {
            Ok(()) => {
                self.recording = Recording::Active(started.generation);
                self.snapshot.is_recording = true;
                tracing::info!("recording started");
                self.notify(Notification::info("Recording", "You can speak now"));
                self.resolve_start_waiters(Ok(()));
            }
            Err(e) => {
                self.recording = Recording::Idle;
                self.capture_failed(&e);
                self.resolve_start_waiters(Err(e));
            }
        }
    }

    fn capture_failed(&self, e: &CaptureError) {
        tracing::error!("failed to start capture: {e}");
        self.notify(Notification::error("Error", "Could not access the microphone"));
    }

    fn stop_recording(&mut self) {
        if self.recording != Recording::Idle {
            self.recorder.stop();
            self.recording = Recording::Idle;
            tracing::info!("recording stopped");
        }
        self.snapshot.is_recording = false;
        self.resolve_start_waiters(Err(CaptureError::Cancelled));
    }

    fn resolve_start_waiters(&mut self, outcome: Result<(), CaptureError>) {
        self.publish();
        for waiter in self.start_waiters.drain(..) {
            let _ = waiter.send(outcome.clone().map_err(SessionError::Capture));
        }
    }

    async fn send_text(&mut self, text: String) -> Result<(), SessionError> {
        if self.snapshot.state != SessionState::Connected {
            return Err(SessionError::NotConnected);
        }
        if text.trim().is_empty() {
            return Err(SessionError::EmptyText);
        }

        let mut result = self.send(ClientMessage::user_text(text)).await;
        if result.is_ok() {
            result = self.send(ClientMessage::ResponseCreate).await;
        }
        if let Err(e) = result {
            self.fail(e.clone()).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn send_chunk(&mut self, generation: u64, chunk: WireAudioChunk) {
        let current = matches!(
            self.recording,
            Recording::Starting(g) | Recording::Active(g) if g == generation
        );
        if !current || self.snapshot.state != SessionState::Connected {
            tracing::trace!(generation, "dropping audio chunk from a closed recording");
            return;
        }
        if let Err(e) = self.send(ClientMessage::audio_append(chunk)).await {
            self.fail(e).await;
        }
    }

    async fn send(&mut self, message: ClientMessage) -> Result<(), TransportError> {
        let sink = self
            .sink
            .as_mut()
            .ok_or_else(|| TransportError::Send("no open connection".into()))?;
        let text = message.to_json()?;
        tracing::trace!(kind = message.kind(), "send");
        sink.send(text).await
    }

    /// Transport failure: surface it, then tear down to `Disconnected`.
    async fn fail(&mut self, error: TransportError) {
        tracing::error!("connection error: {error}");
        self.snapshot.state = SessionState::Error;
        self.publish();
        self.notify(Notification::error(
            "Connection error",
            format!("Could not reach the chat service: {error}"),
        ));
        let waiters = std::mem::take(&mut self.waiters);
        self.teardown().await;
        for waiter in waiters {
            let _ = waiter.send(Err(SessionError::Transport(error.clone())));
        }
    }

    /// Release everything tied to the current connection. Idempotent.
    async fn teardown(&mut self) {
        if let Some(task) = self.opening.take() {
            task.abort();
        }
        if let Some(mut sink) = self.sink.take() {
            sink.close().await;
        }
        self.inbound = None;

        self.stop_recording();
        while self.chunks.try_recv().is_ok() {}

        self.playback.clear();
        self.dispatcher.reset_activity();
        self.snapshot.state = SessionState::Disconnected;
        self.resolve_waiters(Err(TransportError::Cancelled));
    }

    fn notify(&self, notification: Notification) {
        let _ = self.notify.send(notification);
    }

    fn publish(&mut self) {
        self.dispatcher.fill(&mut self.snapshot);
        let next = &self.snapshot;
        self.snapshot_tx.send_if_modified(|current| {
            if current != next {
                *current = next.clone();
                true
            } else {
                false
            }
        });
    }
}
