//! Microphone control off the async runtime.
//!
//! Opening and closing an input device blocks until the OS answers, so the
//! [`CaptureSource`] lives on a blocking worker. The session posts start and
//! stop requests and learns the outcome of a start as a [`Started`] event.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use voxlink_audio::{CaptureSource, FrameCallback};
use voxlink_core::CaptureError;

enum RecorderCommand {
    Start {
        generation: u64,
        on_frame: FrameCallback,
    },
    Stop,
}

/// Outcome of the start request tagged `generation`.
#[derive(Debug)]
pub(crate) struct Started {
    pub generation: u64,
    pub result: Result<(), CaptureError>,
}

pub(crate) struct Recorder {
    commands: Option<mpsc::UnboundedSender<RecorderCommand>>,
    worker: Option<JoinHandle<()>>,
}

impl Recorder {
    pub(crate) fn spawn(capture: Box<dyn CaptureSource>) -> (Self, mpsc::UnboundedReceiver<Started>) {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (events, event_rx) = mpsc::unbounded_channel();
        let worker = tokio::task::spawn_blocking(move || run(capture, command_rx, events));
        (
            Self {
                commands: Some(commands),
                worker: Some(worker),
            },
            event_rx,
        )
    }

    /// Requests are handled in order, so a stop posted after a start always
    /// closes the stream that start opened.
    pub(crate) fn start(&self, generation: u64, on_frame: FrameCallback) -> Result<(), CaptureError> {
        if self.post(RecorderCommand::Start {
            generation,
            on_frame,
        }) {
            Ok(())
        } else {
            Err(CaptureError::Stream("capture worker stopped".into()))
        }
    }

    pub(crate) fn stop(&self) {
        if !self.post(RecorderCommand::Stop) {
            tracing::debug!("capture worker already stopped");
        }
    }

    /// Stop the worker and wait until the device is released.
    pub(crate) async fn shutdown(&mut self) {
        self.commands = None;
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                tracing::error!("capture worker failed: {e}");
            }
        }
    }

    fn post(&self, command: RecorderCommand) -> bool {
        self.commands
            .as_ref()
            .is_some_and(|tx| tx.send(command).is_ok())
    }
}

fn run(
    mut capture: Box<dyn CaptureSource>,
    mut commands: mpsc::UnboundedReceiver<RecorderCommand>,
    events: mpsc::UnboundedSender<Started>,
) {
    while let Some(command) = commands.blocking_recv() {
        match command {
            RecorderCommand::Start {
                generation,
                on_frame,
            } => {
                let result = capture.start(on_frame);
                tracing::debug!(generation, ok = result.is_ok(), "capture start finished");
                if events.send(Started { generation, result }).is_err() {
                    break;
                }
            }
            RecorderCommand::Stop => capture.stop(),
        }
    }
    capture.stop();
    tracing::debug!("capture worker stopped");
}
