use cpal::Stream;
use std::sync::mpsc;
use std::thread::JoinHandle;
use voxlink_core::AudioError;

/// Owns a cpal stream on a dedicated thread. cpal streams are not `Send`, so
/// the stream is built, played and dropped on that thread; the owner only
/// keeps a stop signal and the join handle.
pub(crate) struct StreamThread {
    stop_tx: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl StreamThread {
    /// Spawn the thread, run `build` on it and wait for the outcome.
    pub(crate) fn spawn<E, F>(name: &str, build: F) -> Result<Self, E>
    where
        E: From<AudioError> + Send + 'static,
        F: FnOnce() -> Result<Stream, E> + Send + 'static,
    {
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), E>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name(name.into())
            .spawn(move || {
                let stream = match build() {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                // Blocks until stop() sends or the owner is dropped.
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| E::from(AudioError::StreamBuild(e.to_string())))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                stop_tx: Some(stop_tx),
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(E::from(AudioError::StreamError(format!(
                    "{name} thread exited during startup"
                ))))
            }
        }
    }

    /// Release the stream and join the thread. Idempotent.
    pub(crate) fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("audio stream thread panicked");
            }
        }
    }
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        self.stop();
    }
}
