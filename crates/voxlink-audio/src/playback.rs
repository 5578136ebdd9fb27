use crate::output::{OutputHandle, OutputNode};
use crate::wav;
use async_trait::async_trait;
use ringbuf::traits::{Observer, Producer};
use ringbuf::HeapProd;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use voxlink_core::{AudioError, DecodeError};

/// Decodes one wrapped segment and plays it to completion.
#[async_trait]
pub trait SegmentPlayer: Send + Sync {
    async fn play(&self, container: Vec<u8>) -> Result<(), DecodeError>;
    /// Silence whatever is still audible. Called when a segment is abandoned.
    fn halt(&self) {}
}

/// Where the session hands received audio.
pub trait SegmentSink: Send + Sync {
    fn enqueue(&self, segment: Vec<u8>);
    fn clear(&self);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackStatus {
    pub playing: bool,
    pub pending: usize,
    pub played: u64,
    pub skipped: u64,
}

enum QueueCommand {
    Segment(Vec<u8>),
    Clear,
}

// ── PlaybackQueue ─────────────────────────────────────────────

/// Plays raw PCM16 segments one at a time, in enqueue order.
///
/// The pending list and the in-flight segment belong to a single worker
/// task; handles only post commands. A segment that fails to decode or play
/// is logged and skipped. The worker exits once every handle is dropped.
#[derive(Clone)]
pub struct PlaybackQueue {
    commands: mpsc::UnboundedSender<QueueCommand>,
    status: watch::Receiver<PlaybackStatus>,
}

impl PlaybackQueue {
    /// Spawn the worker on the current tokio runtime.
    pub fn spawn(player: Arc<dyn SegmentPlayer>) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(PlaybackStatus::default());
        tokio::spawn(run_queue(player, rx, status_tx));
        Self { commands, status }
    }

    pub fn enqueue(&self, segment: Vec<u8>) {
        tracing::trace!(bytes = segment.len(), "enqueue playback segment");
        let _ = self.commands.send(QueueCommand::Segment(segment));
    }

    /// Drop pending segments and cut the one in flight.
    pub fn clear(&self) {
        let _ = self.commands.send(QueueCommand::Clear);
    }

    pub fn status(&self) -> PlaybackStatus {
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<PlaybackStatus> {
        self.status.clone()
    }
}

impl SegmentSink for PlaybackQueue {
    fn enqueue(&self, segment: Vec<u8>) {
        PlaybackQueue::enqueue(self, segment);
    }

    fn clear(&self) {
        PlaybackQueue::clear(self);
    }
}

type PlayTask = JoinHandle<Result<(), DecodeError>>;

async fn wait_current(current: &mut Option<PlayTask>) -> Result<Result<(), DecodeError>, JoinError> {
    match current {
        Some(task) => task.await,
        None => std::future::pending().await,
    }
}

async fn run_queue(
    player: Arc<dyn SegmentPlayer>,
    mut commands: mpsc::UnboundedReceiver<QueueCommand>,
    status_tx: watch::Sender<PlaybackStatus>,
) {
    let mut pending: VecDeque<Vec<u8>> = VecDeque::new();
    let mut current: Option<PlayTask> = None;
    let mut status = PlaybackStatus::default();

    loop {
        if current.is_none() {
            if let Some(segment) = pending.pop_front() {
                let container = wav::wrap(&segment);
                let player = Arc::clone(&player);
                current = Some(tokio::spawn(async move { player.play(container).await }));
            }
        }
        status.playing = current.is_some();
        status.pending = pending.len();
        status_tx.send_replace(status);

        tokio::select! {
            cmd = commands.recv() => match cmd {
                Some(QueueCommand::Segment(segment)) => pending.push_back(segment),
                Some(QueueCommand::Clear) => {
                    let dropped = pending.len();
                    pending.clear();
                    if let Some(task) = current.take() {
                        task.abort();
                        player.halt();
                    }
                    tracing::debug!(dropped, "playback queue cleared");
                }
                None => {
                    if let Some(task) = current.take() {
                        task.abort();
                        player.halt();
                    }
                    break;
                }
            },
            done = wait_current(&mut current) => {
                current = None;
                match done {
                    Ok(Ok(())) => status.played += 1,
                    Ok(Err(e)) => {
                        status.skipped += 1;
                        tracing::warn!("skipping playback segment: {e}");
                    }
                    Err(e) if e.is_cancelled() => {}
                    Err(e) => {
                        status.skipped += 1;
                        tracing::error!("playback task failed: {e}");
                    }
                }
            }
        }
    }

    status.playing = false;
    status.pending = 0;
    status_tx.send_replace(status);
    tracing::debug!("playback queue stopped");
}

// ── CpalPlayer ────────────────────────────────────────────────

const FEED_POLL: Duration = Duration::from_millis(5);

/// Plays decoded segments through an [`OutputNode`].
///
/// A segment counts as finished once all of it has been handed to the ring
/// buffer and less than `low_water` samples remain queued, so the next
/// segment starts back-to-back with no audible gap.
pub struct CpalPlayer {
    feed: Mutex<Feed>,
    output: OutputHandle,
    low_water: usize,
    _node: OutputNode,
}

struct Feed {
    producer: HeapProd<f32>,
    /// Samples pushed since the stream opened.
    written: u64,
}

impl CpalPlayer {
    pub fn open(device_name: &str, sample_rate: u32, channels: u16) -> Result<Self, AudioError> {
        // ~2 seconds of audio
        let (producer, consumer) = crate::create_ring_buffer(sample_rate as usize * 2);
        let (node, output) = OutputNode::new(device_name, consumer, sample_rate, channels)?;
        tracing::info!(device = %device_name, sample_rate, "speaker output opened");
        Ok(Self {
            feed: Mutex::new(Feed {
                producer,
                written: 0,
            }),
            output,
            low_water: (sample_rate / 50) as usize,
            _node: node,
        })
    }

    fn feed(&self) -> Result<std::sync::MutexGuard<'_, Feed>, DecodeError> {
        self.feed
            .lock()
            .map_err(|_| DecodeError::Output("output buffer lock poisoned".into()))
    }

    fn push(&self, samples: &[f32]) -> Result<usize, DecodeError> {
        let mut feed = self.feed()?;
        let pushed = feed.producer.push_slice(samples);
        feed.written += pushed as u64;
        Ok(pushed)
    }

    fn queued(&self) -> Result<usize, DecodeError> {
        Ok(self.feed()?.producer.occupied_len())
    }
}

#[async_trait]
impl SegmentPlayer for CpalPlayer {
    async fn play(&self, container: Vec<u8>) -> Result<(), DecodeError> {
        if !self.output.is_healthy() {
            return Err(DecodeError::Output("output stream reported an error".into()));
        }
        let samples = wav::decode(&container)?;

        let mut offset = 0;
        while offset < samples.len() {
            offset += self.push(&samples[offset..])?;
            if offset < samples.len() {
                tokio::time::sleep(FEED_POLL).await;
            }
        }

        while self.queued()? > self.low_water {
            tokio::time::sleep(FEED_POLL).await;
        }
        Ok(())
    }

    fn halt(&self) {
        // Holding the feed lock pins the watermark to what has been pushed.
        match self.feed() {
            Ok(feed) => self.output.request_flush_through(feed.written),
            Err(e) => tracing::warn!("cannot flush output: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    /// Records start/end of every play call.
    struct RecordingPlayer {
        log: Mutex<Vec<(Vec<u8>, Instant, Instant)>>,
        fail_on: Option<u8>,
    }

    impl RecordingPlayer {
        fn new(fail_on: Option<u8>) -> Arc<Self> {
            Arc::new(Self {
                log: Mutex::new(Vec::new()),
                fail_on,
            })
        }
    }

    #[async_trait]
    impl SegmentPlayer for RecordingPlayer {
        async fn play(&self, container: Vec<u8>) -> Result<(), DecodeError> {
            let start = Instant::now();
            let payload = container[wav::HEADER_LEN..].to_vec();
            if payload.first().copied() == self.fail_on {
                return Err(DecodeError::Container("injected failure".into()));
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.log.lock().unwrap().push((payload, start, Instant::now()));
            Ok(())
        }
    }

    async fn wait_until_drained(queue: &PlaybackQueue, total: u64) -> PlaybackStatus {
        let mut rx = queue.subscribe();
        let status = tokio::time::timeout(
            Duration::from_secs(2),
            rx.wait_for(|s| s.played + s.skipped >= total && !s.playing),
        )
        .await
        .expect("playback did not finish")
        .unwrap();
        *status
    }

    #[tokio::test]
    async fn test_queue_plays_segments_in_order_without_overlap() {
        let player = RecordingPlayer::new(None);
        let queue = PlaybackQueue::spawn(player.clone());

        for i in 0..5u8 {
            queue.enqueue(vec![i, 0]);
        }
        let status = wait_until_drained(&queue, 5).await;
        assert_eq!(status.played, 5);
        assert_eq!(status.skipped, 0);

        let log = player.log.lock().unwrap();
        let order: Vec<u8> = log.iter().map(|(p, _, _)| p[0]).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
        for pair in log.windows(2) {
            assert!(pair[1].1 >= pair[0].2, "segments overlapped");
        }
    }

    #[tokio::test]
    async fn test_queue_failed_segment_does_not_stall() {
        let player = RecordingPlayer::new(Some(2));
        let queue = PlaybackQueue::spawn(player.clone());

        for i in 0..5u8 {
            queue.enqueue(vec![i, 0]);
        }
        let status = wait_until_drained(&queue, 5).await;
        assert_eq!(status.played, 4);
        assert_eq!(status.skipped, 1);

        let order: Vec<u8> = player.log.lock().unwrap().iter().map(|(p, _, _)| p[0]).collect();
        assert_eq!(order, vec![0, 1, 3, 4]);
    }

    #[tokio::test]
    async fn test_queue_goes_idle_and_resumes() {
        let player = RecordingPlayer::new(None);
        let queue = PlaybackQueue::spawn(player.clone());

        queue.enqueue(vec![1, 0]);
        wait_until_drained(&queue, 1).await;
        assert!(!queue.status().playing);
        assert_eq!(queue.status().pending, 0);

        queue.enqueue(vec![2, 0]);
        let status = wait_until_drained(&queue, 2).await;
        assert_eq!(status.played, 2);
    }

    #[tokio::test]
    async fn test_queue_clear_drops_pending() {
        let player = RecordingPlayer::new(None);
        let queue = PlaybackQueue::spawn(player.clone());

        for i in 0..10u8 {
            queue.enqueue(vec![i, 0]);
        }
        queue.clear();

        let mut rx = queue.subscribe();
        tokio::time::timeout(
            Duration::from_secs(2),
            rx.wait_for(|s| !s.playing && s.pending == 0),
        )
        .await
        .expect("queue did not settle")
        .unwrap();
        // Give an aborted segment time to finish if it wrongly survived.
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(player.log.lock().unwrap().len() < 10);
    }

    #[tokio::test]
    async fn test_queue_through_segment_sink() {
        let player = RecordingPlayer::new(None);
        let queue = PlaybackQueue::spawn(player.clone());
        let sink: &dyn SegmentSink = &queue;

        sink.enqueue(vec![7, 0]);
        let status = wait_until_drained(&queue, 1).await;
        assert_eq!(status.played, 1);
    }
}
