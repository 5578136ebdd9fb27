use crate::device::{DeviceManager, Direction};
use crate::stream_thread::StreamThread;
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use ringbuf::traits::Consumer;
use ringbuf::HeapCons;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use voxlink_core::AudioError;

const STATUS_OK: u8 = 0;
const STATUS_ERROR: u8 = 1;

// ── OutputHandle ──────────────────────────────────────────────

/// Shared between the producer side and the output callback.
///
/// Flushes are expressed as a watermark over the total number of samples
/// ever pushed, so samples written after the request survive it.
#[derive(Clone)]
pub struct OutputHandle {
    flush_through: Arc<AtomicU64>,
    status: Arc<AtomicU8>,
}

impl OutputHandle {
    fn new() -> Self {
        Self {
            flush_through: Arc::new(AtomicU64::new(0)),
            status: Arc::new(AtomicU8::new(STATUS_OK)),
        }
    }

    /// Ask the output callback to discard the first `written` samples of the
    /// stream that it has not played yet.
    pub fn request_flush_through(&self, written: u64) {
        self.flush_through.fetch_max(written, Ordering::AcqRel);
    }

    pub fn is_healthy(&self) -> bool {
        self.status.load(Ordering::Relaxed) == STATUS_OK
    }
}

// ── OutputNode ────────────────────────────────────────────────

/// Speaker output fed from a ring buffer of mono samples. Underruns play
/// silence; mono is duplicated across device channels.
pub struct OutputNode {
    _worker: StreamThread,
}

impl OutputNode {
    pub fn new(
        device_name: &str,
        consumer: HeapCons<f32>,
        sample_rate: u32,
        channels: u16,
    ) -> Result<(Self, OutputHandle), AudioError> {
        let handle = OutputHandle::new();
        let flush_through = Arc::clone(&handle.flush_through);
        let status_flag = Arc::clone(&handle.status);
        let device_name = device_name.to_string();

        let worker = StreamThread::spawn("playback-output", move || {
            let device = DeviceManager::new().get(Direction::Output, &device_name)?;
            let config = StreamConfig {
                channels,
                sample_rate: SampleRate(sample_rate),
                buffer_size: cpal::BufferSize::Default,
            };

            let mut consumer = consumer;
            let mut read = 0u64;
            let frame_width = channels.max(1) as usize;

            let err_callback = move |err: cpal::StreamError| {
                tracing::error!("output stream error: {}", err);
                status_flag.store(STATUS_ERROR, Ordering::Relaxed);
            };

            let stream = device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        fill_frames(data, frame_width, &mut consumer, &mut read, &flush_through);
                    },
                    err_callback,
                    None,
                )
                .map_err(|e| AudioError::StreamBuild(e.to_string()))?;
            stream
                .play()
                .map_err(|e| AudioError::StreamError(e.to_string()))?;
            Ok(stream)
        })?;

        Ok((Self { _worker: worker }, handle))
    }
}

/// Output callback body. `read` counts samples taken from `consumer` over
/// the life of the stream.
fn fill_frames(
    data: &mut [f32],
    frame_width: usize,
    consumer: &mut HeapCons<f32>,
    read: &mut u64,
    flush_through: &AtomicU64,
) {
    let target = flush_through.load(Ordering::Acquire);
    if *read < target {
        let stale = usize::try_from(target - *read).unwrap_or(usize::MAX);
        *read += consumer.skip(stale) as u64;
    }
    for frame in data.chunks_mut(frame_width) {
        let sample = match consumer.try_pop() {
            Some(s) => {
                *read += 1;
                s
            }
            None => 0.0,
        };
        frame.fill(sample);
    }
}
