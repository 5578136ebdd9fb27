use crate::device::{DeviceManager, Direction};
use crate::stream_thread::StreamThread;
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use voxlink_core::{CaptureError, SampleFrame};

/// Receives each captured frame. Runs on the audio thread, so it should only
/// hand data off (encode and post to a channel), never block.
pub type FrameCallback = Box<dyn FnMut(SampleFrame) + Send + 'static>;

/// A microphone that delivers fixed-size frames until stopped.
pub trait CaptureSource: Send {
    /// Open the device and begin delivering frames. Starting an active
    /// source is a no-op.
    fn start(&mut self, on_frame: FrameCallback) -> Result<(), CaptureError>;
    /// Release the device and the callback. Safe to call at any time.
    fn stop(&mut self);
    fn is_active(&self) -> bool;
}

// ── FrameAssembler ────────────────────────────────────────────

/// Re-blocks whatever buffer sizes the host delivers into mono frames of
/// exactly `block_size` samples, in capture order.
pub struct FrameAssembler {
    block_size: usize,
    channels: usize,
    pending: Vec<f32>,
}

impl FrameAssembler {
    pub fn new(block_size: usize, channels: u16) -> Self {
        Self {
            block_size: block_size.max(1),
            channels: channels.max(1) as usize,
            pending: Vec::with_capacity(block_size),
        }
    }

    /// Append interleaved samples, emitting every completed frame.
    pub fn push(&mut self, data: &[f32], emit: &mut dyn FnMut(SampleFrame)) {
        if self.channels == 1 {
            self.pending.extend_from_slice(data);
        } else {
            let ch = self.channels as f32;
            self.pending.extend(
                data.chunks_exact(self.channels)
                    .map(|frame| frame.iter().sum::<f32>() / ch),
            );
        }

        while self.pending.len() >= self.block_size {
            let rest = self.pending.split_off(self.block_size);
            let full = std::mem::replace(&mut self.pending, rest);
            emit(SampleFrame::new(full));
        }
    }

    /// Samples held back waiting for a full block.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }
}

// ── CpalCapture ───────────────────────────────────────────────

pub struct CpalCapture {
    device_name: String,
    sample_rate: u32,
    channels: u16,
    block_size: usize,
    worker: Option<StreamThread>,
}

impl CpalCapture {
    pub fn new(device_name: &str, sample_rate: u32, channels: u16, block_size: usize) -> Self {
        Self {
            device_name: device_name.to_string(),
            sample_rate,
            channels,
            block_size,
            worker: None,
        }
    }
}

impl CaptureSource for CpalCapture {
    fn start(&mut self, mut on_frame: FrameCallback) -> Result<(), CaptureError> {
        if self.worker.is_some() {
            tracing::debug!(device = %self.device_name, "capture already active");
            return Ok(());
        }

        let device_name = self.device_name.clone();
        let sample_rate = self.sample_rate;
        let channels = self.channels;
        let block_size = self.block_size;

        let worker = StreamThread::spawn("capture", move || {
            let device = DeviceManager::new().get(Direction::Input, &device_name)?;
            let config = StreamConfig {
                channels,
                sample_rate: SampleRate(sample_rate),
                buffer_size: cpal::BufferSize::Default,
            };

            // cpal hosts expose no echo cancellation, noise suppression or
            // gain control; the device delivers whatever the OS applies.
            tracing::debug!(
                device = %device_name,
                "platform voice processing not available through cpal"
            );

            let mut assembler = FrameAssembler::new(block_size, channels);
            let stream = device
                .build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        assembler.push(data, &mut on_frame);
                    },
                    |err: cpal::StreamError| {
                        tracing::error!("capture stream error: {}", err);
                    },
                    None,
                )
                .map_err(|e| {
                    if matches!(e, cpal::BuildStreamError::DeviceNotAvailable) {
                        CaptureError::DeviceUnavailable(e.to_string())
                    } else {
                        CaptureError::Stream(e.to_string())
                    }
                })?;
            stream
                .play()
                .map_err(|e| CaptureError::Stream(e.to_string()))?;
            Ok::<_, CaptureError>(stream)
        })?;

        tracing::info!(
            device = %self.device_name,
            sample_rate,
            block_size,
            "microphone capture started"
        );
        self.worker = Some(worker);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.stop();
            tracing::info!(device = %self.device_name, "microphone capture stopped");
        }
    }

    fn is_active(&self) -> bool {
        self.worker.is_some()
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(assembler: &mut FrameAssembler, data: &[f32], out: &mut Vec<SampleFrame>) {
        assembler.push(data, &mut |frame| out.push(frame));
    }

    #[test]
    fn test_assembler_holds_partial_block() {
        let mut assembler = FrameAssembler::new(4, 1);
        let mut frames = Vec::new();
        collect(&mut assembler, &[0.1, 0.2, 0.3], &mut frames);
        assert!(frames.is_empty());
        assert_eq!(assembler.buffered(), 3);
    }

    #[test]
    fn test_assembler_emits_fixed_blocks_in_order() {
        let mut assembler = FrameAssembler::new(4, 1);
        let mut frames = Vec::new();
        collect(&mut assembler, &[1.0, 2.0, 3.0], &mut frames);
        collect(&mut assembler, &[4.0, 5.0, 6.0, 7.0, 8.0, 9.0], &mut frames);

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].samples(), &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(frames[1].samples(), &[5.0, 6.0, 7.0, 8.0]);
        assert_eq!(assembler.buffered(), 1);
    }

    #[test]
    fn test_assembler_downmixes_interleaved_stereo() {
        let mut assembler = FrameAssembler::new(2, 2);
        let mut frames = Vec::new();
        collect(&mut assembler, &[0.2, 0.4, -1.0, 1.0], &mut frames);
        assert_eq!(frames.len(), 1);
        let s = frames[0].samples();
        assert!((s[0] - 0.3).abs() < 1e-6);
        assert_eq!(s[1], 0.0);
    }

    #[test]
    fn test_assembler_large_buffer_yields_many_frames() {
        let mut assembler = FrameAssembler::new(4096, 1);
        let mut frames = Vec::new();
        collect(&mut assembler, &vec![0.0; 4096 * 3 + 10], &mut frames);
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| f.len() == 4096));
        assert_eq!(assembler.buffered(), 10);
    }

    #[test]
    fn test_cpal_capture_stop_without_start_is_noop() {
        let mut capture = CpalCapture::new("default", 24000, 1, 4096);
        assert!(!capture.is_active());
        capture.stop();
        capture.stop();
        assert!(!capture.is_active());
    }

    #[test]
    #[ignore] // Requires audio hardware
    fn test_cpal_capture_start_stop() {
        let mut capture = CpalCapture::new("default", 24000, 1, 4096);
        capture.start(Box::new(|_frame| {})).unwrap();
        assert!(capture.is_active());
        capture.stop();
        assert!(!capture.is_active());
    }
}
