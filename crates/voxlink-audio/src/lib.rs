pub mod capture;
pub mod device;
pub mod encoder;
pub mod output;
pub mod playback;
mod stream_thread;
pub mod wav;

pub use capture::{CaptureSource, CpalCapture, FrameAssembler, FrameCallback};
pub use device::{DeviceManager, Direction};
pub use encoder::encode;
pub use output::{OutputHandle, OutputNode};
pub use playback::{CpalPlayer, PlaybackQueue, PlaybackStatus, SegmentPlayer, SegmentSink};

use ringbuf::traits::Split;
use ringbuf::{HeapCons, HeapProd, HeapRb};

/// Create a ring buffer split into producer and consumer halves.
pub fn create_ring_buffer(capacity: usize) -> (HeapProd<f32>, HeapCons<f32>) {
    HeapRb::<f32>::new(capacity).split()
}
