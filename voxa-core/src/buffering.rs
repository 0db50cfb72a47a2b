//! Lock-free SPSC ring buffers for audio samples.
//!
//! Uses `ringbuf::HeapRb<f32>`, whose `push_slice`/`pop_slice` are wait-free
//! and therefore safe to call from the real-time audio callbacks.
//!
//! Two rings exist in the pipeline:
//! - the capture ring, written by the input callback and drained by the
//!   capture consumer thread;
//! - the playback ring, written by the speech worker and drained by the
//!   output callback.

use ringbuf::{traits::Split, HeapRb};

pub use ringbuf::traits::{Consumer, Observer, Producer};

/// Producer half of the capture ring — held by the input callback.
pub type CaptureProducer = ringbuf::HeapProd<f32>;

/// Consumer half of the capture ring — held by the capture consumer thread.
pub type CaptureConsumer = ringbuf::HeapCons<f32>;

/// Producer half of the playback ring — held by the speech worker.
pub type PlaybackProducer = ringbuf::HeapProd<f32>;

/// Consumer half of the playback ring — held by the output callback.
pub type PlaybackConsumer = ringbuf::HeapCons<f32>;

/// Capture ring capacity: 65 536 samples ≈ 4.1 s at 16 kHz.
/// Sized so the consumer can fall behind a full activity-detection pass
/// without the callback dropping audio.
pub const CAPTURE_RING_CAPACITY: usize = 65_536;

/// Playback ring capacity: 524 288 samples ≈ 10.9 s at 48 kHz.
/// Large enough for a long synthesized reply queued sentence by sentence.
pub const PLAYBACK_RING_CAPACITY: usize = 524_288;

/// Create a matched producer/consumer pair for the capture path.
pub fn create_capture_ring() -> (CaptureProducer, CaptureConsumer) {
    HeapRb::<f32>::new(CAPTURE_RING_CAPACITY).split()
}

/// Create a matched producer/consumer pair for the playback path.
pub fn create_playback_ring() -> (PlaybackProducer, PlaybackConsumer) {
    HeapRb::<f32>::new(PLAYBACK_RING_CAPACITY).split()
}
