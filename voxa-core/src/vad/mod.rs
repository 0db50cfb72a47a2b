//! Speech-activity detection and segmentation.
//!
//! The `SpeechDetector` trait is the seam between the pipeline and any
//! concrete detector: feed it samples with `accept`, poll `is_speaking` for
//! the instantaneous state, and drain completed utterances through
//! `front`/`pop`. `EnergySegmenter` is the built-in implementation; a
//! neural detector can be swapped in without touching the recognizer.

pub mod energy;

pub use energy::EnergySegmenter;

/// A contiguous utterance, bounded on both ends by silence (or by the
/// max-speech cap), at the model sample rate.
#[derive(Debug, Clone)]
pub struct SpeechSegment {
    /// Mono f32 samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl SpeechSegment {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Duration of this segment in seconds.
    pub fn duration_secs(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// Configuration shared by detector implementations.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Activation threshold in [0, 1].
    pub threshold: f32,
    /// Silence needed to close a segment, in seconds.
    pub min_silence_secs: f32,
    /// Speech needed to open a segment, in seconds.
    pub min_speech_secs: f32,
    /// Forced segmentation point for run-on speech, in seconds.
    pub max_speech_secs: f32,
    /// Analysis window in samples (512 = 32 ms at 16 kHz).
    pub window_size: usize,
    /// Sample rate of the incoming audio in Hz.
    pub sample_rate: u32,
    /// Worker threads for model-backed detectors (1 is plenty).
    pub num_threads: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            min_silence_secs: 0.8,
            min_speech_secs: 0.1,
            max_speech_secs: 30.0,
            window_size: 512,
            sample_rate: 16_000,
            num_threads: 1,
        }
    }
}

/// Contract for speech-activity detectors.
///
/// Implementors are stateful: they accumulate audio, track the
/// speech/silence state machine, and queue completed segments.
pub trait SpeechDetector: Send + 'static {
    /// Feed a chunk of mono samples at the configured sample rate.
    fn accept(&mut self, samples: &[f32]);

    /// Whether the detector currently observes active speech.
    fn is_speaking(&self) -> bool;

    /// Whether the completed-segment queue is empty.
    fn is_empty(&self) -> bool;

    /// The oldest completed segment, if any. `pop` removes it.
    fn front(&self) -> Option<&SpeechSegment>;

    /// Discard the oldest completed segment.
    fn pop(&mut self);

    /// Reset all state, discarding queued segments and partial speech.
    fn clear(&mut self);
}
