//! Speech-to-text abstraction.
//!
//! The `Transcriber` trait decouples the recognizer from any specific
//! decoder backend. `&mut self` on `transcribe` intentionally expresses that
//! decoders are stateful; all mutation is serialised through
//! `TranscriberHandle`'s `parking_lot::Mutex`, which doubles as the slow
//! transcription lock of the two-lock recognizer design.

pub mod recognizer;
pub mod stub;

pub use recognizer::Recognizer;
pub use stub::StubTranscriber;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::provider::Provider;

/// Configuration handed to transcriber backends.
#[derive(Debug, Clone)]
pub struct TranscriberConfig {
    /// Path to the encoder weights.
    pub encoder: std::path::PathBuf,
    /// Path to the decoder weights.
    pub decoder: std::path::PathBuf,
    /// Path to the token vocabulary.
    pub tokens: std::path::PathBuf,
    /// Language hint; empty string requests auto-detection.
    pub language: String,
    /// Decoding strategy. Only greedy search is used.
    pub decoding: DecodingMethod,
    /// Decoder task; transcription is the only one this pipeline asks for.
    pub task: String,
    /// Hardware backend for inference.
    pub provider: Provider,
    /// Worker threads for the decoder.
    pub num_threads: usize,
}

impl Default for TranscriberConfig {
    fn default() -> Self {
        Self {
            encoder: std::path::PathBuf::new(),
            decoder: std::path::PathBuf::new(),
            tokens: std::path::PathBuf::new(),
            language: String::new(),
            decoding: DecodingMethod::GreedySearch,
            task: "transcribe".to_string(),
            provider: Provider::default(),
            num_threads: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodingMethod {
    #[default]
    GreedySearch,
}

/// Contract for transcription backends.
pub trait Transcriber: Send + 'static {
    /// Decode a mono f32 segment into text.
    ///
    /// Returning an empty string means "no speech recognised" and is not an
    /// error.
    fn transcribe(&mut self, samples: &[f32], sample_rate: u32) -> Result<String>;
}

/// Thread-safe handle to any `Transcriber` implementor.
///
/// Locking this handle *is* the transcription lock: at most one decode runs
/// at a time, independent of the activity-detection lock.
#[derive(Clone)]
pub struct TranscriberHandle(pub Arc<Mutex<dyn Transcriber>>);

impl TranscriberHandle {
    pub fn new<T: Transcriber>(transcriber: T) -> Self {
        Self(Arc::new(Mutex::new(transcriber)))
    }
}

impl std::fmt::Debug for TranscriberHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranscriberHandle").finish_non_exhaustive()
    }
}
