//! Text-to-speech abstraction and sentence streaming.
//!
//! `SpeechSynthesizer` mirrors the transcriber seam: a stateful backend
//! behind a `SynthHandle` mutex. Replies are split into sentences with
//! `split_sentences` so playback of sentence N can overlap synthesis of
//! sentence N+1.

pub mod stub;

pub use stub::StubSynthesizer;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::provider::Provider;

/// Configuration handed to synthesizer backends.
#[derive(Debug, Clone, Default)]
pub struct SynthesizerConfig {
    /// Path to the acoustic model.
    pub model: std::path::PathBuf,
    /// Path to the voice bank.
    pub voices: std::path::PathBuf,
    /// Path to the token vocabulary.
    pub tokens: std::path::PathBuf,
    /// Pronunciation data directory.
    pub data_dir: std::path::PathBuf,
    /// Optional lexicon path(s); empty when the language code is used
    /// instead.
    pub lexicon: String,
    /// Language code for voices without lexicon support.
    pub language: String,
    /// Hardware backend for inference.
    pub provider: Provider,
    /// Worker threads for the synthesizer.
    pub num_threads: usize,
}

/// Audio produced by one synthesis call.
#[derive(Debug, Clone)]
pub struct SynthAudio {
    /// Mono f32 samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
    /// Sample rate of the generated audio in Hz.
    pub sample_rate: u32,
}

/// Contract for synthesis backends.
pub trait SpeechSynthesizer: Send + 'static {
    /// Generate audio for `text`.
    ///
    /// `length_scale` is the backend's time-stretch parameter, the inverse
    /// of the user-facing speed: values below 1.0 speak faster.
    fn generate(&mut self, text: &str, speaker_id: i32, length_scale: f32) -> Result<SynthAudio>;

    /// Sample rate of generated audio in Hz.
    fn sample_rate(&self) -> u32;
}

/// Thread-safe handle to any `SpeechSynthesizer` implementor.
#[derive(Clone)]
pub struct SynthHandle(pub Arc<Mutex<dyn SpeechSynthesizer>>);

impl SynthHandle {
    pub fn new<S: SpeechSynthesizer>(synthesizer: S) -> Self {
        Self(Arc::new(Mutex::new(synthesizer)))
    }

    /// Sample rate of the wrapped backend.
    pub fn sample_rate(&self) -> u32 {
        self.0.lock().sample_rate()
    }
}

impl std::fmt::Debug for SynthHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynthHandle").finish_non_exhaustive()
    }
}

/// Split a reply into sentences for streaming synthesis.
///
/// Sentences end at `.`, `!`, `?` or a newline; the terminator stays with
/// its sentence so prosody survives. Whitespace-only input yields nothing.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();

    for c in text.chars() {
        current.push(c);
        if matches!(c, '.' | '!' | '?' | '\n') {
            let trimmed = current.trim();
            if !trimmed.is_empty() {
                sentences.push(trimmed.to_string());
            }
            current.clear();
        }
    }

    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }

    sentences
}
