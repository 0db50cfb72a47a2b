//! # voxa-core
//!
//! Real-time voice-interaction pipeline.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → AudioCapture → SPSC ring → consumer thread → Recognizer
//!                                                               │ segments
//!                                                          STT worker
//!                                                               │ transcripts
//!                                                          Chat worker (HTTP)
//!                                                               │ replies
//!                                              Speech worker → SPSC ring → Speaker
//! ```
//!
//! The audio callbacks are lock-free and allocation-free; all heap work
//! happens on the worker threads. New user speech raises a shared
//! interrupt flag that pre-empts playback and discards stale replies; in
//! half-duplex ("wait") mode the microphone is gated during playback
//! instead.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod engine;
pub mod error;
pub mod llm;
pub mod provider;
pub mod stt;
pub mod tts;
pub mod vad;

// Convenience re-exports for downstream crates
pub use audio::{playback::AudioPlayer, playback::AudioSink, AudioCapture};
pub use engine::{Assistant, AssistantConfig, InterruptMode, TurnSignals};
pub use error::{Result, VoxaError};
pub use llm::ChatClient;
pub use provider::Provider;
pub use stt::{Recognizer, StubTranscriber, Transcriber, TranscriberConfig, TranscriberHandle};
pub use tts::{
    split_sentences, SpeechSynthesizer, StubSynthesizer, SynthAudio, SynthHandle,
    SynthesizerConfig,
};
pub use vad::{DetectorConfig, EnergySegmenter, SpeechDetector, SpeechSegment};
