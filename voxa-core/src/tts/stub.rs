//! `StubSynthesizer` — placeholder backend that renders a soft tone.
//!
//! Audio length is proportional to the text length and honours
//! `length_scale`, so playback timing, interruption and the wait-mode gate
//! behave realistically without a voice model.

use tracing::debug;

use super::{SpeechSynthesizer, SynthAudio, SynthesizerConfig};
use crate::error::Result;

/// Output rate matching the common neural-vocoder rate.
const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Rendered audio per input character, before length scaling.
const SECS_PER_CHAR: f32 = 0.06;

pub struct StubSynthesizer {
    language: String,
}

impl StubSynthesizer {
    pub fn new(config: SynthesizerConfig) -> Self {
        debug!(
            language = %config.language,
            threads = config.num_threads,
            provider = %config.provider,
            "stub synthesizer active, no model loaded"
        );
        Self {
            language: config.language,
        }
    }
}

impl SpeechSynthesizer for StubSynthesizer {
    fn generate(&mut self, text: &str, _speaker_id: i32, length_scale: f32) -> Result<SynthAudio> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(SynthAudio {
                samples: Vec::new(),
                sample_rate: OUTPUT_SAMPLE_RATE,
            });
        }

        let secs = text.chars().count() as f32 * SECS_PER_CHAR * length_scale.max(0.1);
        let n = (secs * OUTPUT_SAMPLE_RATE as f32) as usize;
        let samples = (0..n)
            .map(|i| {
                let t = i as f32 / OUTPUT_SAMPLE_RATE as f32;
                0.2 * (2.0 * std::f32::consts::PI * 220.0 * t).sin()
            })
            .collect();

        debug!(chars = text.chars().count(), language = %self.language, "stub synthesis");
        Ok(SynthAudio {
            samples,
            sample_rate: OUTPUT_SAMPLE_RATE,
        })
    }

    fn sample_rate(&self) -> u32 {
        OUTPUT_SAMPLE_RATE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_yields_no_audio() {
        let mut stub = StubSynthesizer::new(SynthesizerConfig::default());
        let audio = stub.generate("   ", 0, 1.0).unwrap();
        assert!(audio.samples.is_empty());
    }

    #[test]
    fn length_scale_stretches_audio() {
        let mut stub = StubSynthesizer::new(SynthesizerConfig::default());
        let normal = stub.generate("hello there", 0, 1.0).unwrap();
        let slow = stub.generate("hello there", 0, 2.0).unwrap();
        assert_eq!(normal.sample_rate, 24_000);
        assert_eq!(slow.samples.len(), normal.samples.len() * 2);
    }
}
