//! Energy-based speech segmenter.
//!
//! ## Algorithm
//!
//! Incoming audio is cut into fixed windows. Each window is classified by
//! RMS against the activation threshold, driving a two-state machine:
//!
//! - `Idle` → `Speaking` once at least `min_speech` of consecutive active
//!   windows has accumulated (shorter bursts are discarded as noise).
//! - `Speaking` → `Idle` after `min_silence` of quiet windows; the
//!   accumulated samples become a completed segment.
//! - A segment is force-closed when it reaches `max_speech`, and the
//!   detector stays in `Speaking` for the continuation.

use std::collections::VecDeque;

use tracing::debug;

use super::{DetectorConfig, SpeechDetector, SpeechSegment};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Speaking,
}

/// RMS-threshold speech segmenter.
pub struct EnergySegmenter {
    config: DetectorConfig,
    state: State,
    /// Partial window awaiting enough samples for classification.
    window: Vec<f32>,
    /// Candidate speech while in `Idle` (not yet past min-speech).
    tentative: Vec<f32>,
    /// Accumulated utterance while in `Speaking`.
    active: Vec<f32>,
    /// Consecutive quiet samples while in `Speaking`.
    silence_run: usize,
    /// Completed segments awaiting `front`/`pop`.
    pending: VecDeque<SpeechSegment>,

    min_speech_samples: usize,
    min_silence_samples: usize,
    max_speech_samples: usize,
}

impl EnergySegmenter {
    pub fn new(config: DetectorConfig) -> Self {
        let rate = config.sample_rate as f32;
        let min_speech_samples = (config.min_speech_secs * rate) as usize;
        let min_silence_samples = (config.min_silence_secs * rate) as usize;
        let max_speech_samples = (config.max_speech_secs * rate) as usize;

        Self {
            state: State::Idle,
            window: Vec::with_capacity(config.window_size),
            tentative: Vec::new(),
            active: Vec::new(),
            silence_run: 0,
            pending: VecDeque::new(),
            min_speech_samples,
            min_silence_samples,
            max_speech_samples: max_speech_samples.max(1),
            config,
        }
    }

    fn rms(samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
        (sum_sq / samples.len() as f32).sqrt()
    }

    fn classify_window(&mut self, window: &[f32]) {
        let active = Self::rms(window) >= self.config.threshold;

        match self.state {
            State::Idle => {
                if active {
                    self.tentative.extend_from_slice(window);
                    if self.tentative.len() >= self.min_speech_samples {
                        debug!(samples = self.tentative.len(), "segment opened");
                        self.active.append(&mut self.tentative);
                        self.silence_run = 0;
                        self.state = State::Speaking;
                    }
                } else {
                    // Burst was shorter than min-speech: noise, not speech.
                    self.tentative.clear();
                }
            }
            State::Speaking => {
                self.active.extend_from_slice(window);
                if active {
                    self.silence_run = 0;
                } else {
                    self.silence_run += window.len();
                    if self.silence_run >= self.min_silence_samples {
                        self.close_segment();
                        self.state = State::Idle;
                        return;
                    }
                }
                if self.active.len() >= self.max_speech_samples {
                    // Run-on speech: emit what we have and keep listening.
                    debug!(samples = self.active.len(), "max speech reached, splitting segment");
                    self.close_segment();
                }
            }
        }
    }

    fn close_segment(&mut self) {
        if self.active.is_empty() {
            return;
        }
        let samples = std::mem::take(&mut self.active);
        self.pending
            .push_back(SpeechSegment::new(samples, self.config.sample_rate));
        self.silence_run = 0;
    }
}

impl SpeechDetector for EnergySegmenter {
    fn accept(&mut self, samples: &[f32]) {
        let mut remaining = samples;
        while !remaining.is_empty() {
            let need = self.config.window_size - self.window.len();
            let take = need.min(remaining.len());
            self.window.extend_from_slice(&remaining[..take]);
            remaining = &remaining[take..];

            if self.window.len() == self.config.window_size {
                let window = std::mem::take(&mut self.window);
                self.classify_window(&window);
                self.window = window;
                self.window.clear();
            }
        }
    }

    fn is_speaking(&self) -> bool {
        self.state == State::Speaking
    }

    fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn front(&self) -> Option<&SpeechSegment> {
        self.pending.front()
    }

    fn pop(&mut self) {
        self.pending.pop_front();
    }

    fn clear(&mut self) {
        self.state = State::Idle;
        self.window.clear();
        self.tentative.clear();
        self.active.clear();
        self.silence_run = 0;
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segmenter() -> EnergySegmenter {
        EnergySegmenter::new(DetectorConfig {
            threshold: 0.1,
            min_silence_secs: 0.1,
            min_speech_secs: 0.1,
            max_speech_secs: 1.0,
            window_size: 160,
            sample_rate: 16_000,
            num_threads: 1,
        })
    }

    fn loud(secs: f32) -> Vec<f32> {
        let n = (16_000.0 * secs) as usize;
        (0..n)
            .map(|i| if i % 2 == 0 { 0.5 } else { -0.5 })
            .collect()
    }

    fn quiet(secs: f32) -> Vec<f32> {
        vec![0.0; (16_000.0 * secs) as usize]
    }

    #[test]
    fn burst_shorter_than_min_speech_never_emits() {
        let mut vad = segmenter();
        vad.accept(&loud(0.05));
        vad.accept(&quiet(0.5));
        assert!(vad.is_empty());
        assert!(!vad.is_speaking());
    }

    #[test]
    fn speech_then_silence_emits_one_segment() {
        let mut vad = segmenter();
        vad.accept(&loud(0.5));
        assert!(vad.is_speaking());
        assert!(vad.is_empty(), "segment must not close before silence");

        vad.accept(&quiet(0.2));
        assert!(!vad.is_speaking());
        assert!(!vad.is_empty());

        let segment = vad.front().expect("segment queued").clone();
        vad.pop();
        assert!(vad.is_empty());
        assert_eq!(segment.sample_rate, 16_000);
        // The utterance plus up to min-silence of trailing quiet.
        assert!(segment.duration_secs() >= 0.5);
        assert!(segment.duration_secs() <= 0.75);
    }

    #[test]
    fn run_on_speech_splits_at_max_speech() {
        let mut vad = segmenter();
        // 3.5 s of continuous speech against a 1 s cap.
        vad.accept(&loud(3.5));
        vad.accept(&quiet(0.2));

        let mut segments = 0;
        while !vad.is_empty() {
            segments += 1;
            vad.pop();
        }
        assert!(segments >= 4, "expected ≥⌈3.5/1.0⌉ segments, got {segments}");
    }

    #[test]
    fn clear_discards_everything() {
        let mut vad = segmenter();
        vad.accept(&loud(0.5));
        vad.accept(&quiet(0.2));
        assert!(!vad.is_empty());

        vad.clear();
        assert!(vad.is_empty());
        assert!(!vad.is_speaking());

        // Still usable after a reset.
        vad.accept(&loud(0.5));
        assert!(vad.is_speaking());
    }

    #[test]
    fn short_gaps_inside_speech_do_not_split() {
        let mut vad = segmenter();
        vad.accept(&loud(0.3));
        vad.accept(&quiet(0.05)); // shorter than min-silence
        vad.accept(&loud(0.3));
        vad.accept(&quiet(0.2));

        let mut segments = 0;
        while !vad.is_empty() {
            segments += 1;
            vad.pop();
        }
        assert_eq!(segments, 1);
    }
}
