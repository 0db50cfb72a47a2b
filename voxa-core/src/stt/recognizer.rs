//! Two-lock speech recognizer.
//!
//! ## Locking design
//!
//! The recognizer sits between two very different latency domains:
//!
//! - activity detection is cheap (<10 ms) and runs on the capture consumer
//!   thread for every chunk;
//! - transcription is expensive (100–500 ms) and runs on a dedicated worker.
//!
//! Each domain gets its own `parking_lot::Mutex`. The detector lock is held
//! only around the detector calls and is released before any channel send;
//! the transcription lock lives inside `TranscriberHandle` and is never
//! taken on the audio path. Completed segments cross between the domains
//! over a bounded channel, so the capture thread never waits on a decode.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::engine::TurnSignals;
use crate::stt::TranscriberHandle;
use crate::vad::{SpeechDetector, SpeechSegment};

/// Completed segments buffered between detection and transcription.
/// Small on purpose: when transcription cannot keep up, losing a segment is
/// preferable to unbounded growth or a stalled audio path.
const SEGMENT_CHANNEL_DEPTH: usize = 5;

struct DetectorState {
    detector: Box<dyn SpeechDetector>,
    was_speaking: bool,
    speech_started: Option<Instant>,
}

/// Converts the capture stream into transcripts.
pub struct Recognizer {
    detector: Mutex<DetectorState>,
    transcriber: TranscriberHandle,
    segment_tx: Mutex<Option<mpsc::Sender<SpeechSegment>>>,
    /// Mirrors the detector's instantaneous speech state; readable without
    /// taking the detector lock.
    speaking: Arc<AtomicBool>,
    /// Lowercased activation phrase, if configured.
    wake_word: Option<String>,
    sample_rate: u32,
    /// Orchestrator-owned turn signals. When present, a speech onset while
    /// a reply is pending raises the interrupt flag (barge-in).
    signals: Option<TurnSignals>,
}

impl Recognizer {
    /// Create a recognizer and the receiving end of its segment channel.
    pub fn new(
        detector: Box<dyn SpeechDetector>,
        transcriber: TranscriberHandle,
        wake_word: Option<String>,
        sample_rate: u32,
    ) -> (Self, mpsc::Receiver<SpeechSegment>) {
        let (segment_tx, segment_rx) = mpsc::channel(SEGMENT_CHANNEL_DEPTH);

        let recognizer = Self {
            detector: Mutex::new(DetectorState {
                detector,
                was_speaking: false,
                speech_started: None,
            }),
            transcriber,
            segment_tx: Mutex::new(Some(segment_tx)),
            speaking: Arc::new(AtomicBool::new(false)),
            wake_word: wake_word.map(|w| w.to_ascii_lowercase()),
            sample_rate,
            signals: None,
        };

        (recognizer, segment_rx)
    }

    /// Arm the barge-in hook: while a reply is pending, a speech onset
    /// raises the shared interrupt flag so playback stops within one
    /// callback period instead of waiting for the segment to complete.
    pub fn with_turn_signals(mut self, signals: TurnSignals) -> Self {
        self.signals = Some(signals);
        self
    }

    /// Feed captured samples to the detector and emit any completed segment.
    ///
    /// Called from the capture consumer for every chunk. The detector lock
    /// is released before the channel send; the send itself never blocks —
    /// when the channel is full the segment is dropped with a warning.
    pub fn accept_waveform(&self, samples: &[f32]) {
        let completed = {
            let mut state = self.detector.lock();
            state.detector.accept(samples);

            let speaking = state.detector.is_speaking();
            self.speaking.store(speaking, Ordering::SeqCst);

            if speaking && !state.was_speaking {
                state.speech_started = Some(Instant::now());
                info!("speech started");
                if let Some(signals) = &self.signals {
                    if signals.reply_pending.load(Ordering::SeqCst) {
                        signals.interrupt.store(true, Ordering::SeqCst);
                        debug!("speech onset during a pending reply, raising interrupt");
                    }
                }
            } else if !speaking && state.was_speaking {
                if let Some(started) = state.speech_started.take() {
                    info!(duration_secs = format_args!("{:.1}", started.elapsed().as_secs_f32()), "speech ended");
                }
            }
            state.was_speaking = speaking;

            let completed = state.detector.front().cloned();
            if completed.is_some() {
                state.detector.pop();
            }
            completed
        };

        let Some(segment) = completed else { return };
        if segment.samples.is_empty() {
            return;
        }
        debug!(
            samples = segment.samples.len(),
            duration_secs = format_args!("{:.2}", segment.duration_secs()),
            "segment completed"
        );

        let sender = self.segment_tx.lock().clone();
        if let Some(sender) = sender {
            if sender.try_send(segment).is_err() {
                warn!("segment channel full, dropping segment");
            }
        }
    }

    /// Decode one completed segment under the transcription lock.
    ///
    /// Returns `None` for empty decodes, transcriber failures (logged), and
    /// utterances rejected by the wake-word gate.
    pub fn transcribe_segment(&self, segment: &SpeechSegment) -> Option<String> {
        if segment.samples.is_empty() {
            return None;
        }

        debug!(samples = segment.samples.len(), "transcribing segment");

        let decoded = {
            let mut transcriber = self.transcriber.0.lock();
            transcriber.transcribe(&segment.samples, self.sample_rate)
        };

        let text = match decoded {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                error!(error = %e, "transcription failed, segment dropped");
                return None;
            }
        };

        if text.is_empty() {
            debug!("empty transcription result");
            return None;
        }

        match &self.wake_word {
            None => {
                info!(text = %text, "transcript");
                Some(text)
            }
            Some(wake_word) => match strip_wake_word(&text, wake_word) {
                None => {
                    debug!(text = %text, "wake word absent, transcript ignored");
                    None
                }
                Some(query) if query.is_empty() => {
                    info!("wake word detected");
                    Some("Hello".to_string())
                }
                Some(query) => {
                    info!(text = %query, "transcript (wake word stripped)");
                    Some(query)
                }
            },
        }
    }

    /// Whether the detector currently sees speech or has segments queued.
    pub fn is_speech_detected(&self) -> bool {
        let state = self.detector.lock();
        state.detector.is_speaking() || !state.detector.is_empty()
    }

    /// Shared flag mirroring the instantaneous speech state.
    pub fn speaking_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.speaking)
    }

    /// Reset detector state, discarding partial speech.
    pub fn clear(&self) {
        self.detector.lock().detector.clear();
    }

    /// Close the segment channel. Transcription workers waiting on the
    /// receiver observe end-of-stream and exit.
    pub fn close(&self) {
        self.segment_tx.lock().take();
        self.clear();
    }
}

/// Remove the first occurrence of `wake_word` (lowercased) from `text`,
/// trimming adjacent punctuation and whitespace. Returns `None` when the
/// wake word is absent.
fn strip_wake_word(text: &str, wake_word: &str) -> Option<String> {
    let lowered = text.to_ascii_lowercase();
    let index = lowered.find(wake_word)?;

    let mut remainder = String::with_capacity(text.len() - wake_word.len());
    remainder.push_str(&text[..index]);
    remainder.push_str(&text[index + wake_word.len()..]);

    let remainder = remainder
        .trim_start_matches(|c: char| c.is_whitespace() || " ,.!?;:-'\"".contains(c))
        .trim();
    Some(remainder.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    use crate::error::{Result, VoxaError};
    use crate::stt::Transcriber;

    /// Detector that replays a prepared plan: each `accept` call may queue
    /// one segment and set the speaking state.
    struct ScriptedDetector {
        plan: VecDeque<(bool, Option<SpeechSegment>)>,
        speaking: bool,
        pending: VecDeque<SpeechSegment>,
        clears: Arc<AtomicUsize>,
    }

    impl ScriptedDetector {
        fn new(plan: Vec<(bool, Option<SpeechSegment>)>, clears: Arc<AtomicUsize>) -> Self {
            Self {
                plan: plan.into(),
                speaking: false,
                pending: VecDeque::new(),
                clears,
            }
        }
    }

    impl SpeechDetector for ScriptedDetector {
        fn accept(&mut self, _samples: &[f32]) {
            if let Some((speaking, segment)) = self.plan.pop_front() {
                self.speaking = speaking;
                if let Some(segment) = segment {
                    self.pending.push_back(segment);
                }
            }
        }

        fn is_speaking(&self) -> bool {
            self.speaking
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
            self.pending.clear();
            self.speaking = false;
            self.clears.fetch_add(1, Ordering::Relaxed);
        }
    }

    struct ScriptedTranscriber {
        replies: VecDeque<Result<String>>,
    }

    impl Transcriber for ScriptedTranscriber {
        fn transcribe(&mut self, _samples: &[f32], _sample_rate: u32) -> Result<String> {
            self.replies
                .pop_front()
                .unwrap_or_else(|| Ok(String::new()))
        }
    }

    fn scripted(
        plan: Vec<(bool, Option<SpeechSegment>)>,
        replies: Vec<Result<String>>,
    ) -> (Recognizer, mpsc::Receiver<SpeechSegment>, Arc<AtomicUsize>) {
        let clears = Arc::new(AtomicUsize::new(0));
        let detector = ScriptedDetector::new(plan, Arc::clone(&clears));
        let transcriber = TranscriberHandle::new(ScriptedTranscriber {
            replies: replies.into(),
        });
        let (recognizer, rx) = Recognizer::new(Box::new(detector), transcriber, None, 16_000);
        (recognizer, rx, clears)
    }

    fn segment(n: usize) -> SpeechSegment {
        SpeechSegment::new(vec![0.2; n], 16_000)
    }

    #[test]
    fn completed_segment_reaches_channel() {
        let (recognizer, mut rx, _) =
            scripted(vec![(true, None), (false, Some(segment(1600)))], vec![]);

        recognizer.accept_waveform(&[0.0; 160]);
        assert!(recognizer.is_speech_detected());
        recognizer.accept_waveform(&[0.0; 160]);

        let received = rx.try_recv().expect("segment delivered");
        assert_eq!(received.samples.len(), 1600);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn channel_overflow_drops_newest_without_blocking() {
        let plan: Vec<_> = (0..8).map(|_| (false, Some(segment(320)))).collect();
        let (recognizer, mut rx, _) = scripted(plan, vec![]);

        for _ in 0..8 {
            recognizer.accept_waveform(&[0.0; 160]);
        }

        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 5, "bounded channel holds at most its capacity");
    }

    #[test]
    fn empty_and_failed_transcriptions_are_suppressed() {
        let (recognizer, _rx, _) = scripted(
            vec![],
            vec![
                Ok("  ".to_string()),
                Err(VoxaError::Transcription("backend exploded".into())),
                Ok(" hello there ".to_string()),
            ],
        );

        assert_eq!(recognizer.transcribe_segment(&segment(1600)), None);
        assert_eq!(recognizer.transcribe_segment(&segment(1600)), None);
        assert_eq!(
            recognizer.transcribe_segment(&segment(1600)),
            Some("hello there".to_string())
        );
    }

    #[test]
    fn empty_segment_never_reaches_the_transcriber() {
        let (recognizer, _rx, _) = scripted(vec![], vec![Ok("should not appear".into())]);
        assert_eq!(recognizer.transcribe_segment(&segment(0)), None);
    }

    #[test]
    fn wake_word_gates_and_strips() {
        let transcriber = TranscriberHandle::new(ScriptedTranscriber {
            replies: VecDeque::from(vec![
                Ok("what time is it".to_string()),
                Ok("Hey Assistant, what time is it".to_string()),
                Ok("hey assistant".to_string()),
            ]),
        });
        let detector = ScriptedDetector::new(vec![], Arc::new(AtomicUsize::new(0)));
        let (recognizer, _rx) = Recognizer::new(
            Box::new(detector),
            transcriber,
            Some("hey assistant".to_string()),
            16_000,
        );

        // No wake word: dropped entirely.
        assert_eq!(recognizer.transcribe_segment(&segment(1600)), None);
        // Wake word prefix stripped, punctuation cleaned.
        assert_eq!(
            recognizer.transcribe_segment(&segment(1600)),
            Some("what time is it".to_string())
        );
        // Bare wake word becomes a greeting.
        assert_eq!(
            recognizer.transcribe_segment(&segment(1600)),
            Some("Hello".to_string())
        );
    }

    #[test]
    fn close_ends_the_segment_stream() {
        let (recognizer, mut rx, clears) =
            scripted(vec![(false, Some(segment(320)))], vec![]);

        recognizer.close();
        assert_eq!(clears.load(Ordering::Relaxed), 1);

        // Sends after close are silently discarded and the receiver sees
        // end-of-stream.
        recognizer.accept_waveform(&[0.0; 160]);
        assert!(rx.blocking_recv().is_none());
    }

    #[test]
    fn vad_ingestion_never_waits_on_transcription() {
        use std::sync::mpsc as sync_mpsc;
        use std::thread;
        use std::time::Duration;

        /// Holds the transcription lock until the test releases it.
        struct BlockingTranscriber {
            entered: sync_mpsc::Sender<()>,
            release: sync_mpsc::Receiver<()>,
        }

        impl Transcriber for BlockingTranscriber {
            fn transcribe(&mut self, _samples: &[f32], _sample_rate: u32) -> Result<String> {
                let _ = self.entered.send(());
                let _ = self.release.recv();
                Ok("slow".to_string())
            }
        }

        let (entered_tx, entered_rx) = sync_mpsc::channel();
        let (release_tx, release_rx) = sync_mpsc::channel();

        let plan: Vec<_> = (0..100).map(|_| (true, None)).collect();
        let detector = ScriptedDetector::new(plan, Arc::new(AtomicUsize::new(0)));
        let transcriber = TranscriberHandle::new(BlockingTranscriber {
            entered: entered_tx,
            release: release_rx,
        });
        let (recognizer, _rx) = Recognizer::new(Box::new(detector), transcriber, None, 16_000);
        let recognizer = Arc::new(recognizer);

        let worker = {
            let recognizer = Arc::clone(&recognizer);
            thread::spawn(move || {
                let text = recognizer.transcribe_segment(&segment(1600));
                assert_eq!(text.as_deref(), Some("slow"));
            })
        };

        // Once this returns, the transcription lock is held and stays held.
        entered_rx.recv().expect("transcriber entered");

        // The audio path must keep flowing regardless: the detector lock
        // and the transcription lock are disjoint.
        let start = Instant::now();
        for _ in 0..100 {
            recognizer.accept_waveform(&[0.0; 160]);
        }
        assert!(recognizer.is_speech_detected());
        assert!(
            start.elapsed() < Duration::from_millis(250),
            "ingestion blocked while transcription was in progress"
        );

        release_tx.send(()).expect("release transcriber");
        worker.join().expect("transcription worker");
    }

    #[test]
    fn speech_onset_raises_interrupt_only_while_a_reply_is_pending() {
        use crate::engine::TurnSignals;

        let plan = vec![(true, None), (false, None), (true, None)];
        let clears = Arc::new(AtomicUsize::new(0));
        let detector = ScriptedDetector::new(plan, clears);
        let transcriber = TranscriberHandle::new(ScriptedTranscriber {
            replies: VecDeque::new(),
        });
        let signals = TurnSignals::new();
        let (recognizer, _rx) = Recognizer::new(Box::new(detector), transcriber, None, 16_000);
        let recognizer = recognizer.with_turn_signals(signals.clone());

        // Onset with no reply in flight: ordinary user turn, no interrupt.
        recognizer.accept_waveform(&[0.0; 160]);
        assert!(!signals.interrupt.load(Ordering::SeqCst));

        // Back to silence, then a reply goes pending.
        recognizer.accept_waveform(&[0.0; 160]);
        signals.reply_pending.store(true, Ordering::SeqCst);

        // Onset over the pending reply: barge-in.
        recognizer.accept_waveform(&[0.0; 160]);
        assert!(signals.interrupt.load(Ordering::SeqCst));
    }

    #[test]
    fn strip_wake_word_cases() {
        assert_eq!(strip_wake_word("computer on", "jarvis"), None);
        assert_eq!(
            strip_wake_word("Jarvis, open the door", "jarvis").as_deref(),
            Some("open the door")
        );
        assert_eq!(strip_wake_word("JARVIS", "jarvis").as_deref(), Some(""));
        // Only punctuation adjacent to the start of the remainder is
        // trimmed; interior text is left untouched.
        assert_eq!(
            strip_wake_word("please jarvis! lights", "jarvis").as_deref(),
            Some("please ! lights")
        );
    }
}
