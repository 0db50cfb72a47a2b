//! Blocking worker loops for the recognition and speech stages.
//!
//! Both loops run on plain threads and block on their inbound channel;
//! the channel closing is their exit signal. They are deliberately free
//! functions over a context struct so tests can drive them with scripted
//! collaborators and a fake audio sink.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::{
    audio::playback::AudioSink,
    engine::{InterruptMode, TurnSignals},
    stt::Recognizer,
    tts::{split_sentences, SynthHandle},
    vad::SpeechSegment,
};

/// Spoken instead of a reply when the conversation backend fails.
pub const FALLBACK_REPLY: &str = "I'm sorry, I encountered an error.";

/// Context for the transcription loop.
pub struct SttWorker {
    pub recognizer: Arc<Recognizer>,
    pub segment_rx: mpsc::Receiver<SpeechSegment>,
    pub transcript_tx: mpsc::Sender<String>,
    pub signals: TurnSignals,
    pub shutdown: Arc<AtomicBool>,
}

/// Transcribe completed segments and forward the resulting transcripts.
///
/// The interrupt flag is cleared once a transcript has been handed onward,
/// so the upcoming reply is not cancelled by its own cause; forwarding a
/// transcript also marks a reply as pending, arming the recognizer's
/// barge-in hook for the duration of that reply.
pub fn run_stt_worker(mut worker: SttWorker) {
    while let Some(segment) = worker.segment_rx.blocking_recv() {
        if worker.shutdown.load(Ordering::Relaxed) {
            break;
        }

        // Belt-and-braces: a segment arriving while the detector still
        // reports speech means the user talked over the pending reply.
        if worker.recognizer.is_speech_detected()
            && worker.signals.reply_pending.load(Ordering::SeqCst)
        {
            worker.signals.interrupt.store(true, Ordering::SeqCst);
        }

        match worker.recognizer.transcribe_segment(&segment) {
            Some(text) => {
                if worker.transcript_tx.blocking_send(text).is_err() {
                    break;
                }
                worker.signals.reply_pending.store(true, Ordering::SeqCst);
                worker.signals.interrupt.store(false, Ordering::SeqCst);
            }
            None => {
                // Nothing usable came out of the segment; do not leave the
                // flag latched across the turn.
                worker.signals.interrupt.store(false, Ordering::SeqCst);
            }
        }
    }
    debug!("stt worker exiting");
}

/// Context for the synthesis/playback loop.
pub struct SpeechWorker {
    pub reply_rx: mpsc::Receiver<String>,
    pub synthesizer: SynthHandle,
    pub sink: Arc<dyn AudioSink>,
    /// The capturer's running flag, gated in wait-mode.
    pub capture_running: Arc<AtomicBool>,
    pub signals: TurnSignals,
    pub shutdown: Arc<AtomicBool>,
    pub mode: InterruptMode,
    pub post_playback_delay: Duration,
    pub speaker_id: i32,
    pub length_scale: f32,
}

/// Speak replies sentence by sentence.
///
/// Playback of sentence N overlaps synthesis of sentence N+1 because the
/// sink's ring decouples producer and device. In always-mode the interrupt
/// flag is checked before and after every sentence and pending replies are
/// discarded on interruption; in wait-mode the flag is ignored and the
/// microphone is gated instead.
pub fn run_speech_worker(mut worker: SpeechWorker) {
    while let Some(reply) = worker.reply_rx.blocking_recv() {
        if worker.shutdown.load(Ordering::Relaxed) {
            break;
        }

        if worker.mode == InterruptMode::Always && worker.signals.interrupt.load(Ordering::Relaxed) {
            let discarded = drain_pending(&mut worker.reply_rx) + 1;
            info!(discarded, "discarding queued replies after interruption");
            worker.signals.reply_pending.store(false, Ordering::SeqCst);
            continue;
        }

        if worker.mode == InterruptMode::Wait {
            worker.capture_running.store(false, Ordering::SeqCst);
            debug!("capture paused for playback");
        }

        let sentences = split_sentences(&reply);
        if sentences.is_empty() {
            warn!("reply contained nothing to speak");
            if worker.mode == InterruptMode::Wait {
                resume_capture(&worker);
            }
            worker.signals.reply_pending.store(false, Ordering::SeqCst);
            continue;
        }

        let total = sentences.len();
        let mut interrupted = false;

        for (index, sentence) in sentences.iter().enumerate() {
            if worker.shutdown.load(Ordering::Relaxed) {
                break;
            }
            if worker.mode == InterruptMode::Always && worker.signals.interrupt.load(Ordering::Relaxed) {
                info!("synthesis interrupted by new speech");
                worker.sink.interrupt();
                interrupted = true;
                break;
            }

            let audio = {
                let mut synthesizer = worker.synthesizer.0.lock();
                match synthesizer.generate(sentence, worker.speaker_id, worker.length_scale) {
                    Ok(audio) => audio,
                    Err(e) => {
                        error!(
                            sentence = index + 1,
                            total,
                            error = %e,
                            "sentence synthesis failed, skipping"
                        );
                        continue;
                    }
                }
            };
            if audio.samples.is_empty() {
                continue;
            }

            debug!(
                sentence = index + 1,
                total,
                samples = audio.samples.len(),
                "playing sentence"
            );

            if !worker.sink.play(&audio.samples, audio.sample_rate) {
                if worker.mode == InterruptMode::Always {
                    info!("playback interrupted");
                    interrupted = true;
                }
                break;
            }

            if worker.mode == InterruptMode::Always && worker.signals.interrupt.load(Ordering::Relaxed) {
                info!("playback interrupted by new speech");
                worker.sink.interrupt();
                interrupted = true;
                break;
            }
        }

        if worker.mode == InterruptMode::Wait {
            resume_capture(&worker);
        }

        if interrupted && worker.mode == InterruptMode::Always {
            let discarded = drain_pending(&mut worker.reply_rx);
            if discarded > 0 {
                info!(discarded, "discarded queued replies");
            }
        }

        // This reply is done (spoken, abandoned, or empty); speech onsets
        // are ordinary user turns again.
        worker.signals.reply_pending.store(false, Ordering::SeqCst);
    }
    debug!("speech worker exiting");
}

/// Wait out the playback tail, then re-open the microphone.
fn resume_capture(worker: &SpeechWorker) {
    std::thread::sleep(worker.post_playback_delay);
    worker.capture_running.store(true, Ordering::SeqCst);
    debug!("capture resumed after playback");
}

/// Discard everything currently queued on a channel.
pub fn drain_pending<T>(rx: &mut mpsc::Receiver<T>) -> usize {
    let mut discarded = 0;
    while rx.try_recv().is_ok() {
        discarded += 1;
    }
    discarded
}
