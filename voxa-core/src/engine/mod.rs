//! `Assistant` — top-level lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! Assistant::new()
//!     └─► start()      → workers spawned, capture streaming
//!         └─► shutdown() → capture stopped, channels closed,
//!                          workers joined with a ceiling
//! ```
//!
//! ## Data flow
//!
//! ```text
//! Capture ──segments──▶ STT worker ──transcripts──▶ Chat worker ──replies──▶ Speech worker
//!    ▲                      │                                                    │
//!    │                      └────────── interrupt flag ◀────────────────────────┘
//!    └───────────── pause/resume (wait-mode) ◀──────────────────────────────────┘
//! ```
//!
//! The pipeline is a DAG with two control-plane back-edges, both owned
//! here: the interrupt flag (new speech abandons the reply in flight) and
//! the capture running-flag (half-duplex gating). No stage holds a handle
//! back to its predecessor.

pub mod turns;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::{
    audio::{playback::AudioSink, AudioCapture},
    error::{Result, VoxaError},
    llm::ChatClient,
    stt::Recognizer,
    tts::SynthHandle,
    vad::SpeechSegment,
};

/// Depth of the transcript and reply channels. Small: back-pressure beats
/// a backlog of stale conversation.
pub const PIPELINE_DEPTH: usize = 5;

/// Ceiling when joining a worker during shutdown.
const WORKER_JOIN_CEILING: Duration = Duration::from_secs(5);

/// Shared one-bit signals coordinating a conversation turn.
///
/// Owned by the orchestrator; each flag is written by the producer of the
/// corresponding event. `interrupt` is raised by the recognizer when the
/// user speaks over a pending or playing reply and cleared by the STT
/// worker once the fresh transcript is handed onward. `reply_pending` is
/// raised when a transcript enters the conversation stage and cleared when
/// its reply has finished (or been abandoned) at the speaker.
#[derive(Clone, Default)]
pub struct TurnSignals {
    pub interrupt: Arc<AtomicBool>,
    pub reply_pending: Arc<AtomicBool>,
}

impl TurnSignals {
    pub fn new() -> Self {
        Self::default()
    }
}

/// How microphone capture is reconciled with self-produced sound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InterruptMode {
    /// Capture always runs; new speech pre-empts playback. For headsets,
    /// where microphone and speaker are acoustically isolated.
    Always,
    /// Capture is paused while the assistant speaks. For open speakers,
    /// where playback would otherwise be captured as user speech.
    #[default]
    Wait,
}

impl std::fmt::Display for InterruptMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            InterruptMode::Always => "always",
            InterruptMode::Wait => "wait",
        })
    }
}

impl std::str::FromStr for InterruptMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "always" => Ok(InterruptMode::Always),
            "wait" => Ok(InterruptMode::Wait),
            other => Err(format!(
                "invalid interrupt mode '{other}' (expected 'always' or 'wait')"
            )),
        }
    }
}

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    pub interrupt_mode: InterruptMode,
    /// Wait-mode only: capture resumes this long after playback ends, so
    /// the playback tail is not picked up as user speech.
    pub post_playback_delay: Duration,
    /// Voice selector passed through to the synthesizer.
    pub speaker_id: i32,
    /// User-facing speech speed; the synthesizer receives its inverse as
    /// the length scale.
    pub speech_speed: f32,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            interrupt_mode: InterruptMode::Wait,
            post_playback_delay: Duration::from_millis(300),
            speaker_id: 0,
            speech_speed: 1.0,
        }
    }
}

/// Owns the four pipeline stages and the signals between them.
pub struct Assistant {
    config: AssistantConfig,
    capture: AudioCapture,
    recognizer: Arc<Recognizer>,
    segment_rx: Option<mpsc::Receiver<SpeechSegment>>,
    synthesizer: SynthHandle,
    chat: Option<ChatClient>,
    sink: Arc<dyn AudioSink>,
    signals: TurnSignals,
    shutdown: Arc<AtomicBool>,
    stt_worker: Option<thread::JoinHandle<()>>,
    speech_worker: Option<thread::JoinHandle<()>>,
    chat_worker: Option<tokio::task::JoinHandle<()>>,
}

impl Assistant {
    /// Wire the pipeline. Nothing runs until `start()`.
    ///
    /// `signals` is the same pair handed to the recognizer's barge-in hook
    /// and (in always-mode) to the playback sink as its external
    /// interrupt; the assistant owns its lifecycle.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: AssistantConfig,
        capture: AudioCapture,
        recognizer: Arc<Recognizer>,
        segment_rx: mpsc::Receiver<SpeechSegment>,
        synthesizer: SynthHandle,
        chat: ChatClient,
        sink: Arc<dyn AudioSink>,
        signals: TurnSignals,
    ) -> Self {
        Self {
            config,
            capture,
            recognizer,
            segment_rx: Some(segment_rx),
            synthesizer,
            chat: Some(chat),
            sink,
            signals,
            shutdown: Arc::new(AtomicBool::new(false)),
            stt_worker: None,
            speech_worker: None,
            chat_worker: None,
        }
    }

    /// Spawn the workers and start capture.
    ///
    /// Must be called from within a tokio runtime: the chat worker is an
    /// async task. Blocks until the input device is streaming.
    pub fn start(&mut self) -> Result<()> {
        let segment_rx = self.segment_rx.take().ok_or(VoxaError::AlreadyRunning)?;
        let chat = self.chat.take().ok_or(VoxaError::AlreadyRunning)?;

        let (transcript_tx, mut transcript_rx) = mpsc::channel::<String>(PIPELINE_DEPTH);
        let (reply_tx, reply_rx) = mpsc::channel::<String>(PIPELINE_DEPTH);

        let stt = turns::SttWorker {
            recognizer: Arc::clone(&self.recognizer),
            segment_rx,
            transcript_tx,
            signals: self.signals.clone(),
            shutdown: Arc::clone(&self.shutdown),
        };
        self.stt_worker = Some(
            thread::Builder::new()
                .name("voxa-stt".into())
                .spawn(move || turns::run_stt_worker(stt))?,
        );

        let shutdown = Arc::clone(&self.shutdown);
        self.chat_worker = Some(tokio::spawn(async move {
            let mut chat = chat;
            while let Some(text) = transcript_rx.recv().await {
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
                info!(user = %text, "processing transcript");
                let reply = match chat.chat(&text).await {
                    Ok(reply) => {
                        info!(assistant = %reply, "reply ready");
                        reply
                    }
                    Err(e) => {
                        // The user hears something instead of silence; the
                        // apology is spoken, not recorded — history keeps
                        // the unanswered user turn and no assistant turn.
                        error!(error = %e, "conversation failed, substituting apology");
                        turns::FALLBACK_REPLY.to_string()
                    }
                };
                if reply_tx.send(reply).await.is_err() {
                    break;
                }
            }
            debug!("chat worker exiting");
        }));

        let speech = turns::SpeechWorker {
            reply_rx,
            synthesizer: self.synthesizer.clone(),
            sink: Arc::clone(&self.sink),
            capture_running: self.capture.running_flag(),
            signals: self.signals.clone(),
            shutdown: Arc::clone(&self.shutdown),
            mode: self.config.interrupt_mode,
            post_playback_delay: self.config.post_playback_delay,
            speaker_id: self.config.speaker_id,
            length_scale: 1.0 / self.config.speech_speed.max(0.1),
        };
        self.speech_worker = Some(
            thread::Builder::new()
                .name("voxa-speech".into())
                .spawn(move || turns::run_speech_worker(speech))?,
        );

        self.capture.start()?;
        info!(mode = %self.config.interrupt_mode, "assistant listening");
        Ok(())
    }

    /// The shared interrupt flag.
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.signals.interrupt)
    }

    /// Stop capture, close the channel chain and join every worker.
    ///
    /// Closing the segment channel unblocks the STT worker; dropping its
    /// transcript sender unblocks the chat worker, which in turn releases
    /// the speech worker. Workers that miss the join ceiling are logged
    /// and left behind rather than holding up process exit.
    pub fn shutdown(&mut self) {
        info!("assistant shutting down");
        self.shutdown.store(true, Ordering::SeqCst);

        self.capture.stop();
        self.recognizer.close();
        self.sink.interrupt();

        if let Some(handle) = self.stt_worker.take() {
            join_with_ceiling(handle, "stt");
        }
        if let Some(handle) = self.speech_worker.take() {
            join_with_ceiling(handle, "speech");
        }
        if let Some(handle) = self.chat_worker.take() {
            let deadline = Instant::now() + WORKER_JOIN_CEILING;
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(25));
            }
            if !handle.is_finished() {
                warn!("chat worker did not stop in time, aborting");
                handle.abort();
            }
        }

        info!("assistant stopped");
    }
}

fn join_with_ceiling(handle: thread::JoinHandle<()>, name: &str) {
    let deadline = Instant::now() + WORKER_JOIN_CEILING;
    while !handle.is_finished() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(25));
    }
    if handle.is_finished() {
        if handle.join().is_err() {
            warn!(worker = name, "worker panicked");
        }
    } else {
        warn!(worker = name, "worker did not stop within the ceiling");
    }
}
