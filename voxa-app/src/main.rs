//! voxa — a local real-time voice assistant.
//!
//! Wires the pipeline: microphone capture → activity segmentation →
//! transcription → conversation → synthesis → interruptible playback.
//! All model collaborators sit behind trait seams in voxa-core; this
//! binary resolves configuration, checks the conversation endpoint, opens
//! the audio devices and runs until Ctrl+C or SIGTERM.

mod config;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use voxa_core::{
    Assistant, AudioCapture, AudioPlayer, ChatClient, EnergySegmenter, InterruptMode, Recognizer,
    StubSynthesizer, StubTranscriber, SynthHandle, TranscriberHandle, TurnSignals,
};

use config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut config = AppConfig::parse();
    config.normalize_thread_counts();

    // RUST_LOG wins; otherwise --verbose selects debug.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if config.verbose { "debug" } else { "info" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "voxa starting");
    if let Err(reason) = config.validate() {
        error!(%reason, "invalid configuration");
        std::process::exit(1);
    }
    config.log_summary();

    // The conversation endpoint must answer before any audio opens.
    let chat = ChatClient::new(
        &config.chat_endpoint,
        &config.chat_model,
        &config.system_prompt,
        config.max_history,
        config.temperature,
    )?;
    chat.health_check()
        .await
        .with_context(|| format!("chat endpoint {} unreachable", config.chat_endpoint))?;
    info!(endpoint = %config.chat_endpoint, model = %config.chat_model, "chat endpoint ready");

    // Collaborators behind their trait seams. Model-backed detector,
    // recognizer and synthesizer implementations plug in here and check
    // their own model files at construction; the built-in backends are
    // model-free and exercise the full pipeline without them.
    let detector = EnergySegmenter::new(config.detector_config());
    let transcriber = TranscriberHandle::new(StubTranscriber::new(config.transcriber_config()));
    let synthesizer = SynthHandle::new(StubSynthesizer::new(config.synthesizer_config()));
    let synth_sample_rate = synthesizer.sample_rate();

    let signals = TurnSignals::new();

    let (recognizer, segment_rx) = Recognizer::new(
        Box::new(detector),
        transcriber,
        config.wake_word.clone(),
        config.sample_rate,
    );
    let recognizer = Arc::new(recognizer.with_turn_signals(signals.clone()));

    // In always-mode the player watches the interrupt flag directly; in
    // wait-mode the microphone is gated instead and the flag is ignored.
    let external_interrupt = match config.interrupt_mode {
        InterruptMode::Always => Some(Arc::clone(&signals.interrupt)),
        InterruptMode::Wait => None,
    };
    let player = AudioPlayer::new(synth_sample_rate, config.audio_buffer_ms, external_interrupt)
        .context("failed to open the output device")?;

    let feed = Arc::clone(&recognizer);
    let capture = AudioCapture::new(config.sample_rate, move |samples| {
        feed.accept_waveform(samples)
    });

    let mut assistant = Assistant::new(
        config.assistant_config(),
        capture,
        recognizer,
        segment_rx,
        synthesizer,
        chat,
        Arc::new(player),
        signals,
    );
    assistant
        .start()
        .context("failed to start the voice pipeline")?;

    match &config.wake_word {
        Some(word) => info!(wake_word = %word, "listening for the wake word"),
        None => info!("listening (speak to interact, Ctrl+C to quit)"),
    }

    wait_for_shutdown().await;

    assistant.shutdown();
    info!("voxa stopped");
    Ok(())
}

/// Block until Ctrl+C or (on Unix) SIGTERM.
async fn wait_for_shutdown() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("received Ctrl+C, shutting down"),
                    _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                error!(error = %e, "failed to register SIGTERM handler");
                let _ = ctrl_c.await;
                info!("received Ctrl+C, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        info!("received Ctrl+C, shutting down");
    }
}
