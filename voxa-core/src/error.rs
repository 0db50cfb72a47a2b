use thiserror::Error;

/// All errors produced by voxa-core.
#[derive(Debug, Error)]
pub enum VoxaError {
    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("no default output device found")]
    NoDefaultOutputDevice,

    #[error("transcription error: {0}")]
    Transcription(String),

    #[error("synthesis error: {0}")]
    Synthesis(String),

    #[error("conversation error: {0}")]
    Conversation(String),

    #[error("pipeline is already running")]
    AlreadyRunning,

    #[error("pipeline is not running")]
    NotRunning,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, VoxaError>;
