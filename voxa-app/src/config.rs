//! CLI configuration for the voxa binary.
//!
//! Flags map onto the core's collaborator configs. Thread counts and the
//! hardware provider default to auto-selection; model paths derive from a
//! single model directory.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use voxa_core::{
    provider::{default_worker_threads, resolve_thread_count},
    AssistantConfig, DetectorConfig, InterruptMode, Provider, SynthesizerConfig,
    TranscriberConfig,
};

/// Speech shorter than this is treated as noise.
const MIN_SPEECH_SECS: f32 = 0.1;

/// Run-on speech is force-segmented at this length.
const MAX_SPEECH_SECS: f32 = 30.0;

/// Detector analysis window: 512 samples = 32 ms at 16 kHz.
const VAD_WINDOW_SIZE: usize = 512;

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful voice assistant. Keep responses brief and \
conversational, at most two or three short sentences. Your replies are read aloud, so use plain \
spoken language with normal punctuation and no formatting of any kind.";

#[derive(Parser, Debug, Clone)]
#[command(name = "voxa")]
#[command(author, version, about = "A local real-time voice assistant", long_about = None)]
pub struct AppConfig {
    /// Directory containing model files (detector, recognizer, voices)
    #[arg(long, short = 'd', env = "VOXA_MODEL_DIR", default_value_os_t = default_model_dir())]
    pub model_dir: PathBuf,

    /// Sample rate for speech recognition in Hz
    #[arg(long, default_value_t = 16_000)]
    pub sample_rate: u32,

    /// Speech activation threshold (0.0 - 1.0)
    #[arg(long, default_value_t = 0.5)]
    pub vad_threshold: f32,

    /// Silence in seconds before an utterance is considered finished
    #[arg(long, default_value_t = 0.8)]
    pub vad_silence: f32,

    /// Chat endpoint URL (Ollama-compatible API)
    #[arg(long, short = 'u', env = "VOXA_CHAT_ENDPOINT", default_value = "http://localhost:11434")]
    pub chat_endpoint: String,

    /// Chat model name
    #[arg(long, short = 'm', env = "VOXA_CHAT_MODEL", default_value = "gemma3:1b")]
    pub chat_model: String,

    /// System prompt for the conversation model
    #[arg(long, short = 'p', default_value = DEFAULT_SYSTEM_PROMPT)]
    pub system_prompt: String,

    /// Conversation turn pairs retained in history
    #[arg(long, default_value_t = 10)]
    pub max_history: usize,

    /// Sampling temperature (0.0 - 2.0); lower is more deterministic
    #[arg(long, default_value_t = 0.7, value_parser = parse_temperature)]
    pub temperature: f32,

    /// Speech speed multiplier (values below 1.0 speak slower)
    #[arg(long, default_value_t = 0.93)]
    pub voice_speed: f32,

    /// Voice name (e.g. af_bella, American female)
    #[arg(long, default_value = "af_bella")]
    pub voice: String,

    /// Speaker ID for multi-speaker voice banks (af_bella = 2)
    #[arg(long, default_value_t = 2)]
    pub speaker_id: i32,

    /// Recognition language code, or "auto" to detect
    #[arg(long, default_value = "en")]
    pub language: String,

    /// Hardware provider for all models; detected when omitted
    #[arg(long)]
    pub provider: Option<Provider>,

    /// Provider override for the recognizer only
    #[arg(long)]
    pub recognizer_provider: Option<Provider>,

    /// Provider override for the synthesizer only
    #[arg(long)]
    pub synthesizer_provider: Option<Provider>,

    /// Wake word gating the assistant (always listening when omitted)
    #[arg(long, short = 'w')]
    pub wake_word: Option<String>,

    /// 'always' pre-empts playback on speech (headsets); 'wait' pauses the
    /// microphone during playback (open speakers)
    #[arg(long, default_value_t = InterruptMode::Wait)]
    pub interrupt_mode: InterruptMode,

    /// Delay in ms before the microphone resumes after playback (wait mode)
    #[arg(long, default_value_t = 300)]
    pub post_playback_delay_ms: u64,

    /// Worker threads for all models (0 = auto: cores / 3)
    #[arg(long, default_value_t = 0)]
    pub num_threads: usize,

    /// Detector threads (0 = auto, typically 1)
    #[arg(long, default_value_t = 0)]
    pub vad_threads: usize,

    /// Recognizer threads (0 = use --num-threads)
    #[arg(long, default_value_t = 0)]
    pub recognizer_threads: usize,

    /// Synthesizer threads (0 = use --num-threads)
    #[arg(long, default_value_t = 0)]
    pub synthesizer_threads: usize,

    /// Playback device period in ms (0 = 100 ms, Bluetooth-friendly;
    /// use 20 for wired or built-in audio)
    #[arg(long, default_value_t = 0)]
    pub audio_buffer_ms: u32,

    /// Enable verbose logging
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

impl AppConfig {
    /// Resolve thread counts, where 0 means auto-selection.
    ///
    /// With CUDA the GPU parallelises internally, so model workers default
    /// to a single thread; on CPU a third of the cores keeps the
    /// recognizer, synthesizer and language model from oversubscribing a
    /// small machine. The detector is lightweight and defaults to one.
    pub fn normalize_thread_counts(&mut self) {
        let using_cuda = self.recognizer_provider() == Provider::Cuda
            || self.synthesizer_provider() == Provider::Cuda;
        let fallback = if using_cuda {
            1
        } else {
            default_worker_threads()
        };

        self.num_threads = resolve_thread_count(self.num_threads, fallback);
        self.vad_threads = resolve_thread_count(self.vad_threads, 1);
        self.recognizer_threads = resolve_thread_count(
            self.recognizer_threads,
            if self.recognizer_provider() == Provider::Cuda {
                1
            } else {
                self.num_threads
            },
        );
        self.synthesizer_threads = resolve_thread_count(
            self.synthesizer_threads,
            if self.synthesizer_provider() == Provider::Cuda {
                1
            } else {
                self.num_threads
            },
        );
    }

    /// Provider for the recognizer: subsystem override, then global, then
    /// platform detection.
    pub fn recognizer_provider(&self) -> Provider {
        self.recognizer_provider
            .or(self.provider)
            .unwrap_or_else(Provider::detect)
    }

    /// Provider for the synthesizer, resolved like the recognizer's.
    pub fn synthesizer_provider(&self) -> Provider {
        self.synthesizer_provider
            .or(self.provider)
            .unwrap_or_else(Provider::detect)
    }

    /// Language hint for the recognizer; empty requests auto-detection.
    pub fn recognition_language(&self) -> &str {
        if self.language.eq_ignore_ascii_case("auto") {
            ""
        } else {
            &self.language
        }
    }

    // ── model paths ──────────────────────────────────────────────────────
    //
    // These flow into the collaborator configs. The built-in backends are
    // model-free and never open them; a model-backed backend validates its
    // own files at construction.

    pub fn recognizer_encoder_path(&self) -> PathBuf {
        self.model_dir
            .join("whisper")
            .join("whisper-small-encoder.int8.onnx")
    }

    pub fn recognizer_decoder_path(&self) -> PathBuf {
        self.model_dir
            .join("whisper")
            .join("whisper-small-decoder.int8.onnx")
    }

    pub fn recognizer_tokens_path(&self) -> PathBuf {
        self.model_dir
            .join("whisper")
            .join("whisper-small-tokens.txt")
    }

    fn voice_dir(&self) -> PathBuf {
        self.model_dir.join("tts").join("kokoro-multi-lang-v1_0")
    }

    /// Lexicon file(s) for the configured voice. English and Chinese
    /// voices ship lexicons; other languages phonemize via the language
    /// code instead.
    pub fn voice_lexicon(&self) -> String {
        let dir = self.voice_dir();
        match self.voice.get(..2) {
            Some("af") | Some("am") => dir.join("lexicon-us-en.txt").to_string_lossy().into_owned(),
            Some("bf") | Some("bm") => dir.join("lexicon-gb-en.txt").to_string_lossy().into_owned(),
            Some("zf") | Some("zm") => format!(
                "{},{}",
                dir.join("lexicon-us-en.txt").to_string_lossy(),
                dir.join("lexicon-zh.txt").to_string_lossy()
            ),
            _ => String::new(),
        }
    }

    /// Phonemizer language code for voices without lexicon support.
    pub fn voice_language(&self) -> &'static str {
        match self.voice.get(..2) {
            Some("ef") | Some("em") => "es",
            Some("ff") => "fr",
            Some("hf") | Some("hm") => "hi",
            Some("if") | Some("im") => "it",
            Some("jf") | Some("jm") => "ja",
            Some("pf") | Some("pm") => "pt-br",
            _ => "",
        }
    }

    // ── collaborator configs ─────────────────────────────────────────────

    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            threshold: self.vad_threshold,
            min_silence_secs: self.vad_silence,
            min_speech_secs: MIN_SPEECH_SECS,
            max_speech_secs: MAX_SPEECH_SECS,
            window_size: VAD_WINDOW_SIZE,
            sample_rate: self.sample_rate,
            num_threads: self.vad_threads,
        }
    }

    pub fn transcriber_config(&self) -> TranscriberConfig {
        TranscriberConfig {
            encoder: self.recognizer_encoder_path(),
            decoder: self.recognizer_decoder_path(),
            tokens: self.recognizer_tokens_path(),
            language: self.recognition_language().to_string(),
            provider: self.recognizer_provider(),
            num_threads: self.recognizer_threads,
            ..TranscriberConfig::default()
        }
    }

    pub fn synthesizer_config(&self) -> SynthesizerConfig {
        let dir = self.voice_dir();
        SynthesizerConfig {
            model: dir.join("model.onnx"),
            voices: dir.join("voices.bin"),
            tokens: dir.join("tokens.txt"),
            data_dir: dir.join("espeak-ng-data"),
            lexicon: self.voice_lexicon(),
            language: self.voice_language().to_string(),
            provider: self.synthesizer_provider(),
            num_threads: self.synthesizer_threads,
        }
    }

    pub fn assistant_config(&self) -> AssistantConfig {
        AssistantConfig {
            interrupt_mode: self.interrupt_mode,
            post_playback_delay: Duration::from_millis(self.post_playback_delay_ms),
            speaker_id: self.speaker_id,
            speech_speed: self.voice_speed,
        }
    }

    /// Reject values the pipeline cannot work with.
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.vad_threshold) {
            return Err(format!(
                "vad threshold must be between 0.0 and 1.0, got {}",
                self.vad_threshold
            ));
        }
        if self.voice_speed <= 0.0 {
            return Err(format!(
                "voice speed must be positive, got {}",
                self.voice_speed
            ));
        }
        if self.sample_rate == 0 {
            return Err("sample rate must be non-zero".into());
        }
        if self.vad_silence <= 0.0 {
            return Err(format!(
                "vad silence must be positive, got {}",
                self.vad_silence
            ));
        }
        Ok(())
    }

    pub fn log_summary(&self) {
        info!(model_dir = %self.model_dir.display(), "configuration");
        info!(sample_rate = self.sample_rate, vad_threshold = self.vad_threshold, vad_silence = self.vad_silence, "  audio");
        info!(endpoint = %self.chat_endpoint, model = %self.chat_model, max_history = self.max_history, temperature = self.temperature, "  chat");
        info!(voice = %self.voice, speed = self.voice_speed, language = %self.language, "  voice");
        info!(
            recognizer = %self.recognizer_provider(),
            synthesizer = %self.synthesizer_provider(),
            vad_threads = self.vad_threads,
            recognizer_threads = self.recognizer_threads,
            synthesizer_threads = self.synthesizer_threads,
            "  providers"
        );
        info!(mode = %self.interrupt_mode, post_playback_delay_ms = self.post_playback_delay_ms, "  interruption");
        if let Some(word) = &self.wake_word {
            info!(wake_word = %word, "  activation");
        }
    }
}

/// Default model directory: ~/.voxa/models.
fn default_model_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".voxa").join("models"))
        .unwrap_or_else(|| PathBuf::from("models"))
}

/// Parse and range-check the sampling temperature.
fn parse_temperature(s: &str) -> Result<f32, String> {
    let value: f32 = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;
    if (0.0..=2.0).contains(&value) {
        Ok(value)
    } else {
        Err(format!(
            "temperature must be between 0.0 and 2.0, got {value}"
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> AppConfig {
        AppConfig::parse_from(["voxa"])
    }

    #[test]
    fn defaults_are_sane() {
        let config = defaults();
        assert_eq!(config.sample_rate, 16_000);
        assert_eq!(config.interrupt_mode, InterruptMode::Wait);
        assert_eq!(config.post_playback_delay_ms, 300);
        assert_eq!(config.max_history, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn thread_counts_resolve_from_zero() {
        let mut config = defaults();
        config.provider = Some(Provider::Cpu);
        config.normalize_thread_counts();

        assert!(config.num_threads >= 1);
        assert_eq!(config.vad_threads, 1);
        assert_eq!(config.recognizer_threads, config.num_threads);
        assert_eq!(config.synthesizer_threads, config.num_threads);
    }

    #[test]
    fn cuda_forces_single_threaded_model_workers() {
        let mut config = defaults();
        config.provider = Some(Provider::Cuda);
        config.normalize_thread_counts();

        assert_eq!(config.num_threads, 1);
        assert_eq!(config.recognizer_threads, 1);
        assert_eq!(config.synthesizer_threads, 1);
    }

    #[test]
    fn explicit_thread_counts_are_kept() {
        let mut config = defaults();
        config.provider = Some(Provider::Cpu);
        config.num_threads = 4;
        config.recognizer_threads = 2;
        config.normalize_thread_counts();

        assert_eq!(config.num_threads, 4);
        assert_eq!(config.recognizer_threads, 2);
        assert_eq!(config.synthesizer_threads, 4);
    }

    #[test]
    fn subsystem_provider_overrides_global() {
        let mut config = defaults();
        config.provider = Some(Provider::Cpu);
        config.recognizer_provider = Some(Provider::Cuda);

        assert_eq!(config.recognizer_provider(), Provider::Cuda);
        assert_eq!(config.synthesizer_provider(), Provider::Cpu);
    }

    #[test]
    fn auto_language_maps_to_empty_hint() {
        let mut config = defaults();
        config.language = "AUTO".to_string();
        assert_eq!(config.recognition_language(), "");

        config.language = "es".to_string();
        assert_eq!(config.recognition_language(), "es");
    }

    #[test]
    fn voice_prefix_selects_lexicon_or_language() {
        let mut config = defaults();

        config.voice = "af_bella".to_string();
        assert!(config.voice_lexicon().ends_with("lexicon-us-en.txt"));
        assert_eq!(config.voice_language(), "");

        config.voice = "bf_emma".to_string();
        assert!(config.voice_lexicon().ends_with("lexicon-gb-en.txt"));

        config.voice = "zf_xiaoxiao".to_string();
        assert!(config.voice_lexicon().contains("lexicon-zh.txt"));

        config.voice = "ff_siwis".to_string();
        assert!(config.voice_lexicon().is_empty());
        assert_eq!(config.voice_language(), "fr");
    }

    #[test]
    fn validate_rejects_bad_ranges() {
        let mut config = defaults();
        config.vad_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = defaults();
        config.voice_speed = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn interrupt_mode_parses_from_cli() {
        let config = AppConfig::parse_from(["voxa", "--interrupt-mode", "always"]);
        assert_eq!(config.interrupt_mode, InterruptMode::Always);
    }
}
