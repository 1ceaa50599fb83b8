//! Configuration management for the voice assistant

pub mod file;

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Error, Result};

use file::VoiceConfigFile;

/// Default OpenAI-compatible API base
pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// Default agent system prompt
const DEFAULT_SYSTEM_PROMPT: &str = "You are a voice assistant. Replies are spoken aloud, \
    so keep them short and conversational and avoid markdown, lists and code.";

/// Voice assistant configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Wake word detection
    pub wake_word: WakeWordConfig,

    /// Capture, endpointing and device selection
    pub audio: AudioConfig,

    /// Transcription and synthesis service
    pub speech: SpeechConfig,

    /// Conversational agent
    pub agent: AgentConfig,

    /// API keys
    pub api_keys: ApiKeys,

    /// Path to data directory (models, recordings, replies)
    pub data_dir: PathBuf,
}

/// Wake word configuration
#[derive(Debug, Clone)]
pub struct WakeWordConfig {
    /// Wake word label as the model reports it (case, `_` and spacing are ignored)
    pub word: String,

    /// Classifier model files; empty means every classifier in `model_dir`
    pub models: Vec<PathBuf>,

    /// Directory holding the shared feature models
    pub model_dir: PathBuf,

    /// Detection threshold in [0, 1]
    pub threshold: f32,

    /// Minimum seconds between accepted triggers
    pub cooldown_secs: f64,
}

impl WakeWordConfig {
    /// Cooldown as a duration
    #[must_use]
    pub fn cooldown(&self) -> Duration {
        Duration::try_from_secs_f64(self.cooldown_secs).unwrap_or_default()
    }
}

/// Runtime audio configuration
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Capture sample rate (Hz)
    pub sample_rate: u32,

    /// Frame duration (ms)
    pub chunk_ms: u32,

    /// Look-back window kept before a trigger (ms)
    pub pre_roll_ms: u32,

    /// Hard cap on a recording (s)
    pub max_record_seconds: f64,

    /// Recording never ends on silence before this (s)
    pub min_record_seconds: f64,

    /// Frames with RMS below this (i16 units) count as silence
    pub silence_threshold: f32,

    /// Silence run that ends a recording (ms)
    pub silence_ms: u32,

    /// Input device selector (index or name); `None` uses the system default
    pub input_device: Option<String>,

    /// Output device selector (index or name); `None` uses the system default
    pub output_device: Option<String>,

    /// Discard audio captured while a response was being handled
    pub flush_after_response: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            chunk_ms: 80,
            pre_roll_ms: 1000,
            max_record_seconds: 15.0,
            min_record_seconds: 1.0,
            silence_threshold: 500.0,
            silence_ms: 800,
            input_device: None,
            output_device: None,
            flush_after_response: true,
        }
    }
}

impl AudioConfig {
    /// Samples per frame
    #[must_use]
    pub fn frame_samples(&self) -> usize {
        usize::try_from(u64::from(self.sample_rate) * u64::from(self.chunk_ms) / 1000)
            .unwrap_or(0)
    }

    /// Capacity of the pre-roll ring buffer
    #[must_use]
    pub fn pre_roll_frames(&self) -> usize {
        self.frames_for_ms(u64::from(self.pre_roll_ms))
    }

    /// Frame count at which a recording always stops
    #[must_use]
    pub fn max_frames(&self) -> usize {
        self.frames_for_secs(self.max_record_seconds)
    }

    /// Frame count before silence may end a recording
    #[must_use]
    pub fn min_frames(&self) -> usize {
        self.frames_for_secs(self.min_record_seconds)
    }

    /// Consecutive quiet frames that end a recording
    #[must_use]
    pub fn silence_frames(&self) -> usize {
        self.frames_for_ms(u64::from(self.silence_ms))
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn frames_for_secs(&self, secs: f64) -> usize {
        if self.chunk_ms == 0 {
            return 1;
        }
        // Truncated, like the millisecond-based counts
        let frames = (secs.max(0.0) * 1000.0 / f64::from(self.chunk_ms)).trunc();
        (frames as usize).max(1)
    }

    fn frames_for_ms(&self, ms: u64) -> usize {
        if self.chunk_ms == 0 {
            return 1;
        }
        usize::try_from(ms / u64::from(self.chunk_ms))
            .unwrap_or(usize::MAX)
            .max(1)
    }
}

/// Container format of synthesized replies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioFormat {
    #[default]
    Wav,
    Mp3,
}

impl AudioFormat {
    /// Format name as the speech API expects it
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::Mp3 => "mp3",
        }
    }
}

impl std::str::FromStr for AudioFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wav" => Ok(Self::Wav),
            "mp3" => Ok(Self::Mp3),
            other => Err(Error::Config(format!(
                "unsupported tts format '{other}' (expected wav or mp3)"
            ))),
        }
    }
}

/// Speech service configuration
#[derive(Debug, Clone)]
pub struct SpeechConfig {
    /// Base URL of the OpenAI-compatible audio API
    pub api_base: String,

    /// STT model identifier
    pub stt_model: String,

    /// TTS model identifier
    pub tts_model: String,

    /// TTS voice identifier
    pub tts_voice: String,

    /// TTS speed multiplier (0.25 to 4.0)
    pub tts_speed: f32,

    /// TTS container format
    pub tts_format: AudioFormat,

    /// Language hint passed to transcription
    pub language: Option<String>,
}

/// Agent configuration
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Base URL of the OpenAI-compatible chat API
    pub api_base: String,

    /// Chat model identifier
    pub model: String,

    /// System prompt sent with every request
    pub system_prompt: String,

    /// Max tokens per reply
    pub max_tokens: u32,

    /// Messages kept per session (in memory only)
    pub max_history: usize,
}

/// API keys for external services
#[derive(Clone, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (transcription, synthesis, agent)
    pub openai: Option<String>,
}

impl std::fmt::Debug for ApiKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeys")
            .field("openai", &self.openai.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Default data directory (`~/.local/share/omni/beacon-voice` on Linux)
#[must_use]
pub fn default_data_dir() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from(".beacon-voice"),
        |d| d.data_dir().join("omni").join("beacon-voice"),
    )
}

impl Config {
    /// Load configuration (env > toml > default)
    ///
    /// # Errors
    ///
    /// Returns error if the config file cannot be read or the result is invalid
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = Self::load_unvalidated(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration without validating it
    ///
    /// For diagnostics that need only part of the configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the config file cannot be read
    pub fn load_unvalidated(path: Option<&Path>) -> Result<Self> {
        let fc = file::load_config_file(path)?;
        Ok(Self::from_sources(fc, |key| std::env::var(key).ok()))
    }

    /// Merge a parsed config file with an environment lookup
    ///
    /// Does not validate; call [`Config::validate`] on the result.
    #[must_use]
    pub fn from_sources(fc: VoiceConfigFile, env: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = env("BEACON_VOICE_DATA_DIR")
            .or(fc.data_dir)
            .map_or_else(default_data_dir, PathBuf::from);

        let ww = fc.wake_word;
        let wake_word = WakeWordConfig {
            word: env("BEACON_WAKE_WORD")
                .or(ww.word)
                .unwrap_or_else(|| "hey jarvis".to_string()),
            models: ww
                .models
                .unwrap_or_default()
                .into_iter()
                .map(|p| expand_home(&p))
                .collect(),
            model_dir: env("BEACON_WAKEWORD_MODEL_DIR")
                .or(ww.model_dir)
                .map_or_else(|| data_dir.join("models"), |p| expand_home(&p)),
            threshold: ww.threshold.unwrap_or(0.5),
            cooldown_secs: ww.cooldown_secs.unwrap_or(2.0),
        };

        let defaults = AudioConfig::default();
        let a = fc.audio;
        let audio = AudioConfig {
            sample_rate: a.sample_rate.unwrap_or(defaults.sample_rate),
            chunk_ms: a.chunk_ms.unwrap_or(defaults.chunk_ms),
            pre_roll_ms: a.pre_roll_ms.unwrap_or(defaults.pre_roll_ms),
            max_record_seconds: a.max_record_seconds.unwrap_or(defaults.max_record_seconds),
            min_record_seconds: a.min_record_seconds.unwrap_or(defaults.min_record_seconds),
            silence_threshold: a.silence_threshold.unwrap_or(defaults.silence_threshold),
            silence_ms: a.silence_ms.unwrap_or(defaults.silence_ms),
            input_device: env("BEACON_INPUT_DEVICE")
                .or(a.input_device)
                .filter(|s| !s.trim().is_empty()),
            output_device: env("BEACON_OUTPUT_DEVICE")
                .or(a.output_device)
                .filter(|s| !s.trim().is_empty()),
            flush_after_response: a
                .flush_after_response
                .unwrap_or(defaults.flush_after_response),
        };

        let s = fc.speech;
        let speech_base = env("OPENAI_API_BASE")
            .or(s.api_base)
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        let tts_format = s
            .tts_format
            .as_deref()
            .map_or(Ok(AudioFormat::Wav), str::parse)
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "falling back to wav");
                AudioFormat::Wav
            });
        let speech = SpeechConfig {
            api_base: trim_base(&speech_base),
            stt_model: env("BEACON_STT_MODEL")
                .or(s.stt_model)
                .unwrap_or_else(|| "gpt-4o-mini-transcribe".to_string()),
            tts_model: env("BEACON_TTS_MODEL")
                .or(s.tts_model)
                .unwrap_or_else(|| "gpt-4o-mini-tts".to_string()),
            tts_voice: s.tts_voice.unwrap_or_else(|| "alloy".to_string()),
            tts_speed: s.tts_speed.unwrap_or(1.0),
            tts_format,
            language: env("BEACON_LANGUAGE")
                .or(s.language)
                .filter(|l| !l.trim().is_empty()),
        };

        let ag = fc.agent;
        let agent = AgentConfig {
            api_base: env("BEACON_AGENT_API_BASE")
                .or(ag.api_base)
                .map_or_else(|| speech.api_base.clone(), |b| trim_base(&b)),
            model: env("BEACON_LLM_MODEL")
                .or(ag.model)
                .unwrap_or_else(|| "gpt-4o-mini".to_string()),
            system_prompt: ag
                .system_prompt
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            max_tokens: ag.max_tokens.unwrap_or(512),
            max_history: ag.max_history.unwrap_or(20),
        };

        let api_keys = ApiKeys {
            openai: env("OPENAI_API_KEY")
                .or(fc.api_keys.openai)
                .filter(|k| !k.trim().is_empty()),
        };

        Self {
            wake_word,
            audio,
            speech,
            agent,
            api_keys,
            data_dir,
        }
    }

    /// Check the invariants the pipeline relies on
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first violated invariant
    pub fn validate(&self) -> Result<()> {
        self.validate_audio()?;

        let ww = &self.wake_word;
        if ww.word.trim().is_empty() {
            return Err(Error::Config("wake word must not be empty".to_string()));
        }
        if !(0.0..=1.0).contains(&ww.threshold) {
            return Err(Error::Config(format!(
                "wake word threshold {} outside [0, 1]",
                ww.threshold
            )));
        }
        if !(ww.cooldown_secs >= 0.0 && ww.cooldown_secs.is_finite()) {
            return Err(Error::Config("cooldown_secs must be >= 0".to_string()));
        }

        if self.api_keys.openai.is_none() {
            return Err(Error::Config(
                "OpenAI API key missing. Set OPENAI_API_KEY or api_keys.openai".to_string(),
            ));
        }

        Ok(())
    }

    /// Check the audio section alone
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first violated invariant
    pub fn validate_audio(&self) -> Result<()> {
        let a = &self.audio;
        if a.sample_rate == 0 || a.chunk_ms == 0 || a.frame_samples() == 0 {
            return Err(Error::Config(format!(
                "chunk_ms={} at sample_rate={} yields no samples per frame",
                a.chunk_ms, a.sample_rate
            )));
        }
        if !(a.min_record_seconds >= 0.0 && a.max_record_seconds >= a.min_record_seconds) {
            return Err(Error::Config(format!(
                "max_record_seconds ({}) must be >= min_record_seconds ({})",
                a.max_record_seconds, a.min_record_seconds
            )));
        }
        if !(a.silence_threshold >= 0.0) {
            return Err(Error::Config("silence_threshold must be >= 0".to_string()));
        }
        Ok(())
    }

    /// Directory for recordings and synthesized replies
    #[must_use]
    pub fn voice_dir(&self) -> PathBuf {
        self.data_dir.join("voice")
    }
}

fn trim_base(base: &str) -> String {
    base.trim().trim_end_matches('/').to_string()
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(dirs) = directories::BaseDirs::new() {
            return dirs.home_dir().join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn with_key() -> VoiceConfigFile {
        file::parse_config("[api_keys]\nopenai = \"sk-test\"\n").unwrap()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::from_sources(with_key(), env_from(&[]));
        config.validate().unwrap();

        assert_eq!(config.audio.frame_samples(), 1280);
        assert_eq!(config.audio.pre_roll_frames(), 12);
        assert_eq!(config.audio.max_frames(), 187);
        assert_eq!(config.audio.min_frames(), 12);
        assert_eq!(config.audio.silence_frames(), 10);
        assert_eq!(config.speech.tts_format, AudioFormat::Wav);
        assert_eq!(config.agent.api_base, DEFAULT_API_BASE);
    }

    #[test]
    fn test_env_overrides_file() {
        let fc = file::parse_config(
            "[wake_word]\nword = \"from file\"\n[api_keys]\nopenai = \"file-key\"\n",
        )
        .unwrap();
        let config = Config::from_sources(
            fc,
            env_from(&[
                ("BEACON_WAKE_WORD", "from env"),
                ("OPENAI_API_KEY", "env-key"),
                ("OPENAI_API_BASE", "http://localhost:8080/v1/"),
            ]),
        );

        assert_eq!(config.wake_word.word, "from env");
        assert_eq!(config.api_keys.openai.as_deref(), Some("env-key"));
        assert_eq!(config.speech.api_base, "http://localhost:8080/v1");
        assert_eq!(config.agent.api_base, "http://localhost:8080/v1");
    }

    #[test]
    fn test_frame_counts_floor_at_one() {
        let audio = AudioConfig {
            pre_roll_ms: 10,
            min_record_seconds: 0.0,
            silence_ms: 0,
            ..AudioConfig::default()
        };
        assert_eq!(audio.pre_roll_frames(), 1);
        assert_eq!(audio.min_frames(), 1);
        assert_eq!(audio.silence_frames(), 1);
    }

    #[test]
    fn test_frame_counts_truncate_fractional_seconds() {
        let audio = AudioConfig {
            chunk_ms: 1,
            min_record_seconds: 0.0799,
            max_record_seconds: 0.0805,
            ..AudioConfig::default()
        };
        assert_eq!(audio.min_frames(), 79);
        assert_eq!(audio.max_frames(), 80);

        let audio = AudioConfig {
            max_record_seconds: 15.0,
            ..AudioConfig::default()
        };
        assert_eq!(audio.max_frames(), 187);
    }

    #[test]
    fn test_rejects_zero_frame_length() {
        let mut config = Config::from_sources(with_key(), env_from(&[]));
        config.audio.sample_rate = 8000;
        config.audio.chunk_ms = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        config.audio.chunk_ms = 1;
        config.audio.sample_rate = 999;
        assert_eq!(config.audio.frame_samples(), 0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_max_below_min() {
        let mut config = Config::from_sources(with_key(), env_from(&[]));
        config.audio.min_record_seconds = 3.0;
        config.audio.max_record_seconds = 2.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_threshold_and_missing_key() {
        let mut config = Config::from_sources(with_key(), env_from(&[]));
        config.wake_word.threshold = 1.5;
        assert!(config.validate().is_err());

        let config = Config::from_sources(VoiceConfigFile::default(), env_from(&[]));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_audio_format_parse() {
        assert_eq!("MP3".parse::<AudioFormat>().unwrap(), AudioFormat::Mp3);
        assert!("ogg".parse::<AudioFormat>().is_err());
    }

    #[test]
    fn test_api_key_is_redacted_in_debug() {
        let keys = ApiKeys {
            openai: Some("sk-secret".to_string()),
        };
        assert!(!format!("{keys:?}").contains("sk-secret"));
    }
}
