//! TOML configuration file loading
//!
//! Supports `~/.config/omni/beacon-voice/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, Result};

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VoiceConfigFile {
    /// Wake word detection
    #[serde(default)]
    pub wake_word: WakeWordFileConfig,

    /// Capture, endpointing and devices
    #[serde(default)]
    pub audio: AudioFileConfig,

    /// Transcription and synthesis service
    #[serde(default)]
    pub speech: SpeechFileConfig,

    /// Conversational agent
    #[serde(default)]
    pub agent: AgentFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,

    /// Override for the data directory
    pub data_dir: Option<String>,
}

/// Wake word configuration
#[derive(Debug, Default, Deserialize)]
pub struct WakeWordFileConfig {
    /// Wake word label (e.g. "hey jarvis")
    pub word: Option<String>,

    /// Classifier model files; empty means every classifier in `model_dir`
    pub models: Option<Vec<String>>,

    /// Directory holding the shared feature models
    pub model_dir: Option<String>,

    /// Detection threshold in [0, 1]
    pub threshold: Option<f32>,

    /// Minimum seconds between accepted triggers
    pub cooldown_secs: Option<f64>,
}

/// Audio capture and endpointing configuration
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    pub sample_rate: Option<u32>,
    pub chunk_ms: Option<u32>,
    pub pre_roll_ms: Option<u32>,
    pub max_record_seconds: Option<f64>,
    pub min_record_seconds: Option<f64>,
    pub silence_threshold: Option<f32>,
    pub silence_ms: Option<u32>,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub flush_after_response: Option<bool>,
}

/// Speech service configuration
#[derive(Debug, Default, Deserialize)]
pub struct SpeechFileConfig {
    /// Base URL of the OpenAI-compatible audio API
    pub api_base: Option<String>,

    /// STT model (e.g. "gpt-4o-mini-transcribe")
    pub stt_model: Option<String>,

    /// TTS model (e.g. "gpt-4o-mini-tts")
    pub tts_model: Option<String>,

    /// TTS voice identifier (e.g. "alloy")
    pub tts_voice: Option<String>,

    /// TTS speed multiplier
    pub tts_speed: Option<f32>,

    /// TTS container format ("wav" or "mp3")
    pub tts_format: Option<String>,

    /// Language hint passed to transcription
    pub language: Option<String>,
}

/// Agent configuration
#[derive(Debug, Default, Deserialize)]
pub struct AgentFileConfig {
    pub api_base: Option<String>,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub max_tokens: Option<u32>,
    pub max_history: Option<usize>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
}

/// Load the TOML config file
///
/// With an explicit `path` the file must exist. Without one the standard location is
/// tried and a missing file yields `VoiceConfigFile::default()`.
///
/// # Errors
///
/// Returns error if an explicit file is missing, or if a file cannot be read or parsed
pub fn load_config_file(path: Option<&Path>) -> Result<VoiceConfigFile> {
    let path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "config file not found: {}",
                    p.display()
                )));
            }
            p.to_path_buf()
        }
        None => match config_file_path() {
            Some(p) if p.exists() => p,
            _ => return Ok(VoiceConfigFile::default()),
        },
    };

    let content = std::fs::read_to_string(&path)?;
    let config = parse_config(&content)?;
    tracing::info!(path = %path.display(), "loaded config file");
    Ok(config)
}

/// Parse TOML content into the file schema
///
/// # Errors
///
/// Returns error if the content is not valid for the schema
pub fn parse_config(content: &str) -> Result<VoiceConfigFile> {
    Ok(toml::from_str(content)?)
}

/// Return the config file path: `~/.config/omni/beacon-voice/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| {
        d.config_dir()
            .join("omni")
            .join("beacon-voice")
            .join("config.toml")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_partial_overlay() {
        let fc = parse_config(
            r#"
            [wake_word]
            word = "hey nano"
            threshold = 0.7

            [audio]
            chunk_ms = 40
            input_device = "USB"
            "#,
        )
        .unwrap();

        assert_eq!(fc.wake_word.word.as_deref(), Some("hey nano"));
        assert_eq!(fc.wake_word.threshold, Some(0.7));
        assert_eq!(fc.audio.chunk_ms, Some(40));
        assert_eq!(fc.audio.input_device.as_deref(), Some("USB"));
        assert!(fc.speech.stt_model.is_none());
        assert!(fc.api_keys.openai.is_none());
    }

    #[test]
    fn test_parse_rejects_unknown_section() {
        assert!(parse_config("[channels]\nslack = true\n").is_err());
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let err = load_config_file(Some(Path::new("/nonexistent/beacon-voice.toml")));
        assert!(matches!(err, Err(Error::Config(_))));
    }
}
