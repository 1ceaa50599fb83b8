//! Wake word detection
//!
//! Gates the audio stream on a keyword model's per-frame scores. The model itself is a
//! capability behind [`KeywordModel`]; threshold, keyword matching and cooldown live here.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::config::WakeWordConfig;
use crate::{Error, Result};

/// Per-keyword scores in [0, 1], keyed by the model's keyword label
pub type Scores = BTreeMap<String, f32>;

/// Acoustic keyword model
///
/// Called once per captured frame. Streaming models keep internal state between calls.
pub trait KeywordModel: Send {
    /// Score one frame of 16-bit mono PCM
    ///
    /// # Errors
    ///
    /// Returns error if inference fails
    fn predict(&mut self, frame: &[i16]) -> Result<Scores>;
}

impl<M: KeywordModel + ?Sized> KeywordModel for Box<M> {
    fn predict(&mut self, frame: &[i16]) -> Result<Scores> {
        (**self).predict(frame)
    }
}

/// State of the wake word detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    /// A sufficient score will trigger
    Armed,
    /// A trigger was accepted less than one cooldown ago
    Cooldown,
}

/// Normalize a keyword label: trim, lowercase, underscores to spaces
#[must_use]
pub fn normalize_keyword(name: &str) -> String {
    name.trim().to_lowercase().replace('_', " ")
}

/// Detects the wake word in a stream of frames
pub struct WakeWordDetector<M> {
    model: M,
    wake_word: String,
    threshold: f32,
    cooldown: Duration,
    last_trigger: Option<Instant>,
}

impl<M: KeywordModel> WakeWordDetector<M> {
    /// Create a detector over `model`
    pub fn new(model: M, wake_word: &str, threshold: f32, cooldown: Duration) -> Self {
        let wake_word = normalize_keyword(wake_word);

        tracing::debug!(wake_word, threshold, ?cooldown, "wake word detector initialized");

        Self {
            model,
            wake_word,
            threshold,
            cooldown,
            last_trigger: None,
        }
    }

    /// Create a detector from configuration
    pub fn from_config(model: M, config: &WakeWordConfig) -> Self {
        Self::new(model, &config.word, config.threshold, config.cooldown())
    }

    /// Return true if the wake word fires on this frame
    pub fn detect(&mut self, frame: &[i16]) -> bool {
        self.detect_at(frame, Instant::now())
    }

    /// [`detect`](Self::detect) against an explicit clock reading
    pub fn detect_at(&mut self, frame: &[i16], now: Instant) -> bool {
        // The model always sees the frame so streaming state keeps advancing
        let scores = match self.model.predict(frame) {
            Ok(scores) => scores,
            Err(e) => {
                tracing::warn!(error = %e, "keyword model prediction failed");
                return false;
            }
        };
        if scores.is_empty() {
            return false;
        }

        if self.state_at(now) == DetectorState::Cooldown {
            return false;
        }

        match self.match_keyword(&scores) {
            Some((keyword, score)) => {
                tracing::info!(keyword, score, "wake word detected");
                self.last_trigger = Some(now);
                true
            }
            None => false,
        }
    }

    /// First keyword scoring at or above the threshold
    ///
    /// When the configured wake word names one of the scored keywords only that keyword is
    /// considered; otherwise every keyword is, in label order.
    #[must_use]
    pub fn match_keyword<'a>(&self, scores: &'a Scores) -> Option<(&'a str, f32)> {
        let target = scores
            .iter()
            .find(|(key, _)| normalize_keyword(key) == self.wake_word);

        if let Some((key, score)) = target {
            return (*score >= self.threshold).then_some((key.as_str(), *score));
        }

        scores
            .iter()
            .find(|(_, score)| **score >= self.threshold)
            .map(|(key, score)| (key.as_str(), *score))
    }

    /// Armed or in cooldown at `now`
    #[must_use]
    pub fn state_at(&self, now: Instant) -> DetectorState {
        match self.last_trigger {
            Some(last) if now.saturating_duration_since(last) < self.cooldown => {
                DetectorState::Cooldown
            }
            _ => DetectorState::Armed,
        }
    }

    /// Normalized wake word
    #[must_use]
    pub fn wake_word(&self) -> &str {
        &self.wake_word
    }

    /// Timestamp of the last accepted trigger
    #[must_use]
    pub const fn last_trigger(&self) -> Option<Instant> {
        self.last_trigger
    }

    /// Re-arm immediately, forgetting the last trigger
    pub const fn reset(&mut self) {
        self.last_trigger = None;
    }
}

/// Support models shipped alongside keyword classifiers
const SUPPORT_MODELS: [&str; 3] = ["melspectrogram", "embedding_model", "silero_vad"];

/// Keyword label for a classifier file
///
/// The file stem with any trailing version tag dropped, so `hey_jarvis_v0.1.onnx`
/// becomes `hey_jarvis`.
#[must_use]
pub fn keyword_label(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    let label = match stem.rsplit_once("_v") {
        Some((head, version))
            if !head.is_empty()
                && !version.is_empty()
                && version.chars().all(|c| c.is_ascii_digit() || c == '.') =>
        {
            head
        }
        _ => stem,
    };
    Some(label.to_string())
}

/// Keyword classifier files to load
///
/// Explicit `models` are resolved against `model_dir`; otherwise every `.onnx` file in
/// `model_dir` that is not a support model, in name order.
///
/// # Errors
///
/// Returns error if a named model is missing, the directory cannot be read, or no
/// classifier is found
pub fn classifier_paths(model_dir: &Path, models: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let paths: Vec<PathBuf> = if models.is_empty() {
        let mut found: Vec<PathBuf> = std::fs::read_dir(model_dir)
            .map_err(|e| {
                Error::WakeWord(format!("cannot read model dir {}: {e}", model_dir.display()))
            })?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "onnx"))
            .filter(|p| {
                p.file_stem()
                    .and_then(|s| s.to_str())
                    .is_none_or(|s| !SUPPORT_MODELS.contains(&s))
            })
            .collect();
        found.sort();
        found
    } else {
        models
            .iter()
            .map(|m| if m.is_absolute() { m.clone() } else { model_dir.join(m) })
            .collect()
    };

    if let Some(missing) = paths.iter().find(|p| !p.is_file()) {
        return Err(Error::WakeWord(format!(
            "keyword model not found: {}",
            missing.display()
        )));
    }
    if paths.is_empty() {
        return Err(Error::WakeWord(format!(
            "no keyword models in {}",
            model_dir.display()
        )));
    }
    Ok(paths)
}

/// Load the configured keyword model
///
/// # Errors
///
/// Returns `Error::Dependency` when built without ONNX support, or a wake word error if
/// the model files cannot be loaded
#[cfg(feature = "onnx")]
pub fn load_keyword_model(config: &WakeWordConfig) -> Result<Box<dyn KeywordModel>> {
    let model = super::oww::OnnxKeywordModel::load(&config.model_dir, &config.models)?;
    Ok(Box::new(model))
}

/// Load the configured keyword model
///
/// # Errors
///
/// Returns `Error::Dependency` when built without ONNX support, or a wake word error if
/// the model files cannot be loaded
#[cfg(not(feature = "onnx"))]
pub fn load_keyword_model(config: &WakeWordConfig) -> Result<Box<dyn KeywordModel>> {
    let _ = config;
    Err(Error::Dependency(
        "wake word detection requires the `onnx` feature. \
         Rebuild with: cargo install beacon-voice --features onnx"
            .to_string(),
    ))
}
