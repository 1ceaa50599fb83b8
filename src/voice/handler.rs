//! Per-utterance turn: transcribe, ask the agent, speak the reply

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::playback::PlaybackSink;
use super::stt::Transcriber;
use super::tts::Synthesizer;
use crate::agent::{Agent, SessionKey};
use crate::config::AudioFormat;
use crate::Result;

/// Set while the assistant is playing a reply
///
/// Cloned handles share one flag. The capture side reads it to suppress wake word
/// detection on the assistant's own voice.
#[derive(Debug, Clone, Default)]
pub struct SpeakingFlag(Arc<AtomicBool>);

impl SpeakingFlag {
    /// Create a cleared flag
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a reply is currently playing
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Set the flag until the returned guard is dropped
    #[must_use = "the flag clears when the guard is dropped"]
    pub fn raise(&self) -> SpeakingGuard {
        self.0.store(true, Ordering::Release);
        SpeakingGuard(self.clone())
    }
}

/// Clears the speaking flag on drop
#[derive(Debug)]
pub struct SpeakingGuard(SpeakingFlag);

impl Drop for SpeakingGuard {
    fn drop(&mut self) {
        (self.0).0.store(false, Ordering::Release);
    }
}

/// How a turn ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Nothing intelligible was said (or transcription failed)
    NoTranscript,
    /// The agent had nothing to say
    NoReply,
    /// The reply could not be synthesized
    SynthesisFailed,
    /// The reply was played
    Spoken,
}

/// Services a turn is built from
pub struct Capabilities {
    /// Speech to text
    pub transcriber: Arc<dyn Transcriber>,
    /// Conversational agent
    pub agent: Arc<dyn Agent>,
    /// Text to speech
    pub synthesizer: Arc<dyn Synthesizer>,
    /// Speaker output
    pub playback: Arc<dyn PlaybackSink>,
}

/// Runs one conversational turn per recorded utterance
pub struct UtteranceHandler {
    caps: Capabilities,
    speaking: SpeakingFlag,
    voice_dir: PathBuf,
    format: AudioFormat,
    language: Option<String>,
    session: SessionKey,
}

impl UtteranceHandler {
    /// Create a handler writing replies under `voice_dir`
    #[must_use]
    pub fn new(
        caps: Capabilities,
        speaking: SpeakingFlag,
        voice_dir: impl Into<PathBuf>,
        format: AudioFormat,
        language: Option<String>,
    ) -> Self {
        Self {
            caps,
            speaking,
            voice_dir: voice_dir.into(),
            format,
            language,
            session: SessionKey::local_voice(),
        }
    }

    /// The flag this handler raises during playback
    #[must_use]
    pub fn speaking(&self) -> &SpeakingFlag {
        &self.speaking
    }

    /// Where the latest synthesized reply is written
    #[must_use]
    pub fn response_path(&self) -> PathBuf {
        self.voice_dir
            .join(format!("response.{}", self.format.as_str()))
    }

    /// Handle one recorded utterance
    ///
    /// # Errors
    ///
    /// Returns error if the recording cannot be read or the agent fails
    pub async fn handle(&self, utterance: &Path) -> Result<TurnOutcome> {
        let audio = tokio::fs::read(utterance).await?;

        let text = match self
            .caps
            .transcriber
            .transcribe(audio, self.language.as_deref())
            .await
        {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, "transcription failed");
                String::new()
            }
        };
        let text = text.trim();
        if text.is_empty() {
            tracing::debug!("empty transcript, ignoring utterance");
            return Ok(TurnOutcome::NoTranscript);
        }
        tracing::info!(transcript = %text, "heard");

        let reply = self.caps.agent.respond(text, &self.session).await?;
        let Some(reply) = reply.filter(|r| !r.trim().is_empty()) else {
            tracing::debug!("agent returned no reply");
            return Ok(TurnOutcome::NoReply);
        };
        tracing::info!(reply = %reply, "responding");

        let _speaking = self.speaking.raise();

        let speech = match self.caps.synthesizer.synthesize(&reply).await {
            Ok(speech) => speech,
            Err(e) => {
                tracing::error!(error = %e, "speech synthesis failed");
                return Ok(TurnOutcome::SynthesisFailed);
            }
        };

        let path = self.response_path();
        if let Err(e) = self.save_response(&path, &speech).await {
            tracing::warn!(path = %path.display(), error = %e, "failed to save reply audio");
        }

        let playback = Arc::clone(&self.caps.playback);
        if let Err(e) = tokio::task::spawn_blocking(move || playback.play(&speech)).await {
            tracing::error!(error = %e, "playback task failed");
        }

        Ok(TurnOutcome::Spoken)
    }

    async fn save_response(&self, path: &Path, speech: &[u8]) -> Result<()> {
        tokio::fs::create_dir_all(&self.voice_dir).await?;
        tokio::fs::write(path, speech).await?;
        Ok(())
    }
}
