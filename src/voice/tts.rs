//! Text-to-speech (TTS) processing

use async_trait::async_trait;

use crate::config::{AudioFormat, SpeechConfig};
use crate::http;
use crate::{Error, Result};

/// Speech synthesis capability
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize text into an audio container
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}

/// Synthesizes speech via an OpenAI-compatible API
pub struct TextToSpeech {
    client: reqwest::Client,
    api_key: String,
    api_base: String,
    model: String,
    voice: String,
    speed: f32,
    format: AudioFormat,
}

impl TextToSpeech {
    /// Create a new TTS instance
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(api_key: String, speech: &SpeechConfig) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("OpenAI API key required for TTS".to_string()));
        }

        Ok(Self {
            client: http::client()?,
            api_key,
            api_base: speech.api_base.clone(),
            model: speech.tts_model.clone(),
            voice: speech.tts_voice.clone(),
            speed: speech.tts_speed,
            format: speech.tts_format,
        })
    }

    /// Container format of synthesized audio
    #[must_use]
    pub const fn format(&self) -> AudioFormat {
        self.format
    }
}

#[async_trait]
impl Synthesizer for TextToSpeech {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            response_format: &'a str,
            speed: f32,
        }

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            response_format: self.format.as_str(),
            speed: self.speed,
        };

        tracing::debug!(chars = text.len(), voice = %self.voice, "synthesizing speech");

        let response = self
            .client
            .post(http::endpoint(&self.api_base, "audio/speech"))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let response = http::check_status(response)
            .await
            .map_err(|msg| Error::Tts(format!("speech API error {msg}")))?;

        let audio = response.bytes().await?;
        if audio.is_empty() {
            return Err(Error::Tts("speech API returned no audio".to_string()));
        }
        Ok(audio.to_vec())
    }
}
