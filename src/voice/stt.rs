//! Speech-to-text (STT) processing

use async_trait::async_trait;

use crate::config::SpeechConfig;
use crate::http;
use crate::{Error, Result};

/// Transcription capability
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe a WAV container to text
    ///
    /// # Errors
    ///
    /// Returns error if the service call fails
    async fn transcribe(&self, audio: Vec<u8>, language: Option<&str>) -> Result<String>;
}

/// Response from the transcription API
#[derive(serde::Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    text: String,
}

/// Transcribes speech to text via an OpenAI-compatible API
pub struct SpeechToText {
    client: reqwest::Client,
    api_key: String,
    api_base: String,
    model: String,
}

impl SpeechToText {
    /// Create a new STT instance
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(api_key: String, api_base: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for transcription".to_string(),
            ));
        }

        Ok(Self {
            client: http::client()?,
            api_key,
            api_base,
            model,
        })
    }

    /// Create from speech configuration
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn from_config(api_key: &str, speech: &SpeechConfig) -> Result<Self> {
        Self::new(
            api_key.to_string(),
            speech.api_base.clone(),
            speech.stt_model.clone(),
        )
    }
}

#[async_trait]
impl Transcriber for SpeechToText {
    async fn transcribe(&self, audio: Vec<u8>, language: Option<&str>) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), model = %self.model, "starting transcription");

        let mut form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio)
                    .file_name("utterance.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("model", self.model.clone())
            .text("response_format", "json");
        if let Some(language) = language {
            form = form.text("language", language.to_string());
        }

        let response = self
            .client
            .post(http::endpoint(&self.api_base, "audio/transcriptions"))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "transcription request failed");
                e
            })?;

        let response = http::check_status(response).await.map_err(|msg| {
            tracing::error!(error = %msg, "transcription API error");
            Error::Stt(msg)
        })?;

        let result: TranscriptionResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse transcription response");
            e
        })?;

        let text = result.text.trim().to_string();
        tracing::debug!(transcript = %text, "transcription complete");
        Ok(text)
    }
}
