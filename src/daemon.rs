//! Daemon - the voice assistant service
//!
//! Wires the capture worker to the async turn handler and runs both until shutdown.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::agent::ChatAgent;
use crate::voice::{
    self, AudioPlayback, Capabilities, CpalFrameSource, FrameSource, HandlerBridge, KeywordModel,
    PipelineController, SpeakingFlag, SpeechToText, TextToSpeech, UtteranceHandler,
};
use crate::{Config, Error, Result};

/// The voice assistant daemon
pub struct VoiceAssistant {
    config: Config,
    handler: Arc<UtteranceHandler>,
    speaking: SpeakingFlag,
}

impl VoiceAssistant {
    /// Build the assistant and its service clients
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing or a client cannot be created
    pub fn new(config: Config) -> Result<Self> {
        let api_key = config
            .api_keys
            .openai
            .clone()
            .ok_or_else(|| Error::Config("OpenAI API key missing".to_string()))?;

        let caps = Capabilities {
            transcriber: Arc::new(SpeechToText::from_config(&api_key, &config.speech)?),
            agent: Arc::new(ChatAgent::new(api_key.clone(), &config.agent)?),
            synthesizer: Arc::new(TextToSpeech::new(api_key, &config.speech)?),
            playback: Arc::new(AudioPlayback::new(config.audio.output_device.clone())),
        };

        tracing::debug!(
            stt_model = %config.speech.stt_model,
            tts_model = %config.speech.tts_model,
            llm_model = %config.agent.model,
            api_base = %config.speech.api_base,
            "service clients initialized"
        );

        Ok(Self::with_capabilities(config, caps))
    }

    /// Build the assistant around existing capabilities
    #[must_use]
    pub fn with_capabilities(config: Config, caps: Capabilities) -> Self {
        let speaking = SpeakingFlag::new();
        let handler = UtteranceHandler::new(
            caps,
            speaking.clone(),
            config.voice_dir(),
            config.speech.tts_format,
            config.speech.language.clone(),
        );
        Self {
            config,
            handler: Arc::new(handler),
            speaking,
        }
    }

    /// Get the wake word this assistant listens for
    #[must_use]
    pub fn wake_word(&self) -> &str {
        &self.config.wake_word.word
    }

    /// Run on the configured input device until `shutdown` resolves
    ///
    /// # Errors
    ///
    /// Returns error if the keyword model or input device cannot be opened, or capture
    /// fails while running
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let source = CpalFrameSource::new(&self.config.audio);
        let wake_word = self.config.wake_word.clone();
        self.run_with(
            move || Ok((source, voice::load_keyword_model(&wake_word)?)),
            shutdown,
        )
        .await
    }

    /// Run with a caller-supplied frame source and keyword model
    ///
    /// `setup` runs on the capture worker, so sources whose streams are not `Send` can be
    /// opened there.
    ///
    /// # Errors
    ///
    /// Returns error if `setup` fails, the source cannot be opened, or capture fails
    pub async fn run_with<F, M, L>(self, setup: L, shutdown: impl Future<Output = ()>) -> Result<()>
    where
        F: FrameSource + 'static,
        M: KeywordModel + 'static,
        L: FnOnce() -> Result<(F, M)> + Send + 'static,
    {
        let (bridge, inbox) = voice::bridge();
        let server = tokio::spawn(voice::serve(Arc::clone(&self.handler), inbox));

        let stop = Arc::new(AtomicBool::new(false));
        let mut worker = {
            let stop = Arc::clone(&stop);
            let config = self.config.clone();
            let speaking = self.speaking.clone();
            tokio::task::spawn_blocking(move || {
                let (source, model) = setup()?;
                capture_loop(&config, &source, model, speaking, bridge, &stop)
            })
        };

        tracing::info!(wake_word = %self.wake_word(), "voice assistant running");

        tokio::pin!(shutdown);
        let joined = tokio::select! {
            res = &mut worker => res,
            () = &mut shutdown => {
                tracing::info!("shutdown requested");
                stop.store(true, Ordering::Release);
                worker.await
            }
        };

        // The worker owned the last bridge handle, so the server drains and exits
        if let Err(e) = server.await {
            tracing::warn!(error = %e, "handler task ended abnormally");
        }

        let result = joined.map_err(|e| Error::Audio(format!("capture worker failed: {e}")))?;
        tracing::info!("voice assistant stopped");
        result
    }
}

fn capture_loop<F: FrameSource, M: KeywordModel>(
    config: &Config,
    source: &F,
    model: M,
    speaking: SpeakingFlag,
    bridge: HandlerBridge,
    stop: &AtomicBool,
) -> Result<()> {
    let (tx, rx) = crossbeam_channel::unbounded();
    let stream = source.open(tx)?;
    let mut controller = PipelineController::from_config(config, model, speaking, bridge);
    controller.run(&rx, &stream, stop)
}
