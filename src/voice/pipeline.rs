//! Real-time wake, record and hand-off loop
//!
//! Runs on a dedicated blocking worker, consuming frames from the capture queue. Each
//! frame feeds the pre-roll buffer and, unless the assistant is speaking, the wake word
//! gate. A trigger records the utterance, saves it, and blocks on the handler until the
//! turn completes.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};

use super::capture::CaptureStream;
use super::handler::{SpeakingFlag, TurnOutcome};
use super::recorder::UtteranceRecorder;
use super::ring::PreRollBuffer;
use super::wake_word::{KeywordModel, WakeWordDetector};
use super::wav::UtteranceStore;
use super::Frame;
use crate::config::Config;
use crate::{Error, Result};

/// How long to wait for a frame before re-checking the stop flag
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Destination for recorded utterances
pub trait UtteranceSink {
    /// Process one utterance, returning once its turn is complete
    ///
    /// # Errors
    ///
    /// Returns error if the turn failed
    fn submit(&self, utterance: PathBuf) -> Result<TurnOutcome>;
}

/// What became of a single frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    /// Buffered; the gate did not fire
    Listening,
    /// Buffered only; the assistant is speaking
    Suppressed,
    /// The gate fired and a turn ran for the saved utterance, if any was captured
    Triggered(Option<PathBuf>),
}

/// The capture-side state machine
pub struct PipelineController<M, S> {
    ring: PreRollBuffer,
    detector: WakeWordDetector<M>,
    recorder: UtteranceRecorder,
    store: UtteranceStore,
    speaking: SpeakingFlag,
    sink: S,
    flush_after_response: bool,
}

impl<M: KeywordModel, S: UtteranceSink> PipelineController<M, S> {
    /// Assemble a controller from its parts
    #[must_use]
    pub fn new(
        detector: WakeWordDetector<M>,
        recorder: UtteranceRecorder,
        store: UtteranceStore,
        pre_roll_frames: usize,
        speaking: SpeakingFlag,
        sink: S,
    ) -> Self {
        Self {
            ring: PreRollBuffer::new(pre_roll_frames),
            detector,
            recorder,
            store,
            speaking,
            sink,
            flush_after_response: true,
        }
    }

    /// Build a controller from configuration
    #[must_use]
    pub fn from_config(config: &Config, model: M, speaking: SpeakingFlag, sink: S) -> Self {
        Self::new(
            WakeWordDetector::from_config(model, &config.wake_word),
            UtteranceRecorder::from_config(&config.audio),
            UtteranceStore::new(config.voice_dir(), config.audio.sample_rate),
            config.audio.pre_roll_frames(),
            speaking,
            sink,
        )
        .with_flush_after_response(config.audio.flush_after_response)
    }

    /// Discard audio captured during a turn before listening again
    #[must_use]
    pub const fn with_flush_after_response(mut self, flush: bool) -> Self {
        self.flush_after_response = flush;
        self
    }

    /// Pre-roll buffer contents
    #[must_use]
    pub const fn pre_roll(&self) -> &PreRollBuffer {
        &self.ring
    }

    /// Consume frames until `stop` is set or the input fails
    ///
    /// # Errors
    ///
    /// Returns `Error::Audio` if the capture stream reports a failure or the queue closes
    pub fn run(
        &mut self,
        frames: &Receiver<Frame>,
        stream: &impl CaptureStream,
        stop: &AtomicBool,
    ) -> Result<()> {
        tracing::info!(wake_word = %self.detector.wake_word(), "listening");

        loop {
            if stop.load(Ordering::Acquire) {
                tracing::debug!("pipeline stop requested");
                return Ok(());
            }
            if let Some(reason) = stream.failure() {
                return Err(Error::Audio(reason));
            }

            match frames.recv_timeout(POLL_INTERVAL) {
                Ok(frame) => {
                    self.process_frame(frame, frames);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(Error::Audio("audio input stream closed".to_string()));
                }
            }
        }
    }

    /// Handle one frame pulled from `frames`
    ///
    /// On a trigger this records from the same queue and blocks until the turn is done.
    pub fn process_frame(&mut self, frame: Frame, frames: &Receiver<Frame>) -> FrameEvent {
        if self.speaking.is_set() {
            self.ring.push(frame);
            return FrameEvent::Suppressed;
        }

        let triggered = self.detector.detect(&frame);
        self.ring.push(frame);
        if !triggered {
            return FrameEvent::Listening;
        }

        let utterance = self.capture(frames);
        if let Some(path) = &utterance {
            match self.sink.submit(path.clone()) {
                Ok(outcome) => tracing::debug!(?outcome, "utterance handled"),
                Err(e) => tracing::error!(error = %e, "voice handler error"),
            }
        }

        if self.flush_after_response {
            self.flush(frames);
        }
        FrameEvent::Triggered(utterance)
    }

    /// Record after a trigger and persist pre-roll plus utterance
    fn capture(&mut self, frames: &Receiver<Frame>) -> Option<PathBuf> {
        let mut audio = self.ring.snapshot();
        let recorded = self.recorder.record(frames);
        tracing::debug!(
            pre_roll = audio.len(),
            recorded = recorded.len(),
            "utterance captured"
        );
        audio.extend(recorded);

        match self.store.write(&audio) {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!(error = %e, "failed to save utterance");
                None
            }
        }
    }

    fn flush(&mut self, frames: &Receiver<Frame>) {
        let dropped = frames.try_iter().count();
        self.ring.clear();
        if dropped > 0 {
            tracing::debug!(frames = dropped, "discarded audio queued during turn");
        }
    }
}
