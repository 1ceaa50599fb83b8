//! Voice processing module
//!
//! Handles audio capture, wake word gating, utterance recording, and spoken replies.
//! Capture-side work runs on a blocking worker; turns run on the async runtime and are
//! reached through [`bridge`].

pub mod bridge;
pub mod capture;
mod frame;
pub mod handler;
#[cfg(feature = "onnx")]
pub mod oww;
pub mod pipeline;
pub mod playback;
pub mod recorder;
pub mod resample;
pub mod ring;
pub mod stt;
pub mod tts;
pub mod wake_word;
pub mod wav;

pub use bridge::{HandlerBridge, HandlerInbox, bridge, serve};
pub use capture::{CaptureStream, CpalFrameSource, FrameAssembler, FrameSource, list_devices};
pub use frame::{Frame, concat, rms};
pub use handler::{Capabilities, SpeakingFlag, SpeakingGuard, TurnOutcome, UtteranceHandler};
pub use pipeline::{FrameEvent, PipelineController, UtteranceSink};
pub use playback::{AudioPlayback, PlaybackSink, decode_audio};
pub use recorder::UtteranceRecorder;
pub use resample::RateConverter;
pub use ring::PreRollBuffer;
pub use stt::{SpeechToText, Transcriber};
pub use tts::{Synthesizer, TextToSpeech};
pub use wake_word::{
    DetectorState, KeywordModel, Scores, WakeWordDetector, load_keyword_model, normalize_keyword,
};
pub use wav::{PcmAudio, UtteranceStore, decode_wav, frames_to_wav, samples_to_wav};
