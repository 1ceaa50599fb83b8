//! Beacon Voice - wake-word voice assistant
//!
//! This library provides the building blocks of a local, always-listening voice
//! assistant:
//! - Audio capture and fixed-size framing
//! - Wake word gating with pre-roll buffering
//! - Utterance recording with silence endpointing
//! - Transcription, agent replies and speech synthesis over OpenAI-compatible APIs
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  frames   ┌───────────────────────────┐
//! │ cpal capture │──────────▶│ pipeline (blocking worker)│
//! └──────────────┘ crossbeam │ ring → wake word → record │
//!                            └─────────────┬─────────────┘
//!                                          │ bridge (mpsc + oneshot)
//!                            ┌─────────────▼─────────────┐
//!                            │ handler (tokio runtime)   │
//!                            │ STT → agent → TTS → play  │
//!                            └───────────────────────────┘
//! ```

pub mod agent;
pub mod config;
pub mod daemon;
pub mod error;
pub mod http;
pub mod voice;

pub use config::Config;
pub use daemon::VoiceAssistant;
pub use error::{Error, Result};
