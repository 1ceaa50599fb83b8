//! Shared test utilities

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use crossbeam_channel::Sender;

use beacon_voice::agent::{Agent, SessionKey};
use beacon_voice::config::file::VoiceConfigFile;
use beacon_voice::voice::{
    CaptureStream, Frame, FrameSource, KeywordModel, PlaybackSink, Scores, SpeakingFlag,
    Synthesizer, Transcriber, samples_to_wav,
};
use beacon_voice::{Config, Error, Result};

/// First sample value that makes [`MarkerModel`] fire
pub const TRIGGER_MARKER: i16 = i16::MAX;

/// Scores `keyword` at 0.95 on frames starting with [`TRIGGER_MARKER`], else 0.0
pub struct MarkerModel {
    pub keyword: String,
    pub calls: Arc<AtomicUsize>,
}

impl MarkerModel {
    pub fn new(keyword: &str) -> Self {
        Self {
            keyword: keyword.to_string(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl KeywordModel for MarkerModel {
    fn predict(&mut self, frame: &[i16]) -> Result<Scores> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let score = if frame.first() == Some(&TRIGGER_MARKER) {
            0.95
        } else {
            0.0
        };
        Ok(Scores::from([(self.keyword.clone(), score)]))
    }
}

/// A frame of digital silence
pub fn silent_frame(samples: usize) -> Frame {
    Frame::filled(0, samples)
}

/// A frame with constant amplitude (RMS equals `level`)
pub fn loud_frame(samples: usize, level: i16) -> Frame {
    Frame::filled(level, samples)
}

/// A frame the marker model scores above threshold
pub fn trigger_frame(samples: usize) -> Frame {
    let mut data = vec![0i16; samples];
    if let Some(first) = data.first_mut() {
        *first = TRIGGER_MARKER;
    }
    Frame::from(data)
}

/// Sine wave samples at 16kHz
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub fn sine_samples(frequency: f32, samples: usize, amplitude: f32) -> Vec<i16> {
    (0..samples)
        .map(|i| {
            let t = i as f32 / 16_000.0;
            (amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin()) as i16
        })
        .collect()
}

/// Default configuration rooted at `data_dir`, with no environment
pub fn test_config(data_dir: &Path) -> Config {
    let mut config = Config::from_sources(VoiceConfigFile::default(), |_| None);
    config.data_dir = data_dir.to_path_buf();
    config.api_keys.openai = Some("sk-test".to_string());
    config
}

/// Frame source that replays a fixed script, then stays open and silent
pub struct ScriptedSource {
    frames: Mutex<Option<Vec<Frame>>>,
}

impl ScriptedSource {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self {
            frames: Mutex::new(Some(frames)),
        }
    }
}

/// Keeps the frame queue connected
pub struct ScriptedStream(#[allow(dead_code)] Sender<Frame>);

impl CaptureStream for ScriptedStream {}

impl FrameSource for ScriptedSource {
    type Stream = ScriptedStream;

    fn open(&self, frames: Sender<Frame>) -> Result<ScriptedStream> {
        let script = self.frames.lock().unwrap().take().unwrap_or_default();
        for frame in script {
            frames
                .send(frame)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }
        Ok(ScriptedStream(frames))
    }
}

/// Transcriber returning a fixed text and keeping what it was sent
#[derive(Default)]
pub struct MockTranscriber {
    pub text: String,
    pub fail: bool,
    pub received: Mutex<Vec<Vec<u8>>>,
}

impl MockTranscriber {
    pub fn saying(text: &str) -> Self {
        Self {
            text: text.to_string(),
            ..Self::default()
        }
    }
}

#[async_trait]
impl Transcriber for MockTranscriber {
    async fn transcribe(&self, audio: Vec<u8>, _language: Option<&str>) -> Result<String> {
        self.received.lock().unwrap().push(audio);
        if self.fail {
            return Err(Error::Stt("service unavailable".to_string()));
        }
        Ok(self.text.clone())
    }
}

/// Agent with a canned reply
#[derive(Default)]
pub struct MockAgent {
    pub reply: Option<String>,
    pub fail: bool,
    pub seen: Mutex<Vec<(String, SessionKey)>>,
}

impl MockAgent {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Some(reply.to_string()),
            ..Self::default()
        }
    }
}

#[async_trait]
impl Agent for MockAgent {
    async fn respond(&self, text: &str, session: &SessionKey) -> Result<Option<String>> {
        self.seen
            .lock()
            .unwrap()
            .push((text.to_string(), session.clone()));
        if self.fail {
            return Err(Error::Agent("model overloaded".to_string()));
        }
        Ok(self.reply.clone())
    }
}

/// Synthesizer producing a short WAV clip, recording the speaking flag when called
pub struct MockSynthesizer {
    pub flag: SpeakingFlag,
    pub fail: bool,
    pub flag_seen: Mutex<Vec<bool>>,
}

impl MockSynthesizer {
    pub fn new(flag: SpeakingFlag) -> Self {
        Self {
            flag,
            fail: false,
            flag_seen: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Synthesizer for MockSynthesizer {
    async fn synthesize(&self, _text: &str) -> Result<Vec<u8>> {
        self.flag_seen.lock().unwrap().push(self.flag.is_set());
        if self.fail {
            return Err(Error::Tts("quota exceeded".to_string()));
        }
        samples_to_wav(&sine_samples(440.0, 240, 8000.0), 24_000)
    }
}

/// Playback sink that records clips and the speaking flag instead of playing
pub struct MockPlayback {
    pub flag: SpeakingFlag,
    pub played: Mutex<Vec<Vec<u8>>>,
    pub flag_seen: Mutex<Vec<bool>>,
    pub done: Arc<tokio::sync::Notify>,
}

impl MockPlayback {
    pub fn new(flag: SpeakingFlag) -> Self {
        Self {
            flag,
            played: Mutex::new(Vec::new()),
            flag_seen: Mutex::new(Vec::new()),
            done: Arc::new(tokio::sync::Notify::new()),
        }
    }

    pub fn play_count(&self) -> usize {
        self.played.lock().unwrap().len()
    }
}

impl PlaybackSink for MockPlayback {
    fn play(&self, audio: &[u8]) {
        self.flag_seen.lock().unwrap().push(self.flag.is_set());
        self.played.lock().unwrap().push(audio.to_vec());
        self.done.notify_one();
    }
}
