//! openWakeWord-compatible keyword model on ONNX Runtime
//!
//! Three stages run per 80 ms chunk: a melspectrogram front end, a shared speech
//! embedding over a sliding mel window, and one classifier per keyword over the most
//! recent embeddings.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use ndarray::{Array2, Array3, Array4};
use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::{Session, SessionInputValue};
use ort::value::Value;

use super::wake_word::{KeywordModel, Scores, classifier_paths, keyword_label};
use crate::{Error, Result};

/// Samples per model step (80 ms at 16 kHz)
const CHUNK_SAMPLES: usize = 1280;
/// Trailing samples of the previous step fed to the melspectrogram
const CONTEXT_SAMPLES: usize = 480;
const MEL_BINS: usize = 32;
/// Mel frames per embedding window
const EMBEDDING_WINDOW: usize = 76;
const EMBEDDING_DIM: usize = 96;
/// Embeddings per classifier input
const CLASSIFIER_FRAMES: usize = 16;

const MAX_MEL_FRAMES: usize = EMBEDDING_WINDOW * 2;
const MAX_EMBEDDINGS: usize = 120;

fn onnx_err(e: impl std::fmt::Display) -> Error {
    Error::WakeWord(e.to_string())
}

fn open_session(path: &Path) -> Result<Session> {
    SessionBuilder::new()
        .map_err(onnx_err)?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(onnx_err)?
        .with_intra_threads(1)
        .map_err(onnx_err)?
        .commit_from_file(path)
        .map_err(|e| Error::WakeWord(format!("failed to load {}: {e}", path.display())))
}

fn input_name(session: &Session) -> Result<String> {
    session
        .inputs()
        .first()
        .map(|outlet| outlet.name().to_string())
        .ok_or_else(|| Error::WakeWord("model has no inputs".to_string()))
}

/// Run a single-input session and return its first output flattened
fn run_single(session: &mut Session, input: &str, value: Value) -> Result<Vec<f32>> {
    let inputs: Vec<(String, SessionInputValue<'_>)> = vec![(input.to_string(), value.into())];
    let outputs = session.run(inputs).map_err(onnx_err)?;
    let (_, data) = outputs[0].try_extract_tensor::<f32>().map_err(onnx_err)?;
    Ok(data.to_vec())
}

struct Classifier {
    label: String,
    input: String,
    session: Session,
}

/// Streaming openWakeWord model scoring one or more keywords
pub struct OnnxKeywordModel {
    melspec: Session,
    melspec_input: String,
    embedding: Session,
    embedding_input: String,
    classifiers: Vec<Classifier>,
    pending: Vec<i16>,
    context: Vec<i16>,
    mel: VecDeque<[f32; MEL_BINS]>,
    embeddings: VecDeque<[f32; EMBEDDING_DIM]>,
    scores: Scores,
}

impl OnnxKeywordModel {
    /// Load the shared front end from `model_dir` and the keyword classifiers
    ///
    /// # Errors
    ///
    /// Returns error if any model file is missing or fails to load
    pub fn load(model_dir: &Path, models: &[PathBuf]) -> Result<Self> {
        let melspec = open_session(&model_dir.join("melspectrogram.onnx"))?;
        let embedding = open_session(&model_dir.join("embedding_model.onnx"))?;

        let mut classifiers = Vec::new();
        for path in classifier_paths(model_dir, models)? {
            let label = keyword_label(&path)
                .ok_or_else(|| Error::WakeWord(format!("bad model name {}", path.display())))?;
            let session = open_session(&path)?;
            classifiers.push(Classifier {
                input: input_name(&session)?,
                label,
                session,
            });
        }

        let scores = classifiers
            .iter()
            .map(|c| (c.label.clone(), 0.0))
            .collect();
        tracing::info!(
            keywords = ?classifiers.iter().map(|c| c.label.as_str()).collect::<Vec<_>>(),
            "keyword models loaded"
        );

        Ok(Self {
            melspec_input: input_name(&melspec)?,
            melspec,
            embedding_input: input_name(&embedding)?,
            embedding,
            classifiers,
            pending: Vec::with_capacity(CHUNK_SAMPLES * 2),
            context: Vec::with_capacity(CONTEXT_SAMPLES),
            mel: VecDeque::with_capacity(MAX_MEL_FRAMES),
            embeddings: VecDeque::with_capacity(MAX_EMBEDDINGS),
            scores,
        })
    }

    fn push_mel(&mut self, chunk: &[i16]) -> Result<()> {
        let window: Vec<f32> = self
            .context
            .iter()
            .chain(chunk)
            .map(|&s| f32::from(s))
            .collect();
        let len = window.len();
        let input = Array2::from_shape_vec((1, len), window).map_err(onnx_err)?;
        let value = Value::from_array(input).map_err(onnx_err)?.into_dyn();
        let out = run_single(&mut self.melspec, &self.melspec_input, value)?;

        for bins in out.chunks_exact(MEL_BINS) {
            if self.mel.len() == MAX_MEL_FRAMES {
                self.mel.pop_front();
            }
            let mut frame = [0.0; MEL_BINS];
            for (dst, &v) in frame.iter_mut().zip(bins) {
                *dst = v / 10.0 + 2.0;
            }
            self.mel.push_back(frame);
        }

        let keep = CONTEXT_SAMPLES.min(self.context.len() + chunk.len());
        let mut tail: Vec<i16> = self.context.iter().chain(chunk).copied().collect();
        self.context = tail.split_off(tail.len() - keep);
        Ok(())
    }

    fn push_embedding(&mut self) -> Result<bool> {
        if self.mel.len() < EMBEDDING_WINDOW {
            return Ok(false);
        }
        let start = self.mel.len() - EMBEDDING_WINDOW;
        let data: Vec<f32> = self.mel.range(start..).flatten().copied().collect();
        let input = Array4::from_shape_vec((1, EMBEDDING_WINDOW, MEL_BINS, 1), data)
            .map_err(onnx_err)?;
        let value = Value::from_array(input).map_err(onnx_err)?.into_dyn();
        let out = run_single(&mut self.embedding, &self.embedding_input, value)?;

        let mut embedding = [0.0; EMBEDDING_DIM];
        for (dst, &v) in embedding.iter_mut().zip(&out) {
            *dst = v;
        }
        if self.embeddings.len() == MAX_EMBEDDINGS {
            self.embeddings.pop_front();
        }
        self.embeddings.push_back(embedding);
        Ok(true)
    }

    fn classify(&mut self) -> Result<()> {
        if self.embeddings.len() < CLASSIFIER_FRAMES {
            return Ok(());
        }
        let start = self.embeddings.len() - CLASSIFIER_FRAMES;
        let data: Vec<f32> = self.embeddings.range(start..).flatten().copied().collect();

        for classifier in &mut self.classifiers {
            let input = Array3::from_shape_vec((1, CLASSIFIER_FRAMES, EMBEDDING_DIM), data.clone())
                .map_err(onnx_err)?;
            let value = Value::from_array(input).map_err(onnx_err)?.into_dyn();
            let out = run_single(&mut classifier.session, &classifier.input, value)?;
            let score = out.first().copied().unwrap_or(0.0).clamp(0.0, 1.0);
            self.scores.insert(classifier.label.clone(), score);
        }
        Ok(())
    }
}

impl KeywordModel for OnnxKeywordModel {
    fn predict(&mut self, frame: &[i16]) -> Result<Scores> {
        self.pending.extend_from_slice(frame);
        while self.pending.len() >= CHUNK_SAMPLES {
            let chunk: Vec<i16> = self.pending.drain(..CHUNK_SAMPLES).collect();
            self.push_mel(&chunk)?;
            if self.push_embedding()? {
                self.classify()?;
            }
        }
        Ok(self.scores.clone())
    }
}
