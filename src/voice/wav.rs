//! WAV encoding, decoding and utterance persistence

use std::io::Cursor;
use std::path::{Path, PathBuf};

use super::Frame;
use crate::{Error, Result};

/// Interleaved 16-bit PCM with its layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmAudio {
    /// Interleaved samples
    pub samples: Vec<i16>,
    /// Channel count
    pub channels: u16,
    /// Sample rate (Hz)
    pub sample_rate: u32,
}

impl PcmAudio {
    /// Number of per-channel frames
    #[must_use]
    pub fn frames(&self) -> usize {
        self.samples.len() / usize::from(self.channels.max(1))
    }

    /// Playback duration
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn duration(&self) -> std::time::Duration {
        if self.sample_rate == 0 {
            return std::time::Duration::ZERO;
        }
        std::time::Duration::from_secs_f64(self.frames() as f64 / f64::from(self.sample_rate))
    }
}

/// Convert mono i16 samples to WAV bytes
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for &sample in samples {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
    }

    Ok(cursor.into_inner())
}

/// Encode an utterance (frames in temporal order) as mono WAV bytes
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn frames_to_wav(frames: &[Frame], sample_rate: u32) -> Result<Vec<u8>> {
    samples_to_wav(&super::frame::concat(frames), sample_rate)
}

/// Decode WAV bytes into interleaved i16 PCM
///
/// 8/24/32-bit integer and 32-bit float payloads are converted to 16-bit.
///
/// # Errors
///
/// Returns error if the bytes are not a readable WAV container
pub fn decode_wav(data: &[u8]) -> Result<PcmAudio> {
    let mut reader = hound::WavReader::new(Cursor::new(data))?;
    let spec = reader.spec();

    let samples = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .collect::<std::result::Result<Vec<_>, _>>()?,
        (hound::SampleFormat::Int, bits) if bits <= 32 => {
            let shift = i32::from(bits) - 16;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| rescale_int(v, shift)))
                .collect::<std::result::Result<Vec<_>, _>>()?
        }
        (hound::SampleFormat::Float, 32) => reader
            .samples::<f32>()
            .map(|s| s.map(f32_to_i16))
            .collect::<std::result::Result<Vec<_>, _>>()?,
        (format, bits) => {
            return Err(Error::Audio(format!(
                "unsupported WAV sample format {format:?}/{bits}"
            )));
        }
    };

    Ok(PcmAudio {
        samples,
        channels: spec.channels,
        sample_rate: spec.sample_rate,
    })
}

#[allow(clippy::cast_possible_truncation)]
fn rescale_int(value: i32, shift: i32) -> i16 {
    let scaled = if shift >= 0 {
        value >> shift
    } else {
        value << -shift
    };
    scaled.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16
}

/// Convert f32 [-1.0, 1.0] to i16
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}

/// Writes utterance recordings under a data directory
#[derive(Debug, Clone)]
pub struct UtteranceStore {
    dir: PathBuf,
    sample_rate: u32,
}

impl UtteranceStore {
    /// Store recordings at `sample_rate` under `dir` (created on first write)
    pub fn new(dir: impl Into<PathBuf>, sample_rate: u32) -> Self {
        Self {
            dir: dir.into(),
            sample_rate,
        }
    }

    /// Persist frames as `utterance_<unix_millis>.wav`
    ///
    /// Returns `Ok(None)` for an empty utterance.
    ///
    /// # Errors
    ///
    /// Returns error if the directory or file cannot be written
    pub fn write(&self, frames: &[Frame]) -> Result<Option<PathBuf>> {
        if frames.iter().all(|f| f.is_empty()) {
            return Ok(None);
        }

        std::fs::create_dir_all(&self.dir)?;
        let wav = frames_to_wav(frames, self.sample_rate)?;
        let path = self.unique_path();
        std::fs::write(&path, wav)?;

        tracing::debug!(path = %path.display(), frames = frames.len(), "utterance saved");
        Ok(Some(path))
    }

    /// Directory recordings are written to
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn unique_path(&self) -> PathBuf {
        let millis = chrono::Utc::now().timestamp_millis();
        let mut path = self.dir.join(format!("utterance_{millis}.wav"));
        let mut n = 1;
        while path.exists() {
            path = self.dir.join(format!("utterance_{millis}_{n}.wav"));
            n += 1;
        }
        path
    }
}
