//! Audio capture from microphone
//!
//! The capture callback runs on the audio backend's real-time thread. It only reassembles
//! fixed-size frames and pushes them onto the frame queue; all pipeline work happens on
//! the consumer side.

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    BufferSize, Device, SampleFormat, SampleRate, StreamConfig, SupportedStreamConfigRange,
};
use crossbeam_channel::Sender;

use super::Frame;
use super::wav::f32_to_i16;
use crate::config::AudioConfig;
use crate::{Error, Result};

/// A running capture stream
///
/// Dropping it stops capture.
pub trait CaptureStream {
    /// Fatal stream failure reported by the backend since the stream was opened
    fn failure(&self) -> Option<String> {
        None
    }
}

impl CaptureStream for () {}

/// Source of fixed-size mono PCM frames
pub trait FrameSource {
    /// Handle keeping the stream alive
    type Stream: CaptureStream;

    /// Start delivering frames into `frames`
    ///
    /// # Errors
    ///
    /// Returns error if the input device cannot be opened
    fn open(&self, frames: Sender<Frame>) -> Result<Self::Stream>;
}

/// Splits arbitrary callback buffers into exact-length frames
#[derive(Debug)]
pub struct FrameAssembler {
    frame_samples: usize,
    pending: Vec<i16>,
}

impl FrameAssembler {
    /// Assemble frames of `frame_samples` samples
    #[must_use]
    pub fn new(frame_samples: usize) -> Self {
        let frame_samples = frame_samples.max(1);
        Self {
            frame_samples,
            pending: Vec::with_capacity(frame_samples),
        }
    }

    /// Append samples and emit every completed frame in order
    pub fn push(&mut self, samples: impl IntoIterator<Item = i16>, mut emit: impl FnMut(Frame)) {
        for sample in samples {
            self.pending.push(sample);
            if self.pending.len() == self.frame_samples {
                let frame = std::mem::replace(
                    &mut self.pending,
                    Vec::with_capacity(self.frame_samples),
                );
                emit(Frame::from(frame));
            }
        }
    }

    /// Samples waiting for the next frame
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Producer end of the frame queue, owned by the capture callback
///
/// Once the consumer is gone every frame is discarded; only the first loss is logged so
/// the real-time thread is not flooded.
#[derive(Debug)]
struct QueueWriter {
    tx: Sender<Frame>,
    discarded: u64,
}

impl QueueWriter {
    const fn new(tx: Sender<Frame>) -> Self {
        Self { tx, discarded: 0 }
    }

    fn send(&mut self, frame: Frame) {
        if self.tx.send(frame).is_err() {
            if self.discarded == 0 {
                tracing::debug!("frame queue closed, discarding captured audio");
            }
            self.discarded += 1;
        }
    }
}

/// Captures frames from an input device via cpal
#[derive(Debug, Clone)]
pub struct CpalFrameSource {
    sample_rate: u32,
    frame_samples: usize,
    device: Option<String>,
}

impl CpalFrameSource {
    /// Create a source for the configured device, rate and frame length
    #[must_use]
    pub fn new(audio: &AudioConfig) -> Self {
        Self {
            sample_rate: audio.sample_rate,
            frame_samples: audio.frame_samples(),
            device: audio.input_device.clone(),
        }
    }
}

/// Live cpal input stream
pub struct CpalCapture {
    _stream: cpal::Stream,
    failure: Arc<Mutex<Option<String>>>,
}

impl CaptureStream for CpalCapture {
    fn failure(&self) -> Option<String> {
        self.failure.lock().ok().and_then(|f| f.clone())
    }
}

impl FrameSource for CpalFrameSource {
    type Stream = CpalCapture;

    fn open(&self, frames: Sender<Frame>) -> Result<CpalCapture> {
        let host = cpal::default_host();
        let device = select_input_device(&host, self.device.as_deref())?;

        let range = pick_config(
            device
                .supported_input_configs()
                .map_err(|e| Error::Audio(e.to_string()))?,
            self.sample_rate,
        )
        .ok_or_else(|| {
            Error::Audio(format!(
                "no input config supports {} Hz with i16 or f32 samples",
                self.sample_rate
            ))
        })?;

        let sample_format = range.sample_format();
        let channels = range.channels();
        let block = u32::try_from(self.frame_samples)
            .map_err(|_| Error::Config("frame length too large".to_string()))?;
        let mut config: StreamConfig = range
            .with_sample_rate(SampleRate(self.sample_rate))
            .config();
        config.buffer_size = BufferSize::Fixed(block);

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = self.sample_rate,
            channels,
            ?sample_format,
            frame_samples = self.frame_samples,
            "audio capture initialized"
        );

        let failure = Arc::new(Mutex::new(None));
        let stream = match self.build(&device, &config, sample_format, &frames, &failure) {
            Ok(stream) => stream,
            Err(e) => {
                // Not every backend honours a fixed block size; frames are reassembled anyway
                tracing::debug!(error = %e, "fixed buffer size rejected, using default");
                config.buffer_size = BufferSize::Default;
                self.build(&device, &config, sample_format, &frames, &failure)?
            }
        };

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        tracing::debug!("audio capture started");

        Ok(CpalCapture {
            _stream: stream,
            failure,
        })
    }
}

impl CpalFrameSource {
    fn build(
        &self,
        device: &Device,
        config: &StreamConfig,
        sample_format: SampleFormat,
        frames: &Sender<Frame>,
        failure: &Arc<Mutex<Option<String>>>,
    ) -> Result<cpal::Stream> {
        let channels = usize::from(config.channels.max(1));
        let mut assembler = FrameAssembler::new(self.frame_samples);
        let mut queue = QueueWriter::new(frames.clone());
        let failure = Arc::clone(failure);
        let on_error = move |err: cpal::StreamError| match err {
            cpal::StreamError::DeviceNotAvailable => {
                tracing::error!("audio input device disappeared");
                if let Ok(mut f) = failure.lock() {
                    f.get_or_insert_with(|| "input device not available".to_string());
                }
            }
            other => {
                tracing::warn!(error = %other, "audio input status");
            }
        };

        let stream = match sample_format {
            SampleFormat::I16 => device.build_input_stream(
                config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    // First channel only
                    let mono = data.iter().step_by(channels).copied();
                    assembler.push(mono, |frame| queue.send(frame));
                },
                on_error,
                None,
            ),
            SampleFormat::F32 => device.build_input_stream(
                config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let mono = data.iter().step_by(channels).map(|&s| f32_to_i16(s));
                    assembler.push(mono, |frame| queue.send(frame));
                },
                on_error,
                None,
            ),
            other => {
                return Err(Error::Audio(format!("unsupported sample format {other:?}")));
            }
        };

        stream.map_err(|e| Error::Audio(e.to_string()))
    }
}

/// Pick the stream config closest to mono i16 at `sample_rate`
fn pick_config(
    ranges: impl Iterator<Item = SupportedStreamConfigRange>,
    sample_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    ranges
        .filter(|c| {
            c.min_sample_rate() <= SampleRate(sample_rate)
                && c.max_sample_rate() >= SampleRate(sample_rate)
                && matches!(c.sample_format(), SampleFormat::I16 | SampleFormat::F32)
        })
        .min_by_key(|c| (c.channels(), c.sample_format() != SampleFormat::I16))
}

/// Resolve an input device selector, falling back to the system default
///
/// # Errors
///
/// Returns error if no matching (or default) input device exists
pub fn select_input_device(host: &cpal::Host, selector: Option<&str>) -> Result<Device> {
    match selector {
        None => host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string())),
        Some(selector) => {
            let devices: Vec<Device> = host
                .input_devices()
                .map_err(|e| Error::Audio(e.to_string()))?
                .collect();
            pick_device(devices, selector)
                .ok_or_else(|| Error::Audio(format!("input device '{selector}' not found")))
        }
    }
}

/// Resolve an output device selector, falling back to the system default
///
/// # Errors
///
/// Returns error if no matching (or default) output device exists
pub fn select_output_device(host: &cpal::Host, selector: Option<&str>) -> Result<Device> {
    match selector {
        None => host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string())),
        Some(selector) => {
            let devices: Vec<Device> = host
                .output_devices()
                .map_err(|e| Error::Audio(e.to_string()))?
                .collect();
            pick_device(devices, selector)
                .ok_or_else(|| Error::Audio(format!("output device '{selector}' not found")))
        }
    }
}

fn pick_device(devices: Vec<Device>, selector: &str) -> Option<Device> {
    let names: Vec<String> = devices
        .iter()
        .map(|d| d.name().unwrap_or_default())
        .collect();
    let index = match_device(&names, selector)?;
    devices.into_iter().nth(index)
}

/// Index of the device named by `selector`
///
/// Tries a numeric index, then an exact name, then a case-insensitive substring.
#[must_use]
pub fn match_device(names: &[String], selector: &str) -> Option<usize> {
    let selector = selector.trim();
    if let Ok(index) = selector.parse::<usize>() {
        return (index < names.len()).then_some(index);
    }
    if let Some(index) = names.iter().position(|n| n == selector) {
        return Some(index);
    }
    let needle = selector.to_lowercase();
    names.iter().position(|n| n.to_lowercase().contains(&needle))
}

/// Names of available input and output devices
///
/// # Errors
///
/// Returns error if the host cannot enumerate devices
pub fn list_devices() -> Result<(Vec<String>, Vec<String>)> {
    let host = cpal::default_host();
    let inputs = host
        .input_devices()
        .map_err(|e| Error::Audio(e.to_string()))?
        .map(|d| d.name().unwrap_or_else(|_| "<unknown>".to_string()))
        .collect();
    let outputs = host
        .output_devices()
        .map_err(|e| Error::Audio(e.to_string()))?
        .map(|d| d.name().unwrap_or_else(|_| "<unknown>".to_string()))
        .collect();
    Ok((inputs, outputs))
}
