//! Audio playback to speakers

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use cpal::Sample;
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{Device, SampleFormat, SampleRate, StreamConfig, SupportedStreamConfigRange};

use super::capture::select_output_device;
use super::resample::RateConverter;
use super::wav::{PcmAudio, decode_wav};
use crate::{Error, Result};

/// Grace period past the nominal clip length before giving up on completion
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Blocking audio output
///
/// Implementations swallow and log their own failures; a broken speaker never ends a turn
/// with an error.
pub trait PlaybackSink: Send + Sync {
    /// Play an encoded clip (WAV or MP3) to completion
    fn play(&self, audio: &[u8]);
}

/// Plays audio through a cpal output device
#[derive(Debug, Clone, Default)]
pub struct AudioPlayback {
    output_device: Option<String>,
}

impl AudioPlayback {
    /// Play through `output_device` (index or name), or the system default
    #[must_use]
    pub const fn new(output_device: Option<String>) -> Self {
        Self { output_device }
    }

    /// Decode and play a clip, returning any failure
    ///
    /// # Errors
    ///
    /// Returns error if decoding fails or no output stream can be opened
    pub fn try_play(&self, audio: &[u8]) -> Result<()> {
        let pcm = decode_audio(audio)?;
        self.play_pcm(&pcm)
    }

    /// Play decoded PCM, blocking until the device has drained it
    ///
    /// # Errors
    ///
    /// Returns error if no output stream can be opened or the clip cannot be resampled
    #[allow(clippy::cast_precision_loss)]
    pub fn play_pcm(&self, pcm: &PcmAudio) -> Result<()> {
        if pcm.samples.is_empty() {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = select_output_device(&host, self.output_device.as_deref())?;

        let (config, sample_format) = output_config(&device, pcm)?;
        let out_channels = usize::from(config.channels.max(1));
        let rate = config.sample_rate.0;

        let in_channels = usize::from(pcm.channels.max(1));
        let samples = remap_channels(&pcm.samples, in_channels, out_channels);
        let samples = RateConverter::new(pcm.sample_rate, rate, out_channels)?.process(&samples)?;
        let total_frames = samples.len() / out_channels;
        let samples: Arc<[f32]> = samples.into();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = rate,
            channels = out_channels,
            ?sample_format,
            "audio playback initialized"
        );

        let finished = Arc::new(AtomicBool::new(false));
        let stream = match sample_format {
            SampleFormat::I16 => build_stream::<i16>(&device, &config, &samples, &finished),
            _ => build_stream::<f32>(&device, &config, &samples, &finished),
        }?;
        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        let clip = Duration::from_secs_f64(total_frames as f64 / f64::from(rate.max(1)));
        let deadline = Instant::now() + clip + DRAIN_GRACE;
        while !finished.load(Ordering::Acquire) {
            if Instant::now() > deadline {
                tracing::warn!("playback did not complete in time");
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }

        // Let the device flush its last buffer
        std::thread::sleep(Duration::from_millis(100));
        drop(stream);

        tracing::debug!(frames = total_frames, "playback complete");
        Ok(())
    }
}

impl PlaybackSink for AudioPlayback {
    fn play(&self, audio: &[u8]) {
        if let Err(e) = self.try_play(audio) {
            tracing::error!(error = %e, "audio playback failed");
        }
    }
}

/// Decode a WAV or MP3 clip, sniffing the container from its header
///
/// # Errors
///
/// Returns error if the bytes are neither readable WAV nor MP3
pub fn decode_audio(data: &[u8]) -> Result<PcmAudio> {
    if data.starts_with(b"RIFF") {
        decode_wav(data)
    } else {
        decode_mp3(data)
    }
}

/// Decode MP3 bytes to interleaved PCM
///
/// # Errors
///
/// Returns error if the stream contains no decodable frames
pub fn decode_mp3(mp3_data: &[u8]) -> Result<PcmAudio> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut layout: Option<(u16, u32)> = None;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                let channels = u16::try_from(frame.channels).unwrap_or(1);
                let sample_rate = u32::try_from(frame.sample_rate).unwrap_or(0);
                layout.get_or_insert((channels, sample_rate));
                samples.extend_from_slice(&frame.data);
            }
            Err(minimp3::Error::Eof) => break,
            Err(minimp3::Error::SkippedData) => {}
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    let (channels, sample_rate) =
        layout.ok_or_else(|| Error::Audio("no MP3 frames found".to_string()))?;
    Ok(PcmAudio {
        samples,
        channels,
        sample_rate,
    })
}

/// Pick an output config for `pcm`, preferring its own rate and channel count
fn output_config(device: &Device, pcm: &PcmAudio) -> Result<(StreamConfig, SampleFormat)> {
    let ranges: Vec<SupportedStreamConfigRange> = device
        .supported_output_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .filter(|c| matches!(c.sample_format(), SampleFormat::I16 | SampleFormat::F32))
        .collect();

    let native = ranges
        .iter()
        .filter(|c| {
            c.min_sample_rate() <= SampleRate(pcm.sample_rate)
                && c.max_sample_rate() >= SampleRate(pcm.sample_rate)
        })
        .min_by_key(|c| {
            (
                c.channels() != pcm.channels,
                c.channels(),
                c.sample_format() != SampleFormat::F32,
            )
        });

    if let Some(range) = native {
        let range = range.clone().with_sample_rate(SampleRate(pcm.sample_rate));
        return Ok((range.config(), range.sample_format()));
    }

    let fallback = device
        .default_output_config()
        .map_err(|e| Error::Audio(e.to_string()))?;
    Ok((fallback.config(), fallback.sample_format()))
}

fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    samples: &Arc<[f32]>,
    finished: &Arc<AtomicBool>,
) -> Result<cpal::Stream>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let samples = Arc::clone(samples);
    let finished = Arc::clone(finished);
    let mut position = 0usize;

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                for out in data.iter_mut() {
                    let sample = samples.get(position).copied().unwrap_or(0.0);
                    *out = T::from_sample(sample);
                    position = position.saturating_add(1);
                }
                if position >= samples.len() {
                    finished.store(true, Ordering::Release);
                }
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))
}

/// Convert interleaved i16 with `from` channels to interleaved f32 with `to` channels
///
/// Extra output channels repeat the last source channel; surplus source channels are dropped.
fn remap_channels(samples: &[i16], from: usize, to: usize) -> Vec<f32> {
    let frames = samples.len() / from;
    let mut out = Vec::with_capacity(frames * to);
    for frame in samples.chunks_exact(from) {
        for channel in 0..to {
            let sample = frame[channel.min(from - 1)];
            out.push(f32::from(sample) / 32768.0);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::wav::samples_to_wav;

    #[test]
    fn test_decode_audio_detects_wav() {
        let wav = samples_to_wav(&[1, 2, 3], 24_000).unwrap();
        let pcm = decode_audio(&wav).unwrap();
        assert_eq!(pcm.sample_rate, 24_000);
        assert_eq!(pcm.samples, vec![1, 2, 3]);
    }

    #[test]
    fn test_decode_mp3_rejects_garbage() {
        assert!(decode_audio(&[0u8; 64]).is_err());
    }

    #[test]
    fn test_remap_mono_to_stereo() {
        let out = remap_channels(&[16384, -16384], 1, 2);
        assert_eq!(out, vec![0.5, 0.5, -0.5, -0.5]);
    }

    #[test]
    fn test_remap_stereo_to_mono_keeps_first_channel() {
        let out = remap_channels(&[16384, 0, -16384, 0], 2, 1);
        assert_eq!(out, vec![0.5, -0.5]);
    }
}
