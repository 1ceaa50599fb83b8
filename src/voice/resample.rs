//! Sample-rate conversion for playback
//!
//! Reply clips arrive at the synthesizer's rate (commonly 24 kHz). When the output device
//! cannot open a stream at that rate the clip is converted with a windowed-sinc rubato
//! resampler. Matching rates are a passthrough and no resampler is built.

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use crate::{Error, Result};

/// Input frames handed to rubato per call
const CHUNK_FRAMES: usize = 1024;

/// Converts interleaved f32 audio between two fixed sample rates
pub struct RateConverter {
    /// `None` when both rates are equal
    resampler: Option<SincFixedIn<f32>>,
    channels: usize,
    ratio: f64,
}

impl RateConverter {
    /// Create a converter for `channels`-channel audio from `from` Hz to `to` Hz
    ///
    /// # Errors
    ///
    /// Returns `Error::Audio` if a rate is zero or rubato rejects the parameters
    pub fn new(from: u32, to: u32, channels: usize) -> Result<Self> {
        let channels = channels.max(1);
        if from == to {
            return Ok(Self {
                resampler: None,
                channels,
                ratio: 1.0,
            });
        }
        if from == 0 || to == 0 {
            return Err(Error::Audio(format!("cannot resample {from} Hz to {to} Hz")));
        }

        let ratio = f64::from(to) / f64::from(from);
        let params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };
        let resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, CHUNK_FRAMES, channels)
            .map_err(|e| Error::Audio(format!("resampler init: {e}")))?;

        tracing::debug!(from, to, channels, "resampling enabled");

        Ok(Self {
            resampler: Some(resampler),
            channels,
            ratio,
        })
    }

    /// Whether samples pass through unchanged
    #[must_use]
    pub const fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }

    /// Convert a complete interleaved clip
    ///
    /// The resampler's delay is trimmed and the tail flushed, so the output holds
    /// `in_frames * to / from` frames (rounded) aligned with the input.
    ///
    /// # Errors
    ///
    /// Returns `Error::Audio` if rubato fails on a chunk
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn process(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        let channels = self.channels;
        let ratio = self.ratio;
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(samples.to_vec());
        };

        let planar = deinterleave(samples, channels);
        let in_frames = planar.first().map_or(0, Vec::len);
        if in_frames == 0 {
            return Ok(Vec::new());
        }

        let expected = (in_frames as f64 * ratio).round() as usize;
        let delay = resampler.output_delay();
        let mut out: Vec<Vec<f32>> = vec![Vec::with_capacity(expected + delay); channels];
        let append = |out: &mut Vec<Vec<f32>>, chunk: Vec<Vec<f32>>| {
            for (dst, src) in out.iter_mut().zip(chunk) {
                dst.extend_from_slice(&src);
            }
        };

        let mut pos = 0;
        while pos + CHUNK_FRAMES <= in_frames {
            let chunk: Vec<&[f32]> = planar.iter().map(|c| &c[pos..pos + CHUNK_FRAMES]).collect();
            let produced = resampler.process(&chunk, None).map_err(resample_error)?;
            append(&mut out, produced);
            pos += CHUNK_FRAMES;
        }
        if pos < in_frames {
            let tail: Vec<&[f32]> = planar.iter().map(|c| &c[pos..]).collect();
            let produced = resampler
                .process_partial(Some(tail.as_slice()), None)
                .map_err(resample_error)?;
            append(&mut out, produced);
        }

        // Flush what is still inside the filter
        while out[0].len() < expected + delay {
            let produced = resampler
                .process_partial::<Vec<f32>>(None, None)
                .map_err(resample_error)?;
            if produced.first().is_none_or(Vec::is_empty) {
                break;
            }
            append(&mut out, produced);
        }

        for channel in &mut out {
            channel.drain(..delay.min(channel.len()));
            channel.resize(expected, 0.0);
        }
        Ok(interleave(&out))
    }
}

fn resample_error(e: rubato::ResampleError) -> Error {
    Error::Audio(format!("resampler: {e}"))
}

fn deinterleave(samples: &[f32], channels: usize) -> Vec<Vec<f32>> {
    let frames = samples.len() / channels;
    let mut planar = vec![Vec::with_capacity(frames); channels];
    for frame in samples.chunks_exact(channels) {
        for (channel, &sample) in planar.iter_mut().zip(frame) {
            channel.push(sample);
        }
    }
    planar
}

fn interleave(planar: &[Vec<f32>]) -> Vec<f32> {
    let frames = planar.first().map_or(0, Vec::len);
    let mut out = Vec::with_capacity(frames * planar.len());
    for i in 0..frames {
        out.extend(planar.iter().map(|c| c[i]));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(clippy::cast_precision_loss)]
    fn sine(frequency: f32, rate: u32, frames: usize) -> Vec<f32> {
        (0..frames)
            .map(|i| (2.0 * std::f32::consts::PI * frequency * i as f32 / rate as f32).sin() * 0.5)
            .collect()
    }

    #[allow(clippy::cast_precision_loss)]
    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
    }

    #[test]
    fn test_passthrough_when_rates_match() {
        let mut rc = RateConverter::new(24_000, 24_000, 1).unwrap();
        assert!(rc.is_passthrough());

        let input = sine(440.0, 24_000, 500);
        assert_eq!(rc.process(&input).unwrap(), input);
    }

    #[test]
    fn test_resample_halves_length() {
        let mut rc = RateConverter::new(48_000, 24_000, 1).unwrap();
        assert!(!rc.is_passthrough());

        let input = sine(440.0, 48_000, 4800);
        let out = rc.process(&input).unwrap();
        assert_eq!(out.len(), 2400);

        // A tone well below the new Nyquist keeps its level
        let level = rms(&out[200..2200]);
        assert!((level - rms(&input)).abs() < 0.02, "rms {level}");
    }

    #[test]
    fn test_resample_upsamples_interleaved_stereo() {
        let mut rc = RateConverter::new(24_000, 48_000, 2).unwrap();
        let mono = sine(300.0, 24_000, 2400);
        let stereo: Vec<f32> = mono.iter().flat_map(|&s| [s, -s]).collect();

        let out = rc.process(&stereo).unwrap();
        assert_eq!(out.len(), 4800 * 2);
        for frame in out.chunks_exact(2).skip(100).take(4000) {
            assert!((frame[0] + frame[1]).abs() < 1e-4, "channels drifted apart");
        }
    }

    #[test]
    fn test_downsampling_filters_tones_above_nyquist() {
        let mut rc = RateConverter::new(48_000, 24_000, 1).unwrap();
        let input = sine(15_000.0, 48_000, 4800);

        let out = rc.process(&input).unwrap();
        assert!(rms(&out[200..2200]) < 0.1 * rms(&input));
    }

    #[test]
    fn test_zero_rate_is_rejected() {
        assert!(matches!(
            RateConverter::new(0, 48_000, 1),
            Err(Error::Audio(_))
        ));
    }
}
