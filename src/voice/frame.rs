//! Captured audio frames

use std::ops::Deref;
use std::sync::Arc;

/// One fixed-duration block of mono i16 PCM samples
///
/// Immutable once captured. Cloning shares the sample buffer.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame(Arc<[i16]>);

impl Frame {
    /// Wrap captured samples
    #[must_use]
    pub fn new(samples: impl Into<Arc<[i16]>>) -> Self {
        Self(samples.into())
    }

    /// A frame of `len` samples all equal to `value`
    #[must_use]
    pub fn filled(value: i16, len: usize) -> Self {
        Self(vec![value; len].into())
    }

    /// Sample slice
    #[must_use]
    pub fn samples(&self) -> &[i16] {
        &self.0
    }

    /// Root-mean-square amplitude in i16 units
    #[must_use]
    pub fn rms(&self) -> f32 {
        rms(&self.0)
    }
}

impl Deref for Frame {
    type Target = [i16];

    fn deref(&self) -> &[i16] {
        &self.0
    }
}

impl From<Vec<i16>> for Frame {
    fn from(samples: Vec<i16>) -> Self {
        Self(samples.into())
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("samples", &self.0.len())
            .field("rms", &self.rms())
            .finish()
    }
}

/// Calculate RMS energy of i16 samples
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples
        .iter()
        .map(|&s| {
            let s = f64::from(s);
            s * s
        })
        .sum();
    #[allow(clippy::cast_possible_truncation)]
    let rms = (sum_squares / samples.len() as f64).sqrt() as f32;
    rms
}

/// Flatten frames into one contiguous sample buffer, preserving order
#[must_use]
pub fn concat(frames: &[Frame]) -> Vec<i16> {
    let total = frames.iter().map(|f| f.len()).sum();
    let mut samples = Vec::with_capacity(total);
    for frame in frames {
        samples.extend_from_slice(frame);
    }
    samples
}
