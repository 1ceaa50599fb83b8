//! Utterance recording with silence endpointing

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};

use super::Frame;
use crate::config::AudioConfig;

/// Wait for the next frame before treating the input as stalled
pub const DEFAULT_PULL_TIMEOUT: Duration = Duration::from_secs(1);

/// Records live frames after a trigger until silence or the length cap
#[derive(Debug, Clone)]
pub struct UtteranceRecorder {
    max_frames: usize,
    min_frames: usize,
    silence_frames: usize,
    silence_threshold: f32,
    pull_timeout: Duration,
}

impl UtteranceRecorder {
    /// Create a recorder from explicit frame counts
    #[must_use]
    pub fn new(
        max_frames: usize,
        min_frames: usize,
        silence_frames: usize,
        silence_threshold: f32,
    ) -> Self {
        Self {
            max_frames: max_frames.max(1),
            min_frames: min_frames.max(1),
            silence_frames: silence_frames.max(1),
            silence_threshold,
            pull_timeout: DEFAULT_PULL_TIMEOUT,
        }
    }

    /// Create a recorder from the audio configuration
    #[must_use]
    pub fn from_config(audio: &AudioConfig) -> Self {
        Self::new(
            audio.max_frames(),
            audio.min_frames(),
            audio.silence_frames(),
            audio.silence_threshold,
        )
    }

    /// Override the per-frame stall timeout
    #[must_use]
    pub const fn with_pull_timeout(mut self, timeout: Duration) -> Self {
        self.pull_timeout = timeout;
        self
    }

    /// Pull frames from `frames` until the utterance ends
    ///
    /// Stops at `max_frames`, or once at least `min_frames` are recorded and the trailing
    /// run of quiet frames reaches `silence_frames`. A stalled or closed queue ends the
    /// recording early with whatever was captured.
    #[must_use]
    pub fn record(&self, frames: &Receiver<Frame>) -> Vec<Frame> {
        let mut recorded = Vec::with_capacity(self.max_frames.min(1024));
        let mut silence = 0usize;

        while recorded.len() < self.max_frames {
            let frame = match frames.recv_timeout(self.pull_timeout) {
                Ok(frame) => frame,
                Err(RecvTimeoutError::Timeout) => {
                    tracing::warn!(frames = recorded.len(), "audio input stalled while recording");
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    tracing::warn!(frames = recorded.len(), "audio input closed while recording");
                    break;
                }
            };

            if frame.rms() < self.silence_threshold {
                silence += 1;
            } else {
                silence = 0;
            }
            recorded.push(frame);

            if recorded.len() >= self.min_frames && silence >= self.silence_frames {
                break;
            }
        }

        tracing::debug!(frames = recorded.len(), trailing_silence = silence, "recording finished");
        recorded
    }

    #[must_use]
    pub const fn max_frames(&self) -> usize {
        self.max_frames
    }

    #[must_use]
    pub const fn min_frames(&self) -> usize {
        self.min_frames
    }

    #[must_use]
    pub const fn silence_frames(&self) -> usize {
        self.silence_frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEN: usize = 160;
    const THRESHOLD: f32 = 500.0;

    fn loud() -> Frame {
        Frame::filled(2000, LEN)
    }

    fn quiet() -> Frame {
        Frame::filled(10, LEN)
    }

    fn queue(frames: impl IntoIterator<Item = Frame>) -> Receiver<Frame> {
        let (tx, rx) = crossbeam_channel::unbounded();
        for frame in frames {
            tx.send(frame).unwrap();
        }
        rx
    }

    fn recorder(max: usize, min: usize, silence: usize) -> UtteranceRecorder {
        UtteranceRecorder::new(max, min, silence, THRESHOLD)
            .with_pull_timeout(Duration::from_millis(20))
    }

    #[test]
    fn test_stops_after_min_plus_silence() {
        let (min, silence) = (8, 5);
        let rx = queue(
            std::iter::repeat_with(loud)
                .take(min)
                .chain(std::iter::repeat_with(quiet).take(silence + 10)),
        );
        let frames = recorder(100, min, silence).record(&rx);
        assert_eq!(frames.len(), min + silence);
    }

    #[test]
    fn test_silence_before_minimum_does_not_stop() {
        let rx = queue(std::iter::repeat_with(quiet).take(50));
        let frames = recorder(100, 20, 3).record(&rx);
        assert_eq!(frames.len(), 20);
    }

    #[test]
    fn test_loud_frame_resets_silence_run() {
        let mut input = vec![loud(), quiet(), quiet(), loud()];
        input.extend(std::iter::repeat_with(quiet).take(10));
        let frames = recorder(100, 1, 3).record(&queue(input));
        assert_eq!(frames.len(), 7);
    }

    #[test]
    fn test_all_loud_stops_at_max() {
        let rx = queue(std::iter::repeat_with(loud).take(200));
        let frames = recorder(30, 5, 5).record(&rx);
        assert_eq!(frames.len(), 30);
        assert_eq!(rx.len(), 170);
    }

    #[test]
    fn test_stall_returns_partial_recording() {
        let (tx, rx) = crossbeam_channel::unbounded();
        tx.send(loud()).unwrap();
        tx.send(loud()).unwrap();
        let frames = recorder(100, 10, 3).record(&rx);
        assert_eq!(frames.len(), 2);
        drop(tx);
    }

    #[test]
    fn test_stall_with_nothing_returns_empty() {
        let (_tx, rx) = crossbeam_channel::unbounded::<Frame>();
        assert!(recorder(100, 10, 3).record(&rx).is_empty());
    }

    #[test]
    fn test_frame_counts_from_config() {
        let audio = AudioConfig {
            chunk_ms: 80,
            min_record_seconds: 0.64,
            max_record_seconds: 4.0,
            silence_ms: 1200,
            ..AudioConfig::default()
        };
        let r = UtteranceRecorder::from_config(&audio);
        assert_eq!(r.min_frames(), 8);
        assert_eq!(r.max_frames(), 50);
        assert_eq!(r.silence_frames(), 15);
    }
}
