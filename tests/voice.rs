//! Voice component integration tests
//!
//! Tests voice components without requiring audio hardware

use std::time::{Duration, Instant};

use beacon_voice::voice::{
    DetectorState, Frame, PreRollBuffer, UtteranceRecorder, WakeWordDetector, decode_audio,
    decode_wav, frames_to_wav, normalize_keyword, samples_to_wav,
};

mod common;

use common::{MarkerModel, loud_frame, silent_frame, sine_samples, trigger_frame};

const FRAME: usize = 1280;

fn queue_of(frames: Vec<Frame>) -> crossbeam_channel::Receiver<Frame> {
    let (tx, rx) = crossbeam_channel::unbounded();
    for frame in frames {
        tx.send(frame).unwrap();
    }
    rx
}

fn numbered(n: i16) -> Frame {
    Frame::filled(n, 4)
}

#[test]
fn test_ring_shorter_than_capacity_keeps_everything() {
    let mut ring = PreRollBuffer::new(12);
    for n in 0..5 {
        ring.push(numbered(n));
    }

    let snapshot = ring.snapshot();
    let expected: Vec<Frame> = (0..5).map(numbered).collect();
    assert_eq!(snapshot, expected);
    assert_eq!(ring.len(), 5, "snapshot must not drain the buffer");
}

#[test]
fn test_ring_keeps_most_recent_capacity_frames() {
    let mut ring = PreRollBuffer::new(12);
    for n in 0..50 {
        ring.push(numbered(n));
    }

    let expected: Vec<Frame> = (38..50).map(numbered).collect();
    assert_eq!(ring.snapshot(), expected);

    ring.clear();
    assert!(ring.is_empty());
}

#[test]
fn test_gate_cooldown() {
    let mut detector = WakeWordDetector::new(
        MarkerModel::new("hey_jarvis"),
        "hey jarvis",
        0.5,
        Duration::from_secs(2),
    );
    let t0 = Instant::now();
    let frame = trigger_frame(FRAME);

    assert_eq!(detector.state_at(t0), DetectorState::Armed);
    assert!(detector.detect_at(&frame, t0));
    assert_eq!(detector.state_at(t0), DetectorState::Cooldown);

    assert!(!detector.detect_at(&frame, t0 + Duration::from_millis(1999)));
    assert!(detector.detect_at(&frame, t0 + Duration::from_secs(2)));
}

#[test]
fn test_gate_model_runs_during_cooldown() {
    let model = MarkerModel::new("hey_jarvis");
    let calls = std::sync::Arc::clone(&model.calls);
    let mut detector = WakeWordDetector::new(model, "hey jarvis", 0.5, Duration::from_secs(2));
    let t0 = Instant::now();

    assert!(detector.detect_at(&trigger_frame(FRAME), t0));
    for i in 1..=5 {
        assert!(!detector.detect_at(&silent_frame(FRAME), t0 + Duration::from_millis(i * 80)));
    }
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 6);
}

#[test]
fn test_gate_ignores_quiet_frames() {
    let mut detector = WakeWordDetector::new(
        MarkerModel::new("hey_jarvis"),
        "hey jarvis",
        0.5,
        Duration::from_secs(2),
    );
    for _ in 0..50 {
        assert!(!detector.detect(&silent_frame(FRAME)));
    }
}

#[test]
fn test_gate_falls_back_to_any_keyword() {
    // Configured word is not among the model's keywords
    let mut detector = WakeWordDetector::new(
        MarkerModel::new("alexa_v0.1"),
        "hey nano",
        0.5,
        Duration::ZERO,
    );
    assert!(detector.detect(&trigger_frame(FRAME)));
}

#[test]
fn test_keyword_normalization() {
    assert_eq!(normalize_keyword("Hey_Nano "), normalize_keyword("hey nano"));
    assert_eq!(normalize_keyword("Hey_Nano "), "hey nano");

    for raw in ["Hey_Nano ", "  HEY_JARVIS", "alexa"] {
        let once = normalize_keyword(raw);
        assert_eq!(normalize_keyword(&once), once);
    }
}

#[test]
fn test_recorder_stops_on_silence_after_minimum() {
    // min 8 frames; 8 loud then 15 quiet stops at 8 + 15
    let recorder = UtteranceRecorder::new(187, 8, 15, 500.0);
    let mut frames: Vec<Frame> = (0..8).map(|_| loud_frame(FRAME, 1000)).collect();
    frames.extend((0..40).map(|_| silent_frame(FRAME)));
    let rx = queue_of(frames);

    let recorded = recorder.record(&rx);
    assert_eq!(recorded.len(), 23);
    assert_eq!(rx.len(), 25);
}

#[test]
fn test_recorder_silence_before_minimum_counts() {
    // Quiet from the start: silence run already satisfied once min is reached
    let recorder = UtteranceRecorder::new(187, 8, 3, 500.0);
    let rx = queue_of((0..20).map(|_| silent_frame(FRAME)).collect());
    assert_eq!(recorder.record(&rx).len(), 8);
}

#[test]
fn test_recorder_all_loud_stops_at_max() {
    let recorder = UtteranceRecorder::new(30, 8, 10, 500.0);
    let rx = queue_of((0..100).map(|_| loud_frame(FRAME, 4000)).collect());
    assert_eq!(recorder.record(&rx).len(), 30);
}

#[test]
fn test_recorder_loud_frame_resets_silence() {
    let recorder = UtteranceRecorder::new(187, 1, 3, 500.0);
    let mut frames = vec![
        silent_frame(FRAME),
        silent_frame(FRAME),
        loud_frame(FRAME, 600),
        silent_frame(FRAME),
        silent_frame(FRAME),
        silent_frame(FRAME),
    ];
    frames.extend((0..10).map(|_| silent_frame(FRAME)));
    assert_eq!(recorder.record(&queue_of(frames)).len(), 6);
}

#[test]
fn test_recorder_stall_returns_partial() {
    let recorder =
        UtteranceRecorder::new(187, 8, 15, 500.0).with_pull_timeout(Duration::from_millis(50));
    let (tx, rx) = crossbeam_channel::unbounded();
    for _ in 0..3 {
        tx.send(loud_frame(FRAME, 1000)).unwrap();
    }

    let recorded = recorder.record(&rx);
    assert_eq!(recorded.len(), 3);
    drop(tx);
}

#[test]
fn test_recorder_closed_queue_returns_empty() {
    let recorder = UtteranceRecorder::new(187, 8, 15, 500.0);
    let (tx, rx) = crossbeam_channel::unbounded::<Frame>();
    drop(tx);
    assert!(recorder.record(&rx).is_empty());
}

#[test]
fn test_wav_roundtrip() {
    let samples = sine_samples(440.0, 16_000, 12_000.0);
    let wav = samples_to_wav(&samples, 16_000).unwrap();

    let pcm = decode_wav(&wav).unwrap();
    assert_eq!(pcm.sample_rate, 16_000);
    assert_eq!(pcm.channels, 1);
    assert_eq!(pcm.samples, samples);
    assert_eq!(pcm.duration(), Duration::from_secs(1));
}

#[test]
fn test_frames_encode_in_order() {
    let frames = vec![Frame::filled(1, 3), Frame::filled(2, 3), Frame::filled(3, 3)];
    let pcm = decode_audio(&frames_to_wav(&frames, 16_000).unwrap()).unwrap();
    assert_eq!(pcm.samples, vec![1, 1, 1, 2, 2, 2, 3, 3, 3]);
}

#[test]
fn test_frame_rms() {
    assert!(silent_frame(FRAME).rms().abs() < f32::EPSILON);
    assert!((loud_frame(FRAME, 1000).rms() - 1000.0).abs() < 0.01);

    let sine = Frame::from(sine_samples(400.0, 1600, 10_000.0));
    // RMS of a full-cycle sine is amplitude / sqrt(2)
    assert!((sine.rms() - 7071.0).abs() < 50.0);
}
