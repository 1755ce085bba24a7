//! End-to-end engine behaviour through the public control and render API

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use twindeck_core::audio_file::{LoadError, TrackDecoder, TrackSource};
use twindeck_core::engine::{AudioEngine, EngineEvent, EngineHandle, InterpolationMethod, Parameter};
use twindeck_core::recording::{RecordingError, RecordingResult, RecordingSink};
use twindeck_core::track::Track;
use twindeck_core::{DeckId, PlayState, StereoSample};

const RATE: u32 = 44100;
const BLOCK: usize = 441;

/// Deterministic non-silent test signal
fn ramp_frame(i: usize) -> StereoSample {
    let v = (i % 1000) as f32 / 1000.0 - 0.5;
    StereoSample::new(v, -v)
}

/// In-memory decoder: the file stem is the length in seconds
struct RampDecoder;

impl TrackDecoder for RampDecoder {
    fn decode(&self, track: &Track) -> Result<TrackSource, LoadError> {
        let seconds: usize = track
            .path()
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| LoadError::Unsupported(track.path().to_path_buf()))?;
        let frames = (0..seconds * RATE as usize).map(ramp_frame).collect();
        Ok(TrackSource::new(RATE, frames))
    }
}

fn engine() -> (AudioEngine, EngineHandle) {
    let (mut engine, handle) =
        AudioEngine::with_decoder(Arc::new(RampDecoder), InterpolationMethod::Cubic);
    engine.prepare(RATE, BLOCK);
    (engine, handle)
}

fn render_seconds(engine: &mut AudioEngine, seconds: usize) -> Vec<StereoSample> {
    let mut out = Vec::with_capacity(seconds * RATE as usize);
    let mut block = vec![StereoSample::silence(); BLOCK];
    for _ in 0..seconds * RATE as usize / BLOCK {
        engine.render_block(&mut block);
        out.extend_from_slice(&block);
    }
    out
}

/// Sink capturing every block in memory
#[derive(Clone, Default)]
struct CaptureSink {
    blocks: Arc<Mutex<Vec<Vec<StereoSample>>>>,
    closed: Arc<AtomicBool>,
}

impl RecordingSink for CaptureSink {
    fn write(&mut self, block: &[StereoSample]) -> RecordingResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RecordingError::Closed);
        }
        self.blocks.lock().unwrap().push(block.to_vec());
        Ok(())
    }

    fn close(&mut self) -> RecordingResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// Sink whose every write fails
#[derive(Clone, Default)]
struct FailingSink {
    closed: Arc<AtomicBool>,
}

impl RecordingSink for FailingSink {
    fn write(&mut self, _block: &[StereoSample]) -> RecordingResult<()> {
        Err(RecordingError::Write("disk full".to_string()))
    }

    fn close(&mut self) -> RecordingResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[test]
fn test_deck_a_only_plays_source_unchanged() {
    let (mut engine, mut handle) = engine();
    handle.load_track(DeckId::A, Track::new("200.wav")).unwrap();
    handle.set_crossfader(-1.0);
    handle.set_master_gain(1.0);
    handle.play(DeckId::A);

    let out = render_seconds(&mut engine, 1);
    assert_eq!(out.len(), RATE as usize);
    for (i, frame) in out.iter().enumerate() {
        assert_eq!(*frame, ramp_frame(i), "frame {}", i);
    }

    let position = handle.deck(DeckId::A).position();
    let block_seconds = BLOCK as f64 / RATE as f64;
    assert!((position - 1.0).abs() <= block_seconds, "position {}", position);
}

#[test]
fn test_crossfader_law() {
    let (_engine, handle) = engine();
    handle.set_crossfader(-1.0);
    assert_eq!(handle.crossfader_gains(), (1.0, 0.0));
    handle.set_crossfader(0.0);
    assert_eq!(handle.crossfader_gains(), (0.5, 0.5));
    handle.set_crossfader(1.0);
    assert_eq!(handle.crossfader_gains(), (0.0, 1.0));
}

#[test]
fn test_centered_crossfader_sums_both_decks() {
    let (mut engine, mut handle) = engine();
    handle.load_track(DeckId::A, Track::new("5.wav")).unwrap();
    handle.load_track(DeckId::B, Track::new("5.wav")).unwrap();
    handle.set_master_gain(1.0);
    handle.play(DeckId::A);
    handle.play(DeckId::B);

    let mut block = vec![StereoSample::silence(); BLOCK];
    engine.render_block(&mut block);
    for (i, frame) in block.iter().enumerate() {
        let expected = ramp_frame(i);
        assert!((frame.left - expected.left).abs() < 1e-6);
        assert!((frame.right - expected.right).abs() < 1e-6);
    }
}

#[test]
fn test_gain_is_clamped_and_reported() {
    let (_engine, mut handle) = engine();
    let deck = handle.deck(DeckId::A);
    deck.set_gain(5.0);
    assert_eq!(deck.gain(), 2.0);
    deck.set_gain(-1.0);
    assert_eq!(deck.gain(), 0.0);
    deck.set_gain(f32::NAN);
    assert_eq!(deck.gain(), 0.0);

    let events = handle.poll_events();
    assert!(events.contains(&EngineEvent::ParameterClamped {
        parameter: Parameter::Gain(DeckId::A),
        requested: 5.0,
        applied: 2.0,
    }));
    assert!(events.contains(&EngineEvent::ParameterRejected {
        parameter: Parameter::Gain(DeckId::A),
    }));
}

#[test]
fn test_stop_is_idempotent() {
    let (mut engine, mut handle) = engine();
    handle.load_track(DeckId::A, Track::new("5.wav")).unwrap();
    handle.play(DeckId::A);
    render_seconds(&mut engine, 1);

    handle.stop(DeckId::A);
    handle.stop(DeckId::A);
    assert_eq!(handle.deck(DeckId::A).state(), PlayState::Loaded);
    assert_eq!(handle.deck(DeckId::A).position(), 0.0);

    let stops = handle
        .poll_events()
        .into_iter()
        .filter(|e| matches!(e, EngineEvent::PlaybackStopped { .. }))
        .count();
    assert_eq!(stops, 1);
}

#[test]
fn test_loop_wraps_back_to_start() {
    let (mut engine, mut handle) = engine();
    handle.load_track(DeckId::A, Track::new("30.wav")).unwrap();
    let deck = handle.deck(DeckId::A);
    deck.set_loop(10.0, 20.0);
    deck.enable_loop(true);
    deck.seek(19.5);
    deck.play();
    assert!(deck.loop_active());

    render_seconds(&mut engine, 1);
    let position = handle.deck(DeckId::A).position();
    assert!(position >= 10.0 && position < 20.0 + BLOCK as f64 / RATE as f64, "position {}", position);
    assert!(position < 11.0, "position {}", position);
}

#[test]
fn test_load_resets_cue_point() {
    let (_engine, mut handle) = engine();
    handle.load_track(DeckId::A, Track::new("10.wav")).unwrap();
    handle.deck(DeckId::A).set_cue_point(4.0);
    handle.load_track(DeckId::A, Track::new("10.wav")).unwrap();
    handle.deck(DeckId::A).jump_to_cue();
    assert_eq!(handle.deck(DeckId::A).position(), 0.0);
}

#[test]
fn test_track_end_is_reported_once() {
    let (mut engine, mut handle) = engine();
    handle.load_track(DeckId::B, Track::new("1.wav")).unwrap();
    handle.play(DeckId::B);
    render_seconds(&mut engine, 3);

    assert_eq!(handle.deck(DeckId::B).position(), 1.0);
    let ended = handle
        .poll_events()
        .into_iter()
        .filter(|e| *e == EngineEvent::TrackEnded { deck: DeckId::B })
        .count();
    assert_eq!(ended, 1);
}

#[test]
fn test_recording_captures_master_blocks() {
    let (mut engine, mut handle) = engine();
    handle.load_track(DeckId::A, Track::new("5.wav")).unwrap();
    handle.set_crossfader(-1.0);
    handle.play(DeckId::A);

    let sink = CaptureSink::default();
    handle.start_recording(Box::new(sink.clone())).unwrap();
    assert!(matches!(
        handle.start_recording(Box::new(CaptureSink::default())),
        Err(RecordingError::AlreadyRecording)
    ));

    let mut rendered = Vec::new();
    let mut block = vec![StereoSample::silence(); BLOCK];
    for _ in 0..8 {
        engine.render_block(&mut block);
        rendered.push(block.clone());
    }

    assert_eq!(handle.stop_recording().unwrap(), 8);
    assert!(sink.closed.load(Ordering::Acquire));
    assert_eq!(*sink.blocks.lock().unwrap(), rendered);

    // Nothing more reaches the sink once stopped
    engine.render_block(&mut block);
    assert_eq!(sink.blocks.lock().unwrap().len(), 8);
    assert!(handle
        .poll_events()
        .contains(&EngineEvent::RecordingStopped { blocks: 8, skipped: 0 }));
}

#[test]
fn test_failing_sink_stops_recording_but_not_mixing() {
    let (mut engine, mut handle) = engine();
    handle.load_track(DeckId::A, Track::new("5.wav")).unwrap();
    handle.set_crossfader(-1.0);
    handle.set_master_gain(1.0);
    handle.play(DeckId::A);

    let sink = FailingSink::default();
    handle.start_recording(Box::new(sink.clone())).unwrap();

    let mut block = vec![StereoSample::silence(); BLOCK];
    engine.render_block(&mut block);
    assert!(!handle.is_recording());

    let events = handle.poll_events();
    assert!(events
        .iter()
        .any(|e| matches!(e, EngineEvent::RecordingFailed { .. })));
    assert!(sink.closed.load(Ordering::Acquire));

    engine.render_block(&mut block);
    assert_eq!(block[0], ramp_frame(BLOCK));
    assert!(handle.deck(DeckId::A).is_playing());
}

#[test]
fn test_stale_failure_does_not_close_next_recording() {
    let (mut engine, mut handle) = engine();
    handle.load_track(DeckId::A, Track::new("5.wav")).unwrap();
    handle.play(DeckId::A);

    let failing = FailingSink::default();
    handle.start_recording(Box::new(failing.clone())).unwrap();
    let mut block = vec![StereoSample::silence(); BLOCK];
    engine.render_block(&mut block);
    assert!(!handle.is_recording());

    // Restart before the failure has been polled
    let capture = CaptureSink::default();
    handle.start_recording(Box::new(capture.clone())).unwrap();
    assert!(failing.closed.load(Ordering::Acquire));
    engine.render_block(&mut block);

    let events = handle.poll_events();
    assert!(!events
        .iter()
        .any(|e| matches!(e, EngineEvent::RecordingFailed { .. })));
    assert!(handle.is_recording());
    assert!(!capture.closed.load(Ordering::Acquire));

    for _ in 0..4 {
        engine.render_block(&mut block);
    }
    assert_eq!(capture.blocks.lock().unwrap().len(), 5);
    assert_eq!(handle.stop_recording().unwrap(), 5);
    assert!(capture.closed.load(Ordering::Acquire));
}

#[test]
fn test_large_render_is_recorded_as_one_block() {
    let (mut engine, mut handle) =
        AudioEngine::with_decoder(Arc::new(RampDecoder), InterpolationMethod::Cubic);
    engine.prepare(RATE, 8192);
    handle.load_track(DeckId::A, Track::new("5.wav")).unwrap();
    handle.set_crossfader(-1.0);
    handle.play(DeckId::A);

    let sink = CaptureSink::default();
    handle.start_recording(Box::new(sink.clone())).unwrap();
    let mut block = vec![StereoSample::silence(); 8192];
    engine.render_block(&mut block);

    {
        let blocks = sink.blocks.lock().unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0], block);
    }
    assert_eq!(handle.stop_recording().unwrap(), 1);
}

#[test]
fn test_mixer_controls_are_clamped_and_reported() {
    let (_engine, mut handle) = engine();
    handle.set_crossfader(3.0);
    assert_eq!(handle.crossfader(), 1.0);
    handle.set_master_gain(5.0);
    assert_eq!(handle.master_gain(), 2.0);
    handle.set_cue_gain(1.5);
    assert_eq!(handle.cue_gain(), 1.0);

    let events = handle.poll_events();
    for (parameter, requested, applied) in [
        (Parameter::Crossfader, 3.0, 1.0),
        (Parameter::MasterGain, 5.0, 2.0),
        (Parameter::CueGain, 1.5, 1.0),
    ] {
        assert!(
            events.contains(&EngineEvent::ParameterClamped {
                parameter,
                requested,
                applied,
            }),
            "{:?}",
            parameter
        );
    }
}

#[test]
fn test_deck_eq_is_clamped_per_band() {
    let (_engine, mut handle) = engine();
    let deck = handle.deck(DeckId::B);
    deck.set_low_eq(35.0);
    deck.set_mid_eq(-50.0);
    deck.set_high_eq(3.0);
    assert_eq!((deck.low_eq(), deck.mid_eq(), deck.high_eq()), (20.0, -20.0, 3.0));

    let clamped: Vec<_> = handle
        .poll_events()
        .into_iter()
        .filter(|e| matches!(e, EngineEvent::ParameterClamped { .. }))
        .collect();
    assert_eq!(
        clamped,
        vec![
            EngineEvent::ParameterClamped {
                parameter: Parameter::LowEq(DeckId::B),
                requested: 35.0,
                applied: 20.0,
            },
            EngineEvent::ParameterClamped {
                parameter: Parameter::MidEq(DeckId::B),
                requested: -50.0,
                applied: -20.0,
            },
        ]
    );
}

#[test]
fn test_release_closes_recording_and_reports_it() {
    let (mut engine, mut handle) = engine();
    handle.load_track(DeckId::A, Track::new("5.wav")).unwrap();
    handle.play(DeckId::A);

    let sink = CaptureSink::default();
    handle.start_recording(Box::new(sink.clone())).unwrap();
    render_seconds(&mut engine, 1);
    engine.release();

    assert!(sink.closed.load(Ordering::Acquire));
    assert!(!handle.is_recording());
    let blocks = (RATE as usize / BLOCK) as u64;
    assert!(handle
        .poll_events()
        .contains(&EngineEvent::RecordingStopped { blocks, skipped: 0 }));
}

#[test]
fn test_loop_bounds_keep_playhead_precision() {
    let (_engine, mut handle) = engine();
    handle.load_track(DeckId::A, Track::new("30.wav")).unwrap();
    let deck = handle.deck(DeckId::A);
    deck.set_loop(10.1, 20.3);
    assert_eq!(deck.loop_start(), 10.1);
    assert_eq!(deck.loop_end(), 20.3);
    let snapshot = handle.deck_snapshot(DeckId::A);
    assert_eq!((snapshot.loop_start, snapshot.loop_end), (10.1, 20.3));
}
