//! Published deck and mixer parameters
//!
//! Every value that crosses between the control plane and the render thread
//! lives here, as either a single atomic scalar or a pointer swap of an
//! immutable value. Control calls store directly, so a getter called right
//! after a setter returns the effective value. The render thread loads each
//! field once at the start of a block.

use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Mutex;

use basedrop::{Shared, SharedCell};

use super::gc::gc_handle;
use super::mixer::{DEFAULT_CUE_GAIN, DEFAULT_MASTER_GAIN};
use crate::audio_file::TrackSource;
use crate::recording::RecordingSink;
use crate::track::Track;
use crate::types::PlayState;

/// f32 stored as its bit pattern
#[derive(Debug, Default)]
pub(crate) struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    #[inline]
    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

/// f64 stored as its bit pattern
#[derive(Debug, Default)]
pub(crate) struct AtomicF64(AtomicU64);

impl AtomicF64 {
    pub fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    #[inline]
    pub fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    #[inline]
    pub fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Release);
    }

    /// Replace `current` with `new` only if nobody wrote in between
    ///
    /// Compares bit patterns, so `current` must be a value previously
    /// returned by `load`.
    #[inline]
    pub fn compare_exchange(&self, current: f64, new: f64) -> bool {
        self.0
            .compare_exchange(
                current.to_bits(),
                new.to_bits(),
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .is_ok()
    }
}

/// Loop boundaries in seconds, same precision as the playhead
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LoopRegion {
    pub start: f64,
    pub end: f64,
}

impl LoopRegion {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    /// A loop only plays when it has positive length
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.end > self.start
    }
}

/// Loop region swapped whole on every edit
///
/// Start and end always travel together so the render thread can never see
/// one bound from before an edit and the other from after it.
pub(crate) struct LoopCell {
    region: SharedCell<LoopRegion>,
    /// Serializes control-plane edits; the render thread never takes it
    edit: Mutex<()>,
}

impl LoopCell {
    pub fn new() -> Self {
        Self {
            region: SharedCell::new(Shared::new(&gc_handle(), LoopRegion::default())),
            edit: Mutex::new(()),
        }
    }

    #[inline]
    pub fn load(&self) -> LoopRegion {
        *self.region.get()
    }

    pub fn store(&self, region: LoopRegion) {
        self.update(|_| region);
    }

    /// Apply `f` to the current region as one edit
    pub fn update(&self, f: impl FnOnce(LoopRegion) -> LoopRegion) -> LoopRegion {
        let _guard = match self.edit.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let next = f(self.load());
        self.region.set(Shared::new(&gc_handle(), next));
        next
    }
}

/// Clamp a control value into its documented range
///
/// Returns `None` for NaN, otherwise the clamped value and whether clamping
/// changed it.
pub(crate) fn clamp_to(value: f64, range: RangeInclusive<f64>) -> Option<(f64, bool)> {
    if value.is_nan() {
        return None;
    }
    let clamped = value.clamp(*range.start(), *range.end());
    Some((clamped, clamped != value))
}

/// Same as [`clamp_to`] for f32 ranges
pub(crate) fn clamp_f32(value: f32, range: &RangeInclusive<f32>) -> Option<(f32, bool)> {
    if value.is_nan() {
        return None;
    }
    let clamped = value.clamp(*range.start(), *range.end());
    Some((clamped, clamped != value))
}

/// Per-deck state shared by the control plane and the render thread
pub(crate) struct DeckShared {
    /// Playback state (see [`PlayState::to_u8`])
    pub state: AtomicU8,
    /// Playhead in seconds
    pub position: AtomicF64,
    /// Length of the loaded source in seconds
    pub track_length: AtomicF64,
    pub gain: AtomicF32,
    pub speed: AtomicF32,
    pub low_db: AtomicF32,
    pub mid_db: AtomicF32,
    pub high_db: AtomicF32,
    pub cue_point: AtomicF64,
    pub loop_region: LoopCell,
    pub loop_enabled: AtomicBool,
    /// Written by the render thread after each block
    pub rms: AtomicF32,
    pub peak: AtomicF32,
    /// Decoded audio, swapped whole on load
    pub source: SharedCell<TrackSource>,
    /// Track metadata, control plane only
    pub track: Mutex<Option<Track>>,
}

impl DeckShared {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(PlayState::Empty.to_u8()),
            position: AtomicF64::new(0.0),
            track_length: AtomicF64::new(0.0),
            gain: AtomicF32::new(1.0),
            speed: AtomicF32::new(1.0),
            low_db: AtomicF32::new(0.0),
            mid_db: AtomicF32::new(0.0),
            high_db: AtomicF32::new(0.0),
            cue_point: AtomicF64::new(0.0),
            loop_region: LoopCell::new(),
            loop_enabled: AtomicBool::new(false),
            rms: AtomicF32::new(0.0),
            peak: AtomicF32::new(0.0),
            source: SharedCell::new(Shared::new(&gc_handle(), TrackSource::default())),
            track: Mutex::new(None),
        }
    }

    #[inline]
    pub fn play_state(&self) -> PlayState {
        PlayState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[inline]
    pub fn set_play_state(&self, state: PlayState) {
        self.state.store(state.to_u8(), Ordering::Release);
    }

    /// Whether the loop should be applied right now
    #[inline]
    pub fn loop_active(&self) -> bool {
        self.loop_enabled.load(Ordering::Acquire) && self.loop_region.load().is_valid()
    }

    pub fn snapshot(&self) -> DeckSnapshot {
        let position = self.position.load();
        let track_length = self.track_length.load();
        let region = self.loop_region.load();
        DeckSnapshot {
            state: self.play_state(),
            position,
            position_relative: relative(position, track_length),
            track_length,
            gain: self.gain.load(),
            speed: self.speed.load(),
            low_db: self.low_db.load(),
            mid_db: self.mid_db.load(),
            high_db: self.high_db.load(),
            cue_point: self.cue_point.load(),
            loop_start: region.start,
            loop_end: region.end,
            loop_enabled: self.loop_enabled.load(Ordering::Acquire),
            rms: self.rms.load(),
            peak: self.peak.load(),
        }
    }
}

/// Position as a fraction of the track, 0 when nothing is loaded
#[inline]
pub(crate) fn relative(position: f64, track_length: f64) -> f64 {
    if track_length > 0.0 {
        (position / track_length).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// The open recording sink and the recording it belongs to
pub(crate) struct ActiveSink {
    pub sink: Box<dyn RecordingSink>,
    /// Bumped by every `start_recording`; faults carry it back
    pub generation: u64,
}

/// Mixer state shared by the control plane and the render thread
pub(crate) struct MixerShared {
    pub crossfader: AtomicF32,
    pub master_gain: AtomicF32,
    pub cue_gain: AtomicF32,
    /// Render thread writes blocks to the sink while set
    pub recording: AtomicBool,
    /// Sink slot; the render thread only ever `try_lock`s it
    pub sink: Mutex<Option<ActiveSink>>,
    /// Blocks handed to the sink since recording started
    pub recorded_blocks: AtomicU64,
    /// Blocks not recorded because the slot was busy
    pub skipped_blocks: AtomicU64,
    pub master_rms: AtomicF32,
    pub master_peak: AtomicF32,
}

impl MixerShared {
    pub fn new() -> Self {
        Self {
            crossfader: AtomicF32::new(0.0),
            master_gain: AtomicF32::new(DEFAULT_MASTER_GAIN),
            cue_gain: AtomicF32::new(DEFAULT_CUE_GAIN),
            recording: AtomicBool::new(false),
            sink: Mutex::new(None),
            recorded_blocks: AtomicU64::new(0),
            skipped_blocks: AtomicU64::new(0),
            master_rms: AtomicF32::new(0.0),
            master_peak: AtomicF32::new(0.0),
        }
    }

    pub fn snapshot(&self) -> MixerSnapshot {
        MixerSnapshot {
            crossfader: self.crossfader.load(),
            master_gain: self.master_gain.load(),
            cue_gain: self.cue_gain.load(),
            recording: self.recording.load(Ordering::Acquire),
            recorded_blocks: self.recorded_blocks.load(Ordering::Relaxed),
            skipped_blocks: self.skipped_blocks.load(Ordering::Relaxed),
            rms: self.master_rms.load(),
            peak: self.master_peak.load(),
        }
    }
}

/// Point-in-time copy of one deck's published state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeckSnapshot {
    pub state: PlayState,
    /// Seconds
    pub position: f64,
    /// 0..1 through the track
    pub position_relative: f64,
    /// Seconds, 0 when empty
    pub track_length: f64,
    pub gain: f32,
    pub speed: f32,
    pub low_db: f32,
    pub mid_db: f32,
    pub high_db: f32,
    pub cue_point: f64,
    pub loop_start: f64,
    pub loop_end: f64,
    pub loop_enabled: bool,
    /// Block RMS after gain and tone shaping
    pub rms: f32,
    /// Block peak after gain and tone shaping
    pub peak: f32,
}

/// Point-in-time copy of the mixer's published state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MixerSnapshot {
    pub crossfader: f32,
    pub master_gain: f32,
    pub cue_gain: f32,
    pub recording: bool,
    pub recorded_blocks: u64,
    pub skipped_blocks: u64,
    /// Master output block RMS
    pub rms: f32,
    /// Master output block peak
    pub peak: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loop_cell_keeps_full_precision() {
        let cell = LoopCell::new();
        cell.store(LoopRegion::new(10.1, 20.3));
        assert_eq!(cell.load(), LoopRegion::new(10.1, 20.3));

        let updated = cell.update(|r| LoopRegion { end: 5.0, ..r });
        assert_eq!(updated, LoopRegion::new(10.1, 5.0));
        assert!(!cell.load().is_valid());
    }

    #[test]
    fn test_atomic_f64_compare_exchange() {
        let cell = AtomicF64::new(1.5);
        let seen = cell.load();
        cell.store(0.0);
        assert!(!cell.compare_exchange(seen, 2.0));
        assert_eq!(cell.load(), 0.0);
        assert!(cell.compare_exchange(0.0, 2.0));
        assert_eq!(cell.load(), 2.0);
    }

    #[test]
    fn test_clamp_helpers() {
        assert_eq!(clamp_f32(5.0, &(0.0..=2.0)), Some((2.0, true)));
        assert_eq!(clamp_f32(1.0, &(0.0..=2.0)), Some((1.0, false)));
        assert_eq!(clamp_f32(f32::NAN, &(0.0..=2.0)), None);
        assert_eq!(clamp_to(-3.0, 0.0..=100.0), Some((0.0, true)));
    }

    #[test]
    fn test_relative_position() {
        assert_eq!(relative(50.0, 200.0), 0.25);
        assert_eq!(relative(5.0, 0.0), 0.0);
    }
}
