//! Deck - One track player with gain, variable speed and tone shaping
//!
//! A deck is split in two halves that share one [`DeckShared`]:
//!
//! - [`Deck`] lives on the render thread and owns the filter and resampler
//!   state. It reads parameters once per block and publishes the playhead
//!   and levels back.
//! - [`DeckControl`] lives on the control plane. Every setter clamps, stores
//!   the effective value into the shared atomics and returns immediately.
//!
//! State machine: `Empty → Loaded → {Playing ⇄ Paused} → stop → Loaded`.
//! Only `DeckControl` moves a deck between states.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use basedrop::Shared;

use super::events::{EngineEvent, Notifier, Parameter};
use super::gc::gc_handle;
use super::meter::BlockLevels;
use super::params::{clamp_f32, clamp_to, relative, DeckShared, DeckSnapshot, LoopRegion};
use super::resampler::{InterpolationMethod, Resampler};
use super::tone::ToneShaper;
use crate::audio_file::TrackSource;
use crate::track::Track;
use crate::types::{
    DeckId, PlayState, StereoSample, EQ_DB_RANGE, GAIN_RANGE, SAMPLE_RATE, SPEED_RANGE,
};

/// What one render pass did, for the mixer's bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeckRender {
    /// Nothing loaded or not playing
    Silent,
    /// Audio rendered, playhead advanced
    Played,
    /// Audio rendered and the playhead just hit the end of the track
    ReachedEnd,
}

/// Render-side half of a deck
pub struct Deck {
    id: DeckId,
    shared: Arc<DeckShared>,
    resampler: Resampler,
    tone: ToneShaper,
    render_rate: u32,
    /// Set once the end of the track has been reported
    at_end: bool,
}

impl Deck {
    pub(crate) fn new(id: DeckId, shared: Arc<DeckShared>, interpolation: InterpolationMethod) -> Self {
        Self {
            id,
            shared,
            resampler: Resampler::new(interpolation),
            tone: ToneShaper::new(SAMPLE_RATE),
            render_rate: SAMPLE_RATE,
            at_end: false,
        }
    }

    pub fn id(&self) -> DeckId {
        self.id
    }

    /// Adopt a new render rate; called before the first block
    pub fn prepare(&mut self, sample_rate: u32) {
        self.render_rate = sample_rate.max(1);
        self.tone.prepare(self.render_rate);
        self.at_end = false;
    }

    fn publish_levels(&self, levels: BlockLevels) {
        let levels = levels.clamped();
        self.shared.rms.store(levels.rms);
        self.shared.peak.store(levels.peak);
    }

    /// Render one block into `out` (audio thread only)
    ///
    /// Pipeline: loop check, resample, gain, tone shaping, metering,
    /// playhead advance. Never blocks or allocates; a deck with nothing to
    /// play writes silence.
    pub fn render_block(&mut self, out: &mut [StereoSample]) -> DeckRender {
        let state = self.shared.play_state();
        if state != PlayState::Playing {
            out.fill(StereoSample::silence());
            self.publish_levels(BlockLevels::silent());
            return DeckRender::Silent;
        }

        // Snapshot everything this block needs
        let start = self.shared.position.load();
        let source = self.shared.source.get();
        let gain = self.shared.gain.load();
        let speed = self.shared.speed.load();
        self.tone.set_gains(
            self.shared.low_db.load(),
            self.shared.mid_db.load(),
            self.shared.high_db.load(),
        );
        let loop_enabled = self.shared.loop_enabled.load(Ordering::Acquire);
        let region = self.shared.loop_region.load();

        if source.len_frames() == 0 {
            out.fill(StereoSample::silence());
            self.publish_levels(BlockLevels::silent());
            return DeckRender::Silent;
        }

        let length = source.duration_seconds();
        let mut position = start.clamp(0.0, length);
        if loop_enabled && region.is_valid() && position >= region.end {
            position = region.start;
        }

        let native_rate = source.sample_rate();
        let step = Resampler::step(speed, native_rate, self.render_rate);
        self.resampler
            .fill(source.frames(), position * native_rate as f64, step, out);

        if gain != 1.0 {
            for sample in out.iter_mut() {
                *sample *= gain;
            }
        }
        self.tone.process(out);
        self.publish_levels(BlockLevels::measure(out));

        let advanced =
            (position + out.len() as f64 / self.render_rate as f64 * speed as f64).min(length);
        // A seek or stop issued during this block wins over our advance
        if self.shared.play_state() == PlayState::Playing {
            self.shared.position.compare_exchange(start, advanced);
        }

        // `source` drops here; if it was the last reference the free is deferred
        if advanced >= length {
            if !self.at_end {
                self.at_end = true;
                return DeckRender::ReachedEnd;
            }
        } else {
            self.at_end = false;
        }
        DeckRender::Played
    }
}

/// Control-plane half of a deck
///
/// Setters clamp to the documented ranges, report clamping as a
/// [`EngineEvent::ParameterClamped`] notice and ignore NaN.
pub struct DeckControl {
    id: DeckId,
    shared: Arc<DeckShared>,
    notifier: Notifier,
}

impl DeckControl {
    pub(crate) fn new(id: DeckId, shared: Arc<DeckShared>, notifier: Notifier) -> Self {
        Self { id, shared, notifier }
    }

    pub fn id(&self) -> DeckId {
        self.id
    }

    // ── Loading ─────────────────────────────────────────────────────────

    /// Put a decoded source on the deck
    ///
    /// Stops playback, publishes the new source with a single pointer swap
    /// and resets position and cue point to 0. Gain, speed, EQ and the loop
    /// settings are kept.
    pub(crate) fn install(&self, track: Track, source: TrackSource) {
        let length = source.duration_seconds();
        let was_running = matches!(self.state(), PlayState::Playing | PlayState::Paused);

        self.shared.set_play_state(PlayState::Loaded);
        if was_running {
            self.notifier.send(EngineEvent::PlaybackStopped { deck: self.id });
        }
        self.shared.source.set(Shared::new(&gc_handle(), source));
        self.shared.track_length.store(length);
        self.shared.position.store(0.0);
        self.shared.cue_point.store(0.0);

        log::info!(
            "Deck {}: loaded '{}' ({:.1}s)",
            self.id,
            track.title(),
            length
        );
        if let Ok(mut slot) = self.shared.track.lock() {
            *slot = Some(track);
        }
    }

    /// Drop the loaded source and return to `Empty`
    pub(crate) fn unload(&self) {
        self.shared.set_play_state(PlayState::Empty);
        self.shared
            .source
            .set(Shared::new(&gc_handle(), TrackSource::default()));
        self.shared.track_length.store(0.0);
        self.shared.position.store(0.0);
        self.shared.cue_point.store(0.0);
        self.shared.rms.store(0.0);
        self.shared.peak.store(0.0);
        if let Ok(mut slot) = self.shared.track.lock() {
            *slot = None;
        }
    }

    /// Currently loaded track
    pub fn track(&self) -> Option<Track> {
        self.shared.track.lock().ok().and_then(|t| t.clone())
    }

    pub fn has_track(&self) -> bool {
        self.state() != PlayState::Empty
    }

    // ── Transport ───────────────────────────────────────────────────────

    pub fn state(&self) -> PlayState {
        self.shared.play_state()
    }

    pub fn is_playing(&self) -> bool {
        self.state() == PlayState::Playing
    }

    pub fn is_paused(&self) -> bool {
        self.state() == PlayState::Paused
    }

    pub fn play(&self) {
        match self.state() {
            PlayState::Empty => log::debug!("Deck {}: play ignored, no track loaded", self.id),
            PlayState::Playing => {}
            PlayState::Loaded | PlayState::Paused => {
                self.shared.set_play_state(PlayState::Playing);
                self.notifier.send(EngineEvent::PlaybackStarted { deck: self.id });
            }
        }
    }

    /// Pause, keeping the position
    pub fn pause(&self) {
        if self.state() == PlayState::Playing {
            self.shared.set_play_state(PlayState::Paused);
            self.notifier.send(EngineEvent::PlaybackPaused { deck: self.id });
        }
    }

    /// Stop and rewind to 0
    pub fn stop(&self) {
        let was_running = matches!(self.state(), PlayState::Playing | PlayState::Paused);
        if was_running {
            self.shared.set_play_state(PlayState::Loaded);
        }
        self.shared.position.store(0.0);
        if was_running {
            self.notifier.send(EngineEvent::PlaybackStopped { deck: self.id });
        }
    }

    pub fn toggle_play(&self) {
        if self.is_playing() {
            self.pause();
        } else {
            self.play();
        }
    }

    // ── Position ────────────────────────────────────────────────────────

    /// Length of the loaded source in seconds (0 when empty)
    pub fn track_length(&self) -> f64 {
        self.shared.track_length.load()
    }

    pub fn position(&self) -> f64 {
        self.shared.position.load()
    }

    /// Position as a 0..1 fraction of the track
    pub fn position_relative(&self) -> f64 {
        relative(self.position(), self.track_length())
    }

    /// Clamp a time to `[0, track_length]`, reporting out-of-range input
    fn clamp_time(&self, parameter: Parameter, seconds: f64) -> Option<f64> {
        match clamp_to(seconds, 0.0..=self.track_length()) {
            None => {
                self.notifier.rejected(parameter);
                None
            }
            Some((value, clamped)) => {
                if clamped {
                    self.notifier.clamped(parameter, seconds, value);
                }
                Some(value)
            }
        }
    }

    pub fn seek(&self, seconds: f64) {
        if let Some(position) = self.clamp_time(Parameter::Position(self.id), seconds) {
            self.shared.position.store(position);
        }
    }

    /// Seek to a fraction of the track
    pub fn seek_relative(&self, fraction: f64) {
        if fraction.is_nan() {
            self.notifier.rejected(Parameter::Position(self.id));
            return;
        }
        self.seek(fraction.clamp(0.0, 1.0) * self.track_length());
    }

    /// Move the playhead by `delta` seconds
    pub fn adjust_position(&self, delta: f64) {
        self.seek(self.position() + delta);
    }

    // ── Gain / speed / EQ ───────────────────────────────────────────────

    fn store_clamped(
        &self,
        parameter: Parameter,
        value: f32,
        range: &std::ops::RangeInclusive<f32>,
        store: impl FnOnce(f32),
    ) {
        match clamp_f32(value, range) {
            None => self.notifier.rejected(parameter),
            Some((applied, clamped)) => {
                if clamped {
                    self.notifier.clamped(parameter, value as f64, applied as f64);
                }
                store(applied);
            }
        }
    }

    pub fn set_gain(&self, gain: f32) {
        self.store_clamped(Parameter::Gain(self.id), gain, &GAIN_RANGE, |v| {
            self.shared.gain.store(v)
        });
    }

    pub fn gain(&self) -> f32 {
        self.shared.gain.load()
    }

    pub fn set_speed(&self, ratio: f32) {
        self.store_clamped(Parameter::Speed(self.id), ratio, &SPEED_RANGE, |v| {
            self.shared.speed.store(v)
        });
    }

    pub fn speed(&self) -> f32 {
        self.shared.speed.load()
    }

    /// Nudge the speed ratio by `delta`
    pub fn adjust_speed(&self, delta: f32) {
        self.set_speed(self.speed() + delta);
    }

    pub fn set_low_eq(&self, db: f32) {
        self.store_clamped(Parameter::LowEq(self.id), db, &EQ_DB_RANGE, |v| {
            self.shared.low_db.store(v)
        });
    }

    pub fn set_mid_eq(&self, db: f32) {
        self.store_clamped(Parameter::MidEq(self.id), db, &EQ_DB_RANGE, |v| {
            self.shared.mid_db.store(v)
        });
    }

    pub fn set_high_eq(&self, db: f32) {
        self.store_clamped(Parameter::HighEq(self.id), db, &EQ_DB_RANGE, |v| {
            self.shared.high_db.store(v)
        });
    }

    pub fn set_eq(&self, low_db: f32, mid_db: f32, high_db: f32) {
        self.set_low_eq(low_db);
        self.set_mid_eq(mid_db);
        self.set_high_eq(high_db);
    }

    pub fn low_eq(&self) -> f32 {
        self.shared.low_db.load()
    }

    pub fn mid_eq(&self) -> f32 {
        self.shared.mid_db.load()
    }

    pub fn high_eq(&self) -> f32 {
        self.shared.high_db.load()
    }

    // ── Cue ─────────────────────────────────────────────────────────────

    pub fn set_cue_point(&self, seconds: f64) {
        if let Some(cue) = self.clamp_time(Parameter::CuePoint(self.id), seconds) {
            self.shared.cue_point.store(cue);
        }
    }

    pub fn cue_point(&self) -> f64 {
        self.shared.cue_point.load()
    }

    pub fn jump_to_cue(&self) {
        self.seek(self.cue_point());
    }

    /// Store the current position as cue point and jump to it
    pub fn cue(&self) {
        self.set_cue_point(self.position());
        self.jump_to_cue();
    }

    // ── Loop ────────────────────────────────────────────────────────────

    pub fn set_loop_start(&self, seconds: f64) {
        if let Some(start) = self.clamp_time(Parameter::LoopStart(self.id), seconds) {
            let region = self
                .shared
                .loop_region
                .update(|r| LoopRegion { start, ..r });
            self.warn_if_loop_empty(region);
        }
    }

    /// Set the loop end; an end at or before the start disables the loop
    /// until corrected
    pub fn set_loop_end(&self, seconds: f64) {
        if let Some(end) = self.clamp_time(Parameter::LoopEnd(self.id), seconds) {
            let region = self
                .shared
                .loop_region
                .update(|r| LoopRegion { end, ..r });
            self.warn_if_loop_empty(region);
        }
    }

    /// Set both bounds in one atomic update
    pub fn set_loop(&self, start: f64, end: f64) {
        let start = self.clamp_time(Parameter::LoopStart(self.id), start);
        let end = self.clamp_time(Parameter::LoopEnd(self.id), end);
        if let (Some(start), Some(end)) = (start, end) {
            let region = LoopRegion::new(start, end);
            self.shared.loop_region.store(region);
            self.warn_if_loop_empty(region);
        }
    }

    fn warn_if_loop_empty(&self, region: LoopRegion) {
        if self.loop_enabled() && !region.is_valid() {
            log::warn!(
                "Deck {}: loop end {:.3}s is not after start {:.3}s, loop inactive",
                self.id,
                region.end,
                region.start
            );
        }
    }

    pub fn enable_loop(&self, enabled: bool) {
        self.shared.loop_enabled.store(enabled, Ordering::Release);
        if enabled {
            self.warn_if_loop_empty(self.loop_region());
        }
    }

    pub fn toggle_loop(&self) {
        self.enable_loop(!self.loop_enabled());
    }

    pub fn loop_region(&self) -> LoopRegion {
        self.shared.loop_region.load()
    }

    pub fn loop_start(&self) -> f64 {
        self.loop_region().start
    }

    pub fn loop_end(&self) -> f64 {
        self.loop_region().end
    }

    /// The loop flag as set by the user
    pub fn loop_enabled(&self) -> bool {
        self.shared.loop_enabled.load(Ordering::Acquire)
    }

    /// Whether the loop is enabled and has positive length
    pub fn loop_active(&self) -> bool {
        self.shared.loop_active()
    }

    // ── Levels ──────────────────────────────────────────────────────────

    /// RMS of the last rendered block
    pub fn rms_level(&self) -> f32 {
        self.shared.rms.load()
    }

    /// Peak of the last rendered block
    pub fn peak_level(&self) -> f32 {
        self.shared.peak.load()
    }

    pub fn snapshot(&self) -> DeckSnapshot {
        self.shared.snapshot()
    }
}
