//! Engine facade
//!
//! [`AudioEngine::new`] builds both halves of the engine at once:
//!
//! - [`AudioEngine`] is owned by the audio I/O layer and exposes the pull
//!   contract `prepare` / `render_block` / `release`.
//! - [`EngineHandle`] is owned by the control plane and is the single entry
//!   point for load, transport, gain/speed/EQ, crossfader and recording
//!   calls. None of its methods wait on the render thread, except
//!   `stop_recording`, which waits at most for one in-flight sink write.
//!
//! ```ignore
//! let (mut engine, mut handle) = AudioEngine::new();
//! engine.prepare(44100, 512);
//! handle.load_track(DeckId::A, Track::probe("set.flac")?)?;
//! handle.deck(DeckId::A).play();
//! // audio thread:
//! engine.render_block(&mut block);
//! ```

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crossbeam::channel::{unbounded, Receiver};

use super::deck::{Deck, DeckControl};
use super::events::{EngineEvent, Notifier, Parameter, RenderFault, FAULT_QUEUE_CAPACITY};
use super::mixer::{crossfader_gains, Mixer};
use super::params::{clamp_f32, ActiveSink, DeckShared, DeckSnapshot, MixerShared, MixerSnapshot};
use super::resampler::InterpolationMethod;
use super::MAX_BUFFER_SIZE;
use crate::audio_file::{LoadError, SymphoniaDecoder, TrackDecoder};
use crate::config::EngineConfig;
use crate::recording::{RecordingError, RecordingSink};
use crate::track::Track;
use crate::types::{
    DeckId, StereoBuffer, StereoSample, CROSSFADER_RANGE, CUE_GAIN_RANGE, MASTER_GAIN_RANGE,
    NUM_DECKS, SAMPLE_RATE,
};

/// Render-side engine driven by the audio I/O layer
pub struct AudioEngine {
    mixer: Mixer,
    /// Used by `release` to stop and unload once rendering has ceased
    controls: [DeckControl; NUM_DECKS],
    mixer_shared: Arc<MixerShared>,
    notifier: Notifier,
    sample_rate: u32,
    block_size: usize,
}

impl AudioEngine {
    /// Create an engine decoding with symphonia and cubic interpolation
    pub fn new() -> (Self, EngineHandle) {
        Self::with_decoder(Arc::new(SymphoniaDecoder), InterpolationMethod::default())
    }

    /// Create an engine with a custom decoder provider
    pub fn with_decoder(
        decoder: Arc<dyn TrackDecoder>,
        interpolation: InterpolationMethod,
    ) -> (Self, EngineHandle) {
        let decks: [Arc<DeckShared>; NUM_DECKS] = std::array::from_fn(|_| Arc::new(DeckShared::new()));
        let mixer_shared = Arc::new(MixerShared::new());
        let (fault_tx, fault_rx) = rtrb::RingBuffer::new(FAULT_QUEUE_CAPACITY);
        let (event_tx, event_rx) = unbounded();
        let notifier = Notifier::new(event_tx);

        let render_decks = DeckId::ALL.map(|id| Deck::new(id, Arc::clone(&decks[id.index()]), interpolation));
        let mut mixer = Mixer::new(render_decks, Arc::clone(&mixer_shared), fault_tx);
        mixer.prepare(SAMPLE_RATE, MAX_BUFFER_SIZE);

        let controls = DeckId::ALL.map(|id| {
            DeckControl::new(id, Arc::clone(&decks[id.index()]), notifier.clone())
        });
        let release_controls = DeckId::ALL.map(|id| {
            DeckControl::new(id, Arc::clone(&decks[id.index()]), notifier.clone())
        });

        let engine = Self {
            mixer,
            controls: release_controls,
            mixer_shared: Arc::clone(&mixer_shared),
            notifier: notifier.clone(),
            sample_rate: SAMPLE_RATE,
            block_size: MAX_BUFFER_SIZE,
        };
        let handle = EngineHandle {
            decks: controls,
            mixer: mixer_shared,
            decoder,
            notifier,
            events: event_rx,
            faults: fault_rx,
            beat_sync: false,
            sink_generation: 0,
        };
        (engine, handle)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Set the render rate and expected block size
    ///
    /// Must run before the first `render_block` and after any sample-rate
    /// change. May allocate.
    pub fn prepare(&mut self, sample_rate: u32, block_size: usize) {
        self.sample_rate = sample_rate.max(1);
        self.block_size = block_size.clamp(1, MAX_BUFFER_SIZE);
        self.mixer.prepare(self.sample_rate, self.block_size);
        log::info!(
            "Engine prepared: {} Hz, {} frame blocks",
            self.sample_rate,
            self.block_size
        );
    }

    /// Render `out.len()` frames of master output (audio thread only)
    ///
    /// Blocks larger than the prepared size are rendered in sub-blocks, but
    /// reach an open recording sink as the one block the caller asked for.
    pub fn render_block(&mut self, out: &mut [StereoSample]) {
        let chunk = self.mixer.max_block().max(1);
        for block in out.chunks_mut(chunk) {
            self.mixer.render_block(block);
        }
        self.mixer.record(out);
    }

    /// Render into a pre-allocated buffer, resizing it within capacity
    pub fn render_buffer(&mut self, out: &mut StereoBuffer, num_samples: usize) {
        out.set_len_from_capacity(num_samples);
        self.render_block(out.as_mut_slice());
    }

    /// Stop playback, close any open recording and release track sources
    ///
    /// Call from the audio layer's stop sequence once no render call is in
    /// flight.
    pub fn release(&mut self) {
        self.mixer_shared.recording.store(false, Ordering::Release);
        let active = match self.mixer_shared.sink.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(mut active) = active {
            let blocks = self.mixer_shared.recorded_blocks.load(Ordering::Relaxed);
            let skipped = self.mixer_shared.skipped_blocks.load(Ordering::Relaxed);
            match active.sink.close() {
                Ok(()) => {
                    log::info!("Recording closed on release: {} blocks", blocks);
                    self.notifier
                        .send(EngineEvent::RecordingStopped { blocks, skipped });
                }
                Err(e) => {
                    log::error!("Failed to close recording on release: {}", e);
                    self.notifier.send(EngineEvent::RecordingFailed {
                        reason: e.to_string(),
                    });
                }
            }
        }

        for control in &self.controls {
            control.stop();
            control.unload();
        }
        log::info!("Engine released");
    }
}

/// Control-plane handle to the engine
pub struct EngineHandle {
    decks: [DeckControl; NUM_DECKS],
    mixer: Arc<MixerShared>,
    decoder: Arc<dyn TrackDecoder>,
    notifier: Notifier,
    events: Receiver<EngineEvent>,
    faults: rtrb::Consumer<RenderFault>,
    beat_sync: bool,
    /// Generation of the most recently started recording
    sink_generation: u64,
}

impl EngineHandle {
    pub fn deck(&self, id: DeckId) -> &DeckControl {
        &self.decks[id.index()]
    }

    /// Apply the mixer section of a config through the clamping setters
    pub fn apply_config(&self, config: &EngineConfig) {
        self.set_crossfader(config.mixer.crossfader);
        self.set_master_gain(config.mixer.master_gain);
        self.set_cue_gain(config.mixer.cue_gain);
    }

    // ── Loading ─────────────────────────────────────────────────────────

    /// Decode `track` and put it on `deck`
    ///
    /// Decoding happens on the calling thread. On failure the deck keeps
    /// whatever it had, a [`EngineEvent::LoadFailed`] is emitted and the
    /// error is returned.
    pub fn load_track(&mut self, deck: DeckId, track: Track) -> Result<(), LoadError> {
        let source = match self.decoder.decode(&track) {
            Ok(source) => source,
            Err(e) => {
                log::warn!("Deck {}: failed to load {:?}: {}", deck, track.path(), e);
                self.notifier.send(EngineEvent::LoadFailed {
                    deck,
                    path: track.path().to_path_buf(),
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };

        self.decks[deck.index()].install(track.clone(), source);
        self.notifier.send(EngineEvent::TrackLoaded { deck, track });

        if self.beat_sync {
            self.sync_decks();
        }
        Ok(())
    }

    // ── Convenience forwards ────────────────────────────────────────────

    pub fn play(&self, deck: DeckId) {
        self.deck(deck).play();
    }

    pub fn pause(&self, deck: DeckId) {
        self.deck(deck).pause();
    }

    pub fn stop(&self, deck: DeckId) {
        self.deck(deck).stop();
    }

    pub fn toggle_play(&self, deck: DeckId) {
        self.deck(deck).toggle_play();
    }

    pub fn toggle_loop(&self, deck: DeckId) {
        self.deck(deck).toggle_loop();
    }

    pub fn cue(&self, deck: DeckId) {
        self.deck(deck).cue();
    }

    pub fn adjust_position(&self, deck: DeckId, delta_seconds: f64) {
        self.deck(deck).adjust_position(delta_seconds);
    }

    pub fn adjust_speed(&self, deck: DeckId, delta: f32) {
        self.deck(deck).adjust_speed(delta);
    }

    pub fn set_deck_eq(&self, deck: DeckId, low_db: f32, mid_db: f32, high_db: f32) {
        self.deck(deck).set_eq(low_db, mid_db, high_db);
    }

    // ── BPM sync ────────────────────────────────────────────────────────

    /// Match deck B's speed to deck A's tempo
    ///
    /// Sets `speed_b = bpm_a / bpm_b`. Does nothing unless both decks have
    /// a track with a known BPM.
    pub fn sync_decks(&self) {
        let bpm_a = self.deck(DeckId::A).track().and_then(|t| t.bpm());
        let bpm_b = self.deck(DeckId::B).track().and_then(|t| t.bpm());
        match (bpm_a, bpm_b) {
            (Some(a), Some(b)) => {
                let ratio = a as f32 / b as f32;
                log::info!("Syncing deck B to {} BPM (speed {:.3})", a, ratio);
                self.deck(DeckId::B).set_speed(ratio);
            }
            _ => log::debug!("BPM sync skipped: tempo unknown on a deck"),
        }
    }

    /// Re-sync automatically whenever a track is loaded
    pub fn enable_beat_sync(&mut self, enabled: bool) {
        self.beat_sync = enabled;
        if enabled {
            self.sync_decks();
        }
    }

    pub fn is_beat_sync_enabled(&self) -> bool {
        self.beat_sync
    }

    // ── Mixer ───────────────────────────────────────────────────────────

    fn store_mixer(
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

    pub fn set_crossfader(&self, position: f32) {
        self.store_mixer(Parameter::Crossfader, position, &CROSSFADER_RANGE, |v| {
            self.mixer.crossfader.store(v)
        });
    }

    pub fn crossfader(&self) -> f32 {
        self.mixer.crossfader.load()
    }

    /// Effective (deck A, deck B) mix gains for the current crossfader
    pub fn crossfader_gains(&self) -> (f32, f32) {
        crossfader_gains(self.crossfader())
    }

    pub fn set_master_gain(&self, gain: f32) {
        self.store_mixer(Parameter::MasterGain, gain, &MASTER_GAIN_RANGE, |v| {
            self.mixer.master_gain.store(v)
        });
    }

    pub fn master_gain(&self) -> f32 {
        self.mixer.master_gain.load()
    }

    pub fn set_cue_gain(&self, gain: f32) {
        self.store_mixer(Parameter::CueGain, gain, &CUE_GAIN_RANGE, |v| {
            self.mixer.cue_gain.store(v)
        });
    }

    pub fn cue_gain(&self) -> f32 {
        self.mixer.cue_gain.load()
    }

    // ── Recording ───────────────────────────────────────────────────────

    /// Start writing every rendered master block to `sink`
    pub fn start_recording(&mut self, sink: Box<dyn RecordingSink>) -> Result<(), RecordingError> {
        if self.is_recording() {
            return Err(RecordingError::AlreadyRecording);
        }

        {
            let mut slot = self.mixer.sink.lock().map_err(|_| RecordingError::SlotPoisoned)?;
            if let Some(mut stale) = slot.take() {
                // Left behind by a failed write that was not polled yet
                log::warn!("Discarding failed recording {}", stale.generation);
                if let Err(e) = stale.sink.close() {
                    log::warn!("Failed to close previous recording sink: {}", e);
                }
            }
            self.sink_generation += 1;
            *slot = Some(ActiveSink {
                sink,
                generation: self.sink_generation,
            });
        }
        self.mixer.recorded_blocks.store(0, Ordering::Relaxed);
        self.mixer.skipped_blocks.store(0, Ordering::Relaxed);
        self.mixer.recording.store(true, Ordering::Release);

        log::info!("Recording started");
        self.notifier.send(EngineEvent::RecordingStarted);
        Ok(())
    }

    /// Stop recording, then flush and close the sink
    ///
    /// The sink is closed before this returns. Returns the number of blocks
    /// written; stopping when nothing is recording returns 0.
    pub fn stop_recording(&mut self) -> Result<u64, RecordingError> {
        self.mixer.recording.store(false, Ordering::Release);

        // Waits out a write the render thread may be in the middle of
        let active = self
            .mixer
            .sink
            .lock()
            .map_err(|_| RecordingError::SlotPoisoned)?
            .take();

        let Some(mut active) = active else {
            return Ok(0);
        };

        let blocks = self.mixer.recorded_blocks.load(Ordering::Relaxed);
        let skipped = self.mixer.skipped_blocks.load(Ordering::Relaxed);
        active.sink.close()?;

        log::info!("Recording stopped: {} blocks ({} skipped)", blocks, skipped);
        self.notifier.send(EngineEvent::RecordingStopped { blocks, skipped });
        Ok(blocks)
    }

    pub fn is_recording(&self) -> bool {
        self.mixer.recording.load(Ordering::Acquire)
    }

    // ── Readback ────────────────────────────────────────────────────────

    pub fn deck_snapshot(&self, deck: DeckId) -> DeckSnapshot {
        self.deck(deck).snapshot()
    }

    pub fn mixer_snapshot(&self) -> MixerSnapshot {
        self.mixer.snapshot()
    }

    /// Subscribe to engine notifications
    ///
    /// Render-side faults only show up after [`EngineHandle::poll_events`].
    pub fn events(&self) -> Receiver<EngineEvent> {
        self.events.clone()
    }

    /// Turn pending render faults into events and drain all notifications
    pub fn poll_events(&mut self) -> Vec<EngineEvent> {
        while let Ok(fault) = self.faults.pop() {
            match fault {
                RenderFault::TrackEnded(deck) => {
                    log::info!("Deck {}: reached end of track", deck);
                    self.notifier.send(EngineEvent::TrackEnded { deck });
                }
                RenderFault::RecordingFailed { generation, error } => {
                    if self.close_failed_sink(generation) {
                        log::error!("Recording failed: {}", error);
                        self.notifier.send(EngineEvent::RecordingFailed {
                            reason: error.to_string(),
                        });
                    } else {
                        // That sink was already replaced by start_recording
                        log::warn!("Recording {} failed earlier: {}", generation, error);
                    }
                }
            }
        }
        self.events.try_iter().collect()
    }

    /// Close the sink of recording `generation` if it is still installed
    fn close_failed_sink(&self, generation: u64) -> bool {
        let mut slot = match self.mixer.sink.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        if slot.as_ref().map(|active| active.generation) != Some(generation) {
            return false;
        }
        if let Some(mut active) = slot.take() {
            if let Err(e) = active.sink.close() {
                log::warn!("Failed to close broken recording sink: {}", e);
            }
        }
        true
    }
}
