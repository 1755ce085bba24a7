//! Mixer - Combines both decks through the crossfader into the master block
//!
//! Features:
//! - Linear crossfader law with master gain
//! - Master level metering
//! - Recording tap that hands every finished caller block to the open sink

use std::sync::atomic::Ordering;
use std::sync::{Arc, TryLockError};

use super::deck::{Deck, DeckRender};
use super::events::RenderFault;
use super::meter::BlockLevels;
use super::params::MixerShared;
use super::MAX_BUFFER_SIZE;
use crate::types::{StereoBuffer, StereoSample, NUM_DECKS};

/// Master gain until the control plane sets one
pub const DEFAULT_MASTER_GAIN: f32 = 0.8;
/// Cue gain until the control plane sets one
pub const DEFAULT_CUE_GAIN: f32 = 0.8;

/// Per-deck mix gains for a crossfader position
///
/// `gain_a = max(0, (1 - x) / 2)`, `gain_b = max(0, (1 + x) / 2)`:
/// -1 is deck A only, +1 deck B only, 0 both at one half.
#[inline]
pub fn crossfader_gains(position: f32) -> (f32, f32) {
    let gain_a = ((1.0 - position) / 2.0).max(0.0);
    let gain_b = ((1.0 + position) / 2.0).max(0.0);
    (gain_a, gain_b)
}

/// Render-side mixer
///
/// Owns both render decks and their scratch buffers. Deck A is always
/// rendered fully before deck B.
pub struct Mixer {
    decks: [Deck; NUM_DECKS],
    deck_buffers: [StereoBuffer; NUM_DECKS],
    shared: Arc<MixerShared>,
    faults: rtrb::Producer<RenderFault>,
}

impl Mixer {
    pub(crate) fn new(
        decks: [Deck; NUM_DECKS],
        shared: Arc<MixerShared>,
        faults: rtrb::Producer<RenderFault>,
    ) -> Self {
        Self {
            decks,
            deck_buffers: std::array::from_fn(|_| StereoBuffer::silence(MAX_BUFFER_SIZE)),
            shared,
            faults,
        }
    }

    /// Adopt a new render rate and block size
    ///
    /// May allocate; never called from the render callback.
    pub fn prepare(&mut self, sample_rate: u32, block_size: usize) {
        let capacity = block_size.clamp(1, MAX_BUFFER_SIZE);
        for buffer in &mut self.deck_buffers {
            if buffer.capacity() < capacity {
                *buffer = StereoBuffer::silence(capacity);
            }
        }
        for deck in &mut self.decks {
            deck.prepare(sample_rate);
        }
    }

    /// Largest block rendered in one pass
    pub fn max_block(&self) -> usize {
        self.deck_buffers
            .iter()
            .map(|b| b.capacity())
            .min()
            .unwrap_or(0)
            .min(MAX_BUFFER_SIZE)
    }

    fn report(&mut self, fault: RenderFault) {
        // A full queue means the control plane is not polling; drop it
        let _ = self.faults.push(fault);
    }

    /// Render one block of `out.len()` frames (audio thread only)
    pub fn render_block(&mut self, out: &mut [StereoSample]) {
        let frames = out.len();

        // Mixer parameters as of the start of the block
        let (gain_a, gain_b) = crossfader_gains(self.shared.crossfader.load());
        let master = self.shared.master_gain.load();

        for idx in 0..NUM_DECKS {
            self.deck_buffers[idx].set_len_from_capacity(frames);
            let outcome = self.decks[idx].render_block(self.deck_buffers[idx].as_mut_slice());
            if outcome == DeckRender::ReachedEnd {
                let deck = self.decks[idx].id();
                self.report(RenderFault::TrackEnded(deck));
            }
        }

        let a = self.deck_buffers[0].as_slice();
        let b = self.deck_buffers[1].as_slice();
        for ((dst, &sa), &sb) in out.iter_mut().zip(a).zip(b) {
            *dst = (sa * gain_a + sb * gain_b) * master;
        }

        let levels = BlockLevels::measure(out).clamped();
        self.shared.master_rms.store(levels.rms);
        self.shared.master_peak.store(levels.peak);
    }

    /// Hand a finished master block to the sink, best effort
    ///
    /// Called once per engine render call, after all of its sub-blocks.
    pub(crate) fn record(&mut self, block: &[StereoSample]) {
        if !self.shared.recording.load(Ordering::Acquire) {
            return;
        }

        let failure = match self.shared.sink.try_lock() {
            Ok(mut slot) => match slot.as_mut() {
                Some(active) => match active.sink.write(block) {
                    Ok(()) => {
                        self.shared.recorded_blocks.fetch_add(1, Ordering::Relaxed);
                        None
                    }
                    Err(error) => Some(RenderFault::RecordingFailed {
                        generation: active.generation,
                        error,
                    }),
                },
                None => None,
            },
            Err(TryLockError::WouldBlock) | Err(TryLockError::Poisoned(_)) => {
                self.shared.skipped_blocks.fetch_add(1, Ordering::Relaxed);
                None
            }
        };

        if let Some(fault) = failure {
            // Stop recording; the control plane closes the sink when it polls
            self.shared.recording.store(false, Ordering::Release);
            self.report(fault);
        }
    }
}
