//! Audio engine - Decks, mixer and the control/render split
//!
//! This module contains the render path and its control plane:
//! - Deck: one track player with gain, variable speed and a tone shaper
//! - Mixer: crossfader law, master gain, metering and the recording tap
//! - AudioEngine: render-side entry points driven by the audio I/O layer
//! - EngineHandle: control-plane API, setters write published atomics

pub mod gc;

mod deck;
mod engine;
mod events;
mod meter;
mod mixer;
mod params;
mod resampler;
mod tone;

pub use deck::*;
pub use engine::*;
pub use events::*;
pub use meter::*;
pub use mixer::*;
pub use params::{DeckSnapshot, LoopRegion, MixerSnapshot};
pub use resampler::*;
pub use tone::*;

/// Largest block the render path handles in one pass
///
/// Larger callbacks are split into sub-blocks of this size.
pub const MAX_BUFFER_SIZE: usize = 4096;
