//! Audio output
//!
//! Opens an output device with cpal and pulls master blocks from the
//! [`AudioEngine`](crate::engine::AudioEngine) inside the device callback.

mod cpal_backend;
mod error;

pub use cpal_backend::{output_device_names, start_audio, AudioHandle};
pub use error::{AudioError, AudioResult};
