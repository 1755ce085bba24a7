//! Twindeck Core - Two-deck mixing engine

pub mod audio;
pub mod audio_file;
pub mod config;
pub mod engine;
pub mod recording;
pub mod track;
pub mod types;

pub use types::*;
