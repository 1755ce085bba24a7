//! Engine configuration
//!
//! Settings are stored as YAML. Default location:
//! `~/.config/twindeck/config.yaml`
//!
//! ```ignore
//! use twindeck_core::config::{default_config_path, load_config, EngineConfig};
//!
//! let config: EngineConfig = load_config(&default_config_path());
//! handle.apply_config(&config);
//! ```

mod io;
mod paths;

pub use io::{load_config, save_config};
pub use paths::{default_config_path, default_recording_dir};

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::engine::{InterpolationMethod, DEFAULT_CUE_GAIN, DEFAULT_MASTER_GAIN};
use crate::types::SAMPLE_RATE;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub audio: AudioSettings,
    pub mixer: MixerSettings,
    pub deck: DeckSettings,
    pub recording: RecordingSettings,
}

/// Output device preferences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    /// Preferred render rate in Hz
    pub sample_rate: u32,
    /// Preferred callback size in frames
    pub buffer_size: u32,
    /// Output device name; `None` picks the system default
    pub device: Option<String>,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            buffer_size: 512,
            device: None,
        }
    }
}

/// Mixer values applied at startup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixerSettings {
    pub crossfader: f32,
    pub master_gain: f32,
    pub cue_gain: f32,
}

impl Default for MixerSettings {
    fn default() -> Self {
        Self {
            crossfader: 0.0,
            master_gain: DEFAULT_MASTER_GAIN,
            cue_gain: DEFAULT_CUE_GAIN,
        }
    }
}

/// Deck playback settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeckSettings {
    /// Interpolation used for variable-speed playback
    pub interpolation: InterpolationMethod,
}

/// Recording settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingSettings {
    /// Where timestamped recordings go
    pub directory: PathBuf,
    /// 16 (integer PCM) or 32 (float)
    pub bits_per_sample: u16,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            directory: default_recording_dir(),
            bits_per_sample: 16,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = "mixer:\n  crossfader: -0.5\ndeck:\n  interpolation: linear\n";
        let config: EngineConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.mixer.crossfader, -0.5);
        assert_eq!(config.mixer.master_gain, 0.8);
        assert_eq!(config.deck.interpolation, InterpolationMethod::Linear);
        assert_eq!(config.audio.sample_rate, 44100);
        assert_eq!(config.recording.bits_per_sample, 16);
    }

    #[test]
    fn test_config_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("twindeck").join("config.yaml");

        let mut config = EngineConfig::default();
        config.audio.device = Some("USB Audio".to_string());
        config.mixer.cue_gain = 0.3;
        config.recording.bits_per_sample = 32;

        save_config(&config, &path).unwrap();
        let loaded: EngineConfig = load_config(&path);
        assert_eq!(loaded, config);
    }
}
