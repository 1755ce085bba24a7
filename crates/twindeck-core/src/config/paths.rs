//! Standard locations for twindeck files

use std::path::PathBuf;

/// Config file location
///
/// Returns: `~/.config/twindeck/config.yaml` (platform config dir)
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("twindeck")
        .join("config.yaml")
}

/// Recording directory
///
/// Returns: `~/Music/twindeck-recordings`
pub fn default_recording_dir() -> PathBuf {
    dirs::audio_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join("Music")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("twindeck-recordings")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path_shape() {
        let path = default_config_path();
        assert!(path.ends_with("twindeck/config.yaml"));
    }

    #[test]
    fn test_recording_dir_name() {
        assert!(default_recording_dir().ends_with("twindeck-recordings"));
    }
}
