//! Track identity and metadata
//!
//! A [`Track`] is the immutable description of something that can be loaded
//! onto a deck: the file it lives in plus the display metadata a library
//! browser would show. The engine only reads it.

use std::fs::File;
use std::path::{Path, PathBuf};

use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{MetadataOptions, MetadataRevision, StandardTagKey};
use symphonia::core::probe::Hint;

use crate::audio_file::LoadError;

/// File extensions the decoder provider is expected to handle
pub const SUPPORTED_EXTENSIONS: [&str; 7] = ["mp3", "wav", "flac", "aac", "m4a", "aiff", "ogg"];

/// Loadable track with display metadata
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    path: PathBuf,
    title: String,
    artist: String,
    album: String,
    genre: String,
    /// Duration in seconds (0 when unknown)
    duration: f64,
    /// Tempo in beats per minute (0 = unknown)
    bpm: u32,
}

impl Track {
    /// Create a track with placeholder metadata derived from the file name
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let title = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            path,
            title,
            artist: "Unknown Artist".to_string(),
            album: "Unknown Album".to_string(),
            genre: "Unknown".to_string(),
            duration: 0.0,
            bpm: 0,
        }
    }

    /// Probe a file for duration and tag metadata
    ///
    /// Only the container header and tags are read, no audio is decoded.
    /// Tags that are missing or empty keep the placeholder values of
    /// [`Track::new`].
    pub fn probe(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let mut track = Track::new(path);

        if !track.has_supported_extension() {
            return Err(LoadError::Unsupported(path.to_path_buf()));
        }

        let file = File::open(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let mut probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| LoadError::Probe {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        // Tags may sit in front of the container (ID3) or inside it
        if let Some(metadata) = probed.metadata.get() {
            if let Some(revision) = metadata.current() {
                track.apply_tags(revision);
            }
        }
        let mut format = probed.format;
        if let Some(revision) = format.metadata().current() {
            track.apply_tags(revision);
        }

        if let Some(params) = format.default_track().map(|t| &t.codec_params) {
            if let (Some(frames), Some(rate)) = (params.n_frames, params.sample_rate) {
                if rate > 0 {
                    track.duration = frames as f64 / rate as f64;
                }
            }
        }

        log::debug!(
            "Probed {:?}: '{}' by '{}' ({:.1}s, {} BPM)",
            path,
            track.title,
            track.artist,
            track.duration,
            track.bpm
        );
        Ok(track)
    }

    fn apply_tags(&mut self, revision: &MetadataRevision) {
        for tag in revision.tags() {
            let value = tag.value.to_string();
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            match tag.std_key {
                Some(StandardTagKey::TrackTitle) => self.title = value.to_string(),
                Some(StandardTagKey::Artist) => self.artist = value.to_string(),
                Some(StandardTagKey::Album) => self.album = value.to_string(),
                Some(StandardTagKey::Genre) => self.genre = value.to_string(),
                Some(StandardTagKey::Bpm) => {
                    if let Ok(bpm) = value.parse::<f64>() {
                        if bpm.is_finite() && bpm > 0.0 {
                            self.bpm = bpm.round() as u32;
                        }
                    }
                }
                _ => {}
            }
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = artist.into();
        self
    }

    pub fn with_album(mut self, album: impl Into<String>) -> Self {
        self.album = album.into();
        self
    }

    pub fn with_genre(mut self, genre: impl Into<String>) -> Self {
        self.genre = genre.into();
        self
    }

    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration = seconds.max(0.0);
        self
    }

    pub fn with_bpm(mut self, bpm: u32) -> Self {
        self.bpm = bpm;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn artist(&self) -> &str {
        &self.artist
    }

    pub fn album(&self) -> &str {
        &self.album
    }

    pub fn genre(&self) -> &str {
        &self.genre
    }

    /// Duration in seconds as reported by metadata
    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// Tempo in BPM, `None` when unknown
    pub fn bpm(&self) -> Option<u32> {
        (self.bpm > 0).then_some(self.bpm)
    }

    /// Whether the file extension is one the decoder handles
    pub fn has_supported_extension(&self) -> bool {
        self.path
            .extension()
            .and_then(|e| e.to_str())
            .map(|ext| {
                SUPPORTED_EXTENSIONS
                    .iter()
                    .any(|supported| supported.eq_ignore_ascii_case(ext))
            })
            .unwrap_or(false)
    }

    /// Duration as `m:ss`
    pub fn formatted_duration(&self) -> String {
        let total = self.duration.max(0.0) as u64;
        format!("{}:{:02}", total / 60, total % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_metadata() {
        let track = Track::new("/music/Deep Groove.flac");
        assert_eq!(track.title(), "Deep Groove");
        assert_eq!(track.artist(), "Unknown Artist");
        assert_eq!(track.album(), "Unknown Album");
        assert_eq!(track.genre(), "Unknown");
        assert_eq!(track.bpm(), None);
    }

    #[test]
    fn test_extension_check() {
        assert!(Track::new("a.MP3").has_supported_extension());
        assert!(Track::new("a.m4a").has_supported_extension());
        assert!(!Track::new("a.txt").has_supported_extension());
        assert!(!Track::new("noext").has_supported_extension());
    }

    #[test]
    fn test_formatted_duration() {
        let track = Track::new("a.wav").with_duration(200.4);
        assert_eq!(track.formatted_duration(), "3:20");
        assert_eq!(Track::new("a.wav").formatted_duration(), "0:00");
    }

    #[test]
    fn test_probe_rejects_unsupported_extension() {
        let err = Track::probe("/tmp/notes.txt").unwrap_err();
        assert!(matches!(err, LoadError::Unsupported(_)));
    }

    #[test]
    fn test_probe_wav_duration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..16000 {
            writer.write_sample(0i16).unwrap();
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();

        let track = Track::probe(&path).unwrap();
        assert_eq!(track.title(), "tone");
        assert!((track.duration() - 2.0).abs() < 1e-6);
    }
}
