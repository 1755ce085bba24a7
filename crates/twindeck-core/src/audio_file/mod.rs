//! Decoded track sources
//!
//! A [`TrackSource`] holds a track's audio fully decoded to stereo frames at
//! the file's native sample rate. Decoding happens on the control thread
//! through a [`TrackDecoder`]; the render thread only ever reads finished
//! sources.

use std::fs::File;
use std::path::PathBuf;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;

use crate::track::Track;
use crate::types::{StereoSample, SAMPLE_RATE};

/// Errors raised while turning a track into a playable source
#[derive(Error, Debug)]
pub enum LoadError {
    /// Extension is not one the decoder handles
    #[error("Unsupported file type: {0:?}")]
    Unsupported(PathBuf),

    /// File could not be opened
    #[error("Failed to open {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Container could not be recognised
    #[error("Failed to probe {path:?}: {reason}")]
    Probe { path: PathBuf, reason: String },

    /// Container has no decodable audio track
    #[error("No decodable audio track in {0:?}")]
    NoAudioTrack(PathBuf),

    /// Decoder failed irrecoverably
    #[error("Failed to decode {path:?}: {reason}")]
    Decode { path: PathBuf, reason: String },

    /// File decoded to zero frames
    #[error("No audio decoded from {0:?}")]
    Empty(PathBuf),
}

/// A track decoded to stereo frames at its native sample rate
#[derive(Debug, Clone)]
pub struct TrackSource {
    sample_rate: u32,
    frames: Vec<StereoSample>,
}

impl TrackSource {
    /// Wrap already decoded frames
    pub fn new(sample_rate: u32, frames: Vec<StereoSample>) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            frames,
        }
    }

    /// Build from interleaved samples with the given channel count
    ///
    /// Mono is duplicated to both sides; channels beyond the first two are
    /// dropped.
    pub fn from_interleaved(sample_rate: u32, channels: usize, interleaved: &[f32]) -> Self {
        let mut frames = Vec::with_capacity(interleaved.len() / channels.max(1));
        append_interleaved(&mut frames, channels, interleaved);
        Self::new(sample_rate, frames)
    }

    /// Native sample rate in Hz
    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Total length in frames
    #[inline]
    pub fn len_frames(&self) -> usize {
        self.frames.len()
    }

    /// Total length in seconds
    #[inline]
    pub fn duration_seconds(&self) -> f64 {
        self.frames.len() as f64 / self.sample_rate as f64
    }

    #[inline]
    pub fn frames(&self) -> &[StereoSample] {
        &self.frames
    }
}

impl Default for TrackSource {
    fn default() -> Self {
        Self::new(SAMPLE_RATE, Vec::new())
    }
}

fn append_interleaved(frames: &mut Vec<StereoSample>, channels: usize, interleaved: &[f32]) {
    match channels {
        0 => {}
        1 => frames.extend(interleaved.iter().map(|&s| StereoSample::mono(s))),
        n => frames.extend(
            interleaved
                .chunks_exact(n)
                .map(|chunk| StereoSample::new(chunk[0], chunk[1])),
        ),
    }
}

/// Decoder/reader provider
///
/// Given a track, produce a fully decoded source or report why it is
/// unreadable. Implementations run on the control thread and may block.
pub trait TrackDecoder: Send + Sync {
    fn decode(&self, track: &Track) -> Result<TrackSource, LoadError>;
}

/// Decoder backed by symphonia's default codec and format registry
#[derive(Debug, Default, Clone, Copy)]
pub struct SymphoniaDecoder;

impl TrackDecoder for SymphoniaDecoder {
    fn decode(&self, track: &Track) -> Result<TrackSource, LoadError> {
        let path = track.path();
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

        let probed = symphonia::default::get_probe()
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
        let mut format = probed.format;

        let audio_track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL && t.codec_params.sample_rate.is_some())
            .ok_or_else(|| LoadError::NoAudioTrack(path.to_path_buf()))?;

        let track_id = audio_track.id;
        let sample_rate = audio_track.codec_params.sample_rate.unwrap_or(SAMPLE_RATE);
        let codec_params = audio_track.codec_params.clone();

        let mut decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| LoadError::Decode {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        let capacity = codec_params.n_frames.unwrap_or(0) as usize;
        let mut frames: Vec<StereoSample> = Vec::with_capacity(capacity);
        let mut sample_buf: Option<SampleBuffer<f32>> = None;

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    break;
                }
                Err(SymphoniaError::ResetRequired) => {
                    log::warn!("Decoder reset required for {:?}, stopping early", path);
                    break;
                }
                Err(e) => {
                    return Err(LoadError::Decode {
                        path: path.to_path_buf(),
                        reason: e.to_string(),
                    });
                }
            };

            if packet.track_id() != track_id {
                continue;
            }

            match decoder.decode(&packet) {
                Ok(audio_buf) => {
                    let spec = *audio_buf.spec();
                    let buf = sample_buf
                        .get_or_insert_with(|| SampleBuffer::<f32>::new(audio_buf.capacity() as u64, spec));
                    buf.copy_interleaved_ref(audio_buf);
                    append_interleaved(&mut frames, spec.channels.count(), buf.samples());
                }
                Err(SymphoniaError::DecodeError(err)) => {
                    log::warn!("Ignoring decode error in {:?}: {}", path, err);
                }
                Err(e) => {
                    return Err(LoadError::Decode {
                        path: path.to_path_buf(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        decoder.finalize();

        if frames.is_empty() {
            return Err(LoadError::Empty(path.to_path_buf()));
        }

        log::debug!(
            "Decoded {} frames at {} Hz from {:?}",
            frames.len(),
            sample_rate,
            path
        );
        Ok(TrackSource::new(sample_rate, frames))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_interleaved_mono_and_multichannel() {
        let mono = TrackSource::from_interleaved(100, 1, &[0.1, 0.2]);
        assert_eq!(mono.len_frames(), 2);
        assert_eq!(mono.frames()[1], StereoSample::mono(0.2));

        let quad = TrackSource::from_interleaved(100, 4, &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(quad.frames(), &[StereoSample::new(1.0, 2.0)]);
        assert!((quad.duration_seconds() - 0.01).abs() < 1e-9);
    }

    #[test]
    fn test_decode_missing_file() {
        let err = SymphoniaDecoder
            .decode(&Track::new("/definitely/not/here.wav"))
            .unwrap_err();
        assert!(matches!(err, LoadError::Io { .. }));
    }

    #[test]
    fn test_decode_wav_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ramp.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 22050,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..1000 {
            writer.write_sample(i as f32 / 1000.0).unwrap();
            writer.write_sample(-(i as f32) / 1000.0).unwrap();
        }
        writer.finalize().unwrap();

        let source = SymphoniaDecoder.decode(&Track::new(&path)).unwrap();
        assert_eq!(source.sample_rate(), 22050);
        assert_eq!(source.len_frames(), 1000);
        assert!((source.frames()[500].left - 0.5).abs() < 1e-6);
        assert!((source.frames()[500].right + 0.5).abs() < 1e-6);
    }
}
