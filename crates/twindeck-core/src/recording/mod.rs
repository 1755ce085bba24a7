//! Recording of the master output
//!
//! The mixer hands each finished master block to a [`RecordingSink`] from
//! inside the render callback, so `write` has to be real-time safe.
//! [`WavRecorder`] meets that by copying the block into a pre-allocated ring
//! buffer; a writer thread drains the ring into a WAV file with hound. When
//! the writer falls behind, samples are dropped and counted instead of
//! blocking the audio thread.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Local};
use thiserror::Error;

use crate::types::StereoSample;

/// Seconds of audio the ring buffer can hold before dropping
const RING_SECONDS: usize = 2;

/// How long the writer thread sleeps when the ring is empty
const DRAIN_INTERVAL: Duration = Duration::from_millis(10);

/// Errors from opening, writing or closing a recording
#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("Failed to create recording {path:?}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },

    #[error("Unsupported recording bit depth: {0} (use 16 or 32)")]
    UnsupportedBitDepth(u16),

    #[error("Failed to write recording: {0}")]
    Write(String),

    #[error("Failed to finalize recording: {0}")]
    Finalize(String),

    #[error("Recording sink is closed")]
    Closed,

    #[error("Recording writer thread stopped")]
    WriterStopped,

    #[error("Already recording")]
    AlreadyRecording,

    #[error("Recording slot poisoned by a panicked thread")]
    SlotPoisoned,

    #[error("Failed to create recording directory {path:?}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for recording operations
pub type RecordingResult<T> = Result<T, RecordingError>;

/// Destination for the mixed master output
///
/// `write` is called on the render thread and must not block, allocate or
/// touch the filesystem. `close` is called on the control plane and must
/// flush and release the underlying resource before returning.
pub trait RecordingSink: Send {
    /// Accept one rendered stereo block
    fn write(&mut self, block: &[StereoSample]) -> RecordingResult<()>;

    /// Flush and release; further writes fail with [`RecordingError::Closed`]
    fn close(&mut self) -> RecordingResult<()>;
}

/// Default recording file name for a point in time
///
/// `twindeck-YYYYMMDD-HHMMSS.wav`
pub fn recording_filename(at: DateTime<Local>) -> String {
    format!("twindeck-{}.wav", at.format("%Y%m%d-%H%M%S"))
}

/// Timestamped recording path inside `directory`, creating it if needed
pub fn new_recording_path(directory: &Path) -> RecordingResult<PathBuf> {
    std::fs::create_dir_all(directory).map_err(|source| RecordingError::Directory {
        path: directory.to_path_buf(),
        source,
    })?;
    Ok(directory.join(recording_filename(Local::now())))
}

/// Sample encoding written to disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Int16,
    Float32,
}

impl Encoding {
    fn from_bits(bits: u16) -> RecordingResult<Self> {
        match bits {
            16 => Ok(Self::Int16),
            32 => Ok(Self::Float32),
            other => Err(RecordingError::UnsupportedBitDepth(other)),
        }
    }

    fn spec(self, sample_rate: u32) -> hound::WavSpec {
        match self {
            Self::Int16 => hound::WavSpec {
                channels: 2,
                sample_rate,
                bits_per_sample: 16,
                sample_format: hound::SampleFormat::Int,
            },
            Self::Float32 => hound::WavSpec {
                channels: 2,
                sample_rate,
                bits_per_sample: 32,
                sample_format: hound::SampleFormat::Float,
            },
        }
    }
}

type WavFileWriter = hound::WavWriter<std::io::BufWriter<std::fs::File>>;

fn write_frame(writer: &mut WavFileWriter, encoding: Encoding, frame: StereoSample) -> hound::Result<()> {
    match encoding {
        Encoding::Int16 => {
            let to_i16 = |s: f32| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            writer.write_sample(to_i16(frame.left))?;
            writer.write_sample(to_i16(frame.right))
        }
        Encoding::Float32 => {
            writer.write_sample(frame.left)?;
            writer.write_sample(frame.right)
        }
    }
}

/// Writer thread body: drain the ring into the file until asked to stop
fn drain(
    mut consumer: rtrb::Consumer<StereoSample>,
    mut writer: WavFileWriter,
    encoding: Encoding,
    stop: Arc<AtomicBool>,
) -> RecordingResult<u64> {
    let mut frames = 0u64;
    loop {
        // Read the flag first so nothing pushed before `close` is missed
        let stopping = stop.load(Ordering::Acquire);
        let available = consumer.slots();
        if available > 0 {
            let chunk = consumer
                .read_chunk(available)
                .map_err(|e| RecordingError::Write(e.to_string()))?;
            for frame in chunk.into_iter() {
                write_frame(&mut writer, encoding, frame)
                    .map_err(|e| RecordingError::Write(e.to_string()))?;
                frames += 1;
            }
        } else if stopping {
            break;
        } else {
            thread::sleep(DRAIN_INTERVAL);
        }
    }
    writer
        .finalize()
        .map_err(|e| RecordingError::Finalize(e.to_string()))?;
    Ok(frames)
}

/// Real-time safe WAV file sink
pub struct WavRecorder {
    path: PathBuf,
    producer: rtrb::Producer<StereoSample>,
    stop: Arc<AtomicBool>,
    /// Set by the writer thread when it bails out early
    writer_failed: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
    writer: Option<JoinHandle<RecordingResult<u64>>>,
    frames_written: u64,
}

impl WavRecorder {
    /// Create the file and start the writer thread
    ///
    /// `bits_per_sample` is 16 (integer PCM) or 32 (float).
    pub fn create(path: impl AsRef<Path>, sample_rate: u32, bits_per_sample: u16) -> RecordingResult<Self> {
        let path = path.as_ref().to_path_buf();
        let encoding = Encoding::from_bits(bits_per_sample)?;
        let writer = hound::WavWriter::create(&path, encoding.spec(sample_rate)).map_err(|source| {
            RecordingError::Create {
                path: path.clone(),
                source,
            }
        })?;

        let capacity = sample_rate.max(1) as usize * RING_SECONDS;
        let (producer, consumer) = rtrb::RingBuffer::new(capacity);
        let stop = Arc::new(AtomicBool::new(false));
        let writer_failed = Arc::new(AtomicBool::new(false));

        let thread_stop = Arc::clone(&stop);
        let thread_failed = Arc::clone(&writer_failed);
        let handle = thread::Builder::new()
            .name("recording-writer".to_string())
            .spawn(move || {
                let result = drain(consumer, writer, encoding, thread_stop);
                if result.is_err() {
                    thread_failed.store(true, Ordering::Release);
                }
                result
            })
            .map_err(|e| RecordingError::Write(format!("failed to spawn writer thread: {}", e)))?;

        log::info!(
            "Recording to {:?} ({} Hz, {}-bit)",
            path,
            sample_rate,
            bits_per_sample
        );

        Ok(Self {
            path,
            producer,
            stop,
            writer_failed,
            dropped: Arc::new(AtomicU64::new(0)),
            writer: Some(handle),
            frames_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Frames lost because the writer thread fell behind
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Frames in the finished file (known after `close`)
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

impl RecordingSink for WavRecorder {
    fn write(&mut self, block: &[StereoSample]) -> RecordingResult<()> {
        if self.writer.is_none() {
            return Err(RecordingError::Closed);
        }
        if self.writer_failed.load(Ordering::Acquire) {
            return Err(RecordingError::WriterStopped);
        }

        let accepted = self.producer.slots().min(block.len());
        if accepted > 0 {
            if let Ok(chunk) = self.producer.write_chunk_uninit(accepted) {
                chunk.fill_from_iter(block[..accepted].iter().copied());
            }
        }
        let lost = (block.len() - accepted) as u64;
        if lost > 0 {
            self.dropped.fetch_add(lost, Ordering::Relaxed);
        }
        Ok(())
    }

    fn close(&mut self) -> RecordingResult<()> {
        let Some(handle) = self.writer.take() else {
            return Ok(());
        };
        self.stop.store(true, Ordering::Release);

        let frames = handle
            .join()
            .map_err(|_| RecordingError::Finalize("writer thread panicked".to_string()))??;
        self.frames_written = frames;

        let dropped = self.dropped_frames();
        if dropped > 0 {
            log::warn!("Recording {:?}: {} frames dropped", self.path, dropped);
        }
        log::info!("Recording finalized: {:?} ({} frames)", self.path, frames);
        Ok(())
    }
}

impl Drop for WavRecorder {
    fn drop(&mut self) {
        if self.writer.is_some() {
            if let Err(e) = self.close() {
                log::error!("Failed to finalize recording {:?}: {}", self.path, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_recording_filename_format() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 2).unwrap();
        assert_eq!(recording_filename(at), "twindeck-20240309-070502.wav");
    }

    #[test]
    fn test_rejects_unsupported_bit_depth() {
        let dir = tempfile::tempdir().unwrap();
        let err = WavRecorder::create(dir.path().join("x.wav"), 44100, 24).err().unwrap();
        assert!(matches!(err, RecordingError::UnsupportedBitDepth(24)));
    }

    #[test]
    fn test_wav_recorder_writes_all_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("take.wav");
        let mut recorder = WavRecorder::create(&path, 8000, 32).unwrap();

        let block: Vec<_> = (0..256).map(|i| StereoSample::new(i as f32 / 256.0, -0.25)).collect();
        for _ in 0..4 {
            recorder.write(&block).unwrap();
        }
        recorder.close().unwrap();
        assert_eq!(recorder.frames_written(), 1024);
        assert_eq!(recorder.dropped_frames(), 0);
        assert!(matches!(recorder.write(&block), Err(RecordingError::Closed)));

        let mut reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.spec().sample_rate, 8000);
        let samples: Vec<f32> = reader.samples::<f32>().map(|s| s.unwrap()).collect();
        assert_eq!(samples.len(), 2048);
        assert_eq!(samples[2 * 128], 0.5);
        assert_eq!(samples[2 * 128 + 1], -0.25);
    }

    #[test]
    fn test_int16_encoding_clips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.wav");
        let mut recorder = WavRecorder::create(&path, 8000, 16).unwrap();
        recorder.write(&[StereoSample::new(2.0, -2.0)]).unwrap();
        recorder.close().unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![i16::MAX, -i16::MAX]);
    }

    #[test]
    fn test_write_after_writer_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = WavRecorder::create(dir.path().join("dead.wav"), 8000, 16).unwrap();
        recorder.writer_failed.store(true, Ordering::Release);

        let block = [StereoSample::new(0.1, 0.1); 32];
        assert!(matches!(recorder.write(&block), Err(RecordingError::WriterStopped)));
        assert_eq!(recorder.frames_written(), 0);
        recorder.close().unwrap();
    }

    #[test]
    fn test_new_recording_path_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested").join("takes");
        let path = new_recording_path(&target).unwrap();
        assert!(target.is_dir());
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("twindeck-"));
    }
}
