//! CPAL output stream driving the [`AudioEngine`]
//!
//! ```text
//! ┌──────────────────┐   atomics / pointer swap   ┌─────────────────────┐
//! │  Control thread  │───────────────────────────►│  CPAL Audio Thread  │
//! │  (EngineHandle)  │◄───────────────────────────│  (AudioEngine)      │
//! └──────────────────┘   snapshots / fault queue  └─────────────────────┘
//! ```
//!
//! The engine sits in a mutex that only the audio callback and
//! [`AudioHandle::shutdown`] touch. The callback `try_lock`s it and plays
//! silence if it is busy, so the callback never waits. Shutdown pauses the
//! stream, then takes the lock, which lets any in-flight render finish
//! before the engine is released.

use std::sync::{Arc, Mutex, TryLockError};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize as CpalBufferSize, SampleFormat, Stream, StreamConfig};

use super::error::{AudioError, AudioResult};
use crate::config::AudioSettings;
use crate::engine::{AudioEngine, MAX_BUFFER_SIZE};
use crate::types::StereoBuffer;

/// Smallest callback size requested from the device
const MIN_BUFFER_SIZE: u32 = 64;

/// Names of the output devices of the default host
pub fn output_device_names() -> AudioResult<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| AudioError::ConfigError(e.to_string()))?;
    Ok(devices.filter_map(|d| d.name().ok()).collect())
}

fn find_device(name: Option<&str>) -> AudioResult<cpal::Device> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_output_device()
            .ok_or_else(|| AudioError::NoDefaultDevice(format!("{:?}", host.id()))),
        Some(wanted) => {
            let mut devices = host
                .output_devices()
                .map_err(|e| AudioError::ConfigError(e.to_string()))?
                .peekable();
            if devices.peek().is_none() {
                return Err(AudioError::NoDevices);
            }
            devices
                .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
                .ok_or_else(|| AudioError::DeviceNotFound(wanted.to_string()))
        }
    }
}

/// Pick an f32 stereo-capable config, preferring the requested rate
fn output_config(device: &cpal::Device, settings: &AudioSettings) -> AudioResult<StreamConfig> {
    let supported: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| AudioError::ConfigError(e.to_string()))?
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .collect();

    if supported.is_empty() {
        return Err(AudioError::UnsupportedFormat(
            "device has no f32 output configuration".to_string(),
        ));
    }

    let target = settings.sample_rate;
    let in_range = |c: &cpal::SupportedStreamConfigRange| {
        target >= c.min_sample_rate().0 && target <= c.max_sample_rate().0
    };

    let best = supported
        .iter()
        .find(|c| c.channels() >= 2 && in_range(c))
        .or_else(|| supported.iter().find(|c| c.channels() >= 2))
        .or_else(|| supported.first())
        .ok_or_else(|| AudioError::ConfigError("No suitable output configuration".to_string()))?;

    let sample_rate = if in_range(best) {
        cpal::SampleRate(target)
    } else {
        let fallback = best.max_sample_rate();
        log::warn!(
            "Audio device doesn't support {}Hz, falling back to {}Hz",
            target,
            fallback.0
        );
        fallback
    };

    let buffer_size = settings
        .buffer_size
        .clamp(MIN_BUFFER_SIZE, MAX_BUFFER_SIZE as u32);

    Ok(StreamConfig {
        channels: best.channels(),
        sample_rate,
        buffer_size: CpalBufferSize::Fixed(buffer_size),
    })
}

/// State owned by the audio callback
struct CallbackState {
    engine: AudioEngine,
    /// Pre-allocated master block
    buffer: StereoBuffer,
}

impl CallbackState {
    fn process(&mut self, data: &mut [f32], channels: usize) {
        let n_frames = data.len() / channels;
        let mut written = 0;

        // Device callbacks can exceed the buffer; render in pieces
        while written < n_frames {
            let frames = (n_frames - written).min(self.buffer.capacity());
            self.engine.render_buffer(&mut self.buffer, frames);

            let out = &mut data[written * channels..(written + frames) * channels];
            copy_to_device(&self.buffer, out, channels);
            written += frames;
        }
    }
}

/// Interleave stereo frames into a device buffer with `channels` channels
fn copy_to_device(buffer: &StereoBuffer, data: &mut [f32], channels: usize) {
    if channels == 2 {
        data.copy_from_slice(buffer.as_interleaved());
        return;
    }
    for (frame, sample) in data.chunks_mut(channels).zip(buffer.as_slice()) {
        frame[0] = sample.left;
        if channels > 1 {
            frame[1] = sample.right;
        }
        for ch in frame.iter_mut().skip(2) {
            *ch = 0.0;
        }
    }
}

/// Running output stream
///
/// Call [`AudioHandle::shutdown`] for an orderly stop; dropping the handle
/// does the same.
pub struct AudioHandle {
    stream: Option<Stream>,
    state: Arc<Mutex<CallbackState>>,
    sample_rate: u32,
    buffer_size: u32,
    device_name: String,
}

impl AudioHandle {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn buffer_size(&self) -> u32 {
        self.buffer_size
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// One-way output latency in milliseconds
    pub fn latency_ms(&self) -> f32 {
        (self.buffer_size as f32 / self.sample_rate as f32) * 1000.0
    }

    /// Stop the stream, wait for the last render and release the engine
    pub fn shutdown(&mut self) -> AudioResult<()> {
        let Some(stream) = self.stream.take() else {
            return Ok(());
        };
        let paused = stream
            .pause()
            .map_err(|e| AudioError::StreamPlayError(e.to_string()));

        // Taking the lock waits out a render that is still running
        match self.state.lock() {
            Ok(mut state) => state.engine.release(),
            Err(poisoned) => poisoned.into_inner().engine.release(),
        }
        drop(stream);
        log::info!("Audio stream shut down");
        paused
    }
}

impl Drop for AudioHandle {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::warn!("Audio shutdown: {}", e);
        }
    }
}

/// Open the output device and start rendering `engine`
///
/// `engine` is prepared for the negotiated rate and block size before the
/// stream starts.
pub fn start_audio(settings: &AudioSettings, mut engine: AudioEngine) -> AudioResult<AudioHandle> {
    let device = find_device(settings.device.as_deref())?;
    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    log::info!("Using audio device: {}", device_name);

    let config = output_config(&device, settings)?;
    let sample_rate = config.sample_rate.0;
    let buffer_size = match config.buffer_size {
        CpalBufferSize::Fixed(frames) => frames,
        CpalBufferSize::Default => settings.buffer_size,
    };
    let channels = config.channels as usize;

    log::info!(
        "Audio config: {} channels, {}Hz, {} frames (~{:.1}ms latency)",
        channels,
        sample_rate,
        buffer_size,
        buffer_size as f32 / sample_rate as f32 * 1000.0
    );

    engine.prepare(sample_rate, buffer_size as usize);
    let state = Arc::new(Mutex::new(CallbackState {
        engine,
        buffer: StereoBuffer::silence(MAX_BUFFER_SIZE),
    }));

    let callback_state = Arc::clone(&state);
    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                match callback_state.try_lock() {
                    Ok(mut state) => state.process(data, channels),
                    // Shutdown holds the lock, or a render panicked
                    Err(TryLockError::WouldBlock) | Err(TryLockError::Poisoned(_)) => data.fill(0.0),
                }
            },
            move |err| {
                log::error!("Audio stream error: {}", err);
            },
            None,
        )
        .map_err(|e| AudioError::StreamBuildError(e.to_string()))?;

    stream
        .play()
        .map_err(|e| AudioError::StreamPlayError(e.to_string()))?;
    log::info!("Audio stream started");

    Ok(AudioHandle {
        stream: Some(stream),
        state,
        sample_rate,
        buffer_size,
        device_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::types::StereoSample;

    fn buffer(frames: &[StereoSample]) -> StereoBuffer {
        let mut buffer = StereoBuffer::silence(frames.len());
        buffer.as_mut_slice().copy_from_slice(frames);
        buffer
    }

    #[test]
    fn test_copy_to_device_stereo() {
        let buffer = buffer(&[StereoSample::new(0.1, 0.2), StereoSample::new(0.3, 0.4)]);
        let mut data = [9.0f32; 4];
        copy_to_device(&buffer, &mut data, 2);
        assert_eq!(data, [0.1, 0.2, 0.3, 0.4]);
    }

    #[test]
    fn test_copy_to_device_pads_extra_channels() {
        let buffer = buffer(&[StereoSample::new(0.1, 0.2), StereoSample::new(0.3, 0.4)]);
        let mut data = [9.0f32; 8];
        copy_to_device(&buffer, &mut data, 4);
        assert_eq!(data, [0.1, 0.2, 0.0, 0.0, 0.3, 0.4, 0.0, 0.0]);
    }

    #[test]
    fn test_copy_to_device_mono() {
        let buffer = buffer(&[StereoSample::new(0.5, -0.5)]);
        let mut data = [0.0f32; 1];
        copy_to_device(&buffer, &mut data, 1);
        assert_eq!(data, [0.5]);
    }

    #[test]
    fn test_callback_state_renders_large_callbacks() {
        let (engine, _handle) = AudioEngine::new();
        let mut state = CallbackState {
            engine,
            buffer: StereoBuffer::silence(256),
        };
        let mut data = vec![1.0f32; 1000 * 2];
        state.process(&mut data, 2);
        // Nothing loaded: every frame was rendered, as silence
        assert!(data.iter().all(|&s| s == 0.0));
    }
}
