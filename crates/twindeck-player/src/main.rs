//! Twindeck Player - Headless two-deck mixer
//!
//! Loads one or two tracks, starts the audio output and plays them through
//! the crossfader, optionally recording the master output to a WAV file.
//!
//! ## Command line
//!
//! ```text
//! twindeck-player [--config PATH] [--record] [--record-to PATH] [--seconds N]
//!                 [--crossfader X] [--sync] DECK_A [DECK_B]
//! ```
//!
//! - `--config`: config file (default `~/.config/twindeck/config.yaml`)
//! - `--record`: record the master output to a timestamped file in the
//!   configured recording directory
//! - `--record-to`: record the master output to PATH (implies `--record`)
//! - `--seconds`: stop after N seconds instead of at the end of the tracks
//! - `--crossfader`: initial crossfader position, -1 (A) to 1 (B)
//! - `--sync`: match deck B's tempo to deck A when both BPMs are known

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};

use twindeck_core::audio::start_audio;
use twindeck_core::audio_file::SymphoniaDecoder;
use twindeck_core::config::{self, EngineConfig};
use twindeck_core::engine::{AudioEngine, EngineEvent, EngineHandle};
use twindeck_core::recording::{new_recording_path, WavRecorder};
use twindeck_core::track::Track;
use twindeck_core::{DeckId, PlayState};

/// How often the main loop reports and drains events
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Status lines are logged every this many polls
const STATUS_EVERY: u32 = 8;

#[derive(Debug, Default, PartialEq)]
struct Args {
    config: Option<PathBuf>,
    record: bool,
    /// Explicit recording target, otherwise a generated path is used
    record_to: Option<PathBuf>,
    seconds: Option<f64>,
    crossfader: Option<f32>,
    sync: bool,
    tracks: Vec<PathBuf>,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Args> {
    let mut parsed = Args::default();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let path = args.next().context("--config needs a path")?;
                parsed.config = Some(PathBuf::from(path));
            }
            "--record" => parsed.record = true,
            "--record-to" => {
                let path = args.next().context("--record-to needs a path")?;
                parsed.record = true;
                parsed.record_to = Some(PathBuf::from(path));
            }
            "--seconds" => {
                let value = args.next().context("--seconds needs a value")?;
                let seconds: f64 = value
                    .parse()
                    .with_context(|| format!("invalid --seconds value: {}", value))?;
                if seconds.is_nan() || seconds <= 0.0 {
                    bail!("--seconds must be positive, got {}", value);
                }
                parsed.seconds = Some(seconds);
            }
            "--crossfader" => {
                let value = args.next().context("--crossfader needs a value")?;
                parsed.crossfader = Some(
                    value
                        .parse()
                        .with_context(|| format!("invalid --crossfader value: {}", value))?,
                );
            }
            "--sync" => parsed.sync = true,
            flag if flag.starts_with("--") => bail!("unknown option: {}", flag),
            _ => parsed.tracks.push(PathBuf::from(arg)),
        }
    }

    match parsed.tracks.len() {
        0 => bail!("usage: twindeck-player [--config PATH] [--record] [--record-to PATH] [--seconds N] [--crossfader X] [--sync] DECK_A [DECK_B]"),
        1 | 2 => {}
        n => bail!("at most two tracks can be loaded, got {}", n),
    }
    if let Some(target) = &parsed.record_to {
        if parsed.tracks.contains(target) {
            bail!("refusing to record over the loaded track {:?}", target);
        }
    }
    Ok(parsed)
}

/// Open the recording target and hand it to the engine
fn start_recording(
    handle: &mut EngineHandle,
    args: &Args,
    config: &EngineConfig,
    sample_rate: u32,
) -> Result<PathBuf> {
    let path = match &args.record_to {
        Some(path) => path.clone(),
        None => new_recording_path(&config.recording.directory)?,
    };
    let recorder = WavRecorder::create(&path, sample_rate, config.recording.bits_per_sample)
        .with_context(|| format!("failed to create {:?}", path))?;
    handle.start_recording(Box::new(recorder))?;
    Ok(path)
}

fn log_status(handle: &EngineHandle, loaded: &[DeckId]) {
    for &deck in loaded {
        let s = handle.deck_snapshot(deck);
        log::info!(
            "Deck {}: {:?} {:.1}/{:.1}s speed {:.3} level {:.2}",
            deck,
            s.state,
            s.position,
            s.track_length,
            s.speed,
            s.rms
        );
    }
    let m = handle.mixer_snapshot();
    log::info!(
        "Master: crossfader {:+.2} gain {:.2} level {:.2}{}",
        m.crossfader,
        m.master_gain,
        m.rms,
        if m.recording {
            format!(" [REC {} blocks]", m.recorded_blocks)
        } else {
            String::new()
        }
    );
}

/// Log events; returns true once a recording failure was seen
fn drain_events(handle: &mut EngineHandle) -> bool {
    let mut recording_failed = false;
    for event in handle.poll_events() {
        match &event {
            EngineEvent::RecordingFailed { reason } => {
                log::error!("Recording aborted: {}", reason);
                recording_failed = true;
            }
            EngineEvent::TrackEnded { deck } => log::info!("Deck {} finished", deck),
            other => log::debug!("{:?}", other),
        }
    }
    recording_failed
}

fn run(args: Args) -> Result<()> {
    let config_path = args.config.clone().unwrap_or_else(config::default_config_path);
    let config: EngineConfig = config::load_config(&config_path);

    let (engine, mut handle) =
        AudioEngine::with_decoder(Arc::new(SymphoniaDecoder), config.deck.interpolation);
    handle.apply_config(&config);
    if let Some(position) = args.crossfader {
        handle.set_crossfader(position);
    }

    let mut audio = start_audio(&config.audio, engine).context("failed to start audio output")?;
    log::info!(
        "Output: {} at {} Hz, {} frames (~{:.1}ms)",
        audio.device_name(),
        audio.sample_rate(),
        audio.buffer_size(),
        audio.latency_ms()
    );

    let mut loaded = Vec::new();
    for (deck, path) in DeckId::ALL.into_iter().zip(&args.tracks) {
        let track = Track::probe(path).with_context(|| format!("failed to read {:?}", path))?;
        log::info!(
            "Deck {}: {} - {} ({}{})",
            deck,
            track.artist(),
            track.title(),
            track.formatted_duration(),
            track.bpm().map(|b| format!(", {} BPM", b)).unwrap_or_default()
        );
        handle
            .load_track(deck, track)
            .with_context(|| format!("failed to load {:?} on deck {}", path, deck))?;
        loaded.push(deck);
    }
    if args.sync {
        handle.enable_beat_sync(true);
    }

    if args.record {
        match start_recording(&mut handle, &args, &config, audio.sample_rate()) {
            Ok(path) => log::info!("Recording to {:?}", path),
            Err(e) => log::error!("Recording unavailable, playing without it: {:#}", e),
        }
    }

    for &deck in &loaded {
        handle.play(deck);
    }

    let started = Instant::now();
    let limit = args.seconds.map(Duration::from_secs_f64);
    let mut polls = 0u32;
    loop {
        std::thread::sleep(POLL_INTERVAL);
        polls += 1;

        if drain_events(&mut handle) {
            log::warn!("Continuing playback without recording");
        }
        if polls % STATUS_EVERY == 0 {
            log_status(&handle, &loaded);
        }

        let timed_out = limit.is_some_and(|limit| started.elapsed() >= limit);
        let all_ended = loaded.iter().all(|&deck| {
            let s = handle.deck_snapshot(deck);
            s.state != PlayState::Playing || s.position >= s.track_length
        });
        if timed_out || all_ended {
            break;
        }
    }

    if handle.is_recording() {
        match handle.stop_recording() {
            Ok(blocks) => log::info!("Recorded {} blocks", blocks),
            Err(e) => log::error!("Failed to finish recording: {}", e),
        }
    }
    for &deck in &loaded {
        handle.stop(deck);
    }
    drain_events(&mut handle);
    audio.shutdown()?;
    Ok(())
}

fn main() -> Result<()> {
    // Initialize logger - set RUST_LOG=debug for verbose output
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    log::info!("twindeck-player starting up");
    let args = parse_args(std::env::args().skip(1))?;
    run(args)
}
