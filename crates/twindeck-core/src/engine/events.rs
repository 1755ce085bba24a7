//! Notifications for the control plane
//!
//! The render thread never calls into control-plane code. Control calls emit
//! [`EngineEvent`]s on a crossbeam channel as they happen; faults detected
//! inside the render callback travel through a lock-free queue as
//! [`RenderFault`]s and become events when the control plane polls.

use std::fmt;
use std::path::PathBuf;

use crossbeam::channel::Sender;

use crate::recording::RecordingError;
use crate::track::Track;
use crate::types::DeckId;

/// Capacity of the render → control fault queue
pub const FAULT_QUEUE_CAPACITY: usize = 64;

/// A clamped control parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parameter {
    Gain(DeckId),
    Speed(DeckId),
    LowEq(DeckId),
    MidEq(DeckId),
    HighEq(DeckId),
    Position(DeckId),
    CuePoint(DeckId),
    LoopStart(DeckId),
    LoopEnd(DeckId),
    Crossfader,
    MasterGain,
    CueGain,
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parameter::Gain(d) => write!(f, "deck {} gain", d),
            Parameter::Speed(d) => write!(f, "deck {} speed", d),
            Parameter::LowEq(d) => write!(f, "deck {} low EQ", d),
            Parameter::MidEq(d) => write!(f, "deck {} mid EQ", d),
            Parameter::HighEq(d) => write!(f, "deck {} high EQ", d),
            Parameter::Position(d) => write!(f, "deck {} position", d),
            Parameter::CuePoint(d) => write!(f, "deck {} cue point", d),
            Parameter::LoopStart(d) => write!(f, "deck {} loop start", d),
            Parameter::LoopEnd(d) => write!(f, "deck {} loop end", d),
            Parameter::Crossfader => write!(f, "crossfader"),
            Parameter::MasterGain => write!(f, "master gain"),
            Parameter::CueGain => write!(f, "cue gain"),
        }
    }
}

/// Notification delivered to the control plane
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A track finished decoding and is now on the deck
    TrackLoaded { deck: DeckId, track: Track },
    /// Loading failed; the deck kept its previous state
    LoadFailed { deck: DeckId, path: PathBuf, reason: String },
    PlaybackStarted { deck: DeckId },
    PlaybackPaused { deck: DeckId },
    PlaybackStopped { deck: DeckId },
    /// The playhead reached the end of the loaded source
    TrackEnded { deck: DeckId },
    /// A control value was out of range and has been limited
    ParameterClamped {
        parameter: Parameter,
        requested: f64,
        applied: f64,
    },
    /// A control value was not a number and has been ignored
    ParameterRejected { parameter: Parameter },
    RecordingStarted,
    /// Recording closed normally; `blocks` were written to the sink
    RecordingStopped { blocks: u64, skipped: u64 },
    /// The sink failed; recording is off, mixing continues
    RecordingFailed { reason: String },
}

/// Fault raised on the render thread
#[derive(Debug)]
pub(crate) enum RenderFault {
    /// Sink of recording `generation` failed to accept a block
    RecordingFailed { generation: u64, error: RecordingError },
    TrackEnded(DeckId),
}

/// Control-side event emitter shared by the deck and mixer controls
#[derive(Debug, Clone)]
pub(crate) struct Notifier {
    tx: Sender<EngineEvent>,
}

impl Notifier {
    pub fn new(tx: Sender<EngineEvent>) -> Self {
        Self { tx }
    }

    pub fn send(&self, event: EngineEvent) {
        // Nobody listening is fine
        let _ = self.tx.send(event);
    }

    pub fn clamped(&self, parameter: Parameter, requested: f64, applied: f64) {
        log::warn!(
            "{} out of range: requested {}, using {}",
            parameter,
            requested,
            applied
        );
        self.send(EngineEvent::ParameterClamped {
            parameter,
            requested,
            applied,
        });
    }

    pub fn rejected(&self, parameter: Parameter) {
        log::warn!("{} ignored: value is not a number", parameter);
        self.send(EngineEvent::ParameterRejected { parameter });
    }
}
