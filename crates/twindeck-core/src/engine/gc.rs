//! Collector for values swapped out under the render thread
//!
//! Each deck keeps its decoded track in a `SharedCell<TrackSource>`.
//! `DeckControl::install` and `DeckControl::unload` replace it with a new
//! `Shared` allocated against [`gc_handle`], while `Deck::render_block` holds
//! the old one for the rest of the block it is rendering. Whichever side lets
//! go last only queues the source; the `audio-gc` thread frees it. The loop
//! region cell is swapped the same way on every loop edit.

use std::sync::mpsc;
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

use basedrop::{Collector, Handle};

/// How often the collector thread reclaims queued drops
const COLLECT_INTERVAL: Duration = Duration::from_millis(100);

static GC_HANDLE: OnceLock<Handle> = OnceLock::new();

fn spawn_collector() -> Handle {
    let (tx, rx) = mpsc::channel();

    thread::Builder::new()
        .name("audio-gc".to_string())
        .spawn(move || {
            // Collector is !Sync, it has to live on the thread that drives it
            let mut collector = Collector::new();
            tx.send(collector.handle()).expect("Failed to send GC handle");

            log::info!("Audio GC thread started");

            loop {
                collector.collect();
                thread::sleep(COLLECT_INTERVAL);
            }
        })
        .expect("Failed to spawn audio GC thread");

    rx.recv().expect("Failed to receive GC handle")
}

/// Handle for allocating `Shared<T>` values collected off the audio thread
///
/// The collector thread is started on first use and runs for the rest of
/// the process.
pub fn gc_handle() -> Handle {
    GC_HANDLE.get_or_init(spawn_collector).clone()
}
