use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::speech::SpeechQueue;

const TARGET: &str = "turn_controller";

/// User interrupts for the current AI turn. The skip-to-end flag is cleared
/// whenever a turn starts; skipping one utterance leaves no state behind.
#[derive(Clone)]
pub struct SkipController {
    queue: Arc<SpeechQueue>,
    skip_to_end: Arc<AtomicBool>,
}

impl SkipController {
    pub fn new(queue: Arc<SpeechQueue>) -> Self {
        Self {
            queue,
            skip_to_end: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cuts the utterance that is playing; the rest of the turn continues.
    pub fn skip_current(&self) -> bool {
        let skipped = self.queue.skip_current();
        debug!(target: TARGET, skipped, "skip current requested");
        skipped
    }

    /// Drains everything queued for the turn. Returns the number of
    /// utterances that were cut or dropped.
    pub fn skip_to_end(&self) -> usize {
        self.skip_to_end.store(true, Ordering::SeqCst);
        let resolved = self.queue.skip_to_end();
        debug!(target: TARGET, resolved, "skip to end requested");
        resolved
    }

    pub fn skip_to_end_requested(&self) -> bool {
        self.skip_to_end.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.skip_to_end.store(false, Ordering::SeqCst);
    }
}
