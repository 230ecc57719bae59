//! Voice "submit" command detection over the live transcript.

mod matcher;

pub use matcher::{match_submit, Rejection};

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::telemetry::events::record_submit_trigger;
use crate::timing::sleep_until_opt;
use crate::transcription::TranscriptSnapshot;

const TARGET: &str = "submit_detector";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitTrigger {
    /// The message with the command removed.
    pub text: String,
    /// Transcript as it read when the command was confirmed.
    pub raw: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitDecision {
    /// Same text as last time, or the detector already fired.
    Unchanged,
    Rejected(Rejection),
    Armed { deadline: Instant },
    /// A pending command was withdrawn by newer text.
    Disarmed(Rejection),
}

#[derive(Debug)]
struct Pending {
    deadline: Instant,
    text: String,
    raw: String,
}

/// Fires at most once per user turn; inert until [`reset`](Self::reset).
#[derive(Debug)]
pub struct SubmitDetector {
    debounce: Duration,
    last_seen: Option<String>,
    pending: Option<Pending>,
    fired: bool,
}

impl SubmitDetector {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            last_seen: None,
            pending: None,
            fired: false,
        }
    }

    pub fn observe(&mut self, transcript: &str, now: Instant) -> SubmitDecision {
        if self.fired || self.last_seen.as_deref() == Some(transcript) {
            return SubmitDecision::Unchanged;
        }
        self.last_seen = Some(transcript.to_string());

        match match_submit(transcript) {
            Ok(text) => {
                let deadline = match self.pending.as_ref() {
                    Some(pending) => pending.deadline,
                    None => now + self.debounce,
                };
                debug!(target: TARGET, "submit command armed");
                self.pending = Some(Pending {
                    deadline,
                    text,
                    raw: transcript.to_string(),
                });
                SubmitDecision::Armed { deadline }
            }
            Err(rejection) => {
                if self.pending.take().is_some() {
                    debug!(
                        target: TARGET,
                        reason = rejection.as_str(),
                        "pending submit withdrawn"
                    );
                    SubmitDecision::Disarmed(rejection)
                } else {
                    SubmitDecision::Rejected(rejection)
                }
            }
        }
    }

    /// Fires the pending command once its debounce window has elapsed.
    pub fn confirm(&mut self, now: Instant) -> Option<SubmitTrigger> {
        if self.fired {
            return None;
        }
        if self.pending.as_ref()?.deadline > now {
            return None;
        }
        let pending = self.pending.take()?;
        self.fired = true;
        info!(target: TARGET, chars = pending.text.chars().count(), "submit command confirmed");
        record_submit_trigger(&pending.text, &pending.raw);
        Some(SubmitTrigger {
            text: pending.text,
            raw: pending.raw,
        })
    }

    pub fn pending_deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|pending| pending.deadline)
    }

    pub fn has_fired(&self) -> bool {
        self.fired
    }

    pub fn reset(&mut self) {
        self.last_seen = None;
        self.pending = None;
        self.fired = false;
    }
}

/// Follows the transcript until a command is confirmed, the transcript
/// channel closes or `cancel` fires.
pub async fn watch_transcript(
    detector: &mut SubmitDetector,
    mut transcript: watch::Receiver<TranscriptSnapshot>,
    cancel: CancellationToken,
) -> Option<SubmitTrigger> {
    let mut open = true;
    loop {
        if open {
            let text = transcript.borrow_and_update().full_text();
            detector.observe(&text, Instant::now());
        }
        if let Some(trigger) = detector.confirm(Instant::now()) {
            return Some(trigger);
        }
        if !open && detector.pending_deadline().is_none() {
            return None;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            changed = transcript.changed(), if open => {
                if changed.is_err() {
                    open = false;
                }
            }
            _ = sleep_until_opt(detector.pending_deadline()) => {}
        }
    }
}
