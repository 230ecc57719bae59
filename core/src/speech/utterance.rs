use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::error::SynthesisError;
use crate::orchestrator::constants::{RESPONSE_TIMEOUT, THOUGHT_TIMEOUT};
use crate::orchestrator::types::SpeakerRole;

use super::typewriter::TypewriterReveal;

pub type UtteranceId = u64;

/// Opaque voice identifier understood by the synthesizer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VoiceRef(String);

impl VoiceRef {
    pub fn new(voice: impl Into<String>) -> Self {
        Self(voice.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VoiceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UtteranceKind {
    Thought,
    Response,
}

impl UtteranceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UtteranceKind::Thought => "thought",
            UtteranceKind::Response => "response",
        }
    }
}

/// One unit of synthesized speech. Immutable once handed to the queue.
#[derive(Debug, Clone)]
pub struct Utterance {
    id: UtteranceId,
    text: String,
    voice: VoiceRef,
    speaker: SpeakerRole,
    kind: UtteranceKind,
    timeout: Duration,
}

impl Utterance {
    pub fn thought(speaker: SpeakerRole, text: impl Into<String>, voice: VoiceRef) -> Self {
        Self {
            id: 0,
            text: text.into(),
            voice,
            speaker,
            kind: UtteranceKind::Thought,
            timeout: THOUGHT_TIMEOUT,
        }
    }

    pub fn response(speaker: SpeakerRole, text: impl Into<String>, voice: VoiceRef) -> Self {
        Self {
            id: 0,
            text: text.into(),
            voice,
            speaker,
            kind: UtteranceKind::Response,
            timeout: RESPONSE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Zero until the queue accepts the utterance.
    pub fn id(&self) -> UtteranceId {
        self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn voice(&self) -> &VoiceRef {
        &self.voice
    }

    pub fn speaker(&self) -> SpeakerRole {
        self.speaker
    }

    pub fn kind(&self) -> UtteranceKind {
        self.kind
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn reveal(&self) -> TypewriterReveal<'_> {
        TypewriterReveal::new(&self.text)
    }

    pub(super) fn assign_id(&mut self, id: UtteranceId) {
        self.id = id;
    }
}

/// Why an utterance left the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Completed,
    /// No audio; the text was shown for a length-proportional pause.
    TextOnly,
    Skipped,
    TimedOut,
    /// Synthesis or playback failed; the text-only pause still ran.
    Failed,
    /// Dropped by `clear()`; no lifecycle event was emitted.
    Cleared,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::Completed => "completed",
            EndReason::TextOnly => "text_only",
            EndReason::Skipped => "skipped",
            EndReason::TimedOut => "timed_out",
            EndReason::Failed => "failed",
            EndReason::Cleared => "cleared",
        }
    }

    pub fn ran_to_completion(&self) -> bool {
        matches!(self, EndReason::Completed | EndReason::TextOnly | EndReason::Failed)
    }
}

/// Per-utterance lifecycle, emitted strictly in queue order.
#[derive(Debug, Clone, PartialEq)]
pub enum SpeechEvent {
    Started {
        id: UtteranceId,
        speaker: SpeakerRole,
        kind: UtteranceKind,
        text: String,
    },
    Ended {
        id: UtteranceId,
        speaker: SpeakerRole,
        kind: UtteranceKind,
        reason: EndReason,
    },
    Failed {
        id: UtteranceId,
        error: SynthesisError,
    },
}

impl SpeechEvent {
    pub fn utterance_id(&self) -> UtteranceId {
        match self {
            SpeechEvent::Started { id, .. }
            | SpeechEvent::Ended { id, .. }
            | SpeechEvent::Failed { id, .. } => *id,
        }
    }
}

/// Resolves when the utterance leaves the queue. Cancellation resolves it too.
#[derive(Debug)]
pub struct UtteranceTicket {
    id: UtteranceId,
    rx: oneshot::Receiver<EndReason>,
}

impl UtteranceTicket {
    pub(super) fn new(id: UtteranceId, rx: oneshot::Receiver<EndReason>) -> Self {
        Self { id, rx }
    }

    pub fn id(&self) -> UtteranceId {
        self.id
    }

    pub async fn wait(self) -> EndReason {
        self.rx.await.unwrap_or(EndReason::Cleared)
    }
}
