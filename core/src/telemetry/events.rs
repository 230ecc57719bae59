use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::ErrorClass;
use crate::orchestrator::types::{SpeakerRole, TurnPhase};
use crate::speech::{EndReason, UtteranceId, UtteranceKind};

pub(crate) const TARGET: &str = "telemetry::voice";
pub(crate) const EVENT_UTTERANCE: &str = "utterance_outcome";
pub(crate) const EVENT_TRANSITION: &str = "turn_transition";
pub(crate) const EVENT_SUBMIT: &str = "submit_trigger";
pub(crate) const EVENT_CROSSFADE: &str = "ambient_crossfade";
pub(crate) const EVENT_TURN_FAILURE: &str = "turn_failure";

#[derive(Debug, Serialize)]
pub struct UtteranceOutcomeEvent {
    pub utterance_id: UtteranceId,
    pub kind: &'static str,
    pub speaker: &'static str,
    pub reason: &'static str,
    pub elapsed_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct TurnTransitionEvent {
    pub turn_id: u64,
    pub from: &'static str,
    pub to: &'static str,
}

#[derive(Debug, Serialize)]
pub struct SubmitTriggerEvent {
    pub message_chars: usize,
    pub transcript_chars: usize,
}

#[derive(Debug, Serialize)]
pub struct CrossfadeEvent<'a> {
    pub from: &'a str,
    pub to: &'a str,
    pub duration_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct TurnFailureEvent<'a> {
    pub turn_id: u64,
    pub class: &'static str,
    pub message: &'a str,
}

pub fn record_utterance_outcome(
    utterance_id: UtteranceId,
    kind: UtteranceKind,
    speaker: SpeakerRole,
    reason: EndReason,
    elapsed: Duration,
) {
    let event = UtteranceOutcomeEvent {
        utterance_id,
        kind: kind.as_str(),
        speaker: speaker.as_str(),
        reason: reason.as_str(),
        elapsed_ms: duration_to_ms(elapsed),
    };

    match serde_json::to_string(&event) {
        Ok(payload) => info!(
            target: TARGET,
            event = EVENT_UTTERANCE,
            utterance_id = event.utterance_id,
            kind = event.kind,
            speaker = event.speaker,
            reason = event.reason,
            elapsed_ms = event.elapsed_ms,
            payload = %payload
        ),
        Err(err) => warn!(
            target: TARGET,
            event = EVENT_UTTERANCE,
            %err,
            "failed to encode utterance outcome event"
        ),
    }
}

pub fn record_turn_transition(turn_id: u64, from: TurnPhase, to: TurnPhase) {
    let event = TurnTransitionEvent {
        turn_id,
        from: from.as_str(),
        to: to.as_str(),
    };

    match serde_json::to_string(&event) {
        Ok(payload) => info!(
            target: TARGET,
            event = EVENT_TRANSITION,
            turn_id = event.turn_id,
            from = event.from,
            to = event.to,
            payload = %payload
        ),
        Err(err) => warn!(
            target: TARGET,
            event = EVENT_TRANSITION,
            %err,
            "failed to encode turn transition event"
        ),
    }
}

/// Logs sizes only; the transcript itself stays out of the logs.
pub fn record_submit_trigger(message: &str, transcript: &str) {
    let event = SubmitTriggerEvent {
        message_chars: message.chars().count(),
        transcript_chars: transcript.chars().count(),
    };

    match serde_json::to_string(&event) {
        Ok(payload) => info!(
            target: TARGET,
            event = EVENT_SUBMIT,
            message_chars = event.message_chars,
            transcript_chars = event.transcript_chars,
            payload = %payload
        ),
        Err(err) => warn!(
            target: TARGET,
            event = EVENT_SUBMIT,
            %err,
            "failed to encode submit trigger event"
        ),
    }
}

pub fn record_crossfade(from: &str, to: &str, duration: Duration) {
    let event = CrossfadeEvent {
        from,
        to,
        duration_ms: duration_to_ms(duration),
    };

    match serde_json::to_string(&event) {
        Ok(payload) => info!(
            target: TARGET,
            event = EVENT_CROSSFADE,
            from = event.from,
            to = event.to,
            duration_ms = event.duration_ms,
            payload = %payload
        ),
        Err(err) => warn!(
            target: TARGET,
            event = EVENT_CROSSFADE,
            %err,
            "failed to encode crossfade event"
        ),
    }
}

pub fn record_turn_failure(turn_id: u64, class: ErrorClass, message: &str) {
    let event = TurnFailureEvent {
        turn_id,
        class: class.as_str(),
        message,
    };

    match serde_json::to_string(&event) {
        Ok(payload) => warn!(
            target: TARGET,
            event = EVENT_TURN_FAILURE,
            turn_id = event.turn_id,
            class = event.class,
            payload = %payload
        ),
        Err(err) => warn!(
            target: TARGET,
            event = EVENT_TURN_FAILURE,
            %err,
            "failed to encode turn failure event"
        ),
    }
}

fn duration_to_ms(duration: Duration) -> u64 {
    duration.as_millis().min(u64::MAX as u128) as u64
}
