use std::time::Duration;

use crate::orchestrator::config::SpeechQueueConfig;

use super::utterance::UtteranceKind;

/// Pause used in place of audio: proportional to the text, clamped per kind.
pub fn text_only_duration(text: &str, kind: UtteranceKind, config: &SpeechQueueConfig) -> Duration {
    let cap = match kind {
        UtteranceKind::Thought => config.thought_text_only_cap,
        UtteranceKind::Response => config.response_text_only_cap,
    };
    let chars = text.trim().chars().count() as u64;
    let proportional = Duration::from_millis(chars.saturating_mul(config.text_only_ms_per_char));
    proportional.max(config.text_only_min).min(cap)
}
