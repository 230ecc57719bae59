use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// One recognizer result. Partials are provisional; finals are committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptSegment {
    pub text: String,
    pub timestamp_ms: i64,
    pub is_final: bool,
}

impl TranscriptSegment {
    pub fn partial(text: impl Into<String>, timestamp_ms: i64) -> Self {
        Self {
            text: text.into(),
            timestamp_ms,
            is_final: false,
        }
    }

    pub fn committed(text: impl Into<String>, timestamp_ms: i64) -> Self {
        Self {
            text: text.into(),
            timestamp_ms,
            is_final: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptSnapshot {
    pub committed: String,
    pub partial: String,
}

impl TranscriptSnapshot {
    /// Committed text followed by the live partial.
    pub fn full_text(&self) -> String {
        match (self.committed.trim(), self.partial.trim()) {
            ("", partial) => partial.to_string(),
            (committed, "") => committed.to_string(),
            (committed, partial) => format!("{committed} {partial}"),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.committed.trim().is_empty() && self.partial.trim().is_empty()
    }
}

#[derive(Debug, Default)]
pub(crate) struct TranscriptStore {
    committed: Vec<String>,
    seen: HashSet<(String, i64)>,
    partial: Option<(String, i64)>,
}

impl TranscriptStore {
    /// Returns true when the visible transcript changed.
    pub(crate) fn apply(&mut self, segment: TranscriptSegment) -> bool {
        let text = segment.text.trim();
        if !segment.is_final {
            let next = (!text.is_empty()).then(|| (text.to_string(), segment.timestamp_ms));
            if self.partial.as_ref().map(|(text, _)| text) == next.as_ref().map(|(text, _)| text) {
                return false;
            }
            self.partial = next;
            return true;
        }

        let had_partial = self.partial.take().is_some();
        if text.is_empty() {
            return had_partial;
        }
        if !self.seen.insert((normalize(text), segment.timestamp_ms)) {
            return had_partial;
        }
        self.committed.push(text.to_string());
        true
    }

    pub(crate) fn commit_partial(&mut self) -> bool {
        match self.partial.take() {
            Some((text, timestamp_ms)) => self.apply(TranscriptSegment::committed(text, timestamp_ms)),
            None => false,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.committed.clear();
        self.seen.clear();
        self.partial = None;
    }

    pub(crate) fn snapshot(&self) -> TranscriptSnapshot {
        TranscriptSnapshot {
            committed: self.committed.join(" "),
            partial: self
                .partial
                .as_ref()
                .map(|(text, _)| text.clone())
                .unwrap_or_default(),
        }
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}
