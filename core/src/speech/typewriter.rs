//! Progressive text reveal for utterances shown while (or instead of) playing.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct TypewriterReveal<'a> {
    text: &'a str,
    ends: Vec<usize>,
}

impl<'a> TypewriterReveal<'a> {
    pub fn new(text: &'a str) -> Self {
        let ends = text
            .char_indices()
            .map(|(index, ch)| index + ch.len_utf8())
            .collect();
        Self { text, ends }
    }

    pub fn char_count(&self) -> usize {
        self.ends.len()
    }

    /// Prefix visible at `progress` (0.0 = nothing, 1.0 = everything).
    pub fn prefix_at(&self, progress: f32) -> &'a str {
        let progress = if progress.is_nan() {
            0.0
        } else {
            progress.clamp(0.0, 1.0)
        };
        let visible = (progress * self.ends.len() as f32).round() as usize;
        match visible {
            0 => "",
            n => &self.text[..self.ends[n.min(self.ends.len()) - 1]],
        }
    }

    /// `steps` evenly spaced prefixes ending with the full text. Each call
    /// starts a fresh sequence.
    pub fn frames(&self, steps: usize) -> impl Iterator<Item = &'a str> + '_ {
        let steps = steps.max(1);
        (1..=steps).map(move |step| self.prefix_at(step as f32 / steps as f32))
    }
}

/// Playback progress used to drive the reveal.
pub fn playback_progress(elapsed: Duration, expected: Duration) -> f32 {
    if expected.is_zero() {
        return 1.0;
    }
    (elapsed.as_secs_f32() / expected.as_secs_f32()).min(1.0)
}
