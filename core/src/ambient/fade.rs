use std::time::Duration;

use tokio::time::Instant;

use super::ActiveTrack;

/// Linear gain for `step` of `steps`, clamped to 0.0..=1.0.
pub(crate) fn ramp(step: u32, steps: u32) -> f32 {
    if steps == 0 {
        return 1.0;
    }
    (step as f32 / steps as f32).clamp(0.0, 1.0)
}

pub(crate) fn step_count(duration: Duration, tick: Duration) -> u32 {
    if tick.is_zero() {
        return 1;
    }
    let steps = duration.as_millis().div_ceil(tick.as_millis());
    steps.clamp(1, u32::MAX as u128) as u32
}

/// Outgoing and incoming music while they trade places.
pub(crate) struct Crossfade {
    pub(crate) outgoing: ActiveTrack,
    pub(crate) incoming: ActiveTrack,
    step: u32,
    steps: u32,
    target: f32,
    tick: Duration,
    next_tick: Instant,
}

impl Crossfade {
    pub(crate) fn new(
        outgoing: ActiveTrack,
        incoming: ActiveTrack,
        target: f32,
        duration: Duration,
        tick: Duration,
        now: Instant,
    ) -> Self {
        Self {
            outgoing,
            incoming,
            step: 0,
            steps: step_count(duration, tick),
            target,
            tick,
            next_tick: now + tick,
        }
    }

    pub(crate) fn next_tick(&self) -> Instant {
        self.next_tick
    }

    pub(crate) fn target(&self) -> f32 {
        self.target
    }

    /// Applies one tick. Returns true once the fade is complete.
    pub(crate) fn advance(&mut self) -> bool {
        self.step = self.step.saturating_add(1).min(self.steps);
        let gain = ramp(self.step, self.steps);
        self.incoming.control.set_volume(self.target * gain);
        self.outgoing.control.set_volume(self.target * (1.0 - gain));
        self.next_tick += self.tick;
        self.step >= self.steps
    }

    /// Tears down the outgoing track and hands back the incoming one.
    pub(crate) fn complete(self) -> ActiveTrack {
        self.outgoing.control.stop();
        self.incoming
    }

    pub(crate) fn cancel(self) {
        self.outgoing.control.stop();
        self.incoming.control.stop();
    }
}
