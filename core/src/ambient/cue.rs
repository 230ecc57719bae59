use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::orchestrator::config::AmbientConfig;
use crate::orchestrator::traits::{AmbientOutput, TrackControl};

use super::fade::{ramp, step_count};
use super::{Track, TARGET};

#[derive(Debug, Clone, Copy)]
pub(crate) struct CueShape {
    pub(crate) volume: f32,
    pub(crate) duration: Duration,
    pub(crate) fade: Duration,
    pub(crate) tick: Duration,
}

impl From<&AmbientConfig> for CueShape {
    fn from(config: &AmbientConfig) -> Self {
        Self {
            volume: config.cue_volume,
            duration: config.cue_duration,
            fade: config.cue_fade.min(config.cue_duration / 2),
            tick: config.fade_tick,
        }
    }
}

/// Plays the thinking cue on its own task and reports back on `done`.
pub(crate) fn spawn_cue(
    output: Arc<dyn AmbientOutput>,
    track: Track,
    shape: CueShape,
    done: mpsc::UnboundedSender<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match output.open(&track, 0.0) {
            Ok(playing) => {
                let control = playing.control;
                play_shaped(control.as_ref(), shape).await;
                control.stop();
                debug!(target: TARGET, track = %track.id, "thinking cue finished");
            }
            Err(err) => warn!(target: TARGET, %err, "thinking cue failed to open"),
        }
        let _ = done.send(());
    })
}

async fn play_shaped(control: &dyn TrackControl, shape: CueShape) {
    let steps = step_count(shape.fade, shape.tick);
    let step_len = shape.fade / steps;

    for step in 1..=steps {
        control.set_volume(shape.volume * ramp(step, steps));
        sleep(step_len).await;
    }
    sleep(shape.duration.saturating_sub(shape.fade * 2)).await;
    for step in (0..steps).rev() {
        control.set_volume(shape.volume * ramp(step, steps));
        sleep(step_len).await;
    }
}
