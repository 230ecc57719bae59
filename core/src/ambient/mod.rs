//! Background music and the thinking cue, on an output of their own.
//!
//! The mixer is an actor: every public call is a channel send, so turn logic
//! never waits on fades or track changes.

mod cue;
mod fade;
mod playlist;
mod worker;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::orchestrator::config::AmbientConfig;
use crate::orchestrator::traits::{AmbientOutput, PlayingTrack, TrackControl};

use self::worker::MixerActor;

pub(crate) const TARGET: &str = "ambient_mixer";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub name: String,
    /// Path or URL handed to the ambient output.
    pub source: String,
}

impl Track {
    pub fn new(id: impl Into<String>, name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            source: source.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MixerStatus {
    pub running: bool,
    pub playing: Option<String>,
    /// Track fading in while `fading` is set.
    pub incoming: Option<String>,
    pub fading: bool,
    pub volume: f32,
    pub ducked: bool,
    pub cue_active: bool,
    pub track_count: usize,
}

#[derive(Debug)]
pub(crate) enum MixerCommand {
    Start,
    Stop,
    SetTracks(Vec<Track>),
    AddTrack(Track),
    RemoveTrack(String),
    SetVolume(f32),
    SetCue(Option<Track>),
    ThinkingCue,
    Foreground(bool),
}

pub(crate) struct ActiveTrack {
    pub(crate) track: Track,
    pub(crate) control: Box<dyn TrackControl>,
    pub(crate) finished: tokio::sync::oneshot::Receiver<()>,
}

impl ActiveTrack {
    pub(crate) fn new(track: Track, playing: PlayingTrack) -> Self {
        Self {
            track,
            control: playing.control,
            finished: playing.finished,
        }
    }
}

pub struct AmbientMixer {
    commands: mpsc::UnboundedSender<MixerCommand>,
    status: watch::Receiver<MixerStatus>,
}

impl AmbientMixer {
    pub fn spawn(output: Arc<dyn AmbientOutput>, config: AmbientConfig) -> Self {
        Self::spawn_seeded(output, config, None)
    }

    /// Same as [`spawn`](Self::spawn) with a fixed shuffle seed.
    pub fn spawn_seeded(
        output: Arc<dyn AmbientOutput>,
        config: AmbientConfig,
        seed: Option<u64>,
    ) -> Self {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(MixerStatus {
            volume: config.volume,
            ..MixerStatus::default()
        });
        MixerActor::new(output, config, seed, commands_rx, status_tx).spawn();
        Self { commands, status }
    }

    pub fn start(&self) {
        self.send(MixerCommand::Start);
    }

    pub fn stop(&self) {
        self.send(MixerCommand::Stop);
    }

    pub fn set_tracks(&self, tracks: Vec<Track>) {
        self.send(MixerCommand::SetTracks(tracks));
    }

    pub fn add_track(&self, track: Track) {
        self.send(MixerCommand::AddTrack(track));
    }

    pub fn remove_track(&self, id: impl Into<String>) {
        self.send(MixerCommand::RemoveTrack(id.into()));
    }

    pub fn set_volume(&self, volume: f32) {
        self.send(MixerCommand::SetVolume(volume.clamp(0.0, 1.0)));
    }

    pub fn set_cue(&self, cue: Option<Track>) {
        self.send(MixerCommand::SetCue(cue));
    }

    /// Plays the short thinking cue with the music ducked. Never waits.
    pub fn play_thinking_cue(&self) {
        self.send(MixerCommand::ThinkingCue);
    }

    /// Ducks the music while an utterance is audible and restores it after.
    pub fn set_foreground(&self, active: bool) {
        self.send(MixerCommand::Foreground(active));
    }

    pub fn status(&self) -> MixerStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<MixerStatus> {
        self.status.clone()
    }

    fn send(&self, command: MixerCommand) {
        if self.commands.send(command).is_err() {
            debug!(target: TARGET, "ambient mixer has shut down");
        }
    }
}
