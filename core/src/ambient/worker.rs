use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::orchestrator::config::AmbientConfig;
use crate::orchestrator::traits::AmbientOutput;
use crate::telemetry::events::record_crossfade;
use crate::timing::sleep_until_opt;

use super::cue::{spawn_cue, CueShape};
use super::fade::Crossfade;
use super::playlist::Playlist;
use super::{ActiveTrack, MixerCommand, MixerStatus, Track, TARGET};

pub(super) struct MixerActor {
    output: Arc<dyn AmbientOutput>,
    config: AmbientConfig,
    playlist: Playlist,
    commands: mpsc::UnboundedReceiver<MixerCommand>,
    status_tx: watch::Sender<MixerStatus>,
    running: bool,
    last_list_change: Option<Instant>,
    restart_at: Option<Instant>,
    current: Option<ActiveTrack>,
    fade: Option<Crossfade>,
    volume: f32,
    ducked: bool,
    foreground: bool,
    cue_track: Option<Track>,
    cue_task: Option<JoinHandle<()>>,
    cue_done_tx: mpsc::UnboundedSender<()>,
    cue_done_rx: mpsc::UnboundedReceiver<()>,
}

impl MixerActor {
    pub(super) fn new(
        output: Arc<dyn AmbientOutput>,
        config: AmbientConfig,
        seed: Option<u64>,
        commands: mpsc::UnboundedReceiver<MixerCommand>,
        status_tx: watch::Sender<MixerStatus>,
    ) -> Self {
        let (cue_done_tx, cue_done_rx) = mpsc::unbounded_channel();
        Self {
            output,
            volume: config.volume,
            config,
            playlist: Playlist::new(seed),
            commands,
            status_tx,
            running: false,
            last_list_change: None,
            restart_at: None,
            current: None,
            fade: None,
            ducked: false,
            foreground: false,
            cue_track: None,
            cue_task: None,
            cue_done_tx,
            cue_done_rx,
        }
    }

    pub(super) fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        loop {
            let fade_tick = self.fade.as_ref().map(Crossfade::next_tick);
            let restart_at = self.restart_at;

            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                Some(()) = self.cue_done_rx.recv() => self.on_cue_finished(),
                _ = sleep_until_opt(fade_tick) => self.on_fade_tick(),
                _ = track_finished(&mut self.current) => self.on_track_finished(),
                _ = sleep_until_opt(restart_at) => self.on_restart_due(),
            }
            self.publish();
        }

        self.release_music();
        if let Some(cue) = self.cue_task.take() {
            cue.abort();
        }
        debug!(target: TARGET, "ambient mixer stopped");
    }

    fn handle(&mut self, command: MixerCommand) {
        match command {
            MixerCommand::Start => self.start(),
            MixerCommand::Stop => self.stop(),
            MixerCommand::SetTracks(tracks) => {
                self.playlist.set_tracks(tracks);
                self.on_list_changed();
            }
            MixerCommand::AddTrack(track) => {
                self.playlist.add(track);
                self.on_list_changed();
            }
            MixerCommand::RemoveTrack(id) => {
                if self.playlist.remove(&id) {
                    self.on_list_changed();
                }
            }
            MixerCommand::SetVolume(volume) => {
                self.volume = volume;
                self.apply_volume();
            }
            MixerCommand::SetCue(track) => self.cue_track = track,
            MixerCommand::ThinkingCue => self.play_cue(),
            MixerCommand::Foreground(active) => {
                if self.foreground != active {
                    self.foreground = active;
                    self.apply_volume();
                }
            }
        }
    }

    fn start(&mut self) {
        if self.running && (self.current.is_some() || self.fade.is_some()) {
            return;
        }
        self.running = true;

        let now = Instant::now();
        match self.last_list_change {
            Some(changed) if now < changed + self.config.restart_debounce => {
                self.restart_at = Some(changed + self.config.restart_debounce);
            }
            _ => {
                self.restart_at = None;
                self.play_next();
            }
        }
    }

    fn stop(&mut self) {
        self.running = false;
        self.restart_at = None;
        self.release_music();
        info!(target: TARGET, "ambient music stopped");
    }

    fn on_list_changed(&mut self) {
        let now = Instant::now();
        self.last_list_change = Some(now);
        if self.running && self.current.is_none() && self.fade.is_none() {
            self.restart_at = Some(now + self.config.restart_debounce);
        }
    }

    fn on_restart_due(&mut self) {
        self.restart_at = None;
        if self.running && self.current.is_none() && self.fade.is_none() {
            self.play_next();
        }
    }

    fn play_next(&mut self) {
        let Some(track) = self.playlist.next_track() else {
            debug!(target: TARGET, "no ambient tracks to play");
            return;
        };
        match self.output.open(&track, self.effective_volume()) {
            Ok(playing) => {
                info!(target: TARGET, track = %track.id, "ambient track started");
                self.current = Some(ActiveTrack::new(track, playing));
            }
            Err(err) => warn!(target: TARGET, track = %track.id, %err, "ambient track failed to open"),
        }
    }

    fn on_track_finished(&mut self) {
        let Some(outgoing) = self.current.take() else {
            return;
        };
        if !self.running {
            outgoing.control.stop();
            return;
        }
        let Some(track) = self.playlist.next_track() else {
            outgoing.control.stop();
            return;
        };

        match self.output.open(&track, 0.0) {
            Ok(playing) => {
                debug!(
                    target: TARGET,
                    from = %outgoing.track.id,
                    to = %track.id,
                    "crossfade started"
                );
                self.fade = Some(Crossfade::new(
                    outgoing,
                    ActiveTrack::new(track, playing),
                    self.effective_volume(),
                    self.config.crossfade,
                    self.config.fade_tick,
                    Instant::now(),
                ));
            }
            Err(err) => {
                warn!(target: TARGET, track = %track.id, %err, "next ambient track failed to open");
                outgoing.control.stop();
            }
        }
    }

    fn on_fade_tick(&mut self) {
        let Some(fade) = self.fade.as_mut() else {
            return;
        };
        if !fade.advance() {
            return;
        }
        let Some(fade) = self.fade.take() else {
            return;
        };
        let from = fade.outgoing.track.id.clone();
        let target = fade.target();
        let incoming = fade.complete();
        record_crossfade(&from, &incoming.track.id, self.config.crossfade);
        self.current = Some(incoming);

        // Volume or ducking may have changed mid-fade.
        if (self.effective_volume() - target).abs() > f32::EPSILON {
            self.apply_volume();
        }
    }

    fn play_cue(&mut self) {
        if self.cue_task.is_some() {
            debug!(target: TARGET, "thinking cue already playing");
            return;
        }
        let Some(track) = self.cue_track.clone() else {
            debug!(target: TARGET, "no thinking cue configured");
            return;
        };
        self.cue_task = Some(spawn_cue(
            Arc::clone(&self.output),
            track,
            CueShape::from(&self.config),
            self.cue_done_tx.clone(),
        ));
        self.ducked = true;
        self.apply_volume();
    }

    fn on_cue_finished(&mut self) {
        self.cue_task = None;
        self.ducked = false;
        self.apply_volume();
    }

    /// Deferred while a crossfade is running; the fade picks it up when it ends.
    fn apply_volume(&mut self) {
        if self.fade.is_some() {
            return;
        }
        if let Some(current) = self.current.as_ref() {
            current.control.set_volume(self.effective_volume());
        }
    }

    fn effective_volume(&self) -> f32 {
        if self.ducked || self.foreground {
            self.volume * self.config.duck_level
        } else {
            self.volume
        }
    }

    fn release_music(&mut self) {
        if let Some(fade) = self.fade.take() {
            fade.cancel();
        }
        if let Some(current) = self.current.take() {
            current.control.stop();
        }
    }

    fn publish(&self) {
        let (playing, incoming) = match (self.fade.as_ref(), self.current.as_ref()) {
            (Some(fade), _) => (
                Some(fade.outgoing.track.id.clone()),
                Some(fade.incoming.track.id.clone()),
            ),
            (None, Some(current)) => (Some(current.track.id.clone()), None),
            (None, None) => (None, None),
        };
        let status = MixerStatus {
            running: self.running,
            playing,
            incoming,
            fading: self.fade.is_some(),
            volume: self.volume,
            ducked: self.ducked || self.foreground,
            cue_active: self.cue_task.is_some(),
            track_count: self.playlist.len(),
        };
        self.status_tx.send_if_modified(|previous| {
            if *previous == status {
                return false;
            }
            *previous = status;
            true
        });
    }
}

/// Resolves when the current track ends on its own.
async fn track_finished(current: &mut Option<ActiveTrack>) {
    match current.as_mut() {
        Some(active) => {
            let _ = (&mut active.finished).await;
        }
        None => std::future::pending::<()>().await,
    }
}
