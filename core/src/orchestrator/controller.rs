//! Conversation state machine: who owns the floor, and what happens when it changes.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::{broadcast, mpsc, watch};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ambient::AmbientMixer;
use crate::error::{ErrorClass, VoiceError, VoiceResult};
use crate::orchestrator::config::VoiceConfig;
use crate::orchestrator::constants::{EVENT_CHANNEL_CAPACITY, QUEUE_SETTLE_TIMEOUT};
use crate::orchestrator::skip::SkipController;
use crate::orchestrator::traits::ResponseGenerator;
use crate::orchestrator::types::{
    AgentThought, DialogEntry, DialogKind, SessionEvent, SessionNotice, SpeakerRole, TurnPhase,
    TurnResponse,
};
use crate::speech::{EndReason, SpeechEvent, SpeechQueue, Utterance, UtteranceTicket};
use crate::submit::{watch_transcript, SubmitDetector, SubmitTrigger};
use crate::telemetry::events::{record_turn_failure, record_turn_transition};
use crate::transcription::{TranscriptSnapshot, TranscriptionSession};

const TARGET: &str = "turn_controller";

/// Per-session values shared by every component of one conversation.
#[derive(Clone)]
pub struct SessionContext {
    session_id: String,
    config: Arc<VoiceConfig>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>, config: VoiceConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            session_id: session_id.into(),
            config: Arc::new(config),
            events,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn config(&self) -> &VoiceConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

/// Collaborators driven by the controller.
pub struct TurnDeps {
    pub generator: Arc<dyn ResponseGenerator>,
    pub queue: SpeechQueue,
    pub speech_events: mpsc::UnboundedReceiver<SpeechEvent>,
    pub transcription: TranscriptionSession,
    pub mixer: Option<Arc<AmbientMixer>>,
    /// Receives every finalized dialog entry in recording order. Closed by
    /// `end_session`.
    pub dialog_log: Option<mpsc::UnboundedSender<DialogEntry>>,
}

/// Cheap to clone. Spawns its background tasks on creation, so it must be
/// built inside a tokio runtime.
#[derive(Clone)]
pub struct TurnController {
    inner: Arc<Inner>,
}

struct Inner {
    context: SessionContext,
    generator: Arc<dyn ResponseGenerator>,
    queue: Arc<SpeechQueue>,
    skip: SkipController,
    transcription: TranscriptionSession,
    mixer: Option<Arc<AmbientMixer>>,
    state: Mutex<ControllerState>,
    phase_tx: watch::Sender<TurnPhase>,
    submit_tx: mpsc::UnboundedSender<(u64, SubmitTrigger)>,
    shutdown: CancellationToken,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

struct ControllerState {
    phase: TurnPhase,
    started: bool,
    turn_id: u64,
    active: Option<AiTurn>,
    user_epoch: u64,
    watcher: Option<CancellationToken>,
    history: Vec<DialogEntry>,
    dialog_log: Option<mpsc::UnboundedSender<DialogEntry>>,
}

struct AiTurn {
    id: u64,
    plan: Vec<PlannedLine>,
    finished: bool,
    token: CancellationToken,
}

struct PlannedLine {
    kind: DialogKind,
    speaker: SpeakerRole,
    text: String,
}

impl TurnController {
    pub fn new(context: SessionContext, deps: TurnDeps) -> Self {
        let TurnDeps {
            generator,
            queue,
            speech_events,
            transcription,
            mixer,
            dialog_log,
        } = deps;
        let queue = Arc::new(queue);
        let (phase_tx, _) = watch::channel(TurnPhase::AiThinking);
        let (submit_tx, submit_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let speech_mixer = mixer.clone();

        let inner = Arc::new(Inner {
            skip: SkipController::new(Arc::clone(&queue)),
            context: context.clone(),
            generator,
            queue,
            transcription,
            mixer,
            state: Mutex::new(ControllerState {
                phase: TurnPhase::AiThinking,
                started: false,
                turn_id: 0,
                active: None,
                user_epoch: 0,
                watcher: None,
                history: Vec::new(),
                dialog_log,
            }),
            phase_tx,
            submit_tx,
            shutdown: shutdown.clone(),
        });

        tokio::spawn(forward_speech_events(
            context,
            speech_events,
            speech_mixer,
            shutdown.clone(),
        ));
        tokio::spawn(run_submit_loop(
            Arc::downgrade(&inner),
            submit_rx,
            shutdown,
        ));

        Self { inner }
    }

    pub fn session_id(&self) -> &str {
        self.inner.context.session_id()
    }

    pub fn context(&self) -> &SessionContext {
        &self.inner.context
    }

    pub fn phase(&self) -> TurnPhase {
        *self.inner.phase_tx.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<TurnPhase> {
        self.inner.phase_tx.subscribe()
    }

    /// Resolves once `target` is reached; fails if the session ends first.
    pub async fn wait_for_phase(&self, target: TurnPhase) -> VoiceResult<()> {
        let mut phase_rx = self.inner.phase_tx.subscribe();
        let reached = phase_rx
            .wait_for(|phase| *phase == target || *phase == TurnPhase::Ended)
            .await
            .map(|phase| *phase);
        match reached {
            Ok(phase) if phase == target => Ok(()),
            _ => Err(VoiceError::SessionEnded),
        }
    }

    pub fn history(&self) -> Vec<DialogEntry> {
        self.lock().history.clone()
    }

    pub fn transcript(&self) -> TranscriptSnapshot {
        self.inner.transcription.snapshot()
    }

    pub fn transcription(&self) -> &TranscriptionSession {
        &self.inner.transcription
    }

    pub fn mixer(&self) -> Option<&Arc<AmbientMixer>> {
        self.inner.mixer.as_ref()
    }

    pub fn queue(&self) -> &SpeechQueue {
        &self.inner.queue
    }

    /// Opens the conversation with the Governor's greeting, if any, then
    /// hands the floor to the user.
    pub async fn start_session(&self) -> VoiceResult<()> {
        let turn_id = {
            let mut state = self.lock();
            if state.phase == TurnPhase::Ended {
                return Err(VoiceError::SessionEnded);
            }
            if state.started {
                return Err(VoiceError::AlreadyStarted);
            }
            state.started = true;
            self.inner.skip.reset();
            self.open_turn(&mut state)
        };
        info!(target: TARGET, session = %self.session_id(), "session started");

        let greeting = tokio::select! {
            biased;
            _ = self.inner.shutdown.cancelled() => return Err(VoiceError::SessionEnded),
            greeting = self.inner.generator.opening_greeting(self.session_id()) => greeting,
        };

        match greeting {
            Ok(Some(text)) if !text.trim().is_empty() => {
                self.spawn_driver(
                    turn_id,
                    TurnResponse {
                        thoughts: Vec::new(),
                        final_response: text,
                    },
                );
            }
            Ok(_) => {
                self.end_ai_turn(turn_id).await;
            }
            Err(err) => {
                warn!(target: TARGET, %err, "opening greeting failed");
                self.emit(SessionEvent::Notice(SessionNotice::warn(
                    "The opening greeting could not be prepared.",
                )));
                self.end_ai_turn(turn_id).await;
            }
        }
        Ok(())
    }

    /// Hands the floor to the AI with the user's message. Returns the turn id
    /// once the response has been generated; playback continues in the
    /// background.
    pub async fn begin_ai_turn(&self, user_text: &str) -> VoiceResult<u64> {
        let text = user_text.trim();
        let turn_id = {
            let mut state = self.lock();
            match state.phase {
                TurnPhase::UserListening => {}
                TurnPhase::Ended => return Err(VoiceError::SessionEnded),
                other => return Err(VoiceError::invalid_phase(TurnPhase::UserListening, other)),
            }
            if text.is_empty() {
                return Err(VoiceError::EmptyInput);
            }
            if let Some(watcher) = state.watcher.take() {
                watcher.cancel();
            }
            // Cleared before the phase flips so a skip issued from here on sticks.
            self.inner.skip.reset();
            let turn_id = self.open_turn(&mut state);
            self.record(&mut state, DialogEntry::user(turn_id, text));
            turn_id
        };

        self.inner.transcription.stop().await;
        info!(target: TARGET, turn_id, chars = text.chars().count(), "ai turn started");

        let generated = tokio::select! {
            biased;
            _ = self.inner.shutdown.cancelled() => return Err(VoiceError::SessionEnded),
            generated = self
                .inner
                .generator
                .generate_turn_response(self.session_id(), text) => generated,
        };

        match generated {
            Ok(response) => {
                self.spawn_driver(turn_id, response);
                Ok(turn_id)
            }
            Err(err) => {
                let error = VoiceError::ResponseGeneration(format!("{err:#}"));
                warn!(target: TARGET, turn_id, error = %error, "response generation failed");
                record_turn_failure(turn_id, error.class(), &error.to_string());
                self.emit(SessionEvent::Notice(SessionNotice::error(
                    "The response could not be generated. Please try again.",
                )));
                self.end_ai_turn(turn_id).await;
                Err(error)
            }
        }
    }

    /// Finishes an AI turn: settles the speech queue, records the turn's
    /// dialog and gives the floor back to the user. Only the first call for
    /// a turn does anything; returns whether this call was it.
    pub async fn end_ai_turn(&self, turn_id: u64) -> bool {
        let plan = {
            let mut state = self.lock();
            let Some(turn) = state.active.as_mut().filter(|turn| turn.id == turn_id) else {
                return false;
            };
            if turn.finished {
                return false;
            }
            turn.finished = true;
            turn.token.cancel();
            std::mem::take(&mut turn.plan)
        };

        if time::timeout(QUEUE_SETTLE_TIMEOUT, self.inner.queue.clear())
            .await
            .is_err()
        {
            warn!(target: TARGET, turn_id, "speech queue did not settle");
        }

        {
            let mut state = self.lock();
            for line in plan {
                let entry = DialogEntry::new(line.kind, line.speaker, line.text, turn_id);
                self.record(&mut state, entry);
            }
        }

        self.inner.skip.reset();
        info!(target: TARGET, turn_id, "ai turn finished");
        self.enter_user_turn(turn_id).await;
        true
    }

    /// Cuts the utterance that is playing. Only meaningful during an AI turn.
    pub fn skip_current_utterance(&self) -> bool {
        if !self.phase().is_ai() {
            return false;
        }
        self.inner.skip.skip_current()
    }

    /// Skips the rest of the AI turn. While the Governor is answering this
    /// completes the turn at once; earlier it drains what is queued.
    pub async fn skip_to_end_of_ai_turn(&self) -> bool {
        let (phase, turn_id) = {
            let state = self.lock();
            let live = state.active.as_ref().filter(|turn| !turn.finished);
            (state.phase, live.map(|turn| turn.id))
        };
        match (phase, turn_id) {
            (TurnPhase::AiSpeakingResponse, Some(turn_id)) => {
                self.inner.skip.skip_to_end();
                info!(target: TARGET, turn_id, "governor response skipped");
                self.end_ai_turn(turn_id).await
            }
            (TurnPhase::AiThinking | TurnPhase::AiSpeakingThoughts, Some(_)) => {
                self.inner.skip.skip_to_end();
                true
            }
            _ => false,
        }
    }

    /// Tears the session down. Idempotent.
    pub async fn end_session(&self) {
        {
            let mut state = self.lock();
            if state.phase == TurnPhase::Ended {
                return;
            }
            if let Some(watcher) = state.watcher.take() {
                watcher.cancel();
            }
            if let Some(turn) = state.active.as_mut() {
                turn.finished = true;
                turn.token.cancel();
            }
            let turn_id = state.turn_id;
            self.set_phase(&mut state, turn_id, TurnPhase::Ended);
            state.dialog_log = None;
        }

        self.inner.shutdown.cancel();
        if time::timeout(QUEUE_SETTLE_TIMEOUT, self.inner.queue.clear())
            .await
            .is_err()
        {
            warn!(target: TARGET, "speech queue did not settle at shutdown");
        }
        self.inner.transcription.stop().await;
        if let Some(mixer) = self.inner.mixer.as_ref() {
            mixer.stop();
        }
        info!(target: TARGET, session = %self.session_id(), "session ended");
    }

    fn spawn_driver(&self, turn_id: u64, response: TurnResponse) {
        let controller = self.clone();
        tokio::spawn(async move { controller.drive_ai_turn(turn_id, response).await });
    }

    async fn drive_ai_turn(&self, turn_id: u64, response: TurnResponse) {
        let thoughts: Vec<AgentThought> = response
            .thoughts
            .into_iter()
            .filter(|thought| thought.speaker.is_agent() && !thought.text.trim().is_empty())
            .collect();
        let final_response = response.final_response.trim().to_string();

        {
            let mut state = self.lock();
            let Some(turn) = live_turn(&mut state, turn_id) else {
                return;
            };
            turn.plan = thoughts
                .iter()
                .map(|thought| PlannedLine {
                    kind: DialogKind::Thought,
                    speaker: thought.speaker,
                    text: thought.text.trim().to_string(),
                })
                .collect();
            if !final_response.is_empty() {
                turn.plan.push(PlannedLine {
                    kind: DialogKind::Response,
                    speaker: SpeakerRole::Governor,
                    text: final_response.clone(),
                });
            }
        }

        if self.inner.skip.skip_to_end_requested() {
            info!(target: TARGET, turn_id, "skip requested while thinking, nothing will be spoken");
            self.end_ai_turn(turn_id).await;
            return;
        }

        if !thoughts.is_empty() {
            if !self.transition(turn_id, TurnPhase::AiSpeakingThoughts) {
                return;
            }
            if !self.speak_thoughts(turn_id, &thoughts).await {
                return;
            }
            // A skip during the thoughts never swallows the answer.
            self.inner.skip.reset();
        }

        if !final_response.is_empty() {
            if !self.transition(turn_id, TurnPhase::AiSpeakingResponse) {
                return;
            }
            let config = self.inner.context.config();
            let voice = config.voices.governor.clone();
            let utterance = Utterance::response(SpeakerRole::Governor, final_response, voice)
                .with_timeout(config.turn.response_timeout);
            let Some(ticket) = self.enqueue_for_turn(turn_id, utterance) else {
                return;
            };
            let reason = self.await_ticket(turn_id, ticket).await;
            debug!(target: TARGET, turn_id, reason = reason.as_str(), "governor response ended");
        }

        self.end_ai_turn(turn_id).await;
    }

    /// Plays the thoughts one after another. Returns false when the turn
    /// was finished elsewhere.
    async fn speak_thoughts(&self, turn_id: u64, thoughts: &[AgentThought]) -> bool {
        let config = self.inner.context.config();
        for (index, thought) in thoughts.iter().enumerate() {
            if self.inner.skip.skip_to_end_requested() {
                debug!(target: TARGET, turn_id, remaining = thoughts.len() - index, "thoughts skipped");
                break;
            }
            if index > 0 {
                if let Some(mixer) = self.inner.mixer.as_ref() {
                    mixer.play_thinking_cue();
                }
            }

            let voice = config
                .voices
                .voice_for(thought.speaker)
                .unwrap_or(&config.voices.governor)
                .clone();
            let utterance = Utterance::thought(thought.speaker, thought.text.trim(), voice)
                .with_timeout(config.turn.thought_timeout);
            let Some(ticket) = self.enqueue_for_turn(turn_id, utterance) else {
                return false;
            };
            self.await_ticket(turn_id, ticket).await;
            if self.turn_finished(turn_id) {
                return false;
            }
        }

        let settle = config.turn.watchdog_grace.max(QUEUE_SETTLE_TIMEOUT);
        if time::timeout(settle, self.inner.queue.wait_idle()).await.is_err() {
            warn!(target: TARGET, turn_id, "speech queue still busy after thoughts, aborting");
            self.inner.queue.abort();
        }
        !self.turn_finished(turn_id)
    }

    /// Waits for an utterance, bounded by its own timeout plus the watchdog grace.
    async fn await_ticket(&self, turn_id: u64, ticket: UtteranceTicket) -> EndReason {
        let token = {
            let state = self.lock();
            match state.active.as_ref() {
                Some(turn) if turn.id == turn_id => turn.token.clone(),
                _ => return EndReason::Cleared,
            }
        };
        let config = self.inner.context.config();
        let limit = config.turn.response_timeout.max(config.turn.thought_timeout)
            + config.turn.watchdog_grace;
        let id = ticket.id();

        tokio::select! {
            biased;
            _ = token.cancelled() => EndReason::Cleared,
            outcome = time::timeout(limit, ticket.wait()) => match outcome {
                Ok(reason) => reason,
                Err(_) => {
                    warn!(target: TARGET, turn_id, utterance = id, "speech worker stalled, aborting queue");
                    self.inner.queue.abort();
                    EndReason::TimedOut
                }
            },
        }
    }

    fn enqueue_for_turn(&self, turn_id: u64, utterance: Utterance) -> Option<UtteranceTicket> {
        let mut state = self.lock();
        live_turn(&mut state, turn_id)?;
        Some(self.inner.queue.enqueue(utterance))
    }

    fn turn_finished(&self, turn_id: u64) -> bool {
        let mut state = self.lock();
        live_turn(&mut state, turn_id).is_none()
    }

    fn transition(&self, turn_id: u64, to: TurnPhase) -> bool {
        let mut state = self.lock();
        if live_turn(&mut state, turn_id).is_none() {
            return false;
        }
        self.set_phase(&mut state, turn_id, to);
        true
    }

    async fn enter_user_turn(&self, turn_id: u64) {
        let (epoch, watcher) = {
            let mut state = self.lock();
            if state.phase == TurnPhase::Ended {
                return;
            }
            state.user_epoch = state.user_epoch.wrapping_add(1);
            let watcher = self.inner.shutdown.child_token();
            if let Some(previous) = state.watcher.replace(watcher.clone()) {
                previous.cancel();
            }
            self.set_phase(&mut state, turn_id, TurnPhase::UserListening);
            (state.user_epoch, watcher)
        };

        self.inner.transcription.reset();
        match self.inner.transcription.start().await {
            Ok(()) => {
                let current = {
                    let state = self.lock();
                    state.phase == TurnPhase::UserListening && state.user_epoch == epoch
                };
                if !current {
                    debug!(target: TARGET, epoch, "user turn ended before the microphone opened");
                    self.inner.transcription.stop().await;
                    return;
                }
            }
            Err(err) => {
                warn!(target: TARGET, %err, "transcription failed to start");
                let message = match err.class() {
                    ErrorClass::Protocol => {
                        "Speech recognition is not configured; type your message instead."
                    }
                    _ => "Speech recognition is unavailable right now.",
                };
                self.emit(SessionEvent::Notice(SessionNotice::warn(message)));
            }
        }

        let transcript = self.inner.transcription.subscribe();
        let debounce = self.inner.context.config().submit.debounce;
        let submit_tx = self.inner.submit_tx.clone();
        tokio::spawn(async move {
            let mut detector = SubmitDetector::new(debounce);
            if let Some(trigger) = watch_transcript(&mut detector, transcript, watcher).await {
                let _ = submit_tx.send((epoch, trigger));
            }
        });
    }

    fn open_turn(&self, state: &mut ControllerState) -> u64 {
        state.turn_id = state.turn_id.wrapping_add(1);
        let turn_id = state.turn_id;
        state.active = Some(AiTurn {
            id: turn_id,
            plan: Vec::new(),
            finished: false,
            token: self.inner.shutdown.child_token(),
        });
        self.set_phase(state, turn_id, TurnPhase::AiThinking);
        turn_id
    }

    fn set_phase(&self, state: &mut ControllerState, turn_id: u64, to: TurnPhase) {
        let from = state.phase;
        state.phase = to;
        self.inner.phase_tx.send_replace(to);
        if from != to {
            record_turn_transition(turn_id, from, to);
            self.emit(SessionEvent::PhaseChanged { turn_id, from, to });
        }
    }

    fn record(&self, state: &mut ControllerState, entry: DialogEntry) {
        if let Some(log) = state.dialog_log.as_ref() {
            if log.send(entry.clone()).is_err() {
                debug!(target: TARGET, "dialog log closed");
                state.dialog_log = None;
            }
        }
        state.history.push(entry.clone());
        self.emit(SessionEvent::Dialog(entry));
    }

    fn emit(&self, event: SessionEvent) {
        self.inner.context.emit(event);
    }

    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn listening_epoch(&self) -> (TurnPhase, u64) {
        let state = self.lock();
        (state.phase, state.user_epoch)
    }
}

fn live_turn(state: &mut ControllerState, turn_id: u64) -> Option<&mut AiTurn> {
    state
        .active
        .as_mut()
        .filter(|turn| turn.id == turn_id && !turn.finished)
}

/// Republishes queue lifecycle events and turns synthesis failures into notices.
async fn forward_speech_events(
    context: SessionContext,
    mut events: mpsc::UnboundedReceiver<SpeechEvent>,
    mixer: Option<Arc<AmbientMixer>>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
            _ = shutdown.cancelled() => break,
        };
        if let Some(mixer) = mixer.as_ref() {
            mixer.set_foreground(matches!(event, SpeechEvent::Started { .. }));
        }
        if let SpeechEvent::Failed { error, .. } = &event {
            let notice = match error.class() {
                ErrorClass::Protocol => SessionNotice::error(format!(
                    "Speech synthesis rejected our credentials: {error}"
                )),
                _ => SessionNotice::warn(format!("Showing text instead of audio: {error}")),
            };
            context.emit(SessionEvent::Notice(notice));
        }
        context.emit(SessionEvent::Speech(event));
    }
}

/// Starts the AI turn for each confirmed submit command that belongs to the
/// user turn still in progress.
async fn run_submit_loop(
    controller: Weak<Inner>,
    mut triggers: mpsc::UnboundedReceiver<(u64, SubmitTrigger)>,
    shutdown: CancellationToken,
) {
    loop {
        let (epoch, trigger) = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = triggers.recv() => match next {
                Some(next) => next,
                None => break,
            },
        };
        let Some(inner) = controller.upgrade() else {
            break;
        };
        let controller_handle = TurnController { inner };
        let (phase, current_epoch) = controller_handle.listening_epoch();
        if phase != TurnPhase::UserListening || current_epoch != epoch {
            debug!(target: TARGET, epoch, "stale submit trigger ignored");
            continue;
        }
        if let Err(err) = controller_handle.begin_ai_turn(&trigger.text).await {
            match err.class() {
                ErrorClass::Usage | ErrorClass::Cancellation => {
                    debug!(target: TARGET, %err, "submit trigger not applied")
                }
                _ => warn!(target: TARGET, %err, "voice submit failed"),
            }
        }
    }
}
