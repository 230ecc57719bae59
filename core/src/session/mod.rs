//! Caller-facing facade over one voice conversation.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ambient::AmbientMixer;
use crate::error::VoiceResult;
use crate::orchestrator::config::VoiceConfig;
use crate::orchestrator::controller::{SessionContext, TurnController, TurnDeps};
use crate::orchestrator::traits::{AmbientOutput, ResponseGenerator, TranscriptionBackend};
use crate::orchestrator::types::{DialogEntry, SessionEvent, TurnPhase};
use crate::persistence::{DialogStore, PersistenceHandle};
use crate::speech::{SpeechBackend, SpeechQueue};
use crate::transcription::{Credentials, TranscriptSnapshot, TranscriptionSession};

const TARGET: &str = "voice_session";
const PERSISTENCE_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// External collaborators a session is built from.
pub struct SessionComponents {
    pub generator: Arc<dyn ResponseGenerator>,
    /// `None` plays every utterance as timed text.
    pub speech: Option<SpeechBackend>,
    pub transcription: Arc<dyn TranscriptionBackend>,
    pub credentials: Option<Credentials>,
    pub ambient: Option<Arc<dyn AmbientOutput>>,
    pub store: Option<Arc<dyn DialogStore>>,
}

pub struct VoiceSession {
    controller: TurnController,
    persistence: Option<PersistenceHandle>,
    persist_task: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl VoiceSession {
    /// Wires the components together. Must be called inside a tokio runtime.
    pub fn new(
        session_id: impl Into<String>,
        config: VoiceConfig,
        components: SessionComponents,
    ) -> VoiceResult<Self> {
        config.validate()?;
        let SessionComponents {
            generator,
            speech,
            transcription,
            credentials,
            ambient,
            store,
        } = components;

        let (queue, speech_events) = SpeechQueue::spawn(config.speech.clone(), speech);
        let mixer = ambient.map(|output| Arc::new(AmbientMixer::spawn(output, config.ambient.clone())));
        let transcription = TranscriptionSession::new(transcription, credentials);
        let context = SessionContext::new(session_id, config);
        let shutdown = CancellationToken::new();

        tokio::spawn(forward_transcript(
            context.clone(),
            transcription.subscribe(),
            shutdown.clone(),
        ));

        let (persistence, persist_task, dialog_log) = match store {
            Some(store) => {
                let (handle, _actor) = PersistenceHandle::spawn(store);
                let (log_tx, log_rx) = mpsc::unbounded_channel();
                let task = tokio::spawn(persist_dialog(
                    context.session_id().to_string(),
                    log_rx,
                    handle.clone(),
                ));
                (Some(handle), Some(task), Some(log_tx))
            }
            None => (None, None, None),
        };

        let controller = TurnController::new(
            context,
            TurnDeps {
                generator,
                queue,
                speech_events,
                transcription,
                mixer,
                dialog_log,
            },
        );

        Ok(Self {
            controller,
            persistence,
            persist_task: Mutex::new(persist_task),
            shutdown,
        })
    }

    pub fn session_id(&self) -> &str {
        self.controller.session_id()
    }

    pub fn controller(&self) -> &TurnController {
        &self.controller
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.controller.context().subscribe()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<TurnPhase> {
        self.controller.subscribe_phase()
    }

    pub async fn start_session(&self) -> VoiceResult<()> {
        if let Some(mixer) = self.controller.mixer() {
            mixer.start();
        }
        self.controller.start_session().await
    }

    /// Typed equivalent of a spoken submit.
    pub async fn submit_user_text(&self, text: &str) -> VoiceResult<u64> {
        self.controller.begin_ai_turn(text).await
    }

    pub fn skip_current_utterance(&self) -> bool {
        self.controller.skip_current_utterance()
    }

    pub async fn skip_to_end_of_ai_turn(&self) -> bool {
        self.controller.skip_to_end_of_ai_turn().await
    }

    /// Stops every component and waits until recorded dialog reached the store.
    pub async fn end_session(&self) {
        self.controller.end_session().await;
        self.shutdown.cancel();

        if let Some(task) = self.persist_task.lock().await.take() {
            if timeout(PERSISTENCE_DRAIN_TIMEOUT, task).await.is_err() {
                warn!(target: TARGET, session = %self.session_id(), "dialog forwarder did not drain");
            }
        }
        if let Some(persistence) = self.persistence.as_ref() {
            if let Err(err) = persistence.flush().await {
                warn!(target: TARGET, %err, "failed to flush dialog store");
            }
        }
        info!(target: TARGET, session = %self.session_id(), "voice session closed");
    }

    pub fn phase(&self) -> TurnPhase {
        self.controller.phase()
    }

    pub async fn wait_for_phase(&self, target: TurnPhase) -> VoiceResult<()> {
        self.controller.wait_for_phase(target).await
    }

    pub fn transcript(&self) -> TranscriptSnapshot {
        self.controller.transcript()
    }

    pub fn history(&self) -> Vec<DialogEntry> {
        self.controller.history()
    }

    pub fn mixer(&self) -> Option<&Arc<AmbientMixer>> {
        self.controller.mixer()
    }
}

impl Drop for VoiceSession {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn forward_transcript(
    context: SessionContext,
    mut transcript: watch::Receiver<TranscriptSnapshot>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            changed = transcript.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = transcript.borrow_and_update().clone();
                context.emit(SessionEvent::Transcript(snapshot));
            }
        }
    }
    debug!(target: TARGET, "transcript forwarder stopped");
}

/// Sends every finalized dialog entry to the store, in recording order,
/// until the controller closes the log.
async fn persist_dialog(
    session_id: String,
    mut entries: mpsc::UnboundedReceiver<DialogEntry>,
    persistence: PersistenceHandle,
) {
    let mut stored = 0usize;
    while let Some(entry) = entries.recv().await {
        if let Err(err) = persistence.append(&session_id, entry).await {
            warn!(target: TARGET, %err, "dialog entry dropped");
            break;
        }
        stored += 1;
    }
    debug!(target: TARGET, session = %session_id, stored, "dialog forwarder stopped");
}
