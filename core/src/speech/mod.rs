//! Strictly serial, cancelable playback of synthesized utterances.

mod fallback;
mod typewriter;
mod utterance;
mod worker;

pub use fallback::text_only_duration;
pub use typewriter::{playback_progress, TypewriterReveal};
pub use utterance::{
    EndReason, SpeechEvent, Utterance, UtteranceId, UtteranceKind, UtteranceTicket, VoiceRef,
};
pub use worker::SpeechBackend;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{mpsc, oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::SynthesisError;
use crate::orchestrator::config::SpeechQueueConfig;
use crate::orchestrator::types::SpeakerRole;

use self::worker::SpeechWorker;

const TARGET: &str = "speech_queue";

/// Snapshot of the queue. `is_idle` is evaluated from a single locked state,
/// so "empty" and "nothing in flight" can never disagree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStatus {
    pub pending: usize,
    /// An in-flight utterance whose end has not been reported yet.
    pub in_flight: bool,
    /// The worker is still unwinding an utterance (including a skipped one).
    pub busy: bool,
}

impl QueueStatus {
    pub fn is_idle(&self) -> bool {
        self.pending == 0 && !self.in_flight && !self.busy
    }

    pub fn len(&self) -> usize {
        self.pending + usize::from(self.in_flight)
    }
}

pub struct SpeechQueue {
    shared: Arc<QueueShared>,
    worker: Option<JoinHandle<()>>,
}

impl SpeechQueue {
    /// Spawns the playback worker. Without a backend every utterance is
    /// played as timed text.
    pub fn spawn(
        config: SpeechQueueConfig,
        backend: Option<SpeechBackend>,
    ) -> (Self, mpsc::UnboundedReceiver<SpeechEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, _) = watch::channel(QueueStatus::default());
        let shared = Arc::new(QueueShared {
            state: Mutex::new(QueueState::default()),
            status_tx,
            events_tx,
            wake: Notify::new(),
            shutdown: CancellationToken::new(),
        });

        let worker = SpeechWorker::new(Arc::clone(&shared), config, backend).spawn();
        (
            Self {
                shared,
                worker: Some(worker),
            },
            events_rx,
        )
    }

    pub fn enqueue(&self, utterance: Utterance) -> UtteranceTicket {
        self.shared.enqueue(utterance)
    }

    pub fn enqueue_all<I>(&self, utterances: I) -> Vec<UtteranceTicket>
    where
        I: IntoIterator<Item = Utterance>,
    {
        utterances
            .into_iter()
            .map(|utterance| self.shared.enqueue(utterance))
            .collect()
    }

    /// Cancels only the in-flight utterance. Its `Ended(Skipped)` still fires.
    pub fn skip_current(&self) -> bool {
        self.shared.skip_current()
    }

    /// Cancels the in-flight utterance and drains the rest unplayed, firing
    /// `Ended(Skipped)` for each. Returns how many utterances were resolved.
    pub fn skip_to_end(&self) -> usize {
        self.shared.skip_to_end()
    }

    /// Hard stop without further events; waits for the worker to settle.
    pub async fn clear(&self) {
        self.shared.clear();
        self.wait_idle().await;
    }

    /// Same as [`clear`](Self::clear) without waiting for the worker.
    pub fn abort(&self) {
        self.shared.clear();
    }

    pub fn status(&self) -> QueueStatus {
        *self.shared.status_tx.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<QueueStatus> {
        self.shared.status_tx.subscribe()
    }

    /// Resolves once the queue is empty and the worker is idle.
    pub async fn wait_idle(&self) {
        let mut status_rx = self.shared.status_tx.subscribe();
        let _ = status_rx.wait_for(QueueStatus::is_idle).await;
    }

    pub fn len(&self) -> usize {
        self.status().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for SpeechQueue {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

pub(crate) struct QueueShared {
    state: Mutex<QueueState>,
    status_tx: watch::Sender<QueueStatus>,
    events_tx: mpsc::UnboundedSender<SpeechEvent>,
    pub(crate) wake: Notify,
    pub(crate) shutdown: CancellationToken,
}

#[derive(Default)]
struct QueueState {
    next_id: u64,
    pending: VecDeque<Queued>,
    current: Option<InFlight>,
    busy: bool,
}

impl QueueState {
    fn status(&self) -> QueueStatus {
        QueueStatus {
            pending: self.pending.len(),
            in_flight: self
                .current
                .as_ref()
                .map(|current| current.ticket.is_some())
                .unwrap_or(false),
            busy: self.busy,
        }
    }
}

struct Queued {
    utterance: Utterance,
    ticket: oneshot::Sender<EndReason>,
}

struct InFlight {
    id: UtteranceId,
    speaker: SpeakerRole,
    kind: UtteranceKind,
    cancel: CancellationToken,
    /// Taken once the end has been reported.
    ticket: Option<oneshot::Sender<EndReason>>,
    error_reported: bool,
}

impl QueueShared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, state: &QueueState) {
        self.status_tx.send_replace(state.status());
    }

    fn emit(&self, event: SpeechEvent) {
        if self.events_tx.send(event).is_err() {
            debug!(target: TARGET, "speech event dropped, no listener");
        }
    }

    fn enqueue(&self, mut utterance: Utterance) -> UtteranceTicket {
        let (ticket_tx, ticket_rx) = oneshot::channel();
        let mut state = self.lock();
        state.next_id = state.next_id.saturating_add(1);
        let id = state.next_id;
        utterance.assign_id(id);
        debug!(
            target: TARGET,
            id,
            kind = utterance.kind().as_str(),
            speaker = utterance.speaker().as_str(),
            "utterance enqueued"
        );
        state.pending.push_back(Queued {
            utterance,
            ticket: ticket_tx,
        });
        self.publish(&state);
        drop(state);

        self.wake.notify_one();
        UtteranceTicket::new(id, ticket_rx)
    }

    /// Moves the head of the queue in flight and announces it.
    pub(crate) fn begin_next(&self) -> Option<(Utterance, CancellationToken)> {
        let mut state = self.lock();
        let Some(next) = state.pending.pop_front() else {
            state.busy = false;
            self.publish(&state);
            return None;
        };

        let cancel = self.shutdown.child_token();
        let utterance = next.utterance;
        state.current = Some(InFlight {
            id: utterance.id(),
            speaker: utterance.speaker(),
            kind: utterance.kind(),
            cancel: cancel.clone(),
            ticket: Some(next.ticket),
            error_reported: false,
        });
        state.busy = true;
        self.emit(SpeechEvent::Started {
            id: utterance.id(),
            speaker: utterance.speaker(),
            kind: utterance.kind(),
            text: utterance.text().to_string(),
        });
        self.publish(&state);
        Some((utterance, cancel))
    }

    /// Emits `Failed` once for the in-flight utterance unless it was already resolved.
    pub(crate) fn report_error(&self, id: UtteranceId, error: SynthesisError) {
        let mut state = self.lock();
        let Some(current) = state.current.as_mut() else {
            return;
        };
        if current.id != id || current.ticket.is_none() || current.error_reported {
            return;
        }
        current.error_reported = true;
        self.emit(SpeechEvent::Failed { id, error });
    }

    pub(crate) fn finish(&self, id: UtteranceId, reason: EndReason) {
        let mut state = self.lock();
        if state.current.as_ref().map(|current| current.id) == Some(id) {
            if let Some(mut current) = state.current.take() {
                self.resolve(&mut current, reason);
            }
        }
        state.busy = false;
        self.publish(&state);
    }

    fn resolve(&self, current: &mut InFlight, reason: EndReason) {
        if let Some(ticket) = current.ticket.take() {
            self.emit(SpeechEvent::Ended {
                id: current.id,
                speaker: current.speaker,
                kind: current.kind,
                reason,
            });
            let _ = ticket.send(reason);
        }
    }

    fn skip_in_flight(&self, state: &mut QueueState) -> bool {
        let Some(current) = state.current.as_mut() else {
            return false;
        };
        if current.ticket.is_none() {
            return false;
        }
        current.cancel.cancel();
        let id = current.id;
        let speaker = current.speaker;
        let kind = current.kind;
        if let Some(ticket) = current.ticket.take() {
            self.emit(SpeechEvent::Ended {
                id,
                speaker,
                kind,
                reason: EndReason::Skipped,
            });
            let _ = ticket.send(EndReason::Skipped);
        }
        true
    }

    fn skip_current(&self) -> bool {
        let mut state = self.lock();
        let skipped = self.skip_in_flight(&mut state);
        if skipped {
            info!(target: TARGET, "skipped current utterance");
            self.publish(&state);
        }
        skipped
    }

    fn skip_to_end(&self) -> usize {
        let mut state = self.lock();
        let mut resolved = usize::from(self.skip_in_flight(&mut state));
        while let Some(queued) = state.pending.pop_front() {
            let utterance = queued.utterance;
            self.emit(SpeechEvent::Ended {
                id: utterance.id(),
                speaker: utterance.speaker(),
                kind: utterance.kind(),
                reason: EndReason::Skipped,
            });
            let _ = queued.ticket.send(EndReason::Skipped);
            resolved += 1;
        }
        info!(target: TARGET, resolved, "skipped to end of queue");
        self.publish(&state);
        resolved
    }

    fn clear(&self) {
        let mut state = self.lock();
        let dropped = state.pending.len();
        state.pending.clear();
        if let Some(current) = state.current.as_mut() {
            current.cancel.cancel();
            current.ticket.take();
        }
        debug!(target: TARGET, dropped, "speech queue cleared");
        self.publish(&state);
    }
}
