//! Streaming speech-to-text session: one recognizer connection per user turn.

mod state;

pub use state::{TranscriptSegment, TranscriptSnapshot};

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::TranscriptionError;
use crate::orchestrator::traits::{RecognizerConnection, TranscriptionBackend};

use self::state::TranscriptStore;

const TARGET: &str = "transcription";

pub const CREDENTIALS_ENV: &str = "INTERSECT_TRANSCRIPTION_KEY";

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    token: String,
}

impl Credentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub fn from_env() -> Result<Self, TranscriptionError> {
        match std::env::var(CREDENTIALS_ENV) {
            Ok(token) if !token.trim().is_empty() => Ok(Self::new(token.trim())),
            _ => Err(TranscriptionError::MissingCredentials),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Cheap to clone; all clones share one recognizer and transcript.
#[derive(Clone)]
pub struct TranscriptionSession {
    inner: Arc<Inner>,
}

struct Inner {
    backend: Arc<dyn TranscriptionBackend>,
    credentials: Option<Credentials>,
    store: Mutex<TranscriptStore>,
    snapshot_tx: watch::Sender<TranscriptSnapshot>,
    active: AtomicBool,
    pump: AsyncMutex<Option<Pump>>,
}

struct Pump {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl TranscriptionSession {
    pub fn new(backend: Arc<dyn TranscriptionBackend>, credentials: Option<Credentials>) -> Self {
        let (snapshot_tx, _) = watch::channel(TranscriptSnapshot::default());
        Self {
            inner: Arc::new(Inner {
                backend,
                credentials,
                store: Mutex::new(TranscriptStore::default()),
                snapshot_tx,
                active: AtomicBool::new(false),
                pump: AsyncMutex::new(None),
            }),
        }
    }

    /// Opens the recognizer. A no-op while already listening.
    pub async fn start(&self) -> Result<(), TranscriptionError> {
        let mut pump = self.inner.pump.lock().await;
        if let Some(existing) = pump.take() {
            if self.is_active() {
                *pump = Some(existing);
                return Ok(());
            }
            let _ = existing.handle.await;
        }

        let credentials = self.inner.credentials.as_ref().ok_or_else(|| {
            warn!(target: TARGET, "transcription credentials missing");
            TranscriptionError::MissingCredentials
        })?;
        let connection = self.inner.backend.connect(credentials).await?;

        let cancel = CancellationToken::new();
        self.inner.active.store(true, Ordering::SeqCst);
        let handle = tokio::spawn(run_pump(
            Arc::clone(&self.inner),
            connection,
            cancel.clone(),
        ));
        *pump = Some(Pump { cancel, handle });
        info!(target: TARGET, "transcription started");
        Ok(())
    }

    /// Closes the recognizer and commits the outstanding partial. Idempotent.
    pub async fn stop(&self) {
        let pump = self.inner.pump.lock().await.take();
        if let Some(pump) = pump {
            pump.cancel.cancel();
            if let Err(err) = pump.handle.await {
                warn!(target: TARGET, %err, "transcription pump ended abnormally");
            }
            info!(target: TARGET, "transcription stopped");
        }
        self.inner.active.store(false, Ordering::SeqCst);
        self.inner.update(TranscriptStore::commit_partial);
    }

    /// Clears the transcript for a fresh user turn.
    pub fn reset(&self) {
        self.inner.update(|store| {
            store.reset();
            true
        });
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> TranscriptSnapshot {
        self.inner.snapshot_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TranscriptSnapshot> {
        self.inner.snapshot_tx.subscribe()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, TranscriptStore> {
        self.store
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn update(&self, change: impl FnOnce(&mut TranscriptStore) -> bool) {
        let mut store = self.lock();
        if change(&mut store) {
            self.snapshot_tx.send_replace(store.snapshot());
        }
    }
}

async fn run_pump(
    inner: Arc<Inner>,
    mut connection: Box<dyn RecognizerConnection>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = connection.next_segment() => match next {
                Some(Ok(segment)) => {
                    debug!(
                        target: TARGET,
                        is_final = segment.is_final,
                        timestamp_ms = segment.timestamp_ms,
                        "segment received"
                    );
                    inner.update(|store| store.apply(segment));
                }
                Some(Err(err)) => {
                    warn!(target: TARGET, %err, "recognizer stream failed");
                    break;
                }
                None => {
                    debug!(target: TARGET, "recognizer closed the stream");
                    break;
                }
            },
        }
    }
    connection.disconnect().await;
    inner.active.store(false, Ordering::SeqCst);
}
