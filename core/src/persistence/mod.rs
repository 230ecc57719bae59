//! Hands finalized dialog entries to the storage collaborator off the turn path.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::orchestrator::constants::PERSISTENCE_CHANNEL_CAPACITY;
use crate::orchestrator::types::DialogEntry;

const TARGET: &str = "persistence";

/// Storage for the dialog of a session. Entries arrive in recording order.
#[async_trait]
pub trait DialogStore: Send + Sync {
    async fn append(&self, session_id: &str, entry: &DialogEntry) -> Result<()>;
}

/// Keeps everything in memory; used by the demo and the tests.
#[derive(Debug, Default)]
pub struct MemoryDialogStore {
    sessions: Mutex<HashMap<String, Vec<DialogEntry>>>,
}

impl MemoryDialogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self, session_id: &str) -> Vec<DialogEntry> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl DialogStore for MemoryDialogStore {
    async fn append(&self, session_id: &str, entry: &DialogEntry) -> Result<()> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(session_id.to_string())
            .or_default()
            .push(entry.clone());
        Ok(())
    }
}

#[derive(Debug)]
pub enum PersistenceCommand {
    Append {
        session_id: String,
        entry: DialogEntry,
    },
    /// Answers once every earlier command has been handled.
    Flush { respond_to: oneshot::Sender<()> },
}

pub struct PersistenceActor {
    rx: mpsc::Receiver<PersistenceCommand>,
    store: Arc<dyn DialogStore>,
}

impl PersistenceActor {
    pub fn new(rx: mpsc::Receiver<PersistenceCommand>, store: Arc<dyn DialogStore>) -> Self {
        Self { rx, store }
    }

    pub async fn run(mut self) -> Result<()> {
        while let Some(command) = self.rx.recv().await {
            match command {
                PersistenceCommand::Append { session_id, entry } => {
                    match self.store.append(&session_id, &entry).await {
                        Ok(()) => debug!(
                            target: TARGET,
                            session = %session_id,
                            turn_id = entry.turn_id,
                            kind = entry.kind.as_str(),
                            "dialog entry stored"
                        ),
                        Err(err) => warn!(
                            target: TARGET,
                            session = %session_id,
                            turn_id = entry.turn_id,
                            %err,
                            "failed to store dialog entry"
                        ),
                    }
                }
                PersistenceCommand::Flush { respond_to } => {
                    let _ = respond_to.send(());
                }
            }
        }
        debug!(target: TARGET, "persistence actor stopped");
        Ok(())
    }
}

#[derive(Clone)]
pub struct PersistenceHandle {
    tx: mpsc::Sender<PersistenceCommand>,
}

impl PersistenceHandle {
    pub fn new(tx: mpsc::Sender<PersistenceCommand>) -> Self {
        Self { tx }
    }

    /// Spawns an actor over `store` and returns its handle.
    pub fn spawn(store: Arc<dyn DialogStore>) -> (Self, JoinHandle<Result<()>>) {
        let (tx, rx) = mpsc::channel(PERSISTENCE_CHANNEL_CAPACITY);
        let task = tokio::spawn(PersistenceActor::new(rx, store).run());
        (Self::new(tx), task)
    }

    pub async fn append(&self, session_id: &str, entry: DialogEntry) -> Result<()> {
        self.tx
            .send(PersistenceCommand::Append {
                session_id: session_id.to_string(),
                entry,
            })
            .await
            .map_err(|err| anyhow!("persistence actor closed: {err}"))
    }

    pub async fn flush(&self) -> Result<()> {
        let (respond_to, rx) = oneshot::channel();
        self.tx
            .send(PersistenceCommand::Flush { respond_to })
            .await
            .map_err(|err| anyhow!("persistence actor closed: {err}"))?;
        rx.await
            .map_err(|err| anyhow!("persistence actor dropped flush: {err}"))
    }
}
