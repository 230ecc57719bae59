use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::SynthesisError;
use crate::orchestrator::config::SpeechQueueConfig;
use crate::orchestrator::traits::{AudioOutput, SpeechSynthesizer};
use crate::telemetry::events::record_utterance_outcome;

use super::fallback::text_only_duration;
use super::utterance::{EndReason, Utterance};
use super::{QueueShared, TARGET};

/// Synthesis and playback used by the queue.
#[derive(Clone)]
pub struct SpeechBackend {
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub output: Arc<dyn AudioOutput>,
}

impl SpeechBackend {
    pub fn new(synthesizer: Arc<dyn SpeechSynthesizer>, output: Arc<dyn AudioOutput>) -> Self {
        Self {
            synthesizer,
            output,
        }
    }
}

pub(super) struct SpeechWorker {
    shared: Arc<QueueShared>,
    config: SpeechQueueConfig,
    backend: Option<SpeechBackend>,
}

impl SpeechWorker {
    pub(super) fn new(
        shared: Arc<QueueShared>,
        config: SpeechQueueConfig,
        backend: Option<SpeechBackend>,
    ) -> Self {
        Self {
            shared,
            config,
            backend,
        }
    }

    pub(super) fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        loop {
            if self.shared.shutdown.is_cancelled() {
                break;
            }

            let Some((utterance, cancel)) = self.shared.begin_next() else {
                tokio::select! {
                    biased;
                    _ = self.shared.shutdown.cancelled() => break,
                    _ = self.shared.wake.notified() => continue,
                }
            };

            let started = Instant::now();
            let reason = self.perform(&utterance, &cancel).await;
            record_utterance_outcome(
                utterance.id(),
                utterance.kind(),
                utterance.speaker(),
                reason,
                started.elapsed(),
            );
            self.shared.finish(utterance.id(), reason);
        }
        debug!(target: TARGET, "speech worker stopped");
    }

    async fn perform(&self, utterance: &Utterance, cancel: &CancellationToken) -> EndReason {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.stop_output();
                EndReason::Skipped
            }
            outcome = time::timeout(utterance.timeout(), self.speak(utterance)) => match outcome {
                Ok(reason) => reason,
                Err(_) => {
                    warn!(
                        target: TARGET,
                        id = utterance.id(),
                        timeout_ms = utterance.timeout().as_millis() as u64,
                        "utterance timed out"
                    );
                    self.stop_output();
                    EndReason::TimedOut
                }
            },
        }
    }

    async fn speak(&self, utterance: &Utterance) -> EndReason {
        let Some(backend) = &self.backend else {
            self.text_only_pause(utterance).await;
            return EndReason::TextOnly;
        };

        match play(backend, utterance).await {
            Ok(()) => EndReason::Completed,
            Err(SynthesisError::Unavailable) => {
                debug!(target: TARGET, id = utterance.id(), "synthesis unavailable, showing text");
                self.text_only_pause(utterance).await;
                EndReason::TextOnly
            }
            Err(error) => {
                warn!(target: TARGET, id = utterance.id(), %error, "speech synthesis failed");
                self.shared.report_error(utterance.id(), error);
                self.text_only_pause(utterance).await;
                EndReason::Failed
            }
        }
    }

    async fn text_only_pause(&self, utterance: &Utterance) {
        time::sleep(text_only_duration(
            utterance.text(),
            utterance.kind(),
            &self.config,
        ))
        .await;
    }

    fn stop_output(&self) {
        if let Some(backend) = &self.backend {
            backend.output.stop();
        }
    }
}

async fn play(backend: &SpeechBackend, utterance: &Utterance) -> Result<(), SynthesisError> {
    let audio = backend
        .synthesizer
        .synthesize(utterance.voice(), utterance.text())
        .await?;
    backend.output.play(audio).await
}
