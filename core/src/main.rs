use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, Mutex};
use tracing::info;

use intersect_core::error::TranscriptionError;
use intersect_core::orchestrator::traits::{
    RecognizerConnection, ResponseGenerator, TranscriptionBackend,
};
use intersect_core::orchestrator::types::{AgentThought, SpeakerRole, TurnResponse};
use intersect_core::persistence::MemoryDialogStore;
use intersect_core::speech::SpeechEvent;
use intersect_core::telemetry::init_tracing;
use intersect_core::transcription::{Credentials, TranscriptSegment};
use intersect_core::{SessionComponents, SessionEvent, VoiceConfig, VoiceSession};

/// Every stdin line is one committed recognizer segment.
struct StdinRecognizer {
    lines: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
}

struct StdinConnection {
    lines: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
}

#[async_trait]
impl TranscriptionBackend for StdinRecognizer {
    async fn connect(
        &self,
        _credentials: &Credentials,
    ) -> Result<Box<dyn RecognizerConnection>, TranscriptionError> {
        Ok(Box::new(StdinConnection {
            lines: Arc::clone(&self.lines),
        }))
    }
}

#[async_trait]
impl RecognizerConnection for StdinConnection {
    async fn next_segment(&mut self) -> Option<Result<TranscriptSegment, TranscriptionError>> {
        let line = self.lines.lock().await.recv().await?;
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as i64)
            .unwrap_or_default();
        Some(Ok(TranscriptSegment::committed(line, timestamp_ms)))
    }

    async fn disconnect(&mut self) {}
}

struct EchoGenerator;

#[async_trait]
impl ResponseGenerator for EchoGenerator {
    async fn generate_turn_response(&self, _session_id: &str, user_text: &str) -> Result<TurnResponse> {
        let words = user_text.split_whitespace().count();
        Ok(TurnResponse {
            thoughts: vec![
                AgentThought::new(SpeakerRole::Instinct, format!("They said \"{user_text}\".")),
                AgentThought::new(SpeakerRole::Logic, format!("That was {words} words.")),
            ],
            final_response: format!("I heard you: {user_text}"),
        })
    }

    async fn opening_greeting(&self, _session_id: &str) -> Result<Option<String>> {
        Ok(Some(
            "Hello. Talk to me and end with the word submit. Type /skip, /next or /quit at any time."
                .to_string(),
        ))
    }
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::PhaseChanged { turn_id, to, .. } => println!("[turn {turn_id}] {to}"),
        SessionEvent::Speech(SpeechEvent::Started { speaker, text, .. }) => {
            println!("  {speaker}: {text}")
        }
        SessionEvent::Notice(notice) => println!("  ! {}", notice.message),
        SessionEvent::Transcript(snapshot) if !snapshot.is_empty() => {
            println!("  (heard) {}", snapshot.full_text())
        }
        _ => {}
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = VoiceConfig::from_env()?;
    let _guard = init_tracing(&config.logging)?;

    let (line_tx, line_rx) = mpsc::unbounded_channel();
    let session = VoiceSession::new(
        "demo",
        config,
        SessionComponents {
            generator: Arc::new(EchoGenerator),
            speech: None,
            transcription: Arc::new(StdinRecognizer {
                lines: Arc::new(Mutex::new(line_rx)),
            }),
            credentials: Some(Credentials::new("stdin")),
            ambient: None,
            store: Some(Arc::new(MemoryDialogStore::new())),
        },
    )?;

    let mut events = session.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            print_event(&event);
        }
    });

    session.start_session().await?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = stdin.next_line() => match line? {
                Some(line) => line,
                None => break,
            },
        };
        match line.trim() {
            "/quit" => break,
            "/skip" => {
                session.skip_to_end_of_ai_turn().await;
            }
            "/next" => {
                session.skip_current_utterance();
            }
            "" => {}
            text => {
                let _ = line_tx.send(text.to_string());
            }
        }
    }

    session.end_session().await;
    info!(target: "voice_session", entries = session.history().len(), "demo finished");
    drop(session);
    printer.abort();
    Ok(())
}
