//! Hand-written collaborators shared by the unit and scenario tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;

use crate::ambient::Track;
use crate::error::{SynthesisError, TranscriptionError, VoiceError};
use crate::orchestrator::traits::{
    AmbientOutput, AudioOutput, PlayingTrack, RecognizerConnection, ResponseGenerator,
    SpeechSynthesizer, TrackControl, TranscriptionBackend,
};
use crate::orchestrator::types::{AgentThought, SpeakerRole, TurnResponse};
use crate::speech::VoiceRef;
use crate::transcription::{Credentials, TranscriptSegment};

#[derive(Default)]
pub(crate) struct MockSynthesizer {
    failures: Mutex<HashMap<String, SynthesisError>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl MockSynthesizer {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn fail_on(&self, text: &str, error: SynthesisError) {
        self.failures
            .lock()
            .expect("failures lock poisoned")
            .insert(text.to_string(), error);
    }

    pub(crate) fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().expect("calls lock poisoned").clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for MockSynthesizer {
    async fn synthesize(&self, voice: &VoiceRef, text: &str) -> Result<Bytes, SynthesisError> {
        self.calls
            .lock()
            .expect("calls lock poisoned")
            .push((voice.as_str().to_string(), text.to_string()));
        if let Some(error) = self
            .failures
            .lock()
            .expect("failures lock poisoned")
            .get(text)
        {
            return Err(error.clone());
        }
        Ok(Bytes::from(text.as_bytes().to_vec()))
    }
}

/// Plays every clip for a fixed time, or never finishes when `clip` is `None`.
pub(crate) struct MockOutput {
    clip: Option<Duration>,
    played: Mutex<Vec<String>>,
    stops: AtomicUsize,
}

impl MockOutput {
    pub(crate) fn with_clip(clip: Duration) -> Arc<Self> {
        Arc::new(Self {
            clip: Some(clip),
            played: Mutex::new(Vec::new()),
            stops: AtomicUsize::new(0),
        })
    }

    pub(crate) fn hanging() -> Arc<Self> {
        Arc::new(Self {
            clip: None,
            played: Mutex::new(Vec::new()),
            stops: AtomicUsize::new(0),
        })
    }

    pub(crate) fn played(&self) -> Vec<String> {
        self.played.lock().expect("played lock poisoned").clone()
    }

    pub(crate) fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioOutput for MockOutput {
    async fn play(&self, audio: Bytes) -> Result<(), SynthesisError> {
        self.played
            .lock()
            .expect("played lock poisoned")
            .push(String::from_utf8_lossy(&audio).into_owned());
        match self.clip {
            Some(clip) => sleep(clip).await,
            None => std::future::pending::<()>().await,
        }
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Recognizer fed by the test through [`push`](Self::push).
#[derive(Default)]
pub(crate) struct MockRecognizer {
    sender: Mutex<Option<mpsc::UnboundedSender<TranscriptSegment>>>,
    connect_failure: Mutex<Option<TranscriptionError>>,
    connects: AtomicUsize,
    disconnects: Arc<AtomicUsize>,
    disconnect_delay: Mutex<Duration>,
}

impl MockRecognizer {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn push(&self, segment: TranscriptSegment) {
        if let Some(sender) = self.sender.lock().expect("sender lock poisoned").as_ref() {
            let _ = sender.send(segment);
        }
    }

    /// Ends the current stream as if the recognizer hung up.
    pub(crate) fn close(&self) {
        self.sender.lock().expect("sender lock poisoned").take();
    }

    pub(crate) fn fail_next_connect(&self, error: TranscriptionError) {
        *self
            .connect_failure
            .lock()
            .expect("failure lock poisoned") = Some(error);
    }

    /// Makes every later `disconnect` take `delay`.
    pub(crate) fn slow_disconnect(&self, delay: Duration) {
        *self.disconnect_delay.lock().expect("delay lock poisoned") = delay;
    }

    pub(crate) fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub(crate) fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TranscriptionBackend for MockRecognizer {
    async fn connect(
        &self,
        _credentials: &Credentials,
    ) -> Result<Box<dyn RecognizerConnection>, TranscriptionError> {
        if let Some(error) = self
            .connect_failure
            .lock()
            .expect("failure lock poisoned")
            .take()
        {
            return Err(error);
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        *self.sender.lock().expect("sender lock poisoned") = Some(tx);
        Ok(Box::new(MockConnection {
            segments: rx,
            disconnects: Arc::clone(&self.disconnects),
            disconnect_delay: *self.disconnect_delay.lock().expect("delay lock poisoned"),
        }))
    }
}

struct MockConnection {
    segments: mpsc::UnboundedReceiver<TranscriptSegment>,
    disconnects: Arc<AtomicUsize>,
    disconnect_delay: Duration,
}

#[async_trait]
impl RecognizerConnection for MockConnection {
    async fn next_segment(&mut self) -> Option<Result<TranscriptSegment, TranscriptionError>> {
        self.segments.recv().await.map(Ok)
    }

    async fn disconnect(&mut self) {
        if !self.disconnect_delay.is_zero() {
            sleep(self.disconnect_delay).await;
        }
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Clone)]
pub(crate) struct OpenedTrack {
    pub(crate) track_id: String,
    pub(crate) initial_volume: f32,
    volumes: Arc<Mutex<Vec<f32>>>,
    stopped: Arc<AtomicBool>,
    finish_tx: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

impl OpenedTrack {
    pub(crate) fn volumes(&self) -> Vec<f32> {
        self.volumes.lock().expect("volumes lock poisoned").clone()
    }

    pub(crate) fn last_volume(&self) -> f32 {
        self.volumes()
            .last()
            .copied()
            .unwrap_or(self.initial_volume)
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Simulates the track reaching its natural end.
    pub(crate) fn finish(&self) {
        if let Some(tx) = self.finish_tx.lock().expect("finish lock poisoned").take() {
            let _ = tx.send(());
        }
    }
}

struct MockTrackControl {
    volumes: Arc<Mutex<Vec<f32>>>,
    stopped: Arc<AtomicBool>,
}

impl TrackControl for MockTrackControl {
    fn set_volume(&self, volume: f32) {
        self.volumes
            .lock()
            .expect("volumes lock poisoned")
            .push(volume);
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub(crate) struct MockAmbientOutput {
    opened: Mutex<Vec<OpenedTrack>>,
    failing: Mutex<HashSet<String>>,
}

impl MockAmbientOutput {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn fail_on(&self, track_id: &str) {
        self.failing
            .lock()
            .expect("failing lock poisoned")
            .insert(track_id.to_string());
    }

    pub(crate) fn opened(&self) -> Vec<OpenedTrack> {
        self.opened.lock().expect("opened lock poisoned").clone()
    }
}

impl AmbientOutput for MockAmbientOutput {
    fn open(&self, track: &Track, volume: f32) -> Result<PlayingTrack, VoiceError> {
        if self
            .failing
            .lock()
            .expect("failing lock poisoned")
            .contains(&track.id)
        {
            return Err(VoiceError::Ambient(format!("cannot decode {}", track.source)));
        }
        let (finish_tx, finished) = oneshot::channel();
        let opened = OpenedTrack {
            track_id: track.id.clone(),
            initial_volume: volume,
            volumes: Arc::new(Mutex::new(Vec::new())),
            stopped: Arc::new(AtomicBool::new(false)),
            finish_tx: Arc::new(Mutex::new(Some(finish_tx))),
        };
        let control = MockTrackControl {
            volumes: Arc::clone(&opened.volumes),
            stopped: Arc::clone(&opened.stopped),
        };
        self.opened
            .lock()
            .expect("opened lock poisoned")
            .push(opened);
        Ok(PlayingTrack {
            control: Box::new(control),
            finished,
        })
    }
}

/// Replays scripted turn responses in order; a `None` entry fails the call.
#[derive(Default)]
pub(crate) struct ScriptedGenerator {
    responses: Mutex<VecDeque<Option<TurnResponse>>>,
    greeting: Mutex<Option<String>>,
    delay: Mutex<Duration>,
    requests: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn respond(&self, thoughts: &[(SpeakerRole, &str)], final_response: &str) {
        let response = TurnResponse {
            thoughts: thoughts
                .iter()
                .map(|(speaker, text)| AgentThought::new(*speaker, *text))
                .collect(),
            final_response: final_response.to_string(),
        };
        self.responses
            .lock()
            .expect("responses lock poisoned")
            .push_back(Some(response));
    }

    pub(crate) fn fail_next(&self) {
        self.responses
            .lock()
            .expect("responses lock poisoned")
            .push_back(None);
    }

    pub(crate) fn greet_with(&self, greeting: &str) {
        *self.greeting.lock().expect("greeting lock poisoned") = Some(greeting.to_string());
    }

    pub(crate) fn delay_by(&self, delay: Duration) {
        *self.delay.lock().expect("delay lock poisoned") = delay;
    }

    pub(crate) fn requests(&self) -> Vec<String> {
        self.requests.lock().expect("requests lock poisoned").clone()
    }
}

#[async_trait]
impl ResponseGenerator for ScriptedGenerator {
    async fn generate_turn_response(&self, _session_id: &str, user_text: &str) -> Result<TurnResponse> {
        self.requests
            .lock()
            .expect("requests lock poisoned")
            .push(user_text.to_string());
        let delay = *self.delay.lock().expect("delay lock poisoned");
        if !delay.is_zero() {
            sleep(delay).await;
        }
        let next = self
            .responses
            .lock()
            .expect("responses lock poisoned")
            .pop_front();
        match next {
            Some(Some(response)) => Ok(response),
            Some(None) => Err(anyhow!("language model returned 500")),
            None => Err(anyhow!("no scripted response left")),
        }
    }

    async fn opening_greeting(&self, _session_id: &str) -> Result<Option<String>> {
        Ok(self.greeting.lock().expect("greeting lock poisoned").clone())
    }
}
