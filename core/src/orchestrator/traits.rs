use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::oneshot;

use crate::ambient::Track;
use crate::error::{SynthesisError, TranscriptionError, VoiceError};
use crate::orchestrator::types::TurnResponse;
use crate::speech::VoiceRef;
use crate::transcription::{Credentials, TranscriptSegment};

/// Language model + routing collaborator.
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    async fn generate_turn_response(&self, session_id: &str, user_text: &str) -> Result<TurnResponse>;

    /// Greeting spoken by the Governor when a session opens.
    async fn opening_greeting(&self, _session_id: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

/// Text-to-speech collaborator. Dropping the returned future cancels the request.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, voice: &VoiceRef, text: &str) -> Result<Bytes, SynthesisError>;
}

/// The single foreground speaker.
#[async_trait]
pub trait AudioOutput: Send + Sync {
    /// Resolves once the clip has finished playing.
    async fn play(&self, audio: Bytes) -> Result<(), SynthesisError>;

    /// Silences whatever is audible right now.
    fn stop(&self);
}

#[async_trait]
pub trait TranscriptionBackend: Send + Sync {
    async fn connect(
        &self,
        credentials: &Credentials,
    ) -> Result<Box<dyn RecognizerConnection>, TranscriptionError>;
}

#[async_trait]
pub trait RecognizerConnection: Send {
    /// `None` once the recognizer closed the stream.
    async fn next_segment(&mut self) -> Option<Result<TranscriptSegment, TranscriptionError>>;

    async fn disconnect(&mut self);
}

/// Second, independent output used for music and cues.
pub trait AmbientOutput: Send + Sync {
    fn open(&self, track: &Track, volume: f32) -> Result<PlayingTrack, VoiceError>;
}

pub trait TrackControl: Send + Sync {
    fn set_volume(&self, volume: f32);
    fn stop(&self);
}

/// A track that has started playing. `finished` fires on its natural end.
pub struct PlayingTrack {
    pub control: Box<dyn TrackControl>,
    pub finished: oneshot::Receiver<()>,
}

impl std::fmt::Debug for PlayingTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayingTrack").finish_non_exhaustive()
    }
}
