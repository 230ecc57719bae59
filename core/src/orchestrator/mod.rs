//! Turn-taking orchestration: the conversation state machine and its collaborators.

pub(crate) mod constants;

pub mod config;
pub mod controller;
pub mod skip;
pub mod traits;
pub mod types;

pub use config::VoiceConfig;
pub use controller::{SessionContext, TurnController, TurnDeps};
pub use skip::SkipController;
pub use traits::{
    AmbientOutput, AudioOutput, PlayingTrack, RecognizerConnection, ResponseGenerator,
    SpeechSynthesizer, TrackControl, TranscriptionBackend,
};
pub use types::{
    AgentThought, DialogEntry, DialogKind, NoticeLevel, SessionEvent, SessionNotice, SpeakerRole,
    TurnOwner, TurnPhase, TurnResponse,
};

#[cfg(test)]
mod tests;
