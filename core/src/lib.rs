//! Intersect Core Library
//!
//! Turn-taking orchestration for a spoken conversation between several AI
//! voices and one user: speech queueing, streaming transcription, spoken
//! submit detection, ambient audio, persistence and telemetry.

pub mod ambient;
pub mod dirs_compat;
pub mod error;
pub mod orchestrator;
pub mod persistence;
pub mod session;
pub mod speech;
pub mod submit;
pub mod telemetry;
pub mod transcription;

pub(crate) mod timing;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{ErrorClass, SynthesisError, TranscriptionError, VoiceError, VoiceResult};
pub use orchestrator::{SessionEvent, TurnController, TurnPhase, VoiceConfig};
pub use session::{SessionComponents, VoiceSession};
