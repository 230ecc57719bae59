use thiserror::Error;

use crate::orchestrator::types::TurnPhase;

pub type VoiceResult<T> = Result<T, VoiceError>;

/// How an error is treated by the turn controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Intentional stop; never shown to the user.
    Cancellation,
    /// Network or synthesis hiccup; degrade and continue.
    Transient,
    /// The current AI turn is lost; the session goes back to listening.
    FatalTurn,
    /// Missing or rejected credentials; surfaced immediately, never retried.
    Protocol,
    /// The caller asked for something the current phase does not allow.
    Usage,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Cancellation => "cancellation",
            ErrorClass::Transient => "transient",
            ErrorClass::FatalTurn => "fatal_turn",
            ErrorClass::Protocol => "protocol",
            ErrorClass::Usage => "usage",
        }
    }
}

#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("operation requires the {expected} phase but the session is {actual}")]
    InvalidPhase {
        expected: &'static str,
        actual: &'static str,
    },
    #[error("user input cannot be empty")]
    EmptyInput,
    #[error("session already started")]
    AlreadyStarted,
    #[error("session has ended")]
    SessionEnded,
    #[error("response generation failed: {0}")]
    ResponseGeneration(String),
    #[error(transparent)]
    Synthesis(#[from] SynthesisError),
    #[error(transparent)]
    Transcription(#[from] TranscriptionError),
    #[error("ambient output failed: {0}")]
    Ambient(String),
    #[error("configuration error: {0}")]
    Config(String),
}

impl VoiceError {
    pub(crate) fn invalid_phase(expected: TurnPhase, actual: TurnPhase) -> Self {
        VoiceError::InvalidPhase {
            expected: expected.as_str(),
            actual: actual.as_str(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            VoiceError::InvalidPhase { .. } | VoiceError::EmptyInput | VoiceError::AlreadyStarted => {
                ErrorClass::Usage
            }
            VoiceError::SessionEnded => ErrorClass::Cancellation,
            VoiceError::ResponseGeneration(_) => ErrorClass::FatalTurn,
            VoiceError::Synthesis(err) => err.class(),
            VoiceError::Transcription(err) => err.class(),
            VoiceError::Ambient(_) => ErrorClass::Transient,
            VoiceError::Config(_) => ErrorClass::Protocol,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SynthesisError {
    #[error("speech synthesis unavailable")]
    Unavailable,
    #[error("synthesis credentials rejected: {0}")]
    Credentials(String),
    #[error("synthesis request failed: {0}")]
    Request(String),
    #[error("audio playback failed: {0}")]
    Playback(String),
}

impl SynthesisError {
    pub fn class(&self) -> ErrorClass {
        match self {
            SynthesisError::Credentials(_) => ErrorClass::Protocol,
            SynthesisError::Unavailable
            | SynthesisError::Request(_)
            | SynthesisError::Playback(_) => ErrorClass::Transient,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TranscriptionError {
    #[error("transcription credentials missing")]
    MissingCredentials,
    #[error("transcription credentials rejected: {0}")]
    Credentials(String),
    #[error("failed to connect to recognizer: {0}")]
    Connect(String),
    #[error("recognizer stream failed: {0}")]
    Stream(String),
}

impl TranscriptionError {
    pub fn class(&self) -> ErrorClass {
        match self {
            TranscriptionError::MissingCredentials | TranscriptionError::Credentials(_) => {
                ErrorClass::Protocol
            }
            TranscriptionError::Connect(_) | TranscriptionError::Stream(_) => {
                ErrorClass::Transient
            }
        }
    }
}
