use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::speech::SpeechEvent;
use crate::transcription::TranscriptSnapshot;

/// Phase of the conversation. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    AiThinking,
    AiSpeakingThoughts,
    AiSpeakingResponse,
    UserListening,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnOwner {
    Ai,
    User,
}

impl TurnPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnPhase::AiThinking => "ai_thinking",
            TurnPhase::AiSpeakingThoughts => "ai_speaking_thoughts",
            TurnPhase::AiSpeakingResponse => "ai_speaking_response",
            TurnPhase::UserListening => "user_listening",
            TurnPhase::Ended => "ended",
        }
    }

    /// `None` once the session has been torn down.
    pub fn owner(&self) -> Option<TurnOwner> {
        match self {
            TurnPhase::AiThinking | TurnPhase::AiSpeakingThoughts | TurnPhase::AiSpeakingResponse => {
                Some(TurnOwner::Ai)
            }
            TurnPhase::UserListening => Some(TurnOwner::User),
            TurnPhase::Ended => None,
        }
    }

    pub fn is_ai(&self) -> bool {
        self.owner() == Some(TurnOwner::Ai)
    }
}

impl fmt::Display for TurnPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who is speaking. The Governor delivers the final response; the inner
/// voices deliver thoughts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeakerRole {
    Governor,
    Instinct,
    Logic,
    Psyche,
    User,
}

impl SpeakerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpeakerRole::Governor => "governor",
            SpeakerRole::Instinct => "instinct",
            SpeakerRole::Logic => "logic",
            SpeakerRole::Psyche => "psyche",
            SpeakerRole::User => "user",
        }
    }

    pub fn is_agent(&self) -> bool {
        !matches!(self, SpeakerRole::User)
    }
}

impl fmt::Display for SpeakerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownSpeaker(pub String);

impl fmt::Display for UnknownSpeaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown speaker id `{}`", self.0)
    }
}

impl std::error::Error for UnknownSpeaker {}

impl FromStr for SpeakerRole {
    type Err = UnknownSpeaker;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "governor" => Ok(SpeakerRole::Governor),
            "instinct" => Ok(SpeakerRole::Instinct),
            "logic" => Ok(SpeakerRole::Logic),
            "psyche" => Ok(SpeakerRole::Psyche),
            "user" => Ok(SpeakerRole::User),
            _ => Err(UnknownSpeaker(value.to_string())),
        }
    }
}

/// One intermediate agent utterance returned by the response generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentThought {
    pub speaker: SpeakerRole,
    pub text: String,
}

impl AgentThought {
    pub fn new(speaker: SpeakerRole, text: impl Into<String>) -> Self {
        Self {
            speaker,
            text: text.into(),
        }
    }
}

/// Everything the AI says during one turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnResponse {
    pub thoughts: Vec<AgentThought>,
    pub final_response: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialogKind {
    Thought,
    Response,
    User,
}

impl DialogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DialogKind::Thought => "thought",
            DialogKind::Response => "response",
            DialogKind::User => "user",
        }
    }
}

/// Finalized history record. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogEntry {
    pub kind: DialogKind,
    pub speaker: SpeakerRole,
    pub text: String,
    pub turn_id: u64,
    pub recorded_at_ms: i64,
}

impl DialogEntry {
    pub fn new(kind: DialogKind, speaker: SpeakerRole, text: impl Into<String>, turn_id: u64) -> Self {
        Self {
            kind,
            speaker,
            text: text.into(),
            turn_id,
            recorded_at_ms: now_ms(),
        }
    }

    pub fn user(turn_id: u64, text: impl Into<String>) -> Self {
        Self::new(DialogKind::User, SpeakerRole::User, text, turn_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone)]
pub struct SessionNotice {
    pub level: NoticeLevel,
    pub message: String,
}

impl SessionNotice {
    pub fn warn(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warn,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

/// Everything a UI layer can observe about a session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    PhaseChanged {
        turn_id: u64,
        from: TurnPhase,
        to: TurnPhase,
    },
    Speech(SpeechEvent),
    Transcript(TranscriptSnapshot),
    Dialog(DialogEntry),
    Notice(SessionNotice),
}

pub(crate) fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis().min(i64::MAX as u128) as i64)
        .unwrap_or_default()
}
