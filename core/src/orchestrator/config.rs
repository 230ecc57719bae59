use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::VoiceError;
use crate::orchestrator::constants::{
    CROSSFADE_DURATION, FADE_TICK, MAX_CUE_DURATION, RESPONSE_TEXT_ONLY_CAP, RESPONSE_TIMEOUT,
    SUBMIT_DEBOUNCE, THOUGHT_TEXT_ONLY_CAP, THOUGHT_TIMEOUT, TRACK_CHANGE_DEBOUNCE,
    WATCHDOG_GRACE,
};
use crate::orchestrator::types::SpeakerRole;
use crate::speech::VoiceRef;

pub const CONFIG_PATH_ENV: &str = "INTERSECT_VOICE_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    pub turn: TurnTimings,
    pub speech: SpeechQueueConfig,
    pub submit: SubmitConfig,
    pub ambient: AmbientConfig,
    pub voices: VoiceMap,
    pub logging: LogConfig,
}

impl VoiceConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, VoiceError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|err| VoiceError::Config(format!("{}: {err}", path.display())))?;
        let config: VoiceConfig = serde_json::from_str(&raw)
            .map_err(|err| VoiceError::Config(format!("{}: {err}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the file named by `INTERSECT_VOICE_CONFIG`, or defaults when unset.
    pub fn from_env() -> Result<Self, VoiceError> {
        match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::from_json_file(path.trim()),
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), VoiceError> {
        if self.turn.thought_timeout.is_zero() || self.turn.response_timeout.is_zero() {
            return Err(VoiceError::Config("utterance timeouts must be non-zero".into()));
        }
        if self.ambient.fade_tick.is_zero() {
            return Err(VoiceError::Config("ambient fade tick must be non-zero".into()));
        }
        if self.ambient.cue_duration > MAX_CUE_DURATION {
            return Err(VoiceError::Config(format!(
                "thinking cue may last at most {}ms",
                MAX_CUE_DURATION.as_millis()
            )));
        }
        if self.ambient.cue_fade * 2 > self.ambient.cue_duration {
            return Err(VoiceError::Config(
                "thinking cue fades do not fit in the cue duration".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.ambient.volume) || !(0.0..=1.0).contains(&self.ambient.duck_level)
        {
            return Err(VoiceError::Config("ambient volumes must be within 0.0..=1.0".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnTimings {
    #[serde(with = "millis", rename = "thought_timeout_ms")]
    pub thought_timeout: Duration,
    #[serde(with = "millis", rename = "response_timeout_ms")]
    pub response_timeout: Duration,
    /// Extra slack the controller grants the queue before it aborts a stalled worker.
    #[serde(with = "millis", rename = "watchdog_grace_ms")]
    pub watchdog_grace: Duration,
}

impl Default for TurnTimings {
    fn default() -> Self {
        Self {
            thought_timeout: THOUGHT_TIMEOUT,
            response_timeout: RESPONSE_TIMEOUT,
            watchdog_grace: WATCHDOG_GRACE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechQueueConfig {
    pub text_only_ms_per_char: u64,
    #[serde(with = "millis", rename = "text_only_min_ms")]
    pub text_only_min: Duration,
    #[serde(with = "millis", rename = "thought_text_only_cap_ms")]
    pub thought_text_only_cap: Duration,
    #[serde(with = "millis", rename = "response_text_only_cap_ms")]
    pub response_text_only_cap: Duration,
}

impl Default for SpeechQueueConfig {
    fn default() -> Self {
        Self {
            text_only_ms_per_char: 30,
            text_only_min: Duration::from_millis(250),
            thought_text_only_cap: THOUGHT_TEXT_ONLY_CAP,
            response_text_only_cap: RESPONSE_TEXT_ONLY_CAP,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmitConfig {
    #[serde(with = "millis", rename = "debounce_ms")]
    pub debounce: Duration,
}

impl Default for SubmitConfig {
    fn default() -> Self {
        Self {
            debounce: SUBMIT_DEBOUNCE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AmbientConfig {
    pub volume: f32,
    #[serde(with = "millis", rename = "crossfade_ms")]
    pub crossfade: Duration,
    #[serde(with = "millis", rename = "fade_tick_ms")]
    pub fade_tick: Duration,
    #[serde(with = "millis", rename = "restart_debounce_ms")]
    pub restart_debounce: Duration,
    /// Music volume multiplier while the thinking cue plays.
    pub duck_level: f32,
    pub cue_volume: f32,
    #[serde(with = "millis", rename = "cue_duration_ms")]
    pub cue_duration: Duration,
    #[serde(with = "millis", rename = "cue_fade_ms")]
    pub cue_fade: Duration,
}

impl Default for AmbientConfig {
    fn default() -> Self {
        Self {
            volume: 0.3,
            crossfade: CROSSFADE_DURATION,
            fade_tick: FADE_TICK,
            restart_debounce: TRACK_CHANGE_DEBOUNCE,
            duck_level: 0.5,
            cue_volume: 0.35,
            cue_duration: MAX_CUE_DURATION,
            cue_fade: Duration::from_millis(120),
        }
    }
}

/// Synthesis voice per agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceMap {
    pub governor: VoiceRef,
    pub instinct: VoiceRef,
    pub logic: VoiceRef,
    pub psyche: VoiceRef,
}

impl Default for VoiceMap {
    fn default() -> Self {
        Self {
            governor: VoiceRef::new("governor"),
            instinct: VoiceRef::new("instinct"),
            logic: VoiceRef::new("logic"),
            psyche: VoiceRef::new("psyche"),
        }
    }
}

impl VoiceMap {
    /// The user never speaks through synthesis.
    pub fn voice_for(&self, speaker: SpeakerRole) -> Option<&VoiceRef> {
        match speaker {
            SpeakerRole::Governor => Some(&self.governor),
            SpeakerRole::Instinct => Some(&self.instinct),
            SpeakerRole::Logic => Some(&self.logic),
            SpeakerRole::Psyche => Some(&self.psyche),
            SpeakerRole::User => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub filter: String,
    /// Rolling log directory; `None` uses the platform state directory.
    pub directory: Option<PathBuf>,
    pub file_logging: bool,
    pub retention_days: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            directory: None,
            file_logging: true,
            retention_days: 7,
        }
    }
}

impl LogConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_days.saturating_mul(24 * 60 * 60))
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis().min(u64::MAX as u128) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
