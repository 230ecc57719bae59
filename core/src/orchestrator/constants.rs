use std::time::Duration;

pub(crate) const THOUGHT_TIMEOUT: Duration = Duration::from_secs(30);
pub(crate) const RESPONSE_TIMEOUT: Duration = Duration::from_secs(60);
pub(crate) const WATCHDOG_GRACE: Duration = Duration::from_secs(5);
pub(crate) const QUEUE_SETTLE_TIMEOUT: Duration = Duration::from_secs(2);

pub(crate) const THOUGHT_TEXT_ONLY_CAP: Duration = Duration::from_millis(1_200);
pub(crate) const RESPONSE_TEXT_ONLY_CAP: Duration = Duration::from_millis(2_000);

pub(crate) const SUBMIT_DEBOUNCE: Duration = Duration::from_millis(150);

pub(crate) const CROSSFADE_DURATION: Duration = Duration::from_millis(3_000);
pub(crate) const FADE_TICK: Duration = Duration::from_millis(50);
pub(crate) const TRACK_CHANGE_DEBOUNCE: Duration = Duration::from_millis(300);
pub(crate) const MAX_CUE_DURATION: Duration = Duration::from_millis(400);

pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 128;
pub(crate) const PERSISTENCE_CHANNEL_CAPACITY: usize = 32;
