use once_cell::sync::Lazy;
use regex::Regex;

static SUBMIT_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bsubmit").expect("valid submit token pattern"));

static IN_SENTENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\bsubmit\s+(?:a|an|the|my|this)\b|\bsubmitted\b|\bsubmitting\b|\bsubmission\b",
    )
    .expect("valid in-sentence pattern")
});

static TRAILING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bsubmit[\s\p{P}]*$").expect("valid trailing pattern"));

static INTENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:want to|going to|need to|to|will|can|should|must)\s*$")
        .expect("valid intent pattern")
});

/// Why a transcript was not treated as a submit command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    NoCommand,
    /// "submit" used as an ordinary verb or noun.
    InSentence,
    NotTrailing,
    /// "submit" follows a modal or intent phrase ("want to submit").
    Intent,
    /// Nothing left once the command is removed.
    EmptyMessage,
}

impl Rejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rejection::NoCommand => "no_command",
            Rejection::InSentence => "in_sentence",
            Rejection::NotTrailing => "not_trailing",
            Rejection::Intent => "intent",
            Rejection::EmptyMessage => "empty_message",
        }
    }
}

/// Returns the message with the trailing command removed.
pub fn match_submit(text: &str) -> Result<String, Rejection> {
    if !SUBMIT_TOKEN.is_match(text) {
        return Err(Rejection::NoCommand);
    }
    if IN_SENTENCE.is_match(text) {
        return Err(Rejection::InSentence);
    }
    let Some(trailing) = TRAILING.find(text) else {
        return Err(Rejection::NotTrailing);
    };

    let prefix = &text[..trailing.start()];
    if INTENT.is_match(prefix) {
        return Err(Rejection::Intent);
    }

    let cleaned = clean_prefix(prefix);
    if cleaned.is_empty() {
        return Err(Rejection::EmptyMessage);
    }
    Ok(cleaned.to_string())
}

/// Drops separators left between the message and the command. Sentence
/// punctuation stays.
fn clean_prefix(prefix: &str) -> &str {
    prefix.trim_end_matches(|ch: char| {
        ch.is_whitespace() || matches!(ch, ',' | ';' | ':' | '-' | '–' | '—' | '…')
    })
}
