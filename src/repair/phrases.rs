//! Clarification phrase pools
//!
//! Phrases carry no trailing emoji; the selector appends one.

use crate::quality::QualityVerdict;

/// Used when no pool applies
pub const DEFAULT_CLARIFIER: &str = "Can you say that again?";

/// Paired with `DEFAULT_CLARIFIER`
pub const DEFAULT_EMOJI: &str = "😊";

/// Appended to ordinary clarifiers
pub const STANDARD_EMOJIS: &[&str] = &["😊", "🙂", "👂", "🌟"];

/// Appended once repeated failures have been detected
pub const ESCALATED_EMOJIS: &[&str] = &["🤗", "🌈", "🎈"];

/// Slot replaced with one of the child's interests
pub const INTEREST_SLOT: &str = "{interest}";

const TOO_SHORT_DURATION: &[&str] = &[
    "Oops, that was super quick! Say it again?",
    "I missed that! Can you say it slower?",
    "Say that one more time?",
    "Was that a word? Try again!",
];

const TOO_SHORT_TEXT: &[&str] = &[
    "Can you tell me a little more?",
    "I heard a tiny bit. Say more?",
    "Tell me more?",
    "Say a bit more?",
    "Hmm, can you say a few more words?",
];

const LOW_CONFIDENCE: &[&str] = &[
    "I didn't quite catch that. Say it again?",
    "My ears got wiggly! One more time?",
    "Can you say that a bit louder?",
    "Say it again, please?",
];

const FILLER_ONLY: &[&str] = &[
    "Take your time, I'm listening!",
    "Still thinking? That's okay, go ahead.",
    "I'm right here. What's on your mind?",
    "No rush, friend!",
];

const UNINTELLIGIBLE: &[&str] = &[
    "Oops, that got jumbled. Try again?",
    "I couldn't hear that part. Once more?",
    "Can you say that a little more clearly?",
];

/// For severe capture failures the reason pools don't address
pub const ENCOURAGE_ELABORATION: &[&str] = &[
    "Can you use more words to tell me?",
    "I want to hear more! Keep going?",
    "Tell me the whole thing?",
];

/// Escalation after repeated failures
pub const TOPIC_CHANGE: &[&str] = &[
    "Let's try something new! Want a story?",
    "How about we sing a fun rhyme together?",
    "Want to talk about {interest} instead?",
    "Let's play a guessing game! Ready?",
];

/// Pool for a verdict's reason, if one exists
#[must_use]
pub fn pool_for(verdict: QualityVerdict) -> Option<&'static [&'static str]> {
    match verdict.reason() {
        "too_short_duration" => Some(TOO_SHORT_DURATION),
        "too_short_text" => Some(TOO_SHORT_TEXT),
        "low_confidence" => Some(LOW_CONFIDENCE),
        "filler_only" => Some(FILLER_ONLY),
        "unintelligible" => Some(UNINTELLIGIBLE),
        _ => None,
    }
}

fn all_pools() -> impl Iterator<Item = &'static str> {
    [
        TOO_SHORT_DURATION,
        TOO_SHORT_TEXT,
        LOW_CONFIDENCE,
        FILLER_ONLY,
        UNINTELLIGIBLE,
        ENCOURAGE_ELABORATION,
        TOPIC_CHANGE,
    ]
    .into_iter()
    .flatten()
    .copied()
    .chain(std::iter::once(DEFAULT_CLARIFIER))
}

/// Whether `phrase` was used to produce `text`
///
/// The fixed parts around an interest slot must all appear, in order.
#[must_use]
pub fn produced(phrase: &str, text: &str) -> bool {
    let mut rest = text;
    let mut matched_any = false;
    for part in phrase.split(INTEREST_SLOT).map(str::trim).filter(|p| !p.is_empty()) {
        let Some(idx) = rest.find(part) else {
            return false;
        };
        rest = &rest[idx + part.len()..];
        matched_any = true;
    }
    matched_any
}

/// Whether an assistant utterance is one of our clarification phrases
#[must_use]
pub fn is_repair_text(text: &str) -> bool {
    all_pools().any(|p| produced(p, text))
}

#[must_use]
pub fn word_count(phrase: &str) -> usize {
    phrase.split_whitespace().count()
}
