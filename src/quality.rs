//! Transcript quality gate
//!
//! Classifies a finalized transcript as acceptable or as a specific
//! low-quality reason. Rules are checked in a fixed order and the first
//! match wins: duration, text length, confidence, filler-only, unintelligible.
//! A transcript too short to pass the length rule that is itself a filler
//! word ("um") reports `FillerOnly` rather than `TooShortText`.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Shortest utterance that can carry meaning
pub const MIN_DURATION_MS: u64 = 300;

/// Fewest characters a transcript may have
pub const MIN_TEXT_CHARS: usize = 3;

/// Recognizer confidence below which a transcript is rejected
pub const MIN_CONFIDENCE: f64 = 0.6;

/// Transcript made only of hesitation sounds ("um", "uhh, hmm", "er...")
static FILLER_ONLY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(?:u+m+|u+h+|e+r+m*|h*m+|a+h+)[\s[:punct:]]*)+$")
        .unwrap_or_else(|e| unreachable!("filler pattern is valid: {e}"))
});

/// Markers recognizers and clients insert for speech they could not decode
const UNINTELLIGIBLE_MARKERS: &[&str] = &["[inaudible]", "[unintelligible]", "[unclear]", "***"];

/// Outcome of the quality gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityVerdict {
    Acceptable,
    TooShortDuration,
    TooShortText,
    LowConfidence,
    FillerOnly,
    Unintelligible,
}

impl QualityVerdict {
    #[must_use]
    pub const fn is_acceptable(self) -> bool {
        matches!(self, Self::Acceptable)
    }

    /// Stable reason string, used to key repair phrase pools
    #[must_use]
    pub const fn reason(self) -> &'static str {
        match self {
            Self::Acceptable => "acceptable",
            Self::TooShortDuration => "too_short_duration",
            Self::TooShortText => "too_short_text",
            Self::LowConfidence => "low_confidence",
            Self::FillerOnly => "filler_only",
            Self::Unintelligible => "unintelligible",
        }
    }
}

impl fmt::Display for QualityVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}

/// Tunable limits for the quality gate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityThresholds {
    pub min_duration_ms: u64,
    pub min_text_chars: usize,
    pub min_confidence: f64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            min_duration_ms: MIN_DURATION_MS,
            min_text_chars: MIN_TEXT_CHARS,
            min_confidence: MIN_CONFIDENCE,
        }
    }
}

impl QualityThresholds {
    /// Classify a finalized transcript
    #[must_use]
    pub fn evaluate(&self, transcript: &str, confidence: f64, duration_ms: u64) -> QualityVerdict {
        if duration_ms < self.min_duration_ms {
            return QualityVerdict::TooShortDuration;
        }

        let normalized = transcript.trim().to_lowercase();

        if transcript.chars().count() < self.min_text_chars {
            if is_filler_only(&normalized) {
                return QualityVerdict::FillerOnly;
            }
            return QualityVerdict::TooShortText;
        }

        if confidence.is_nan() || confidence < self.min_confidence {
            return QualityVerdict::LowConfidence;
        }

        if is_filler_only(&normalized) {
            return QualityVerdict::FillerOnly;
        }

        if UNINTELLIGIBLE_MARKERS.iter().any(|m| normalized.contains(m)) {
            return QualityVerdict::Unintelligible;
        }

        QualityVerdict::Acceptable
    }
}

/// Classify a finalized transcript using the default thresholds
#[must_use]
pub fn evaluate(transcript: &str, confidence: f64, duration_ms: u64) -> QualityVerdict {
    QualityThresholds::default().evaluate(transcript, confidence, duration_ms)
}

fn is_filler_only(normalized: &str) -> bool {
    !normalized.is_empty() && FILLER_ONLY.is_match(normalized)
}
