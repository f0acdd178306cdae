//! Conversation history and child profile

use std::collections::{BTreeSet, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::quality::QualityVerdict;

/// Default number of turns kept in a conversation window
pub const DEFAULT_CONTEXT_WINDOW: usize = 12;

/// Speaker of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The child
    Child,
    /// The companion
    Assistant,
}

/// One utterance in the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    #[must_use]
    pub fn child(text: impl Into<String>) -> Self {
        Self {
            role: Role::Child,
            text: text.into(),
        }
    }

    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }

    /// Marker recorded in place of a child utterance that failed the quality gate
    #[must_use]
    pub fn failed_attempt(verdict: QualityVerdict) -> Self {
        Self::child(format!("[unclear: {}]", verdict.reason()))
    }
}

/// Bounded, insertion-ordered window of recent turns
///
/// Pushing beyond capacity drops the oldest turn.
#[derive(Debug, Clone)]
pub struct ConversationContext {
    turns: VecDeque<Turn>,
    capacity: usize,
}

impl Default for ConversationContext {
    fn default() -> Self {
        Self::new(DEFAULT_CONTEXT_WINDOW)
    }
}

impl ConversationContext {
    /// Create an empty context holding at most `capacity` turns
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            turns: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Build a context from existing turns, keeping only the most recent ones
    #[must_use]
    pub fn from_turns(capacity: usize, turns: impl IntoIterator<Item = Turn>) -> Self {
        let mut context = Self::new(capacity);
        for turn in turns {
            context.push(turn);
        }
        context
    }

    pub fn push(&mut self, turn: Turn) {
        if self.turns.len() >= self.capacity {
            self.turns.pop_front();
        }
        self.turns.push_back(turn);
    }

    /// Turns from oldest to newest
    pub fn turns(&self) -> impl DoubleEndedIterator<Item = &Turn> + ExactSizeIterator {
        self.turns.iter()
    }

    /// Most recent assistant turn, if any
    #[must_use]
    pub fn last_assistant(&self) -> Option<&Turn> {
        self.turns.iter().rev().find(|t| t.role == Role::Assistant)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// Compact "speaker: text" rendering of the last `limit` turns
    ///
    /// Returns `None` when the context is empty.
    #[must_use]
    pub fn summary(&self, limit: usize) -> Option<String> {
        if self.turns.is_empty() || limit == 0 {
            return None;
        }

        let skip = self.turns.len().saturating_sub(limit);
        let lines: Vec<String> = self
            .turns
            .iter()
            .skip(skip)
            .map(|t| {
                let speaker = match t.role {
                    Role::Child => "child",
                    Role::Assistant => "companion",
                };
                format!("{speaker}: {}", t.text)
            })
            .collect();

        Some(lines.join("\n"))
    }
}

/// Age band used to pick age-appropriate phrasing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AgeBand {
    #[serde(rename = "3-5")]
    Preschool,
    #[default]
    #[serde(rename = "6-8")]
    EarlyReader,
    #[serde(rename = "9-12")]
    Tween,
}

impl AgeBand {
    /// Band containing a numeric age (clamped into the supported range)
    #[must_use]
    pub const fn from_age(age: u8) -> Self {
        match age {
            0..=5 => Self::Preschool,
            6..=8 => Self::EarlyReader,
            _ => Self::Tween,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Preschool => "3-5",
            Self::EarlyReader => "6-8",
            Self::Tween => "9-12",
        }
    }
}

impl fmt::Display for AgeBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How lively the child usually is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnergyLevel {
    Calm,
    #[default]
    Balanced,
    Energetic,
}

/// Read-only description of the child in the conversation
///
/// Missing fields fall back to the default profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChildProfile {
    pub name: String,
    pub age_band: AgeBand,
    pub age: u8,
    pub interests: BTreeSet<String>,
    pub energy_level: EnergyLevel,
}

impl Default for ChildProfile {
    fn default() -> Self {
        Self {
            name: "friend".to_string(),
            age_band: AgeBand::EarlyReader,
            age: 7,
            interests: BTreeSet::new(),
            energy_level: EnergyLevel::Balanced,
        }
    }
}

impl ChildProfile {
    /// Interests mentioned in `text` (case-insensitive)
    #[must_use]
    pub fn interests_in(&self, text: &str) -> Vec<String> {
        let lower = text.to_lowercase();
        self.interests
            .iter()
            .filter(|i| !i.is_empty() && lower.contains(&i.to_lowercase()))
            .cloned()
            .collect()
    }
}
