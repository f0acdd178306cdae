//! Repair (clarification) turn selection
//!
//! Picks a short clarifying utterance for a transcript that failed the
//! quality gate. After repeated failures it switches to a topic-change
//! prompt so the child is not stuck in a loop of "say that again".

pub mod phrases;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::conversation::{AgeBand, ChildProfile, ConversationContext, Role};
use crate::quality::QualityVerdict;
use phrases::{
    DEFAULT_CLARIFIER, DEFAULT_EMOJI, ENCOURAGE_ELABORATION, ESCALATED_EMOJIS, INTEREST_SLOT,
    STANDARD_EMOJIS, TOPIC_CHANGE,
};

/// Consecutive failed turns before switching to a topic change
pub const DEFAULT_ESCALATION_THRESHOLD: usize = 2;

/// Transcripts at most this long (in chars) with very low confidence get an elaboration prompt
const ELABORATION_MAX_CHARS: usize = 3;

/// Confidence under which a tiny transcript counts as a capture failure
const ELABORATION_MAX_CONFIDENCE: f64 = 0.4;

/// Word limit for phrases offered to the youngest band
const PRESCHOOL_MAX_WORDS: usize = 6;

/// Repair selection tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepairConfig {
    /// Recent failures at which topic-change prompts take over
    pub escalation_threshold: usize,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            escalation_threshold: DEFAULT_ESCALATION_THRESHOLD,
        }
    }
}

/// Which pool a repair phrase came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairKind {
    /// Reason-specific clarifier
    Clarify,
    /// Ask the child to say more
    Elaborate,
    /// Escalation: move the conversation somewhere else
    TopicChange,
    /// Fixed default clarifier
    Default,
}

/// Number of consecutive trailing assistant turns that were repairs
///
/// Child turns are skipped; the count stops at the first assistant turn that
/// is a regular reply.
#[must_use]
pub fn recent_failures(context: &ConversationContext) -> usize {
    context
        .turns()
        .rev()
        .filter(|t| t.role == Role::Assistant)
        .take_while(|t| phrases::is_repair_text(&t.text))
        .count()
}

/// Chooses clarification phrases
pub struct RepairSelector<R = StdRng> {
    config: RepairConfig,
    rng: R,
}

impl RepairSelector<StdRng> {
    /// Create a selector seeded from system entropy
    #[must_use]
    pub fn new(config: RepairConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }
}

impl Default for RepairSelector<StdRng> {
    fn default() -> Self {
        Self::new(RepairConfig::default())
    }
}

impl<R: Rng> RepairSelector<R> {
    /// Create a selector with an explicit random source
    pub const fn with_rng(config: RepairConfig, rng: R) -> Self {
        Self { config, rng }
    }

    #[must_use]
    pub const fn config(&self) -> &RepairConfig {
        &self.config
    }

    /// Pick a clarifying utterance ending in one emoji
    ///
    /// Never fails: when nothing applies the fixed default clarifier is used.
    pub fn select_repair(
        &mut self,
        verdict: QualityVerdict,
        transcript: &str,
        confidence: f64,
        profile: &ChildProfile,
        context: &ConversationContext,
    ) -> String {
        self.select(verdict, transcript, confidence, profile, context).0
    }

    /// Like `select_repair`, also reporting which pool was used
    pub fn select(
        &mut self,
        verdict: QualityVerdict,
        transcript: &str,
        confidence: f64,
        profile: &ChildProfile,
        context: &ConversationContext,
    ) -> (String, RepairKind) {
        let failures = recent_failures(context);
        let escalated = failures >= self.config.escalation_threshold;
        let previous = context.last_assistant().map(|t| t.text.as_str());

        let picked = if escalated {
            self.topic_change(profile, previous)
                .map(|p| (p, RepairKind::TopicChange))
        } else if transcript.chars().count() <= ELABORATION_MAX_CHARS
            && confidence < ELABORATION_MAX_CONFIDENCE
        {
            self.pick(ENCOURAGE_ELABORATION, previous)
                .map(|p| (p.to_string(), RepairKind::Elaborate))
        } else {
            phrases::pool_for(verdict)
                .and_then(|pool| self.pick_for_age(pool, profile.age_band, previous))
                .map(|p| (p.to_string(), RepairKind::Clarify))
        };

        let Some((phrase, kind)) = picked else {
            tracing::debug!(%verdict, "no repair pool applies, using default clarifier");
            return (format!("{DEFAULT_CLARIFIER} {DEFAULT_EMOJI}"), RepairKind::Default);
        };

        let emojis = if escalated { ESCALATED_EMOJIS } else { STANDARD_EMOJIS };
        let emoji = emojis.choose(&mut self.rng).copied().unwrap_or(DEFAULT_EMOJI);

        tracing::debug!(%verdict, failures, ?kind, "selected repair phrase");
        (format!("{phrase} {emoji}"), kind)
    }

    fn topic_change(&mut self, profile: &ChildProfile, previous: Option<&str>) -> Option<String> {
        let interests: Vec<&String> = profile.interests.iter().filter(|i| !i.is_empty()).collect();

        let candidates: Vec<&'static str> = TOPIC_CHANGE
            .iter()
            .copied()
            .filter(|p| !p.contains(INTEREST_SLOT) || !interests.is_empty())
            .collect();

        let phrase = self.pick(&candidates, previous)?;
        if phrase.contains(INTEREST_SLOT) {
            let interest = interests.choose(&mut self.rng)?;
            return Some(phrase.replace(INTEREST_SLOT, interest));
        }
        Some(phrase.to_string())
    }

    fn pick_for_age(
        &mut self,
        pool: &[&'static str],
        band: AgeBand,
        previous: Option<&str>,
    ) -> Option<&'static str> {
        if band == AgeBand::Preschool {
            let short: Vec<&'static str> = pool
                .iter()
                .copied()
                .filter(|p| phrases::word_count(p) <= PRESCHOOL_MAX_WORDS)
                .collect();
            if !short.is_empty() {
                return self.pick(&short, previous);
            }
        }
        self.pick(pool, previous)
    }

    /// Uniform choice, skipping the phrase used last time when there is an alternative
    fn pick(&mut self, pool: &[&'static str], previous: Option<&str>) -> Option<&'static str> {
        let fresh: Vec<&'static str> = match previous {
            Some(prev) => pool
                .iter()
                .copied()
                .filter(|p| !phrases::produced(p, prev))
                .collect(),
            None => pool.to_vec(),
        };

        if fresh.is_empty() {
            pool.choose(&mut self.rng).copied()
        } else {
            fresh.choose(&mut self.rng).copied()
        }
    }
}
