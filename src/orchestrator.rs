//! Turn orchestration
//!
//! Consumes session events and turns each `FinalResult` into exactly one
//! reply or repair, with synthesized audio when the synthesizer cooperates.

use std::sync::Arc;

use rand::Rng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::Result;
use crate::chat::{ChatGenerator, ChatReply, ChatRequest};
use crate::conversation::{ChildProfile, ConversationContext, Turn};
use crate::repair::{RepairConfig, RepairSelector};
use crate::stt::{FinalResult, SessionEvent};
use crate::voice::{SpeechRequest, SpeechSynthesizer, SynthesizedAudio};

/// Said when the chat generator fails
///
/// Not a clarification phrase, so it ends a run of repairs.
pub const FALLBACK_REPLY: &str = "Ooh, that sounds fun! What else can you tell me?";

/// Turns of context handed to the chat generator
pub const DEFAULT_MEMORY_TURNS: usize = 6;

/// Log `result`'s error and substitute `fallback`
pub fn with_fallback<T>(result: Result<T>, fallback: T, what: &'static str) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(error = %e, what, "using fallback");
            fallback
        }
    }
}

/// Orchestrator tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub repair: RepairConfig,
    /// Recent turns rendered into the chat request
    pub memory_turns: usize,
    /// Delivery hint passed to the synthesizer
    pub speech_style: Option<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            repair: RepairConfig::default(),
            memory_turns: DEFAULT_MEMORY_TURNS,
            speech_style: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnKind {
    Reply,
    Repair,
}

/// Outcome of one turn
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedTurn {
    pub kind: TurnKind,
    /// What the companion says
    pub text: String,
    /// `None` when synthesis failed or is not configured
    pub audio: Option<SynthesizedAudio>,
    pub keywords: Vec<String>,
}

/// Changes requested by the client between turns
#[derive(Debug, Clone, PartialEq)]
pub enum TurnControl {
    SetProfile(ChildProfile),
    ResetContext,
}

/// Output toward the client, in delivery order
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    /// Session event passed through unchanged
    Session(SessionEvent),
    Repair { text: String },
    Reply { text: String, keywords: Vec<String> },
    Audio(SynthesizedAudio),
    TurnComplete { kind: TurnKind },
}

/// Drives conversational turns for one connection
pub struct TurnOrchestrator<R = StdRng> {
    generator: Arc<dyn ChatGenerator>,
    synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
    repair: RepairSelector<R>,
    config: OrchestratorConfig,
}

impl TurnOrchestrator<StdRng> {
    #[must_use]
    pub fn new(
        generator: Arc<dyn ChatGenerator>,
        synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
        config: OrchestratorConfig,
    ) -> Self {
        let repair = RepairSelector::new(config.repair);
        Self::with_selector(generator, synthesizer, repair, config)
    }
}

impl<R: Rng + Send> TurnOrchestrator<R> {
    /// Create an orchestrator around an existing repair selector
    pub fn with_selector(
        generator: Arc<dyn ChatGenerator>,
        synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
        repair: RepairSelector<R>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            generator,
            synthesizer,
            repair,
            config,
        }
    }

    /// Complete one turn for a finalized utterance
    ///
    /// Always produces a response. Appends the child turn (or an unclear
    /// marker) and the companion turn to `context`.
    pub async fn complete_turn(
        &mut self,
        result: &FinalResult,
        profile: &ChildProfile,
        context: &mut ConversationContext,
    ) -> CompletedTurn {
        let verdict = result.verdict;

        let (kind, text, keywords, child_turn) = if verdict.is_acceptable() {
            let reply = self.reply(result, profile, context).await;
            (TurnKind::Reply, reply.text, reply.keywords, Turn::child(result.text.as_str()))
        } else {
            let text = self.repair.select_repair(
                verdict,
                &result.text,
                result.confidence,
                profile,
                context,
            );
            (TurnKind::Repair, text, Vec::new(), Turn::failed_attempt(verdict))
        };

        let audio = self.speak(&text).await;

        context.push(child_turn);
        context.push(Turn::assistant(text.as_str()));

        tracing::info!(
            kind = ?kind,
            %verdict,
            has_audio = audio.is_some(),
            "turn complete"
        );

        CompletedTurn {
            kind,
            text,
            audio,
            keywords,
        }
    }

    async fn reply(
        &self,
        result: &FinalResult,
        profile: &ChildProfile,
        context: &ConversationContext,
    ) -> ChatReply {
        let request = ChatRequest {
            utterance: result.text.clone(),
            profile: profile.clone(),
            memory_summary: context.summary(self.config.memory_turns),
        };

        let generated = self
            .generator
            .generate(&request)
            .await
            .and_then(|reply| {
                if reply.text.trim().is_empty() {
                    Err(crate::Error::Generator("blank reply".to_string()))
                } else {
                    Ok(reply)
                }
            });

        let fallback = ChatReply {
            text: FALLBACK_REPLY.to_string(),
            keywords: profile.interests_in(&result.text),
        };

        with_fallback(generated, fallback, "chat reply")
    }

    async fn speak(&self, text: &str) -> Option<SynthesizedAudio> {
        let synthesizer = self.synthesizer.as_ref()?;
        let request = SpeechRequest {
            text: text.to_string(),
            style: self.config.speech_style.clone(),
        };

        with_fallback(synthesizer.synthesize(&request).await.map(Some), None, "speech")
    }

    /// Run turns until the session's event stream ends
    ///
    /// Session events are forwarded as they arrive, including while a turn's
    /// chat and speech calls are in flight. Finals and control messages are
    /// queued to a single turn worker in arrival order, so turns run one at a
    /// time and each turn's own events keep their order. Returns the context as it
    /// stood when the stream ended.
    pub async fn drive(
        self,
        events: mpsc::Receiver<SessionEvent>,
        control: mpsc::Receiver<TurnControl>,
        outgoing: mpsc::Sender<TurnEvent>,
        profile: ChildProfile,
        context: ConversationContext,
    ) -> ConversationContext {
        let (jobs_tx, jobs_rx) = mpsc::channel(TURN_QUEUE);

        let relay = relay(events, control, jobs_tx, outgoing.clone());
        let turns = self.run_turns(jobs_rx, outgoing, profile, context);

        let ((), context) = tokio::join!(relay, turns);
        context
    }

    async fn run_turns(
        mut self,
        mut jobs: mpsc::Receiver<TurnJob>,
        outgoing: mpsc::Sender<TurnEvent>,
        mut profile: ChildProfile,
        mut context: ConversationContext,
    ) -> ConversationContext {
        while let Some(job) = jobs.recv().await {
            match job {
                TurnJob::Control(TurnControl::SetProfile(next)) => {
                    tracing::debug!(age_band = %next.age_band, "profile updated");
                    profile = next;
                }
                TurnJob::Control(TurnControl::ResetContext) => {
                    tracing::debug!(turns = context.len(), "context reset");
                    context.clear();
                }
                TurnJob::Final(result) => {
                    let turn = self.complete_turn(&result, &profile, &mut context).await;
                    if !deliver(turn, &outgoing).await {
                        break;
                    }
                }
            }
        }

        context
    }
}

/// Work handed from the relay to the turn worker
enum TurnJob {
    Control(TurnControl),
    Final(FinalResult),
}

/// Finals and control messages waiting for the turn worker
const TURN_QUEUE: usize = 16;

/// Forward session events and queue turn work until either side goes away
async fn relay(
    mut events: mpsc::Receiver<SessionEvent>,
    mut control: mpsc::Receiver<TurnControl>,
    jobs: mpsc::Sender<TurnJob>,
    outgoing: mpsc::Sender<TurnEvent>,
) {
    let mut control_open = true;

    loop {
        let job = tokio::select! {
            biased;

            command = control.recv(), if control_open => match command {
                Some(command) => TurnJob::Control(command),
                None => {
                    control_open = false;
                    continue;
                }
            },

            event = events.recv() => {
                let Some(event) = event else { break };

                let finished = match &event {
                    SessionEvent::Final(result) => Some(result.clone()),
                    _ => None,
                };

                if outgoing.send(TurnEvent::Session(event)).await.is_err() {
                    break;
                }

                match finished {
                    Some(result) => TurnJob::Final(result),
                    None => continue,
                }
            }
        };

        if jobs.send(job).await.is_err() {
            tracing::debug!("turn worker gone, stopping relay");
            break;
        }
    }
}

/// Send a turn's events; false once the receiver is gone
async fn deliver(turn: CompletedTurn, outgoing: &mpsc::Sender<TurnEvent>) -> bool {
    let kind = turn.kind;
    let text_event = match kind {
        TurnKind::Reply => TurnEvent::Reply {
            text: turn.text,
            keywords: turn.keywords,
        },
        TurnKind::Repair => TurnEvent::Repair { text: turn.text },
    };

    let mut sequence = vec![text_event];
    if let Some(audio) = turn.audio {
        sequence.push(TurnEvent::Audio(audio));
    }
    sequence.push(TurnEvent::TurnComplete { kind });

    for event in sequence {
        if outgoing.send(event).await.is_err() {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::repair::phrases::is_repair_text;

    #[test]
    fn fallback_reply_is_not_a_repair() {
        assert!(!is_repair_text(FALLBACK_REPLY));
    }

    #[test]
    fn with_fallback_substitutes_on_error() {
        let failed: Result<u32> = Err(Error::Generator("down".to_string()));
        assert_eq!(with_fallback(failed, 7, "test"), 7);
        assert_eq!(with_fallback(Ok(3), 7, "test"), 3);
    }

    #[test]
    fn turn_kind_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&TurnKind::Repair).unwrap(), "\"repair\"");
    }
}
