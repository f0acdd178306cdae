//! Sprout Gateway - Voice companion backend for children
//!
//! This library provides the real-time listening pipeline:
//! - Streaming transcription sessions (Deepgram live)
//! - Transcript quality gating
//! - Clarification ("repair") turns for unclear speech
//! - Conversational replies and speech synthesis
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 Client (WebSocket)                   │
//! │        audio frames  │  control  │  events           │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                 Sprout Gateway                       │
//! │  Session  │  Quality  │  Repair  │  Orchestrator     │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                   Providers                          │
//! │   Deepgram STT  │  Gemini chat  │  OpenAI/Aura TTS   │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod chat;
pub mod config;
pub mod conversation;
pub mod error;
pub mod orchestrator;
pub mod quality;
pub mod repair;
pub mod stt;
pub mod voice;

pub use chat::{ChatGenerator, ChatReply, ChatRequest, GeminiGenerator};
pub use config::Config;
pub use conversation::{AgeBand, ChildProfile, ConversationContext, EnergyLevel, Role, Turn};
pub use error::{Error, Result};
pub use orchestrator::{CompletedTurn, TurnControl, TurnEvent, TurnKind, TurnOrchestrator};
pub use quality::{QualityThresholds, QualityVerdict, evaluate};
pub use repair::{RepairConfig, RepairSelector};
pub use stt::{
    DeepgramRecognizer, FinalResult, PartialResult, SessionConfig, SessionEvent, SessionHandle,
    SessionState, StreamingRecognizer,
};
pub use voice::{SpeechRequest, SpeechSynthesizer, SynthesizedAudio, TextToSpeech};
