//! Streaming speech-to-text
//!
//! The session (`session.rs`) owns the per-connection state machine. The
//! upstream recognizer sits behind `StreamingRecognizer`; `deepgram.rs` is the
//! live implementation.

mod deepgram;
mod session;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::Result;
use crate::quality::QualityVerdict;

pub use deepgram::{DEEPGRAM_LISTEN_URL, DeepgramRecognizer, parse_message};
pub use session::{
    SessionConfig, SessionEvent, SessionHandle, SessionInput, SessionSender, SessionState,
    TranscriptionSession,
};

/// Parameters sent upstream when a streaming connection is opened
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognizerParams {
    /// Recognition model (e.g. "nova-2")
    pub model: String,

    /// Language code, or "multi" for automatic detection
    pub language: String,

    /// Add punctuation and capitalization
    pub punctuate: bool,

    /// Emit non-terminal results while the child is still speaking
    pub interim_results: bool,

    /// Silence (ms) the recognizer waits before ending an utterance
    pub endpointing_ms: u32,

    /// Raw audio encoding (e.g. "linear16"); `None` for container formats
    pub encoding: Option<String>,

    /// Sample rate for raw encodings
    pub sample_rate: Option<u32>,
}

impl Default for RecognizerParams {
    fn default() -> Self {
        Self {
            model: "nova-2".to_string(),
            language: "en-US".to_string(),
            punctuate: true,
            interim_results: true,
            endpointing_ms: 300,
            encoding: None,
            sample_rate: None,
        }
    }
}

/// One message from the upstream recognizer
#[derive(Debug, Clone, PartialEq)]
pub struct RecognizerMessage {
    /// Best-guess transcript
    pub text: String,

    /// Confidence of the best guess (0..1)
    pub confidence: f64,

    /// Terminal message for the current utterance
    pub is_final: bool,
}

/// Command for the upstream writer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamCommand {
    /// Audio to forward verbatim
    Audio(Bytes),
    /// Flush pending audio and close the stream once results are delivered
    Finish,
}

/// Duplex link to an upstream recognizer connection
///
/// Dropping the link tears the connection down. The message channel ends
/// when the upstream closes.
#[derive(Debug)]
pub struct RecognizerLink {
    pub commands: mpsc::Sender<UpstreamCommand>,
    pub messages: mpsc::Receiver<Result<RecognizerMessage>>,
}

/// Opens streaming recognition connections
#[async_trait]
pub trait StreamingRecognizer: Send + Sync {
    /// Provider name for logs
    fn name(&self) -> &'static str;

    /// Open one connection for one session
    ///
    /// # Errors
    ///
    /// Returns `Error::UpstreamConnect` if the recognizer is unreachable or
    /// rejects the credentials
    async fn connect(&self, params: &RecognizerParams) -> Result<RecognizerLink>;
}

/// Non-terminal transcription result
///
/// Each partial replaces the previous one; text and confidence may regress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialResult {
    pub text: String,
    pub confidence: f64,
    pub is_final: bool,
    pub elapsed_ms: u64,
}

/// Terminal transcription result with its quality verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalResult {
    pub text: String,
    pub confidence: f64,
    pub elapsed_ms: u64,
    pub verdict: QualityVerdict,
}
