//! Shared test utilities
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use sprout_gateway::chat::{ChatGenerator, ChatReply, ChatRequest};
use sprout_gateway::stt::{
    RecognizerLink, RecognizerMessage, RecognizerParams, StreamingRecognizer, UpstreamCommand,
};
use sprout_gateway::voice::{SpeechRequest, SpeechSynthesizer, SynthesizedAudio};
use sprout_gateway::{Error, Result};
use tokio::sync::mpsc;

/// Far enough away that only the idle-timeout tests ever see one fire
pub const LONG: Duration = Duration::from_secs(3600);

/// Test-side ends of one fake upstream connection
pub struct Upstream {
    pub commands: mpsc::Receiver<UpstreamCommand>,
    pub messages: mpsc::Sender<Result<RecognizerMessage>>,
    pub params: RecognizerParams,
}

impl Upstream {
    pub async fn partial(&self, text: &str, confidence: f64) {
        self.send(text, confidence, false).await;
    }

    pub async fn finalize(&self, text: &str, confidence: f64) {
        self.send(text, confidence, true).await;
    }

    async fn send(&self, text: &str, confidence: f64, is_final: bool) {
        self.messages
            .send(Ok(RecognizerMessage {
                text: text.to_string(),
                confidence,
                is_final,
            }))
            .await
            .expect("session dropped upstream");
    }

    /// Next audio chunk; panics on any other command
    pub async fn next_audio(&mut self) -> Bytes {
        match self.commands.recv().await {
            Some(UpstreamCommand::Audio(chunk)) => chunk,
            other => panic!("expected audio, got {other:?}"),
        }
    }

    /// Wait for the session's finish command
    pub async fn expect_finish(&mut self) {
        match self.commands.recv().await {
            Some(UpstreamCommand::Finish) => {}
            other => panic!("expected finish, got {other:?}"),
        }
    }
}

/// Recognizer whose connections are driven by the test
pub struct FakeRecognizer {
    connections: mpsc::UnboundedSender<Upstream>,
    failures: AtomicUsize,
    attempts: AtomicUsize,
    delay: Duration,
}

impl FakeRecognizer {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Upstream>) {
        Self::with_delay(Duration::ZERO)
    }

    /// Connections take `delay` to establish
    pub fn with_delay(delay: Duration) -> (Arc<Self>, mpsc::UnboundedReceiver<Upstream>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let recognizer = Self {
            connections: tx,
            failures: AtomicUsize::new(0),
            attempts: AtomicUsize::new(0),
            delay,
        };
        (Arc::new(recognizer), rx)
    }

    /// Refuse the next `n` connection attempts
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StreamingRecognizer for FakeRecognizer {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn connect(&self, params: &RecognizerParams) -> Result<RecognizerLink> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let refused = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(Error::UpstreamConnect("401 Unauthorized".to_string()));
        }

        let (command_tx, command_rx) = mpsc::channel(64);
        let (message_tx, message_rx) = mpsc::channel(64);

        let _ = self.connections.send(Upstream {
            commands: command_rx,
            messages: message_tx,
            params: params.clone(),
        });

        Ok(RecognizerLink {
            commands: command_tx,
            messages: message_rx,
        })
    }
}

/// Generator that echoes a fixed reply and records requests
pub struct FakeGenerator {
    reply: Option<String>,
    delay: Duration,
    pub requests: Mutex<Vec<ChatRequest>>,
}

impl FakeGenerator {
    pub fn replying(text: &str) -> Arc<Self> {
        Self::replying_after(text, Duration::ZERO)
    }

    /// Replies only after `delay`, like a slow model
    pub fn replying_after(text: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            reply: Some(text.to_string()),
            delay,
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            reply: None,
            delay: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> Option<ChatRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl ChatGenerator for FakeGenerator {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn generate(&self, request: &ChatRequest) -> Result<ChatReply> {
        self.requests.lock().unwrap().push(request.clone());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match &self.reply {
            Some(text) => Ok(ChatReply {
                text: text.clone(),
                keywords: request.profile.interests_in(&request.utterance),
            }),
            None => Err(Error::Generator("503 Service Unavailable".to_string())),
        }
    }
}

/// Synthesizer returning the text's bytes as "audio"
pub struct FakeSynthesizer {
    fail: bool,
    pub calls: AtomicUsize,
}

impl FakeSynthesizer {
    pub fn working() -> Arc<Self> {
        Arc::new(Self {
            fail: false,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for FakeSynthesizer {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn synthesize(&self, request: &SpeechRequest) -> Result<SynthesizedAudio> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.fail {
            return Err(Error::Synthesizer("quota exceeded".to_string()));
        }

        Ok(SynthesizedAudio {
            bytes: Bytes::from(request.text.clone().into_bytes()),
            encoding: "mp3".to_string(),
        })
    }
}
