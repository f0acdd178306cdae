//! Streaming transcription session
//!
//! One session per client connection. Audio is relayed to the upstream
//! recognizer in arrival order and recognizer messages are relayed back in
//! the order produced. Each terminal message becomes exactly one
//! `FinalResult` with a quality verdict.
//!
//! ```text
//! Idle ──audio/start──▶ Connecting ──ok──▶ Streaming ──stop──▶ Finalizing ──drained──▶ Idle
//!   ▲                       │ err                │ err/idle timeout
//!   └───────────────────────┴────────────────────┘
//! any state ──client gone──▶ Closed
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::{
    FinalResult, PartialResult, RecognizerLink, RecognizerMessage, RecognizerParams,
    StreamingRecognizer, UpstreamCommand,
};
use crate::quality::QualityThresholds;
use crate::{Error, Result};

const INPUT_CAPACITY: usize = 64;
const EVENT_CAPACITY: usize = 64;

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No upstream connection
    Idle,
    /// Upstream connection being established
    Connecting,
    /// Relaying audio and results
    Streaming,
    /// Stop received, draining trailing results
    Finalizing,
    /// Client gone; terminal
    Closed,
}

/// Input from the client side
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionInput {
    /// Audio chunk, forwarded verbatim
    Audio(Bytes),
    /// Connect upstream without waiting for audio
    Start,
    /// Flush and close the upstream connection
    Stop,
}

/// Event emitted to the caller
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Upstream connection established
    Connected,
    /// Non-terminal result for the current utterance
    Partial(PartialResult),
    /// Terminal result for the current utterance
    Final(FinalResult),
    /// Infrastructure failure; the session is back in `Idle`
    Error { message: String },
    /// Upstream closed after a stop; the session is back in `Idle`
    Closed,
}

/// Session tuning
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Parameters for each upstream connection
    pub params: RecognizerParams,

    /// Quality gate applied to terminal results
    pub thresholds: QualityThresholds,

    /// Limit on establishing the upstream connection
    pub connect_timeout: Duration,

    /// Limit on a streaming connection with neither audio nor results
    pub idle_timeout: Duration,

    /// Limit on waiting for trailing results after a stop
    pub drain_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            params: RecognizerParams::default(),
            thresholds: QualityThresholds::default(),
            connect_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(30),
            drain_timeout: Duration::from_secs(5),
        }
    }
}

/// Cloneable input side of a running session
#[derive(Debug, Clone)]
pub struct SessionSender {
    tx: mpsc::Sender<SessionInput>,
}

impl SessionSender {
    /// Send an input to the session
    ///
    /// # Errors
    ///
    /// Returns `Error::SessionClosed` if the session task has ended
    pub async fn send(&self, input: SessionInput) -> Result<()> {
        self.tx.send(input).await.map_err(|_| Error::SessionClosed)
    }

    /// Send an audio chunk
    ///
    /// # Errors
    ///
    /// Returns `Error::SessionClosed` if the session task has ended
    pub async fn audio(&self, chunk: impl Into<Bytes>) -> Result<()> {
        self.send(SessionInput::Audio(chunk.into())).await
    }

    /// Connect upstream ahead of the first chunk
    ///
    /// # Errors
    ///
    /// Returns `Error::SessionClosed` if the session task has ended
    pub async fn start(&self) -> Result<()> {
        self.send(SessionInput::Start).await
    }

    /// Flush and close the current upstream connection
    ///
    /// # Errors
    ///
    /// Returns `Error::SessionClosed` if the session task has ended
    pub async fn stop(&self) -> Result<()> {
        self.send(SessionInput::Stop).await
    }
}

/// Handle to a spawned session task
///
/// Dropping every `SessionSender` (including the one held here) closes the
/// session.
pub struct SessionHandle {
    sender: SessionSender,
    events: mpsc::Receiver<SessionEvent>,
    state: watch::Receiver<SessionState>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Spawn a session on the current runtime
    pub fn spawn(
        id: impl Into<String>,
        recognizer: Arc<dyn StreamingRecognizer>,
        config: SessionConfig,
    ) -> Self {
        let (input_tx, input_rx) = mpsc::channel(INPUT_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);
        let (session, state) = TranscriptionSession::new(id.into(), recognizer, config, event_tx);
        let task = tokio::spawn(session.run(input_rx));

        Self {
            sender: SessionSender { tx: input_tx },
            events: event_rx,
            state,
            task,
        }
    }

    #[must_use]
    pub fn sender(&self) -> SessionSender {
        self.sender.clone()
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Subscribe to state changes
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Next event; `None` once the session has ended
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    /// Split into input side, event stream and task
    #[must_use]
    pub fn into_parts(self) -> (SessionSender, mpsc::Receiver<SessionEvent>, JoinHandle<()>) {
        (self.sender, self.events, self.task)
    }
}

/// Per-connection state machine
pub struct TranscriptionSession {
    id: String,
    recognizer: Arc<dyn StreamingRecognizer>,
    config: SessionConfig,
    state: SessionState,
    state_tx: watch::Sender<SessionState>,
    events: mpsc::Sender<SessionEvent>,
    link: Option<RecognizerLink>,
    /// Inputs received while connecting or draining
    pending: VecDeque<SessionInput>,
    utterance_start: Option<Instant>,
    last_activity: Instant,
}

impl TranscriptionSession {
    /// Create a session that reports to `events`
    #[must_use]
    pub fn new(
        id: String,
        recognizer: Arc<dyn StreamingRecognizer>,
        config: SessionConfig,
        events: mpsc::Sender<SessionEvent>,
    ) -> (Self, watch::Receiver<SessionState>) {
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        let session = Self {
            id,
            recognizer,
            config,
            state: SessionState::Idle,
            state_tx,
            events,
            link: None,
            pending: VecDeque::new(),
            utterance_start: None,
            last_activity: Instant::now(),
        };
        (session, state_rx)
    }

    /// Drive the session until the client side goes away
    pub async fn run(mut self, mut inputs: mpsc::Receiver<SessionInput>) {
        tracing::debug!(session_id = %self.id, recognizer = self.recognizer.name(), "session started");

        loop {
            match self.state {
                SessionState::Idle | SessionState::Connecting => self.idle(&mut inputs).await,
                SessionState::Streaming => self.stream(&mut inputs).await,
                SessionState::Finalizing => self.finalize(&mut inputs).await,
                SessionState::Closed => break,
            }
        }

        self.link = None;
        tracing::debug!(session_id = %self.id, "session closed");
    }

    async fn idle(&mut self, inputs: &mut mpsc::Receiver<SessionInput>) {
        let input = match self.pending.pop_front() {
            Some(input) => Some(input),
            None => inputs.recv().await,
        };

        match input {
            None => self.set_state(SessionState::Closed),
            Some(SessionInput::Start) => self.connect(inputs, None).await,
            Some(SessionInput::Audio(chunk)) => {
                if self.accept_chunk(&chunk) {
                    self.connect(inputs, Some(chunk)).await;
                }
            }
            Some(SessionInput::Stop) => {
                tracing::debug!(session_id = %self.id, "stop while idle, nothing to flush");
            }
        }
    }

    async fn connect(&mut self, inputs: &mut mpsc::Receiver<SessionInput>, first: Option<Bytes>) {
        self.set_state(SessionState::Connecting);

        let recognizer = Arc::clone(&self.recognizer);
        let params = self.config.params.clone();
        let connecting = tokio::time::timeout(self.config.connect_timeout, async move {
            recognizer.connect(&params).await
        });
        tokio::pin!(connecting);

        // Keep reading so a client disconnect is noticed while connecting
        let outcome = loop {
            tokio::select! {
                outcome = &mut connecting => break outcome,
                input = inputs.recv() => match input {
                    Some(input) => self.pending.push_back(input),
                    None => {
                        tracing::debug!(session_id = %self.id, "client left while connecting");
                        self.set_state(SessionState::Closed);
                        return;
                    }
                },
            }
        };

        let result = outcome
            .unwrap_or_else(|_| Err(Error::Timeout("recognizer connect".to_string())));

        match result {
            Ok(link) => {
                tracing::info!(session_id = %self.id, recognizer = self.recognizer.name(), "upstream connected");
                self.link = Some(link);
                self.last_activity = Instant::now();
                self.utterance_start = Some(self.last_activity);
                self.set_state(SessionState::Streaming);
                self.emit(SessionEvent::Connected).await;
                if let Some(chunk) = first {
                    self.forward_audio(chunk).await;
                }
            }
            Err(e) => {
                let dropped = self
                    .pending
                    .iter()
                    .filter(|i| matches!(i, SessionInput::Audio(_)))
                    .count();
                self.pending.clear();
                tracing::error!(session_id = %self.id, error = %e, dropped_chunks = dropped, "upstream connect failed");
                self.set_state(SessionState::Idle);
                self.emit(SessionEvent::Error {
                    message: e.to_string(),
                })
                .await;
            }
        }
    }

    async fn stream(&mut self, inputs: &mut mpsc::Receiver<SessionInput>) {
        if let Some(input) = self.pending.pop_front() {
            self.on_input(Some(input)).await;
            return;
        }

        let deadline = deadline_after(self.last_activity, self.config.idle_timeout);
        let Some(link) = self.link.as_mut() else {
            self.set_state(SessionState::Idle);
            return;
        };

        tokio::select! {
            input = inputs.recv() => self.on_input(input).await,
            message = link.messages.recv() => self.on_message(message).await,
            () = tokio::time::sleep_until(deadline) => {
                let secs = self.config.idle_timeout.as_secs();
                self.fail(Error::Timeout(format!("no audio or results for {secs}s"))).await;
            }
        }
    }

    async fn on_input(&mut self, input: Option<SessionInput>) {
        match input {
            None => {
                tracing::debug!(session_id = %self.id, "client left, tearing down upstream");
                self.link = None;
                self.set_state(SessionState::Closed);
            }
            Some(SessionInput::Audio(chunk)) => {
                if self.accept_chunk(&chunk) {
                    self.forward_audio(chunk).await;
                }
            }
            Some(SessionInput::Start) => {
                tracing::trace!(session_id = %self.id, "already streaming");
            }
            Some(SessionInput::Stop) => self.set_state(SessionState::Finalizing),
        }
    }

    async fn on_message(&mut self, message: Option<Result<RecognizerMessage>>) {
        match message {
            Some(Ok(message)) => {
                self.last_activity = Instant::now();
                self.deliver(message).await;
            }
            Some(Err(e)) => self.fail(e).await,
            None => self.fail(Error::Upstream("recognizer closed the stream".to_string())).await,
        }
    }

    async fn finalize(&mut self, inputs: &mut mpsc::Receiver<SessionInput>) {
        let Some(mut link) = self.link.take() else {
            self.set_state(SessionState::Idle);
            return;
        };

        if link.commands.send(UpstreamCommand::Finish).await.is_err() {
            tracing::debug!(session_id = %self.id, "upstream writer already gone");
        }

        let deadline = deadline_after(Instant::now(), self.config.drain_timeout);
        loop {
            tokio::select! {
                message = link.messages.recv() => match message {
                    Some(Ok(message)) => self.deliver(message).await,
                    Some(Err(e)) => {
                        tracing::warn!(session_id = %self.id, error = %e, "upstream error while draining");
                        break;
                    }
                    None => break,
                },
                input = inputs.recv() => match input {
                    Some(input) => self.pending.push_back(input),
                    None => {
                        self.set_state(SessionState::Closed);
                        return;
                    }
                },
                () = tokio::time::sleep_until(deadline) => {
                    tracing::warn!(session_id = %self.id, "drain timed out, closing upstream");
                    break;
                }
            }
        }

        drop(link);
        self.utterance_start = None;
        self.set_state(SessionState::Idle);
        self.emit(SessionEvent::Closed).await;
    }

    /// Turn a recognizer message into a partial or final event
    async fn deliver(&mut self, message: RecognizerMessage) {
        let elapsed_ms = self.utterance_start.map_or(0, |start| duration_ms(start.elapsed()));

        if message.is_final {
            // The next utterance is measured from here
            self.utterance_start = Some(Instant::now());

            // Recognizers finalize silent segments too
            if message.text.trim().is_empty() {
                tracing::trace!(session_id = %self.id, "empty terminal result");
                return;
            }

            let verdict = self
                .config
                .thresholds
                .evaluate(&message.text, message.confidence, elapsed_ms);

            tracing::info!(
                session_id = %self.id,
                %verdict,
                elapsed_ms,
                confidence = message.confidence,
                "utterance finalized"
            );

            self.emit(SessionEvent::Final(FinalResult {
                text: message.text,
                confidence: message.confidence,
                elapsed_ms,
                verdict,
            }))
            .await;
        } else {
            if message.text.trim().is_empty() {
                return;
            }

            self.emit(SessionEvent::Partial(PartialResult {
                text: message.text,
                confidence: message.confidence,
                is_final: false,
                elapsed_ms,
            }))
            .await;
        }
    }

    fn accept_chunk(&self, chunk: &Bytes) -> bool {
        if chunk.is_empty() {
            let e = Error::MalformedAudio("empty audio chunk".to_string());
            tracing::warn!(session_id = %self.id, error = %e, "dropping audio chunk");
            return false;
        }
        true
    }

    async fn forward_audio(&mut self, chunk: Bytes) {
        let now = Instant::now();
        if self.utterance_start.is_none() {
            self.utterance_start = Some(now);
        }
        self.last_activity = now;

        let Some(link) = &self.link else {
            return;
        };

        if link.commands.send(UpstreamCommand::Audio(chunk)).await.is_err() {
            self.fail(Error::Upstream("recognizer stopped accepting audio".to_string()))
                .await;
        }
    }

    /// Tear down upstream after an infrastructure failure
    async fn fail(&mut self, error: Error) {
        tracing::warn!(session_id = %self.id, error = %error, "upstream failure");
        self.link = None;
        self.utterance_start = None;
        self.set_state(SessionState::Idle);
        self.emit(SessionEvent::Error {
            message: error.to_string(),
        })
        .await;
    }

    async fn emit(&self, event: SessionEvent) {
        if self.events.send(event).await.is_err() {
            tracing::debug!(session_id = %self.id, "event receiver dropped");
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            tracing::trace!(session_id = %self.id, from = ?self.state, to = ?state, "session state");
        }
        self.state = state;
        self.state_tx.send_replace(state);
    }
}

/// Roughly 30 years; stands in for timeouts too large to add to an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

fn deadline_after(from: Instant, timeout: Duration) -> Instant {
    from.checked_add(timeout)
        .or_else(|| from.checked_add(FAR_FUTURE))
        .unwrap_or(from)
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
