//! WebSocket handler for listening sessions
//!
//! One transcription session and one turn orchestrator per connection.
//! Binary frames carry audio; text frames carry JSON control messages.

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::ApiState;
use crate::Error;
use crate::conversation::{ChildProfile, ConversationContext};
use crate::orchestrator::{TurnControl, TurnEvent, TurnKind, TurnOrchestrator};
use crate::quality::QualityVerdict;
use crate::stt::{SessionEvent, SessionHandle, SessionSender};

/// Incoming WebSocket message from client
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsIncoming {
    /// Begin listening, optionally describing the child
    Start {
        #[serde(default)]
        profile: Option<ChildProfile>,
    },
    /// Finish the current utterance
    Stop,
    /// Forget the conversation so far
    ResetContext,
    /// Ping to keep connection alive
    Ping,
}

/// Outgoing WebSocket message to client
#[derive(Debug, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsOutgoing {
    /// Upstream recognizer connected
    Connected { session_id: String },
    /// Interim transcript, replaces the previous one
    Partial {
        text: String,
        confidence: f64,
        elapsed_ms: u64,
    },
    /// Finalized transcript with its verdict
    Final {
        text: String,
        confidence: f64,
        elapsed_ms: u64,
        verdict: QualityVerdict,
    },
    /// Clarification turn
    Repair { text: String },
    /// Conversational reply
    Reply { text: String, keywords: Vec<String> },
    /// Spoken form of the preceding repair or reply
    Audio { encoding: String, data: String },
    TurnComplete { kind: TurnKind },
    /// Error occurred
    Error { message: String },
    /// Upstream closed after a stop
    Closed,
    /// Pong response
    Pong,
}

impl WsOutgoing {
    /// Wire form of an orchestrator event
    #[must_use]
    pub fn from_turn_event(event: TurnEvent, session_id: &str) -> Self {
        match event {
            TurnEvent::Session(SessionEvent::Connected) => Self::Connected {
                session_id: session_id.to_string(),
            },
            TurnEvent::Session(SessionEvent::Partial(p)) => Self::Partial {
                text: p.text,
                confidence: p.confidence,
                elapsed_ms: p.elapsed_ms,
            },
            TurnEvent::Session(SessionEvent::Final(f)) => Self::Final {
                text: f.text,
                confidence: f.confidence,
                elapsed_ms: f.elapsed_ms,
                verdict: f.verdict,
            },
            TurnEvent::Session(SessionEvent::Error { message }) => Self::Error { message },
            TurnEvent::Session(SessionEvent::Closed) => Self::Closed,
            TurnEvent::Repair { text } => Self::Repair { text },
            TurnEvent::Reply { text, keywords } => Self::Reply { text, keywords },
            TurnEvent::Audio(audio) => Self::Audio {
                encoding: audio.encoding,
                data: BASE64.encode(&audio.bytes),
            },
            TurnEvent::TurnComplete { kind } => Self::TurnComplete { kind },
        }
    }
}

/// Build WebSocket router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/listen", get(ws_upgrade))
        .with_state(state)
}

/// Handle WebSocket upgrade request
async fn ws_upgrade(State(state): State<Arc<ApiState>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<ApiState>) {
    let (mut sender, mut receiver) = socket.split();
    let session_id = uuid::Uuid::new_v4().to_string();

    let (Some(recognizer), Some(generator)) = (state.recognizer.clone(), state.generator.clone())
    else {
        tracing::warn!(session_id = %session_id, "rejecting listen session, recognizer or generator missing");
        let error = WsOutgoing::Error {
            message: "listening is not configured on this server".to_string(),
        };
        if let Ok(msg) = serde_json::to_string(&error) {
            if let Err(e) = sender.send(Message::Text(msg.into())).await {
                tracing::debug!(session_id = %session_id, error = %e, "client left before refusal was sent");
            }
        }
        return;
    };

    tracing::info!(session_id = %session_id, "WebSocket connected");

    let session = SessionHandle::spawn(session_id.clone(), recognizer, state.session.clone());
    let (input, events, _session_task) = session.into_parts();

    let (control_tx, control_rx) = mpsc::channel::<TurnControl>(8);
    let (turn_tx, mut turn_rx) = mpsc::channel::<TurnEvent>(64);
    let (direct_tx, mut direct_rx) = mpsc::channel::<WsOutgoing>(8);

    let orchestrator = TurnOrchestrator::new(
        generator,
        state.synthesizer.clone(),
        state.orchestrator.clone(),
    );
    let context = ConversationContext::new(state.context_window);
    let orchestrator_task = tokio::spawn(orchestrator.drive(
        events,
        control_rx,
        turn_tx,
        ChildProfile::default(),
        context,
    ));

    // Forward orchestrator events and direct replies to the client
    let sid = session_id.clone();
    let mut send_task = tokio::spawn(async move {
        loop {
            let outgoing = tokio::select! {
                Some(event) = turn_rx.recv() => WsOutgoing::from_turn_event(event, &sid),
                Some(message) = direct_rx.recv() => message,
                else => break,
            };

            if let Ok(text) = serde_json::to_string(&outgoing) {
                if sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
        }
    });

    // Handle incoming frames
    let sid = session_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Binary(chunk) => {
                    if input.audio(chunk).await.is_err() {
                        break;
                    }
                }
                Message::Text(text) => {
                    if let Err(e) = handle_message(&text, &input, &control_tx, &direct_tx).await {
                        tracing::debug!(session_id = %sid, error = %e, "bad client message");
                        let error = WsOutgoing::Error {
                            message: e.to_string(),
                        };
                        if direct_tx.send(error).await.is_err() {
                            tracing::debug!(session_id = %sid, "send task gone, dropping error reply");
                        }
                    }
                }
                Message::Close(_) => {
                    tracing::info!(session_id = %sid, "WebSocket closed by client");
                    break;
                }
                Message::Ping(data) => {
                    tracing::trace!(len = data.len(), "received ping");
                }
                Message::Pong(_) => {}
            }
        }
    });

    // Wait for either task to complete
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    // The session sees its input close and tears down upstream on its own
    orchestrator_task.abort();

    tracing::info!(session_id = %session_id, "WebSocket disconnected");
}

/// Handle a single control message
async fn handle_message(
    text: &str,
    input: &SessionSender,
    control: &mpsc::Sender<TurnControl>,
    direct: &mpsc::Sender<WsOutgoing>,
) -> crate::Result<()> {
    let incoming: WsIncoming = serde_json::from_str(text)?;

    match incoming {
        WsIncoming::Start { profile } => {
            if let Some(profile) = profile {
                control
                    .send(TurnControl::SetProfile(profile))
                    .await
                    .map_err(|_| Error::SessionClosed)?;
            }
            input.start().await?;
        }
        WsIncoming::Stop => input.stop().await?,
        WsIncoming::ResetContext => {
            control
                .send(TurnControl::ResetContext)
                .await
                .map_err(|_| Error::SessionClosed)?;
        }
        WsIncoming::Ping => {
            direct
                .send(WsOutgoing::Pong)
                .await
                .map_err(|_| Error::SessionClosed)?;
        }
    }

    Ok(())
}
