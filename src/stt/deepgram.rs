//! Deepgram live transcription
//!
//! One WebSocket per session. Audio goes up as binary frames; results come
//! back as JSON text frames.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{self, Message};
use url::Url;

use super::{RecognizerLink, RecognizerMessage, RecognizerParams, StreamingRecognizer, UpstreamCommand};
use crate::{Error, Result};

/// Live transcription endpoint
pub const DEEPGRAM_LISTEN_URL: &str = "wss://api.deepgram.com/v1/listen";

/// Deepgram drops connections that see no data for ~10s
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);

const CLOSE_STREAM: &str = r#"{"type":"CloseStream"}"#;
const KEEPALIVE: &str = r#"{"type":"KeepAlive"}"#;

/// Buffered frames between the session and the socket tasks
const CHANNEL_CAPACITY: usize = 64;

#[derive(Deserialize)]
struct DeepgramMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    channel: Option<DeepgramChannel>,
    #[serde(default)]
    is_final: bool,
}

#[derive(Deserialize)]
struct DeepgramChannel {
    #[serde(default)]
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(Deserialize)]
struct DeepgramAlternative {
    #[serde(default)]
    transcript: String,
    #[serde(default)]
    confidence: f64,
}

/// Parse a Deepgram text frame
///
/// Returns `Ok(None)` for message types that carry no transcript
/// (`Metadata`, `SpeechStarted`, `UtteranceEnd`).
///
/// # Errors
///
/// Returns error if the frame is not valid JSON
pub fn parse_message(text: &str) -> Result<Option<RecognizerMessage>> {
    let message: DeepgramMessage = serde_json::from_str(text)?;

    if message.kind != "Results" {
        tracing::trace!(kind = %message.kind, "ignoring Deepgram message");
        return Ok(None);
    }

    let best = message
        .channel
        .and_then(|c| c.alternatives.into_iter().next());

    let (text, confidence) = best.map_or_else(
        || (String::new(), 0.0),
        |a| (a.transcript, a.confidence),
    );

    Ok(Some(RecognizerMessage {
        text,
        confidence,
        is_final: message.is_final,
    }))
}

/// Streaming recognizer backed by Deepgram
pub struct DeepgramRecognizer {
    api_key: SecretString,
    base_url: String,
}

impl DeepgramRecognizer {
    /// Create a recognizer for the public Deepgram endpoint
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(api_key: SecretString) -> Result<Self> {
        Self::with_base_url(api_key, DEEPGRAM_LISTEN_URL.to_string())
    }

    /// Create a recognizer for a custom endpoint (self-hosted or proxy)
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn with_base_url(api_key: SecretString, base_url: String) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config("Deepgram API key required".to_string()));
        }

        Ok(Self { api_key, base_url })
    }

    /// Build the listen URL for a set of parameters
    ///
    /// # Errors
    ///
    /// Returns error if the base URL is invalid
    pub fn listen_url(&self, params: &RecognizerParams) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| Error::Config(format!("invalid Deepgram URL {}: {e}", self.base_url)))?;

        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("model", &params.model)
                .append_pair("language", &params.language)
                .append_pair("punctuate", bool_param(params.punctuate))
                .append_pair("interim_results", bool_param(params.interim_results))
                .append_pair("endpointing", &params.endpointing_ms.to_string())
                .append_pair("channels", "1");

            if let Some(encoding) = &params.encoding {
                query.append_pair("encoding", encoding);
            }
            if let Some(rate) = params.sample_rate {
                query.append_pair("sample_rate", &rate.to_string());
            }
        }

        Ok(url)
    }
}

const fn bool_param(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}

#[async_trait]
impl StreamingRecognizer for DeepgramRecognizer {
    fn name(&self) -> &'static str {
        "deepgram"
    }

    async fn connect(&self, params: &RecognizerParams) -> Result<RecognizerLink> {
        let url = self.listen_url(params)?;
        tracing::debug!(model = %params.model, language = %params.language, "connecting to Deepgram");

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| Error::UpstreamConnect(e.to_string()))?;
        let auth = HeaderValue::from_str(&format!("Token {}", self.api_key.expose_secret()))
            .map_err(|e| Error::Config(format!("invalid Deepgram API key: {e}")))?;
        request.headers_mut().insert("Authorization", auth);

        let (socket, _response) = connect_async(request).await.map_err(|e| {
            if is_auth_error(&e) {
                tracing::error!(error = %e, "Deepgram rejected credentials");
            } else {
                tracing::error!(error = %e, "Deepgram connection failed");
            }
            Error::UpstreamConnect(e.to_string())
        })?;

        tracing::info!("Deepgram stream connected");

        let (mut sink, mut stream) = socket.split();
        let (command_tx, mut command_rx) = mpsc::channel::<UpstreamCommand>(CHANNEL_CAPACITY);
        let (message_tx, message_rx) = mpsc::channel::<Result<RecognizerMessage>>(CHANNEL_CAPACITY);

        // Writer: audio and control frames, keepalive while the child is quiet
        tokio::spawn(async move {
            let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
            keepalive.reset();
            loop {
                tokio::select! {
                    command = command_rx.recv() => {
                        let frame = match command {
                            Some(UpstreamCommand::Audio(chunk)) => Message::Binary(chunk),
                            Some(UpstreamCommand::Finish) => Message::Text(CLOSE_STREAM.into()),
                            None => break,
                        };
                        if let Err(e) = sink.send(frame).await {
                            tracing::warn!(error = %e, "Deepgram write failed");
                            break;
                        }
                        keepalive.reset();
                    }
                    _ = keepalive.tick() => {
                        if sink.send(Message::Text(KEEPALIVE.into())).await.is_err() {
                            break;
                        }
                    }
                }
            }
            if let Err(e) = sink.close().await {
                tracing::debug!(error = %e, "Deepgram socket already closed");
            }
            tracing::debug!("Deepgram writer finished");
        });

        // Reader: result frames until the upstream closes
        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                let forwarded = match frame {
                    Ok(Message::Text(text)) => match parse_message(text.as_str()) {
                        Ok(Some(message)) => Ok(message),
                        Ok(None) => continue,
                        Err(e) => {
                            tracing::warn!(error = %e, "unparseable Deepgram message");
                            continue;
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        tracing::debug!(?frame, "Deepgram closed stream");
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => Err(Error::Upstream(e.to_string())),
                };

                let failed = forwarded.is_err();
                if message_tx.send(forwarded).await.is_err() || failed {
                    break;
                }
            }
            tracing::debug!("Deepgram reader finished");
        });

        Ok(RecognizerLink {
            commands: command_tx,
            messages: message_rx,
        })
    }
}

fn is_auth_error(err: &tungstenite::Error) -> bool {
    match err {
        tungstenite::Error::Http(response) => {
            let code = response.status().as_u16();
            code == 401 || code == 403
        }
        _ => false,
    }
}
