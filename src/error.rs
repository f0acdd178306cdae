//! Error types for the Sprout gateway

use thiserror::Error;

/// Result type alias for Sprout operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the Sprout gateway
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Streaming recognizer unreachable or rejected the credentials
    #[error("upstream connect error: {0}")]
    UpstreamConnect(String),

    /// Streaming recognizer failed after the connection was established
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Audio chunk could not be forwarded
    #[error("malformed audio: {0}")]
    MalformedAudio(String),

    /// Chat-response generator failed
    #[error("generator error: {0}")]
    Generator(String),

    /// Speech synthesizer failed
    #[error("synthesizer error: {0}")]
    Synthesizer(String),

    /// Operation did not complete in time
    #[error("timed out: {0}")]
    Timeout(String),

    /// Session task is gone
    #[error("session closed")]
    SessionClosed,

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
