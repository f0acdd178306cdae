//! TOML configuration file loading
//!
//! Supports `~/.config/sprout/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct SproutConfigFile {
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Streaming recognizer configuration
    #[serde(default)]
    pub recognizer: RecognizerFileConfig,

    #[serde(default)]
    pub chat: ChatFileConfig,

    #[serde(default)]
    pub tts: TtsFileConfig,

    /// Quality gate thresholds
    #[serde(default)]
    pub quality: QualityFileConfig,

    #[serde(default)]
    pub repair: RepairFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

/// Server/runtime configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// API server port
    pub port: Option<u16>,

    /// Directory served at `/` (web client)
    pub static_dir: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RecognizerFileConfig {
    /// Deepgram model (e.g. "nova-2")
    pub model: Option<String>,
    pub language: Option<String>,
    pub endpointing_ms: Option<u32>,
    /// Raw encoding (e.g. "linear16"); omit for container formats
    pub encoding: Option<String>,
    pub sample_rate: Option<u32>,
    /// Listen endpoint override
    pub url: Option<String>,
    pub connect_timeout_secs: Option<u64>,
    pub idle_timeout_secs: Option<u64>,
    pub drain_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChatFileConfig {
    /// Gemini model (e.g. "gemini-1.5-flash")
    pub model: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TtsFileConfig {
    /// "openai" or "deepgram"
    pub provider: Option<String>,
    pub model: Option<String>,
    pub voice: Option<String>,
    pub speed: Option<f32>,
    /// Delivery hint for providers that accept one
    pub style: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct QualityFileConfig {
    pub min_duration_ms: Option<u64>,
    pub min_text_chars: Option<usize>,
    pub min_confidence: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RepairFileConfig {
    /// Consecutive repairs before a topic change
    pub escalation_threshold: Option<usize>,
    /// Turns kept per conversation
    pub context_window: Option<usize>,
    /// Turns rendered into chat requests
    pub memory_turns: Option<usize>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub deepgram: Option<String>,
    pub openai: Option<String>,
    pub gemini: Option<String>,
}

/// Read and parse a config file
///
/// # Errors
///
/// Returns error if the file cannot be read or is not valid TOML
pub fn read_config_file(path: &Path) -> Result<SproutConfigFile> {
    let content = std::fs::read_to_string(path)?;
    let config = toml::from_str(&content)?;
    tracing::info!(path = %path.display(), "loaded config file");
    Ok(config)
}

/// Load the TOML config file from the standard path
///
/// Returns `SproutConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> SproutConfigFile {
    let Some(path) = config_file_path() else {
        return SproutConfigFile::default();
    };

    if !path.exists() {
        return SproutConfigFile::default();
    }

    match read_config_file(&path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            SproutConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/sprout/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("sprout").join("config.toml"))
}
