//! Configuration management for the Sprout gateway
//!
//! Each value resolves env > TOML file > default.

pub mod file;

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::chat::DEFAULT_CHAT_MODEL;
use crate::conversation::DEFAULT_CONTEXT_WINDOW;
use crate::orchestrator::{DEFAULT_MEMORY_TURNS, OrchestratorConfig};
use crate::quality::QualityThresholds;
use crate::repair::{DEFAULT_ESCALATION_THRESHOLD, RepairConfig};
use crate::stt::{DEEPGRAM_LISTEN_URL, RecognizerParams, SessionConfig};
use crate::voice::TtsProvider;
use crate::{Error, Result};
use file::SproutConfigFile;

/// Default API server port
pub const DEFAULT_PORT: u16 = 18790;

/// Sprout gateway configuration
#[derive(Debug)]
pub struct Config {
    /// HTTP API server configuration
    pub server: ServerConfig,

    /// Streaming recognizer configuration
    pub recognizer: RecognizerConfig,

    /// Chat model identifier
    pub chat_model: String,

    /// Speech synthesis configuration
    pub tts: TtsConfig,

    /// Quality gate thresholds
    pub quality: QualityThresholds,

    /// Repair and context configuration
    pub repair: RepairSettings,

    /// API keys
    pub api_keys: ApiKeys,
}

/// HTTP API server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,

    /// Path to static files directory (web client)
    pub static_dir: Option<PathBuf>,
}

/// Streaming recognizer configuration
#[derive(Debug, Clone)]
pub struct RecognizerConfig {
    pub params: RecognizerParams,

    /// Listen endpoint
    pub url: String,

    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
    pub drain_timeout: Duration,
}

/// Speech synthesis configuration
#[derive(Debug, Clone)]
pub struct TtsConfig {
    pub provider: TtsProvider,

    /// Model identifier ("tts-1", "aura-asteria-en")
    pub model: String,

    /// Voice identifier (OpenAI only)
    pub voice: String,

    /// Speed multiplier (OpenAI only, 0.25 to 4.0)
    pub speed: f32,

    pub style: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct RepairSettings {
    pub escalation_threshold: usize,
    pub context_window: usize,
    pub memory_turns: usize,
}

/// API keys for external services
#[derive(Debug, Default)]
pub struct ApiKeys {
    /// `Deepgram` API key (streaming STT, optional Aura TTS)
    pub deepgram: Option<SecretString>,

    /// `OpenAI` API key (TTS)
    pub openai: Option<SecretString>,

    /// `Gemini` API key (chat replies)
    pub gemini: Option<SecretString>,
}

impl Config {
    /// Load configuration from the process environment and a config file
    ///
    /// With `path`, that file must exist and parse. Without it the standard
    /// path is tried and silently skipped when absent.
    ///
    /// # Errors
    ///
    /// Returns error if an explicit config file is unreadable or a value is invalid
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let fc = match path {
            Some(path) => file::read_config_file(path)?,
            None => file::load_config_file(),
        };

        Self::from_sources(fc, |key| std::env::var(key).ok())
    }

    /// Resolve configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a value is invalid
    pub fn from_sources(
        fc: SproutConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        // Server (env > toml > default)
        let env_port = match parsed::<u16>(&env, "SPROUT_PORT")? {
            Some(port) => Some(port),
            None => parsed(&env, "PORT")?,
        };
        let server = ServerConfig {
            port: env_port.or(fc.server.port).unwrap_or(DEFAULT_PORT),
            static_dir: env("SPROUT_STATIC_DIR")
                .or(fc.server.static_dir)
                .map(PathBuf::from),
        };

        // Recognizer (env > toml > default)
        let defaults = SessionConfig::default();
        let rc = fc.recognizer;
        let params = RecognizerParams {
            model: env("SPROUT_STT_MODEL")
                .or(rc.model)
                .unwrap_or(defaults.params.model),
            language: env("SPROUT_STT_LANGUAGE")
                .or(rc.language)
                .unwrap_or(defaults.params.language),
            endpointing_ms: rc.endpointing_ms.unwrap_or(defaults.params.endpointing_ms),
            encoding: env("SPROUT_STT_ENCODING").or(rc.encoding),
            sample_rate: rc.sample_rate,
            ..defaults.params
        };
        let recognizer = RecognizerConfig {
            params,
            url: env("SPROUT_STT_URL")
                .or(rc.url)
                .unwrap_or_else(|| DEEPGRAM_LISTEN_URL.to_string()),
            connect_timeout: rc
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            idle_timeout: parsed(&env, "SPROUT_IDLE_TIMEOUT_SECS")?
                .or(rc.idle_timeout_secs)
                .map_or(defaults.idle_timeout, Duration::from_secs),
            drain_timeout: rc
                .drain_timeout_secs
                .map_or(defaults.drain_timeout, Duration::from_secs),
        };

        let chat_model = env("SPROUT_CHAT_MODEL")
            .or(fc.chat.model)
            .unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_string());

        // TTS (env > toml > default)
        let provider: TtsProvider = env("SPROUT_TTS_PROVIDER")
            .or(fc.tts.provider)
            .as_deref()
            .unwrap_or("openai")
            .parse()?;
        let default_model = match provider {
            TtsProvider::OpenAI => "tts-1",
            TtsProvider::Deepgram => "aura-asteria-en",
        };
        let tts = TtsConfig {
            provider,
            model: env("SPROUT_TTS_MODEL")
                .or(fc.tts.model)
                .unwrap_or_else(|| default_model.to_string()),
            voice: env("SPROUT_TTS_VOICE")
                .or(fc.tts.voice)
                .unwrap_or_else(|| "nova".to_string()),
            speed: fc.tts.speed.unwrap_or(1.0).clamp(0.25, 4.0),
            style: fc.tts.style,
        };

        let qd = QualityThresholds::default();
        let quality = QualityThresholds {
            min_duration_ms: fc.quality.min_duration_ms.unwrap_or(qd.min_duration_ms),
            min_text_chars: fc.quality.min_text_chars.unwrap_or(qd.min_text_chars),
            min_confidence: fc.quality.min_confidence.unwrap_or(qd.min_confidence),
        };
        if !(0.0..=1.0).contains(&quality.min_confidence) {
            return Err(Error::Config(format!(
                "quality.min_confidence must be within 0..1, got {}",
                quality.min_confidence
            )));
        }

        let repair = RepairSettings {
            escalation_threshold: fc
                .repair
                .escalation_threshold
                .unwrap_or(DEFAULT_ESCALATION_THRESHOLD)
                .max(1),
            context_window: fc
                .repair
                .context_window
                .unwrap_or(DEFAULT_CONTEXT_WINDOW)
                .max(2),
            memory_turns: fc.repair.memory_turns.unwrap_or(DEFAULT_MEMORY_TURNS),
        };

        // API keys (env > toml > None)
        let secret = |var: &str, file_value: Option<String>| {
            env(var)
                .or(file_value)
                .filter(|k| !k.trim().is_empty())
                .map(SecretString::from)
        };
        let api_keys = ApiKeys {
            deepgram: secret("DEEPGRAM_API_KEY", fc.api_keys.deepgram),
            openai: secret("OPENAI_API_KEY", fc.api_keys.openai),
            gemini: secret("GEMINI_API_KEY", fc.api_keys.gemini),
        };

        Ok(Self {
            server,
            recognizer,
            chat_model,
            tts,
            quality,
            repair,
            api_keys,
        })
    }

    /// Per-connection session configuration
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            params: self.recognizer.params.clone(),
            thresholds: self.quality,
            connect_timeout: self.recognizer.connect_timeout,
            idle_timeout: self.recognizer.idle_timeout,
            drain_timeout: self.recognizer.drain_timeout,
        }
    }

    /// Per-connection orchestrator configuration
    #[must_use]
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            repair: RepairConfig {
                escalation_threshold: self.repair.escalation_threshold,
            },
            memory_turns: self.repair.memory_turns,
            speech_style: self.tts.style.clone(),
        }
    }
}

/// Numeric env value; set but unparsable is an error
fn parsed<T: FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>> {
    env(key)
        .map(|v| {
            v.trim()
                .parse()
                .map_err(|_| Error::Config(format!("{key} must be a number, got {v:?}")))
        })
        .transpose()
}
