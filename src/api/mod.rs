//! HTTP API server for the Sprout gateway

pub mod health;
pub mod voice;
pub mod websocket;

use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use secrecy::{ExposeSecret, SecretString};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use crate::chat::{ChatGenerator, GeminiGenerator};
use crate::conversation::DEFAULT_CONTEXT_WINDOW;
use crate::orchestrator::OrchestratorConfig;
use crate::stt::{DeepgramRecognizer, SessionConfig, StreamingRecognizer};
use crate::voice::{SpeechSynthesizer, TextToSpeech, TtsProvider};
use crate::{Config, Result};

fn rewrap(key: &SecretString) -> SecretString {
    SecretString::from(key.expose_secret().to_owned())
}

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    /// Streaming recognizer; `None` disables `/ws/listen`
    pub recognizer: Option<Arc<dyn StreamingRecognizer>>,
    /// Chat generator; `None` disables `/ws/listen`
    pub generator: Option<Arc<dyn ChatGenerator>>,
    /// Speech synthesizer; `None` means text-only replies
    pub synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
    pub session: SessionConfig,
    pub orchestrator: OrchestratorConfig,
    /// Turns kept per connection
    pub context_window: usize,
}

impl ApiState {
    /// State with no external collaborators
    #[must_use]
    pub fn new(session: SessionConfig, orchestrator: OrchestratorConfig) -> Self {
        Self {
            recognizer: None,
            generator: None,
            synthesizer: None,
            session,
            orchestrator,
            context_window: DEFAULT_CONTEXT_WINDOW,
        }
    }
}

/// Configuration for building an API server
pub struct ApiServerBuilder {
    state: ApiState,
    port: u16,
    static_dir: Option<PathBuf>,
}

impl ApiServerBuilder {
    /// Create a new API server builder
    #[must_use]
    pub fn new(port: u16, session: SessionConfig, orchestrator: OrchestratorConfig) -> Self {
        Self {
            state: ApiState::new(session, orchestrator),
            port,
            static_dir: None,
        }
    }

    /// Create a builder with the collaborators the configured keys allow
    ///
    /// Missing keys leave the matching collaborator out; `/ready` reports it.
    ///
    /// # Errors
    ///
    /// Returns error if a configured collaborator cannot be constructed
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut builder = Self::new(
            config.server.port,
            config.session_config(),
            config.orchestrator_config(),
        )
        .context_window(config.repair.context_window)
        .static_dir(config.server.static_dir.clone());

        let keys = &config.api_keys;

        if let Some(key) = &keys.deepgram {
            let recognizer =
                DeepgramRecognizer::with_base_url(rewrap(key), config.recognizer.url.clone())?;
            builder = builder.recognizer(Arc::new(recognizer));
        } else {
            tracing::warn!("DEEPGRAM_API_KEY not set, streaming transcription unavailable");
        }

        if let Some(key) = &keys.gemini {
            let generator = GeminiGenerator::new(rewrap(key), config.chat_model.clone())?;
            builder = builder.generator(Arc::new(generator));
        } else {
            tracing::warn!("GEMINI_API_KEY not set, chat replies unavailable");
        }

        let tts = &config.tts;
        let synthesizer = match tts.provider {
            TtsProvider::OpenAI => keys.openai.as_ref().map(|key| {
                TextToSpeech::new_openai_with_model(
                    rewrap(key),
                    tts.voice.clone(),
                    tts.speed,
                    tts.model.clone(),
                )
            }),
            TtsProvider::Deepgram => keys
                .deepgram
                .as_ref()
                .map(|key| TextToSpeech::new_deepgram(rewrap(key), tts.model.clone())),
        };
        match synthesizer.transpose()? {
            Some(synthesizer) => builder = builder.synthesizer(Arc::new(synthesizer)),
            None => tracing::info!(provider = ?tts.provider, "no TTS key for provider"),
        }

        Ok(builder)
    }

    #[must_use]
    pub fn recognizer(mut self, recognizer: Arc<dyn StreamingRecognizer>) -> Self {
        self.state.recognizer = Some(recognizer);
        self
    }

    #[must_use]
    pub fn generator(mut self, generator: Arc<dyn ChatGenerator>) -> Self {
        self.state.generator = Some(generator);
        self
    }

    #[must_use]
    pub fn synthesizer(mut self, synthesizer: Arc<dyn SpeechSynthesizer>) -> Self {
        self.state.synthesizer = Some(synthesizer);
        self
    }

    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub const fn context_window(mut self, turns: usize) -> Self {
        self.state.context_window = turns;
        self
    }

    /// Serve a web client from this directory
    #[must_use]
    pub fn static_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.static_dir = dir;
        self
    }

    /// Build the API server
    #[must_use]
    pub fn build(self) -> ApiServer {
        ApiServer {
            state: Arc::new(self.state),
            port: self.port,
            static_dir: self.static_dir,
        }
    }
}

/// API server
pub struct ApiServer {
    state: Arc<ApiState>,
    port: u16,
    static_dir: Option<PathBuf>,
}

impl ApiServer {
    /// Configured speech synthesizer
    #[must_use]
    pub fn synthesizer(&self) -> Option<Arc<dyn SpeechSynthesizer>> {
        self.state.synthesizer.clone()
    }

    /// Build the router with all routes
    pub fn router(&self) -> Router {
        let mut router = Router::new()
            .nest("/api/voice", voice::router(self.state.clone()))
            .nest("/ws", websocket::router(self.state.clone()))
            .merge(health::router())
            .merge(health::ready_router(self.state.clone()));

        // Serve static files if configured
        if let Some(static_dir) = &self.static_dir {
            let index_file = static_dir.join("index.html");
            let serve_dir =
                ServeDir::new(static_dir).not_found_service(ServeFile::new(&index_file));

            router = router.fallback_service(serve_dir);
            tracing::info!(path = %static_dir.display(), "serving static files");
        }

        // CORS layer for cross-origin requests from the web client
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        router.layer(cors).layer(TraceLayer::new_for_http())
    }

    /// Run the API server
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self) -> Result<()> {
        if self.state.recognizer.is_none() || self.state.generator.is_none() {
            tracing::warn!("recognizer or chat generator not configured, /ws/listen will refuse sessions");
        }
        if self.state.synthesizer.is_none() {
            tracing::info!("no speech synthesizer configured, replies are text only");
        }

        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind API server: {e}")))?;

        tracing::info!(port = self.port, "API server listening");

        axum::serve(listener, self.router())
            .await
            .map_err(|e| crate::Error::Config(format!("API server error: {e}")))?;

        Ok(())
    }
}
