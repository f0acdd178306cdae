//! Text-to-speech (TTS) processing

use async_trait::async_trait;
use bytes::Bytes;
use secrecy::{ExposeSecret, SecretString};

use crate::{Error, Result};

const OPENAI_SPEECH_URL: &str = "https://api.openai.com/v1/audio/speech";
const DEEPGRAM_SPEAK_URL: &str = "https://api.deepgram.com/v1/speak";

/// Encoding of synthesized audio
pub const MP3_ENCODING: &str = "mp3";

/// Text to speak
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechRequest {
    pub text: String,
    /// Delivery hint (e.g. "cheerful"); ignored by providers without one
    pub style: Option<String>,
}

impl SpeechRequest {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            style: None,
        }
    }
}

/// Synthesized audio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedAudio {
    pub bytes: Bytes,
    /// Container or codec name (e.g. "mp3")
    pub encoding: String,
}

impl SynthesizedAudio {
    /// MIME type for HTTP responses
    #[must_use]
    pub fn content_type(&self) -> &'static str {
        match self.encoding.as_str() {
            "mp3" => "audio/mpeg",
            "wav" | "linear16" => "audio/wav",
            "opus" => "audio/ogg",
            _ => "application/octet-stream",
        }
    }
}

/// Turns text into audio
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Provider name for logs
    fn name(&self) -> &'static str;

    /// Synthesize one utterance
    ///
    /// # Errors
    ///
    /// Returns `Error::Synthesizer` if the provider fails
    async fn synthesize(&self, request: &SpeechRequest) -> Result<SynthesizedAudio>;
}

/// TTS provider backend
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TtsProvider {
    OpenAI,
    /// Deepgram Aura
    Deepgram,
}

impl std::str::FromStr for TtsProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "deepgram" | "aura" => Ok(Self::Deepgram),
            other => Err(Error::Config(format!("unknown TTS provider: {other}"))),
        }
    }
}

/// HTTP speech synthesizer
pub struct TextToSpeech {
    client: reqwest::Client,
    api_key: SecretString,
    voice: String,
    speed: f32,
    model: String,
    provider: TtsProvider,
}

impl TextToSpeech {
    /// Create a new TTS instance using `OpenAI`
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_openai(api_key: SecretString, voice: String, speed: f32) -> Result<Self> {
        Self::new_openai_with_model(api_key, voice, speed, "tts-1".to_string())
    }

    /// Create a new TTS instance using `OpenAI` with custom model
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_openai_with_model(
        api_key: SecretString,
        voice: String,
        speed: f32,
        model: String,
    ) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config("OpenAI API key required for TTS".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            voice,
            speed,
            model,
            provider: TtsProvider::OpenAI,
        })
    }

    /// Create a new TTS instance using Deepgram Aura
    ///
    /// `model` names the voice as well (e.g. "aura-asteria-en").
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_deepgram(api_key: SecretString, model: String) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config("Deepgram API key required for TTS".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            voice: model.clone(),
            speed: 1.0,
            model,
            provider: TtsProvider::Deepgram,
        })
    }

    #[must_use]
    pub const fn provider(&self) -> TtsProvider {
        self.provider
    }

    /// Synthesize using OpenAI TTS
    async fn synthesize_openai(&self, request: &SpeechRequest) -> Result<Bytes> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
            response_format: &'static str,
            #[serde(skip_serializing_if = "Option::is_none")]
            instructions: Option<&'a str>,
        }

        let body = TtsRequest {
            model: &self.model,
            input: &request.text,
            voice: &self.voice,
            speed: self.speed,
            response_format: MP3_ENCODING,
            instructions: request.style.as_deref(),
        };

        let response = self
            .client
            .post(OPENAI_SPEECH_URL)
            .header("Authorization", format!("Bearer {}", self.api_key.expose_secret()))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Synthesizer(format!("OpenAI TTS error {status}: {body}")));
        }

        Ok(response.bytes().await?)
    }

    /// Synthesize using Deepgram Aura
    async fn synthesize_deepgram(&self, request: &SpeechRequest) -> Result<Bytes> {
        #[derive(serde::Serialize)]
        struct SpeakRequest<'a> {
            text: &'a str,
        }

        let response = self
            .client
            .post(DEEPGRAM_SPEAK_URL)
            .query(&[("model", self.model.as_str()), ("encoding", MP3_ENCODING)])
            .header("Authorization", format!("Token {}", self.api_key.expose_secret()))
            .json(&SpeakRequest { text: &request.text })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Synthesizer(format!("Deepgram TTS error {status}: {body}")));
        }

        Ok(response.bytes().await?)
    }
}

#[async_trait]
impl SpeechSynthesizer for TextToSpeech {
    fn name(&self) -> &'static str {
        match self.provider {
            TtsProvider::OpenAI => "openai",
            TtsProvider::Deepgram => "deepgram",
        }
    }

    async fn synthesize(&self, request: &SpeechRequest) -> Result<SynthesizedAudio> {
        if request.text.trim().is_empty() {
            return Err(Error::Synthesizer("empty text".to_string()));
        }

        let bytes = match self.provider {
            TtsProvider::OpenAI => self.synthesize_openai(request).await?,
            TtsProvider::Deepgram => self.synthesize_deepgram(request).await?,
        };

        tracing::debug!(provider = self.name(), bytes = bytes.len(), "speech synthesized");

        Ok(SynthesizedAudio {
            bytes,
            encoding: MP3_ENCODING.to_string(),
        })
    }
}
