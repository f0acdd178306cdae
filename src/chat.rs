//! Chat-response generation

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::conversation::ChildProfile;
use crate::{Error, Result};

/// Gemini REST endpoint root
pub const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default Gemini model
pub const DEFAULT_CHAT_MODEL: &str = "gemini-1.5-flash";

/// Input for one reply
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// What the child said
    pub utterance: String,
    pub profile: ChildProfile,
    /// Compact rendering of recent turns
    pub memory_summary: Option<String>,
}

/// Generated reply
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChatReply {
    pub text: String,
    /// Profile interests the child mentioned
    pub keywords: Vec<String>,
}

/// Produces conversational replies
#[async_trait]
pub trait ChatGenerator: Send + Sync {
    /// Provider name for logs
    fn name(&self) -> &'static str;

    /// Generate a reply to the child's utterance
    ///
    /// # Errors
    ///
    /// Returns `Error::Generator` if the provider fails or returns no text
    async fn generate(&self, request: &ChatRequest) -> Result<ChatReply>;
}

#[derive(Serialize)]
struct GenerateRequest {
    #[serde(rename = "systemInstruction")]
    system_instruction: Content,
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct Part {
    text: String,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "promptFeedback")]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct PromptFeedback {
    #[serde(rename = "blockReason")]
    block_reason: Option<String>,
}

/// Gemini `generateContent` client
pub struct GeminiGenerator {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
    base_url: String,
}

impl GeminiGenerator {
    /// Create a generator
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(api_key: SecretString, model: String) -> Result<Self> {
        Self::with_base_url(api_key, model, GEMINI_API_URL.to_string())
    }

    /// Create a generator against a custom endpoint
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn with_base_url(api_key: SecretString, model: String, base_url: String) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config("Gemini API key required for chat".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn build_request(request: &ChatRequest) -> GenerateRequest {
        let profile = &request.profile;
        let mut instruction = format!(
            "You are a friendly companion talking with {}, a child aged {}. \
             Answer in one or two short, simple sentences.",
            profile.name, profile.age_band
        );
        if let Some(summary) = &request.memory_summary {
            instruction.push_str("\nRecent conversation:\n");
            instruction.push_str(summary);
        }

        GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part { text: instruction }],
            },
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part {
                    text: request.utterance.clone(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.7,
                max_output_tokens: 120,
            },
        }
    }
}

/// First non-empty candidate text
fn reply_text(response: GenerateResponse) -> Result<String> {
    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(Error::Generator(format!("prompt blocked: {reason}")));
    }

    response
        .candidates
        .into_iter()
        .filter_map(|c| c.content)
        .flat_map(|c| c.parts)
        .map(|p| p.text.trim().to_string())
        .find(|t| !t.is_empty())
        .ok_or_else(|| Error::Generator("empty response".to_string()))
}

#[async_trait]
impl ChatGenerator for GeminiGenerator {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn generate(&self, request: &ChatRequest) -> Result<ChatReply> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let body = Self::build_request(request);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Generator(format!("Gemini error {status}: {body}")));
        }

        let text = reply_text(response.json().await?)?;
        tracing::debug!(model = %self.model, chars = text.len(), "chat reply generated");

        Ok(ChatReply {
            text,
            keywords: request.profile.interests_in(&request.utterance),
        })
    }
}
