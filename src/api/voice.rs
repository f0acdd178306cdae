//! Voice API endpoints for speech synthesis and transcript evaluation

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use super::ApiState;
use crate::quality::QualityVerdict;
use crate::voice::SpeechRequest;

/// Build voice router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/synthesize", post(synthesize))
        .route("/evaluate", post(evaluate))
        .route("/capabilities", get(capabilities))
        .with_state(state)
}

/// Voice capabilities response
#[derive(Debug, Serialize)]
pub struct VoiceCapabilities {
    pub stt_available: bool,
    pub tts_available: bool,
    pub chat_available: bool,
}

/// Get voice capabilities
async fn capabilities(State(state): State<Arc<ApiState>>) -> Json<VoiceCapabilities> {
    Json(VoiceCapabilities {
        stt_available: state.recognizer.is_some(),
        tts_available: state.synthesizer.is_some(),
        chat_available: state.generator.is_some(),
    })
}

/// Synthesis request
#[derive(Debug, Deserialize)]
pub struct SynthesizeRequest {
    pub text: String,
    #[serde(default)]
    pub style: Option<String>,
}

/// Synthesize text to speech
///
/// Returns audio in the synthesizer's encoding (MP3 for the bundled providers)
async fn synthesize(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<SynthesizeRequest>,
) -> Result<Response, VoiceError> {
    let synthesizer = state
        .synthesizer
        .as_ref()
        .ok_or(VoiceError::NotConfigured("TTS not configured"))?;

    if request.text.trim().is_empty() {
        return Err(VoiceError::BadRequest("Empty text"));
    }

    let audio = synthesizer
        .synthesize(&SpeechRequest {
            text: request.text,
            style: request.style,
        })
        .await
        .map_err(|e| VoiceError::SynthesisFailed(e.to_string()))?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, audio.content_type())],
        audio.bytes,
    )
        .into_response())
}

/// Evaluation request
#[derive(Debug, Deserialize)]
pub struct EvaluateRequest {
    pub transcript: String,
    pub confidence: f64,
    pub duration_ms: u64,
}

/// Evaluation response
#[derive(Debug, Serialize)]
pub struct EvaluateResponse {
    pub verdict: QualityVerdict,
    pub acceptable: bool,
}

/// Classify a finalized transcript with the configured thresholds
async fn evaluate(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<EvaluateRequest>,
) -> Result<Json<EvaluateResponse>, VoiceError> {
    if !request.confidence.is_finite() {
        return Err(VoiceError::BadRequest("confidence must be a number"));
    }

    let verdict = state.session.thresholds.evaluate(
        &request.transcript,
        request.confidence,
        request.duration_ms,
    );

    Ok(Json(EvaluateResponse {
        verdict,
        acceptable: verdict.is_acceptable(),
    }))
}

/// Voice API errors
#[derive(Debug)]
pub enum VoiceError {
    NotConfigured(&'static str),
    BadRequest(&'static str),
    SynthesisFailed(String),
}

impl IntoResponse for VoiceError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: ErrorBody,
        }

        #[derive(Serialize)]
        struct ErrorBody {
            code: &'static str,
            message: String,
        }

        let (status, code, message) = match self {
            Self::NotConfigured(msg) => (StatusCode::SERVICE_UNAVAILABLE, "not_configured", msg.to_string()),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.to_string()),
            Self::SynthesisFailed(msg) => (StatusCode::BAD_GATEWAY, "synthesis_failed", msg),
        };

        if status.is_server_error() {
            tracing::warn!(code, message = %message, "voice request failed");
        }

        (status, Json(ErrorResponse { error: ErrorBody { code, message } })).into_response()
    }
}
