use std::time::{Duration, SystemTime};

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info};

use super::AppState;
use crate::pipeline::{Fragment, PipelineError};
use crate::tts::SynthesisError;

/// `{"status": "error", "message": ...}` with a status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "status": "error", "message": self.message }))).into_response()
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        Self { status: StatusCode::BAD_REQUEST, message: e.to_string() }
    }
}

impl From<SynthesisError> for ApiError {
    fn from(e: SynthesisError) -> Self {
        Self { status: StatusCode::INTERNAL_SERVER_ERROR, message: e.to_string() }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoadModelRequest {
    model: Option<String>,
}

pub async fn load_model(State(state): State<AppState>, body: Option<Json<LoadModelRequest>>) -> Result<Json<serde_json::Value>, ApiError> {
    let model = body.and_then(|Json(req)| req.model).unwrap_or_else(|| state.default_model.clone());
    info!("📦 Loading TTS model {}", model);

    let factory = state.factory.clone();
    let name = model.clone();
    let engine = tokio::task::spawn_blocking(move || factory.load(&name))
        .await
        .map_err(|e| ApiError { status: StatusCode::INTERNAL_SERVER_ERROR, message: format!("Model loader panicked: {}", e) })?
        .inspect_err(|e| error!("❌ {}", e))?;

    state.pipeline.engines().install(engine);
    Ok(Json(json!({ "status": "success", "message": format!("Model {} loaded.", model) })))
}

/// A transcript fragment as posted by the transcription client.
///
/// Fragment times are milliseconds from `connection_start_time`; the other timestamps are
/// milliseconds since the Unix epoch. `recipient_posted_at` defaults to arrival time.
#[derive(Debug, Deserialize)]
pub struct TranscriptRequest {
    #[serde(default)]
    text: String,
    fragment_start_time: f64,
    fragment_end_time: f64,
    caller_posted_at: f64,
    recipient_posted_at: Option<f64>,
    connection_start_time: f64,
}

impl TranscriptRequest {
    fn into_fragment(self) -> Fragment {
        Fragment {
            text: self.text,
            fragment_start: millis(self.fragment_start_time),
            fragment_end: millis(self.fragment_end_time),
            caller_posted_at: epoch_millis(self.caller_posted_at),
            recipient_posted_at: self.recipient_posted_at.map_or_else(SystemTime::now, epoch_millis),
            connection_start: epoch_millis(self.connection_start_time),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TranscriptResponse {
    status: &'static str,
    sequence_ids: Vec<u64>,
}

pub async fn transcript(State(state): State<AppState>, Json(req): Json<TranscriptRequest>) -> Result<Json<TranscriptResponse>, ApiError> {
    let sequence_ids = state.pipeline.ingest(&req.into_fragment())?;
    Ok(Json(TranscriptResponse { status: "success", sequence_ids }))
}

#[derive(Debug, Deserialize)]
pub struct VoiceRequest {
    voice: String,
}

pub async fn voice(State(state): State<AppState>, Json(req): Json<VoiceRequest>) -> Json<serde_json::Value> {
    let selected = state.pipeline.voices().select(&req.voice);
    Json(json!({ "status": "success", "voice": selected.name, "speaker_id": selected.speaker_id }))
}

pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let pipeline = &state.pipeline;
    let model = pipeline.engines().current().map(|engine| engine.model().to_string());

    Json(json!({
        "status": "ok",
        "model_loaded": model.is_some(),
        "model": model,
        "voice": pipeline.voices().current().name,
        "next_sequence_id": pipeline.next_sequence_id(),
        "next_to_play": pipeline.queue().next_to_play(),
        "queued_audio_secs": pipeline.queue().queued_audio().as_secs_f64(),
        "waiting_results": pipeline.queue().pending(),
        "pending_text": pipeline.pending_text(),
    }))
}

/// Non-finite or negative values clamp to zero.
fn millis(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 { Duration::from_nanos((value * 1_000_000.0).round() as u64) } else { Duration::ZERO }
}

fn epoch_millis(value: f64) -> SystemTime {
    SystemTime::UNIX_EPOCH + millis(value)
}
