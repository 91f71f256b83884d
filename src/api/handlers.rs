//! Control API handlers

use axum::{Json, body::Bytes, extract::State};
use serde::{Deserialize, Serialize};

use crate::api::{
    Ctx,
    error::{ApiError, ErrorResponse},
};
use crate::crawling::EngineStatus;

/// Optional body of `POST /start`
#[derive(Debug, Default, Deserialize)]
pub struct StartRequest {
    pub workers: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct StartResponse {
    pub message: String,
    pub workers: usize,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    fn new(message: impl Into<String>) -> Json<Self> {
        Json(Self { message: message.into() })
    }
}

/// Handler for `POST /start`
///
/// Accepts an empty body or `{"workers": n}`.
///
/// ## Error Codes
/// - `ALREADY_RUNNING`: a run is active
/// - `INVALID_REQUEST`: the body is not valid JSON
/// - `START_FAILED`: the input list could not be loaded
#[tracing::instrument(skip_all, err)]
pub async fn start(
    State(ctx): State<Ctx>,
    body: Bytes,
) -> Result<Json<StartResponse>, ErrorResponse> {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        StartRequest::default()
    } else {
        serde_json::from_slice::<StartRequest>(&body)
            .map_err(|e| ApiError::InvalidRequest(e.to_string()))?
    };

    let run = ctx.engine.start(request.workers).await.map_err(ApiError::from)?;
    Ok(Json(StartResponse {
        message: format!("Processing started with {} workers", run.workers),
        workers: run.workers,
    }))
}

/// Handler for `POST /pause`
#[tracing::instrument(skip_all, err)]
pub async fn pause(State(ctx): State<Ctx>) -> Result<Json<MessageResponse>, ErrorResponse> {
    ctx.engine.pause().await.map_err(ApiError::from)?;
    Ok(MessageResponse::new("Processing paused"))
}

/// Handler for `POST /resume`
#[tracing::instrument(skip_all, err)]
pub async fn resume(State(ctx): State<Ctx>) -> Result<Json<MessageResponse>, ErrorResponse> {
    ctx.engine.resume().await.map_err(ApiError::from)?;
    Ok(MessageResponse::new("Processing resumed"))
}

/// Handler for `POST /stop`
///
/// Responds only after every worker has drained and the final batch
/// has been persisted.
#[tracing::instrument(skip_all, err)]
pub async fn stop(State(ctx): State<Ctx>) -> Result<Json<MessageResponse>, ErrorResponse> {
    ctx.engine.stop().await.map_err(ApiError::from)?;
    Ok(MessageResponse::new("Processing stopped"))
}

/// Handler for `GET /status`
pub async fn status(State(ctx): State<Ctx>) -> Json<EngineStatus> {
    Json(ctx.engine.status().await)
}

/// Health check handler
pub async fn health() -> &'static str {
    "OK"
}
