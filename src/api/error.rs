//! Error responses for the control API
//!
//! Every error body is `{"error_code": "...", "error_message": "..."}` with a
//! stable SCREAMING_SNAKE_CASE code.

use axum::{Json, http::StatusCode};
use serde::Serialize;

use crate::crawling::{ControlAction, ControlError, EngineError};

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Not serialized; used to build the response
    #[serde(skip)]
    pub status_code: StatusCode,

    pub error_code: String,

    pub error_message: String,
}

/// Errors that know their API code and status
pub trait IntoErrorResponse: std::fmt::Display + Send + Sync + 'static {
    fn error_code(&self) -> &'static str;

    fn status_code(&self) -> StatusCode;
}

impl<E> From<E> for ErrorResponse
where
    E: IntoErrorResponse,
{
    fn from(error: E) -> Self {
        ErrorResponse {
            status_code: error.status_code(),
            error_code: error.error_code().to_string(),
            error_message: error.to_string(),
        }
    }
}

impl std::fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.error_message.fmt(f)
    }
}

impl axum::response::IntoResponse for ErrorResponse {
    fn into_response(self) -> axum::response::Response {
        (self.status_code, Json(self)).into_response()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("processing is already running: {0}")]
    AlreadyRunning(ControlError),

    #[error("no active processing run: {0}")]
    NotActive(ControlError),

    #[error("processing is not paused: {0}")]
    NotPaused(ControlError),

    #[error("{0}")]
    StartFailed(String),

    #[error("invalid request body: {0}")]
    InvalidRequest(String),
}

impl From<EngineError> for ApiError {
    fn from(error: EngineError) -> Self {
        match error {
            EngineError::Control(
                err @ ControlError::InvalidStateTransition { action, .. },
            ) => match action {
                ControlAction::Start => ApiError::AlreadyRunning(err),
                ControlAction::Resume => ApiError::NotPaused(err),
                ControlAction::Pause | ControlAction::Stop | ControlAction::Drained => {
                    ApiError::NotActive(err)
                }
            },
            EngineError::StartFailed(message) => ApiError::StartFailed(message),
        }
    }
}

impl IntoErrorResponse for ApiError {
    fn error_code(&self) -> &'static str {
        match self {
            ApiError::AlreadyRunning(_) => "ALREADY_RUNNING",
            ApiError::NotActive(_) => "NOT_ACTIVE",
            ApiError::NotPaused(_) => "NOT_PAUSED",
            ApiError::StartFailed(_) => "START_FAILED",
            ApiError::InvalidRequest(_) => "INVALID_REQUEST",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::StartFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawling::RunPhase;

    fn transition_error(phase: RunPhase, action: ControlAction) -> EngineError {
        EngineError::Control(ControlError::InvalidStateTransition { phase, action })
    }

    #[test]
    fn control_errors_map_to_stable_codes() {
        let cases = [
            (transition_error(RunPhase::Running, ControlAction::Start), "ALREADY_RUNNING"),
            (transition_error(RunPhase::Idle, ControlAction::Pause), "NOT_ACTIVE"),
            (transition_error(RunPhase::Stopped, ControlAction::Stop), "NOT_ACTIVE"),
            (transition_error(RunPhase::Running, ControlAction::Resume), "NOT_PAUSED"),
        ];

        for (error, code) in cases {
            let response = ErrorResponse::from(ApiError::from(error));
            assert_eq!(response.error_code, code);
            assert_eq!(response.status_code, StatusCode::BAD_REQUEST);
        }
    }

    #[test]
    fn start_failure_is_a_server_error() {
        let response = ErrorResponse::from(ApiError::from(EngineError::StartFailed(
            "failed to read data/cids.txt".to_string(),
        )));
        assert_eq!(response.error_code, "START_FAILED");
        assert_eq!(response.status_code, StatusCode::INTERNAL_SERVER_ERROR);

        let body = serde_json::to_value(&response).unwrap();
        assert!(body.get("status_code").is_none());
        assert_eq!(body["error_message"], "failed to read data/cids.txt");
    }
}
