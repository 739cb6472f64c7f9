//! Error taxonomy surfaced to HTTP and SSE clients as `error_type`.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// The seven-member error taxonomy every lifecycle operation reduces to.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid input: {field}: {message}")]
    InvalidInput { field: String, message: String },

    #[error("required tool missing: {tool}")]
    ToolMissing { tool: String },

    #[error("device busy: {device_id} held by {current_owner}")]
    DeviceBusy {
        device_id: String,
        current_owner: String,
    },

    #[error("mode {mode} already running")]
    AlreadyRunning { mode: String },

    #[error("spawn failed: {message}")]
    SpawnFailed { message: String },

    #[error("child exited during startup window: {stderr_tail}")]
    FastFailExit { stderr_tail: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn error_type(&self) -> &'static str {
        match self {
            CoreError::InvalidInput { .. } => "INVALID_INPUT",
            CoreError::ToolMissing { .. } => "TOOL_MISSING",
            CoreError::DeviceBusy { .. } => "DEVICE_BUSY",
            CoreError::AlreadyRunning { .. } => "ALREADY_RUNNING",
            CoreError::SpawnFailed { .. } => "SPAWN_FAILED",
            CoreError::FastFailExit { .. } => "FAST_FAIL_EXIT",
            CoreError::Internal(_) => "INTERNAL",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            CoreError::InvalidInput { .. } => StatusCode::BAD_REQUEST,
            CoreError::ToolMissing { .. } => StatusCode::SERVICE_UNAVAILABLE,
            CoreError::DeviceBusy { .. } => StatusCode::CONFLICT,
            CoreError::AlreadyRunning { .. } => StatusCode::CONFLICT,
            CoreError::SpawnFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            CoreError::FastFailExit { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            CoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// The `{status, error_type, message}` envelope used by both HTTP error
/// responses and `event: error` SSE frames.
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub status: &'static str,
    pub error_type: &'static str,
    pub message: String,
}

impl From<&CoreError> for ErrorEnvelope {
    fn from(err: &CoreError) -> Self {
        ErrorEnvelope {
            status: "error",
            error_type: err.error_type(),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let envelope = ErrorEnvelope::from(&self);
        (status, Json(envelope)).into_response()
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
