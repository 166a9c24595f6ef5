use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Target busy: pulse in progress")]
    Busy,

    #[error("Too soon after last action: {remaining_ms} ms of cooldown remaining")]
    TooSoon { remaining_ms: u64 },

    #[error("Hardware unavailable: {0}")]
    HardwareUnavailable(String),

    #[error("Access denied for {0}")]
    AccessDenied(String),

    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Short machine-readable outcome label, used in API responses
    pub fn label(&self) -> &'static str {
        match self {
            AppError::Busy => "busy",
            AppError::TooSoon { .. } => "too-soon",
            AppError::HardwareUnavailable(_) => "hardware-unavailable",
            AppError::AccessDenied(_) => "access-denied",
            AppError::MalformedPacket(_) => "malformed",
            AppError::Bind { .. } => "bind-failure",
            AppError::NotFound(_) => "not-found",
            AppError::BadRequest(_) => "bad-request",
            AppError::Config(_) => "config",
            AppError::Io(_) => "io",
            AppError::Internal(_) => "internal",
        }
    }

    fn status_code(&self) -> StatusCode {
        // Every trigger outcome gets a distinct status so callers never
        // see a generic failure for an actionable condition.
        match self {
            AppError::Busy => StatusCode::CONFLICT,
            AppError::TooSoon { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::HardwareUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::AccessDenied(_) => StatusCode::FORBIDDEN,
            AppError::MalformedPacket(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Bind { .. }
            | AppError::Config(_)
            | AppError::Io(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub status: &'static str,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            success: false,
            status: self.label(),
            message: self.to_string(),
        };

        tracing::warn!(
            outcome = body.status,
            error_message = %body.message,
            "Request failed"
        );

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;
