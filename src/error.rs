//! # Error Handling
//!
//! This module defines the application's error type and how it's converted to HTTP responses.
//!
//! Internal layers (audio decoding, model inference, file I/O) report failures as
//! `anyhow::Error`. At the HTTP boundary those are turned into an [`AppError`],
//! which knows its status code and renders a consistent JSON body.
//!
//! ## HTTP Status Code Mapping:
//! - BadRequest/ValidationError → 400 (Bad Request)
//! - PayloadTooLarge → 413 (Payload Too Large)
//! - UnsupportedAudio → 422 (Unprocessable Entity)
//! - Internal/ConfigError → 500 (Internal Server Error)

use crate::audio::decoder::AudioDecodeError;
use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Custom error types for the application.
///
/// ## Usage Example:
/// ```rust,ignore
/// return Err(AppError::BadRequest("Uploaded file is empty".to_string()));
/// ```
#[derive(Debug)]
pub enum AppError {
    /// Internal server errors (temp storage unavailable, model failure, etc.)
    Internal(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Upload exceeded the configured size limit
    PayloadTooLarge(String),

    /// Upload could not be decoded as audio
    UnsupportedAudio(String),

    /// Configuration file or environment variable problems
    ConfigError(String),

    /// User input failed validation rules
    ValidationError(String),
}

impl AppError {
    /// Machine-readable error type used in the JSON body.
    pub fn error_type(&self) -> &'static str {
        match self {
            AppError::Internal(_) => "internal_error",
            AppError::BadRequest(_) => "bad_request",
            AppError::PayloadTooLarge(_) => "payload_too_large",
            AppError::UnsupportedAudio(_) => "unsupported_audio",
            AppError::ConfigError(_) => "config_error",
            AppError::ValidationError(_) => "validation_error",
        }
    }

    fn message(&self) -> &str {
        match self {
            AppError::Internal(msg)
            | AppError::BadRequest(msg)
            | AppError::PayloadTooLarge(msg)
            | AppError::UnsupportedAudio(msg)
            | AppError::ConfigError(msg)
            | AppError::ValidationError(msg) => msg,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::PayloadTooLarge(msg) => write!(f, "Payload too large: {}", msg),
            AppError::UnsupportedAudio(msg) => write!(f, "Unsupported audio: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

/// Converts errors into HTTP responses.
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "unsupported_audio",
///     "message": "probe: unsupported feature: core (probe): no suitable format reader found",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Internal(_) | AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) | AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::UnsupportedAudio(_) => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "error": {
                "type": self.error_type(),
                "message": self.message(),
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// Automatic conversion from anyhow::Error to AppError.
///
/// Audio that the decoder rejected is the client's problem (422); anything
/// else that bubbles up from the transcription layer is a server fault.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(decode_err) = err.downcast_ref::<AudioDecodeError>() {
            return AppError::UnsupportedAudio(decode_err.to_string());
        }
        // {:#} keeps the context chain on one line
        AppError::Internal(format!("{:#}", err))
    }
}

/// JSON parsing errors come from client bodies, so they are a 400.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// Type alias for Results that use our custom error type.
pub type AppResult<T> = Result<T, AppError>;
