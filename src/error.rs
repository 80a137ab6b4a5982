//! # Error Handling
//!
//! HTTP-facing error type for the relay. Only errors that happen *before* the event
//! stream opens become HTTP responses; once streaming has started, failures travel to
//! the client as a trailing `error` relay event instead (see `relay::event`).
//!
//! ## Key Rust Concepts for Error Handling:
//! - **Enums for Error Types**: each variant is one failure category with its own status code
//! - **ResponseError trait**: converts errors into actix-web HTTP responses

use actix_web::{HttpResponse, ResponseError};  // Web framework error handling
use serde_json::json;                          // For creating JSON error responses
use std::fmt;                                  // For implementing Display trait

/// Custom error types for the HTTP layer.
///
/// ## Error Categories:
/// - **NotFound**: No route matches the request (404 errors)
/// - **ValidationError**: Malformed body, missing conversation id or message (400 errors)
///
/// ## Usage Example:
/// ```rust,ignore
/// return Err(AppError::ValidationError("Uuid is required".to_string()));
/// ```
#[derive(Debug)]
pub enum AppError {
    /// Requested resource was not found
    NotFound(String),

    /// Inbound turn failed validation; rejected before any upstream call
    ValidationError(String),
}

impl AppError {
    /// Machine-readable error type used in the JSON body.
    pub fn error_type(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "not_found",
            AppError::ValidationError(_) => "validation_error",
        }
    }

    fn message(&self) -> &str {
        match self {
            AppError::NotFound(msg) | AppError::ValidationError(msg) => msg,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

/// Implementation of the ResponseError trait for AppError.
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "validation_error",
///     "message": "Uuid is required",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        match self {
            AppError::ValidationError(_) => actix_web::http::StatusCode::BAD_REQUEST,  // 400
            AppError::NotFound(_) => actix_web::http::StatusCode::NOT_FOUND,  // 404
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

/// Shorthand for `Result<T, AppError>`.
pub type AppResult<T> = Result<T, AppError>;
