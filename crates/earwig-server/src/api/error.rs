//! API error types and response handling.
//!
//! One unified error type for every handler, converted into a consistent
//! JSON body with an appropriate status code. Core errors map onto it so
//! handlers can use `?` throughout.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Result type alias for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// Unified API error type.
#[derive(Debug, Clone)]
pub enum ApiError {
    /// 400 Bad Request - invalid input from the client.
    BadRequest {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 404 Not Found - resource does not exist.
    NotFound {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 409 Conflict - operation clashes with the current state.
    Conflict {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 500 Internal Server Error - unexpected server-side failure.
    InternalError {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
        /// Optional details for debugging.
        details: Option<String>,
    },

    /// 503 Service Unavailable - an external tool or the controller failed.
    ServiceUnavailable {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
        /// Raw tool output, when available.
        details: Option<String>,
    },
}

/// Standard JSON error response body.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "invalid_address",
    "message": "'xx' is not a valid Bluetooth address",
    "details": null
}))]
pub struct ErrorResponse {
    /// Machine-readable error code (e.g., "invalid_address").
    #[schema(example = "invalid_address")]
    pub error: String,

    /// Human-readable error message.
    pub message: String,

    /// Optional additional details for debugging.
    #[schema(nullable)]
    pub details: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Self::BadRequest {
                error_code,
                message,
            } => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    error: error_code,
                    message,
                    details: None,
                },
            ),

            Self::NotFound {
                error_code,
                message,
            } => (
                StatusCode::NOT_FOUND,
                ErrorResponse {
                    error: error_code,
                    message,
                    details: None,
                },
            ),

            Self::Conflict {
                error_code,
                message,
            } => (
                StatusCode::CONFLICT,
                ErrorResponse {
                    error: error_code,
                    message,
                    details: None,
                },
            ),

            Self::InternalError {
                error_code,
                message,
                details,
            } => {
                tracing::error!(
                    error_code = %error_code,
                    message = %message,
                    details = ?details,
                    "Internal server error"
                );
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse {
                        error: error_code,
                        message,
                        details,
                    },
                )
            }

            Self::ServiceUnavailable {
                error_code,
                message,
                details,
            } => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorResponse {
                    error: error_code,
                    message,
                    details,
                },
            ),
        };

        (status, Json(body)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadRequest { message, .. } => write!(f, "Bad Request: {message}"),
            Self::NotFound { message, .. } => write!(f, "Not Found: {message}"),
            Self::Conflict { message, .. } => write!(f, "Conflict: {message}"),
            Self::InternalError { message, .. } => write!(f, "Internal Error: {message}"),
            Self::ServiceUnavailable { message, .. } => {
                write!(f, "Service Unavailable: {message}")
            }
        }
    }
}

impl std::error::Error for ApiError {}

/// Convert from core errors, keeping raw tool output in `details`.
impl From<earwig_core::Error> for ApiError {
    fn from(err: earwig_core::Error) -> Self {
        use earwig_core::Error;

        let error_code = err.error_code().to_ascii_lowercase();
        match err {
            Error::InvalidAddress(_) | Error::InvalidAddressType(_) => Self::BadRequest {
                error_code,
                message: err.to_string(),
            },
            Error::ConnectionFailed { ref output, .. } => Self::ServiceUnavailable {
                error_code,
                message: err.to_string(),
                details: Some(output.clone()),
            },
            Error::CommandFailed { ref output, .. } => Self::ServiceUnavailable {
                error_code,
                message: err.to_string(),
                details: Some(output.clone()),
            },
            Error::CaptureFailed(_)
            | Error::Persistence(_)
            | Error::ConfigParse { .. }
            | Error::Io(_) => Self::InternalError {
                error_code,
                message: err.to_string(),
                details: None,
            },
        }
    }
}
