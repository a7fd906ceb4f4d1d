//! HTTP error type and mappings.
//!
//! Errors discovered before a stream starts become structured JSON with a
//! status code and a stable `code` discriminant. Errors discovered
//! mid-stream cannot change the status line anymore and are delivered
//! in-band by the streaming handlers instead.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use braid_core::error::BridgeError;
use braid_runtime::OllamaCliError;

#[derive(Debug, Error)]
pub enum HttpError {
    /// Bad request (invalid input).
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The inference service is down.
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: String,
    /// Stable discriminant for client-side handling.
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl HttpError {
    const fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "INVALID_INPUT",
            Self::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            error: self.to_string(),
            code: self.code(),
            details: None,
        };
        (status, axum::Json(body)).into_response()
    }
}

impl From<BridgeError> for HttpError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::InvalidInput(msg) => Self::BadRequest(msg),
            BridgeError::UpstreamUnavailable => {
                Self::ServiceUnavailable("inference service is not running".into())
            }
            BridgeError::Spawn(e) => Self::Internal(format!("failed to spawn process: {e}")),
        }
    }
}

impl From<OllamaCliError> for HttpError {
    fn from(err: OllamaCliError) -> Self {
        match err {
            OllamaCliError::Exec { .. } => Self::ServiceUnavailable(err.to_string()),
            OllamaCliError::Failed { .. } => Self::Internal(err.to_string()),
        }
    }
}
