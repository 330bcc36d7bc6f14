//! Error types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

pub use crate::capture::CaptureError;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Camera or encoder could not be acquired or configured
    #[error("Capture unavailable: {0}")]
    CaptureUnavailable(#[source] CaptureError),

    /// Client asked for a preset that does not exist
    #[error("Unknown mode: {0}")]
    UnknownMode(String),

    /// Request body could not be interpreted at all
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A blocking capture task panicked or was cancelled
    #[error("Capture task failed: {0}")]
    TaskFailed(#[from] tokio::task::JoinError),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            Error::UnknownMode(_) => (StatusCode::BAD_REQUEST, "UNKNOWN_MODE"),
            Error::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
            Error::CaptureUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "CAPTURE_UNAVAILABLE")
            }
            Error::TaskFailed(_) | Error::Config(_) | Error::Io(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL")
            }
        };

        let body = Json(json!({
            "error": code,
            "message": self.to_string(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_mode_is_client_error() {
        let response = Error::UnknownMode("Dusk".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn capture_unavailable_is_service_unavailable() {
        let err = Error::CaptureUnavailable(CaptureError::Unavailable("no device".into()));
        assert_eq!(err.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
