use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use synth_core::SynthesisError;
use thiserror::Error;

/// API Error types
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Model is not loaded")]
    EngineNotReady,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unsupported mode: {0}")]
    UnsupportedMode(String),

    #[error("Synthesis failed: {0}")]
    Synthesis(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::EngineNotReady => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::InvalidInput(_) | ApiError::UnsupportedMode(_) => StatusCode::BAD_REQUEST,
            ApiError::Synthesis(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<SynthesisError> for ApiError {
    fn from(e: SynthesisError) -> Self {
        match e {
            SynthesisError::EngineNotReady => ApiError::EngineNotReady,
            SynthesisError::UnsupportedMode(mode) => ApiError::UnsupportedMode(mode),
            SynthesisError::InvalidRequest(msg) => ApiError::InvalidInput(msg),
            SynthesisError::Internal(msg) => ApiError::Internal(msg),
            other => ApiError::Synthesis(other.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::InvalidInput(rejection.body_text())
    }
}

/// Error response structure
#[derive(Serialize)]
struct ErrorResponse {
    detail: String,
    code: u16,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            tracing::error!("{self}");
        }

        let body = Json(ErrorResponse {
            detail: self.to_string(),
            code: status.as_u16(),
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use synth_core::EngineError;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::from(SynthesisError::EngineNotReady).status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            ApiError::from(SynthesisError::UnsupportedMode("bogus".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(SynthesisError::InvalidRequest("speed".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(SynthesisError::Engine(EngineError::Generation("boom".into()))).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(ApiError::from(SynthesisError::EmptyOutput).status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
