use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::domain::errors::DomainError;

/// Error returned by HTTP handlers. Serialised as `{"error": CODE, "message": text}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        let (status, code) = match &err {
            DomainError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "INVALID_INPUT"),
            DomainError::AlreadyActive(_) => (StatusCode::BAD_REQUEST, "ALREADY_ACTIVE"),
            DomainError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            DomainError::SourceUnavailable(_) => (StatusCode::BAD_GATEWAY, "SOURCE_UNAVAILABLE"),
            DomainError::Detector(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DETECTOR_ERROR"),
            DomainError::OperationFailed(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };
        let message = match err {
            DomainError::InvalidInput(m)
            | DomainError::AlreadyActive(m)
            | DomainError::NotFound(m)
            | DomainError::SourceUnavailable(m)
            | DomainError::Detector(m)
            | DomainError::OperationFailed(m) => m,
        };
        Self { status, code, message }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "INVALID_INPUT",
            message: rejection.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, error_code = self.code, message = %self.message, "Request error");
        } else {
            tracing::warn!(status = %self.status, error_code = self.code, message = %self.message, "Request rejected");
        }

        let body = Json(json!({
            "error": self.code,
            "message": self.message,
        }));
        (self.status, body).into_response()
    }
}
