//! HTTP-level errors.
//!
//! Protocol faults never come through here: the connector renders those as
//! its own JSON error bodies. [`ApiError`] covers what fails before or around
//! the dispatcher (unreadable request bodies, missing thumbnails, response
//! construction).

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::ConnectorError;

/// API error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Bad request (400).
    BadRequest,
    /// Forbidden (403).
    Forbidden,
    /// Not found (404).
    NotFound,
    /// Internal server error (500).
    InternalError,
}

impl ErrorCode {
    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::BadRequest => StatusCode::BAD_REQUEST,
            ErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// API error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: ErrorCode,
    pub message: String,
}

/// API error type.
#[derive(Debug)]
pub struct ApiError {
    code: ErrorCode,
    message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.code.status_code();
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (status, Json(body)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

impl From<ConnectorError> for ApiError {
    fn from(err: ConnectorError) -> Self {
        match &err {
            ConnectorError::FileNotFound | ConnectorError::DirectoryNotFound => {
                ApiError::not_found("Not found")
            }
            ConnectorError::PermissionDenied(_) | ConnectorError::AccessDenied => {
                ApiError::forbidden("Access denied")
            }
            ConnectorError::Decode(_)
            | ConnectorError::CommandParams(_)
            | ConnectorError::Validation(_) => ApiError::bad_request(err.to_string()),
            _ => {
                tracing::error!("Internal error: {}", err);
                ApiError::internal("An internal error occurred")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_status() {
        assert_eq!(ErrorCode::BadRequest.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::Forbidden.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ErrorCode::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            ErrorCode::InternalError.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_from_connector_error() {
        assert_eq!(
            ApiError::from(ConnectorError::FileNotFound).code(),
            ErrorCode::NotFound
        );
        assert_eq!(
            ApiError::from(ConnectorError::PermissionDenied("x".into())).code(),
            ErrorCode::Forbidden
        );
        assert_eq!(
            ApiError::from(ConnectorError::Decode("bad".into())).code(),
            ErrorCode::BadRequest
        );
        assert_eq!(
            ApiError::from(ConnectorError::Other("boom".into())).code(),
            ErrorCode::InternalError
        );
    }

    #[test]
    fn test_api_error_display() {
        let err = ApiError::not_found("missing");
        assert_eq!(err.to_string(), "NotFound: missing");
    }
}
