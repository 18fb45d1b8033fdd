//! HTTP error responses.
//!
//! Every failure leaves the API as `{code, message, details?}` with a status
//! derived from the domain error.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::error::Error;

/// JSON body of an error response.
#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    /// Stable machine-readable code, e.g. `INVALID_PARAMETER`.
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// A failed request: status plus the response body.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ApiErrorResponse,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ApiErrorResponse {
                code,
                message: message.into(),
                details: None,
            },
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.body.details = Some(details);
        self
    }

    pub fn code(&self) -> &'static str {
        self.body.code
    }

    pub fn message(&self) -> &str {
        &self.body.message
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    /// A submitted value failed validation.
    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_PARAMETER", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "CONFLICT", message)
    }

    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self::new(StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::InvalidParameter(msg) => Self::invalid_parameter(msg),
            Error::UnknownJob(id) => Self::not_found(format!("Job '{}' not found", id)),
            Error::InvalidStateTransition { from, to } => Self::conflict(format!(
                "Job cannot move from {} to {}",
                from, to
            )),
            // Paths and tool output stay in the log.
            other => {
                tracing::error!(error = %other, "Request failed with internal error");
                Self::internal("An unexpected error occurred")
            }
        }
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_error_mapping() {
        let err: ApiError = Error::invalid_parameter("stems must be 2, 3, or 4 (got 5)").into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), "INVALID_PARAMETER");

        let err: ApiError = Error::unknown_job("abc").into();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert!(err.message().contains("abc"));

        let err: ApiError = Error::InvalidStateTransition {
            from: "done".into(),
            to: "cancelled".into(),
        }
        .into();
        assert_eq!(err.status, StatusCode::CONFLICT);
        assert_eq!(err.code(), "CONFLICT");
    }

    #[test]
    fn test_internal_details_not_leaked() {
        let err: ApiError = Error::Io(std::io::Error::other("/secret/path: denied")).into();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.message().contains("/secret"));
    }

    #[test]
    fn test_body_shape() {
        let err = ApiError::not_found("gone").with_details(serde_json::json!({"job": "x"}));
        let json = serde_json::to_value(&err.body).unwrap();
        assert_eq!(json["code"], "NOT_FOUND");
        assert_eq!(json["message"], "gone");
        assert_eq!(json["details"]["job"], "x");

        let json = serde_json::to_value(&ApiError::internal("x").body).unwrap();
        assert!(json.get("details").is_none());
    }
}
