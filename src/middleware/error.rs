//! Error response formatting
//!
//! Every failed request is answered with the same JSON envelope: a stable
//! error code, a user-facing message and the request id for support.

use crate::error::{AppError, ErrorCode};
use axum::{
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Standardized error response structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable error code
    pub error: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Request ID for debugging and support
    pub request_id: Option<String>,

    /// ISO 8601 timestamp of the error
    pub timestamp: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,

    /// Whether the client should retry the request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl ErrorResponse {
    pub fn from_app_error(error: &AppError) -> Self {
        Self {
            error: error.error_code(),
            message: error.user_message(),
            request_id: error.request_id.clone(),
            timestamp: Utc::now().to_rfc3339(),
            details: error
                .context
                .as_ref()
                .map(|context| serde_json::json!({ "context": context })),
            retryable: Some(error.is_retryable()),
        }
    }

    /// Generic internal error that leaks nothing about the cause
    pub fn internal_error(request_id: Option<String>) -> Self {
        Self {
            error: ErrorCode::InternalError,
            message: "An internal server error occurred. Please try again later.".to_string(),
            request_id,
            timestamp: Utc::now().to_rfc3339(),
            details: None,
            retryable: Some(false),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status_code =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status_code.is_server_error() {
            tracing::error!(
                error = ?self,
                request_id = ?self.request_id,
                status = %status_code.as_u16(),
                "Server error occurred"
            );
        } else {
            tracing::warn!(
                error_code = ?self.error_code(),
                request_id = ?self.request_id,
                status = %status_code.as_u16(),
                "Client error occurred"
            );
        }

        let error_response = if status_code == StatusCode::INTERNAL_SERVER_ERROR {
            ErrorResponse {
                error: self.error_code(),
                ..ErrorResponse::internal_error(self.request_id.clone())
            }
        } else {
            ErrorResponse::from_app_error(&self)
        };
        (status_code, Json(error_response)).into_response()
    }
}

/// Create a standardized success response
pub fn success_response<T: Serialize>(data: T) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "success": true,
        "data": data,
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

pub fn get_request_id_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DomainError;
    use http_body_util::BodyExt;

    #[test]
    fn test_error_response_from_app_error() {
        let app_error =
            AppError::domain(DomainError::AlreadyPaid { order_id: 42 }).with_request_id("req_123");

        let error_response = ErrorResponse::from_app_error(&app_error);

        assert_eq!(error_response.error, ErrorCode::AlreadyPaid);
        assert_eq!(error_response.request_id, Some("req_123".to_string()));
        assert!(error_response.message.contains("#42"));
        assert_eq!(error_response.retryable, Some(false));
    }

    #[tokio::test]
    async fn test_app_error_into_response() {
        let response = AppError::validation("shipping_address", "must not be blank").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_server_errors_hide_their_cause() {
        let response = AppError::configuration("JWT_SECRET unreadable").into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("CONFIGURATION_ERROR"));
        assert!(!text.contains("JWT_SECRET"));
    }

    #[test]
    fn test_request_id_header_is_read() {
        let mut headers = HeaderMap::new();
        headers.insert("x-request-id", "abc".parse().unwrap());
        assert_eq!(get_request_id_from_headers(&headers).as_deref(), Some("abc"));
    }
}
