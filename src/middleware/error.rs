//! HTTP rendering of `AppError`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{AppError, ErrorCode};

/// Wire shape of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        // Retryability is only meaningful for server-side failures.
        let retryable = if status.is_server_error() {
            Some(self.is_retryable())
        } else {
            None
        };

        let body = ErrorResponse {
            error: self.error_code(),
            message: self.user_message(),
            request_id: self.request_id.clone(),
            timestamp: Utc::now(),
            details: self.context.clone(),
            retryable,
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DomainError, PermissionError};
    use uuid::Uuid;

    #[test]
    fn domain_conflict_renders_409() {
        let response = AppError::domain(DomainError::SlotUnavailable {
            slot_id: Uuid::nil(),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn unauthenticated_renders_401() {
        let response = AppError::permission(PermissionError::Unauthenticated).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
