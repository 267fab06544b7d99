use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};
use utoipa::ToSchema;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Error body returned by every failing endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Bad Request",
    "code": "conflict",
    "message": "Insufficient stock for product 550e8400-e29b-41d4-a716-446655440000",
    "request_id": "req-abc123xyz",
    "timestamp": "2024-12-09T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Bad Request")
    #[schema(example = "Not Found")]
    pub error: String,
    /// Machine-readable error category
    #[schema(example = "not_found")]
    pub code: String,
    /// Human-readable error description
    #[schema(example = "Order 550e8400-e29b-41d4-a716-446655440000 not found")]
    pub message: String,
    /// Unique request identifier for support and debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(example = "req-abc123xyz")]
    pub request_id: Option<String>,
    /// RFC 3339 timestamp when the error occurred
    pub timestamp: String,
}

/// Coarse failure taxonomy shared by the service layer and the HTTP surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    ExternalService,
    Persistence,
    Unauthorized,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Insufficient stock: {0}")]
    InsufficientStock(String),

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Payment not completed: {0}")]
    PaymentNotSucceeded(String),

    #[error("Payment mismatch: {0}")]
    PaymentMismatch(String),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl From<axum::extract::rejection::JsonRejection> for ServiceError {
    fn from(rejection: axum::extract::rejection::JsonRejection) -> Self {
        ServiceError::ValidationError(rejection.body_text())
    }
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ValidationError(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InsufficientStock(_)
            | Self::InvalidStatus(_)
            | Self::PaymentNotSucceeded(_)
            | Self::PaymentMismatch(_) => ErrorKind::Conflict,
            Self::ExternalServiceError(_) => ErrorKind::ExternalService,
            Self::DatabaseError(_) | Self::InternalError(_) => ErrorKind::Persistence,
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
        }
    }

    /// Returns the HTTP status code for this error.
    /// Stock, state and payment conflicts all map to 400.
    pub fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::Validation | ErrorKind::Conflict => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::ExternalService => StatusCode::BAD_GATEWAY,
            ErrorKind::Persistence => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::InternalError(_) => "Internal server error".to_string(),
            Self::ExternalServiceError(_) => "Payment provider unavailable".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, kind = %self.kind(), "request failed");
        }

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            code: self.kind().to_string(),
            message: self.response_message(),
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use rstest::rstest;

    #[tokio::test]
    async fn service_error_response_includes_request_id() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("req-123"), async {
                ServiceError::NotFound("order".into()).into_response()
            })
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.request_id.as_deref(), Some("req-123"));
        assert_eq!(payload.code, "not_found");
    }

    #[rstest]
    #[case(ServiceError::ValidationError("x".into()), StatusCode::BAD_REQUEST, ErrorKind::Validation)]
    #[case(ServiceError::NotFound("x".into()), StatusCode::NOT_FOUND, ErrorKind::NotFound)]
    #[case(ServiceError::InsufficientStock("x".into()), StatusCode::BAD_REQUEST, ErrorKind::Conflict)]
    #[case(ServiceError::InvalidStatus("x".into()), StatusCode::BAD_REQUEST, ErrorKind::Conflict)]
    #[case(ServiceError::PaymentNotSucceeded("x".into()), StatusCode::BAD_REQUEST, ErrorKind::Conflict)]
    #[case(ServiceError::PaymentMismatch("x".into()), StatusCode::BAD_REQUEST, ErrorKind::Conflict)]
    #[case(ServiceError::ExternalServiceError("x".into()), StatusCode::BAD_GATEWAY, ErrorKind::ExternalService)]
    #[case(ServiceError::DatabaseError(DbErr::Custom("x".into())), StatusCode::INTERNAL_SERVER_ERROR, ErrorKind::Persistence)]
    #[case(ServiceError::Unauthorized("x".into()), StatusCode::UNAUTHORIZED, ErrorKind::Unauthorized)]
    fn status_code_follows_kind(
        #[case] err: ServiceError,
        #[case] status: StatusCode,
        #[case] kind: ErrorKind,
    ) {
        assert_eq!(err.kind(), kind);
        assert_eq!(err.status_code(), status);
    }

    #[test]
    fn response_message_hides_internal_details() {
        assert_eq!(
            ServiceError::DatabaseError(DbErr::Custom("connection refused".into()))
                .response_message(),
            "Database error"
        );
        assert_eq!(
            ServiceError::ExternalServiceError("stripe returned 500: secret".into())
                .response_message(),
            "Payment provider unavailable"
        );
        assert_eq!(
            ServiceError::NotFound("Order abc".into()).response_message(),
            "Not found: Order abc"
        );
    }
}
