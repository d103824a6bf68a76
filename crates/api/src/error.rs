//! Error handling for API endpoints

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use smsgate_core::GatewayError;
use store::StoreError;
use utoipa::ToSchema;

/// Wire shape of every non-2xx response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Human-readable status text
    pub error: String,
    /// Detail for the specific failure
    pub message: String,
    /// Machine-readable error class
    pub code: String,
}

/// API error type that can be converted to HTTP responses
#[derive(Debug)]
pub enum ApiError {
    Validation(String),
    Unauthenticated(String),
    Forbidden,
    NotFound(String),
    Conflict(String),
    RateLimited(String),
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION",
            Self::Unauthenticated(_) => "UNAUTHENTICATED",
            Self::Forbidden => "FORBIDDEN",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::RateLimited(_) => "RATE_LIMITED",
            Self::Internal(_) => "INTERNAL",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        let message = match self {
            Self::Validation(msg)
            | Self::Unauthenticated(msg)
            | Self::NotFound(msg)
            | Self::Conflict(msg)
            | Self::RateLimited(msg) => msg,
            Self::Forbidden => "missing required permission".to_string(),
            Self::Internal(msg) => {
                tracing::error!("Internal server error: {}", msg);
                // Do not leak internals to the caller
                "internal server error".to_string()
            }
        };

        let body = Json(ErrorResponse {
            error: status
                .canonical_reason()
                .unwrap_or("Unknown")
                .to_string(),
            message,
            code: code.to_string(),
        });

        (status, body).into_response()
    }
}

/// Convert domain validation errors to API errors
impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::MessageNotFound(id) => {
                ApiError::NotFound(format!("message not found: {}", id))
            }
            GatewayError::TokenNotFound(id) => {
                ApiError::NotFound(format!("token not found: {}", id))
            }
            GatewayError::PermissionDenied => ApiError::Forbidden,
            GatewayError::InvalidTransition { id, status } => {
                ApiError::Conflict(format!("message {} is already {}", id, status))
            }
            other => ApiError::Validation(other.to_string()),
        }
    }
}

/// Convert store errors to API errors
impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Validation(msg) => ApiError::Validation(msg),
            StoreError::Database(db) => ApiError::Internal(format!("database error: {}", db)),
            StoreError::Internal(e) => ApiError::Internal(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_and_status() {
        let cases = [
            (ApiError::Validation("x".into()), 400, "VALIDATION"),
            (ApiError::Unauthenticated("x".into()), 401, "UNAUTHENTICATED"),
            (ApiError::Forbidden, 403, "FORBIDDEN"),
            (ApiError::NotFound("x".into()), 404, "NOT_FOUND"),
            (ApiError::Conflict("x".into()), 409, "CONFLICT"),
            (ApiError::RateLimited("x".into()), 429, "RATE_LIMITED"),
            (ApiError::Internal("x".into()), 500, "INTERNAL"),
        ];

        for (err, status, code) in cases {
            assert_eq!(err.status().as_u16(), status);
            assert_eq!(err.code(), code);
        }
    }

    #[test]
    fn test_error_body_shape() {
        let body = ErrorResponse {
            error: "Bad Request".to_string(),
            message: "phone number is not E.164".to_string(),
            code: "VALIDATION".to_string(),
        };

        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("\"error\""));
        assert!(json.contains("\"message\""));
        assert!(json.contains("\"code\":\"VALIDATION\""));
    }

    #[test]
    fn test_store_error_conversion() {
        let err: ApiError = StoreError::Validation("bad phone".to_string()).into();
        assert!(matches!(err, ApiError::Validation(_)));

        let err: ApiError = GatewayError::PermissionDenied.into();
        assert!(matches!(err, ApiError::Forbidden));
    }
}
