//! Flow-specific error types for the authentication and export paths.

use service_core::axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use service_core::error::AppError;
use thiserror::Error;

/// Authentication-flow outcome codes. Deliberately generic: `Invalid` covers
/// unknown email, unknown challenge, mismatched binding, replay, and wrong
/// OTP alike, so the response shape cannot be used to enumerate accounts.
#[derive(Debug, Error)]
pub enum AuthFlowError {
    #[error("INVALID")]
    Invalid,

    #[error("EXPIRED")]
    Expired,

    #[error("LOCKED")]
    Locked,

    #[error("RATE_LIMIT")]
    RateLimited,

    #[error("CONSENT_REQUIRED")]
    ConsentRequired,

    #[error(transparent)]
    Internal(#[from] AppError),
}

impl IntoResponse for AuthFlowError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            AuthFlowError::Invalid => (StatusCode::BAD_REQUEST, "INVALID"),
            AuthFlowError::Expired => (StatusCode::BAD_REQUEST, "EXPIRED"),
            AuthFlowError::ConsentRequired => (StatusCode::BAD_REQUEST, "CONSENT_REQUIRED"),
            AuthFlowError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMIT"),
            AuthFlowError::Locked => (StatusCode::TOO_MANY_REQUESTS, "LOCKED"),
            AuthFlowError::Internal(err) => return err.into_response(),
        };
        (status, Json(serde_json::json!({ "detail": detail }))).into_response()
    }
}

/// Export-token failure codes. These are distinguishable (unlike auth-flow
/// errors) because the caller is already an authenticated superadmin.
#[derive(Debug, Error)]
pub enum ExportTokenError {
    #[error("token_invalid")]
    TokenInvalid,

    #[error("token_expired")]
    TokenExpired,

    #[error("token_used")]
    TokenUsed,

    #[error(transparent)]
    Internal(#[from] AppError),
}

impl ExportTokenError {
    pub fn code(&self) -> Option<&'static str> {
        match self {
            ExportTokenError::TokenInvalid => Some("token_invalid"),
            ExportTokenError::TokenExpired => Some("token_expired"),
            ExportTokenError::TokenUsed => Some("token_used"),
            ExportTokenError::Internal(_) => None,
        }
    }
}

impl IntoResponse for ExportTokenError {
    fn into_response(self) -> Response {
        match self {
            ExportTokenError::Internal(err) => err.into_response(),
            other => {
                let code = other.code().unwrap_or("token_invalid");
                (
                    StatusCode::FORBIDDEN,
                    Json(serde_json::json!({ "detail": code })),
                )
                    .into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_flow_codes_map_to_expected_statuses() {
        assert_eq!(
            AuthFlowError::Invalid.into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AuthFlowError::ConsentRequired.into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AuthFlowError::Locked.into_response().status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            AuthFlowError::RateLimited.into_response().status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn export_token_codes_are_forbidden() {
        for err in [
            ExportTokenError::TokenInvalid,
            ExportTokenError::TokenExpired,
            ExportTokenError::TokenUsed,
        ] {
            assert_eq!(err.into_response().status(), StatusCode::FORBIDDEN);
        }
    }
}
