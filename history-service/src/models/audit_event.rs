//! Audit event model - append-only, PII-free decision log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::services::redact::strip_denylisted;

/// Audit action taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    ChallengeCreated,
    ChallengeDeliveryFailed,
    ChallengeVerifyFailed,
    SessionCreated,
    SessionRevoked,
    ConsentRecorded,
    RoleChanged,
    ExportGrantIssued,
    ExportGrantConsumed,
    ExportServed,
    AccessDenied,
    RateLimitExceeded,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::ChallengeCreated => "challenge_created",
            AuditAction::ChallengeDeliveryFailed => "challenge_delivery_failed",
            AuditAction::ChallengeVerifyFailed => "challenge_verify_failed",
            AuditAction::SessionCreated => "session_created",
            AuditAction::SessionRevoked => "session_revoked",
            AuditAction::ConsentRecorded => "consent_recorded",
            AuditAction::RoleChanged => "role_changed",
            AuditAction::ExportGrantIssued => "export_grant_issued",
            AuditAction::ExportGrantConsumed => "export_grant_consumed",
            AuditAction::ExportServed => "export_served",
            AuditAction::AccessDenied => "access_denied",
            AuditAction::RateLimitExceeded => "rate_limit_exceeded",
        }
    }
}

/// Outcome of the audited decision point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditResult {
    Success,
    Denied,
    Error,
}

impl AuditResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditResult::Success => "success",
            AuditResult::Denied => "denied",
            AuditResult::Error => "error",
        }
    }
}

/// Enumerated denial/error reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    Invalid,
    Expired,
    Locked,
    RateLimited,
    UnknownUser,
    ConsentMissing,
    ConsentVersionMismatch,
    TokenInvalid,
    TokenExpired,
    TokenUsed,
    Forbidden,
    SuperadminRequired,
    InvalidRole,
    UserNotFound,
    DeliveryFailed,
    StorageError,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::Invalid => "invalid",
            ReasonCode::Expired => "expired",
            ReasonCode::Locked => "locked",
            ReasonCode::RateLimited => "rate_limited",
            ReasonCode::UnknownUser => "unknown_user",
            ReasonCode::ConsentMissing => "consent_missing",
            ReasonCode::ConsentVersionMismatch => "consent_version_mismatch",
            ReasonCode::TokenInvalid => "token_invalid",
            ReasonCode::TokenExpired => "token_expired",
            ReasonCode::TokenUsed => "token_used",
            ReasonCode::Forbidden => "forbidden",
            ReasonCode::SuperadminRequired => "superadmin_required",
            ReasonCode::InvalidRole => "invalid_role",
            ReasonCode::UserNotFound => "user_not_found",
            ReasonCode::DeliveryFailed => "delivery_failed",
            ReasonCode::StorageError => "storage_error",
        }
    }
}

/// Audit event entity. Metadata is denylist-filtered at construction, so no
/// insert path can carry raw PII, tokens, or secrets regardless of caller.
#[derive(Debug, Clone, FromRow)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub at: DateTime<Utc>,
    pub action_code: String,
    pub result_code: String,
    pub actor_user_id: Option<Uuid>,
    pub target_type: Option<String>,
    pub target_id: Option<Uuid>,
    pub reason_code: Option<String>,
    pub redacted_metadata: Option<serde_json::Value>,
}

impl AuditEvent {
    pub fn new(
        action: AuditAction,
        result: AuditResult,
        actor_user_id: Option<Uuid>,
        target_type: Option<&str>,
        target_id: Option<Uuid>,
        reason: Option<ReasonCode>,
        metadata: Option<serde_json::Value>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            at: Utc::now(),
            action_code: action.as_str().to_string(),
            result_code: result.as_str().to_string(),
            actor_user_id,
            target_type: target_type.map(|t| t.to_string()),
            target_id,
            reason_code: reason.map(|r| r.as_str().to_string()),
            redacted_metadata: metadata.map(|m| strip_denylisted(&m)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn metadata_is_filtered_at_construction() {
        let event = AuditEvent::new(
            AuditAction::SessionCreated,
            AuditResult::Success,
            Some(Uuid::new_v4()),
            None,
            None,
            None,
            Some(json!({
                "email": "a@b.com",
                "otp": "123456",
                "session_ttl": 86400,
            })),
        );

        let meta = event.redacted_metadata.unwrap();
        let obj = meta.as_object().unwrap();
        assert!(!obj.contains_key("email"));
        assert!(!obj.contains_key("otp"));
        assert_eq!(obj.get("session_ttl").unwrap(), 86400);
    }

    #[test]
    fn reason_codes_serialize_snake_case() {
        assert_eq!(ReasonCode::ConsentVersionMismatch.as_str(), "consent_version_mismatch");
        assert_eq!(AuditAction::ExportGrantIssued.as_str(), "export_grant_issued");
        assert_eq!(AuditResult::Denied.as_str(), "denied");
    }
}
