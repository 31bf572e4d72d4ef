//! Authentication service: challenge issuance, OTP verification, consent
//! gating, session minting, and logout.
//!
//! Challenge lifecycle: PENDING -> USED | EXPIRED | LOCKED, all terminal.

use chrono::{DateTime, Utc};
use service_core::error::AppError;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::HistoryConfig;
use crate::models::{
    Actor, AuditAction, AuditEvent, AuditResult, Challenge, ConsentRecord, ReasonCode, Session,
    User, MAX_OTP_ATTEMPTS,
};
use crate::utils::crypto;

use super::audit::AuditTrail;
use super::database::Database;
use super::email::Mailer;
use super::error::AuthFlowError;
use super::rate_limit::RateLimiter;

const OP_CHALLENGE_EMAIL: &str = "challenge_email";
const OP_CHALLENGE_IP: &str = "challenge_ip";
const OP_VERIFY_IP: &str = "verify_ip";

/// Tunables lifted out of the full config at construction time.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub secret: String,
    pub otp_ttl_seconds: i64,
    pub session_ttl_seconds: i64,
    pub challenge_email_limit: i64,
    pub challenge_email_window_seconds: i64,
    pub challenge_ip_limit: i64,
    pub challenge_ip_window_seconds: i64,
    pub verify_ip_limit: i64,
    pub verify_ip_window_seconds: i64,
    /// (doc_type, required version) pairs the consent gate enforces.
    pub required_consents: Vec<(String, String)>,
    pub expose_dev_otp: bool,
}

impl AuthSettings {
    pub fn from_config(config: &HistoryConfig) -> Self {
        Self {
            secret: config.secret.shared_secret.clone(),
            otp_ttl_seconds: config.auth.otp_ttl_seconds,
            session_ttl_seconds: config.auth.session_ttl_seconds,
            challenge_email_limit: config.rate_limit.challenge_email_limit,
            challenge_email_window_seconds: config.rate_limit.challenge_email_window_seconds,
            challenge_ip_limit: config.rate_limit.challenge_ip_limit,
            challenge_ip_window_seconds: config.rate_limit.challenge_ip_window_seconds,
            verify_ip_limit: config.rate_limit.verify_ip_limit,
            verify_ip_window_seconds: config.rate_limit.verify_ip_window_seconds,
            required_consents: config.consent.required_documents(),
            expose_dev_otp: config.expose_dev_otp,
        }
    }
}

/// Result of a challenge request. `dev_otp` is populated only when the
/// dev-only exposure flag is on; the response shape is identical whether an
/// OTP was actually issued or the request was silently rate-limited.
#[derive(Debug)]
pub struct ChallengeIssued {
    pub challenge_id: Uuid,
    pub dev_otp: Option<String>,
}

/// A freshly minted session. The raw token exists only in this value; it is
/// never persisted and cannot be retrieved again.
#[derive(Debug)]
pub struct SessionIssued {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

/// A consent declaration supplied by the verifying client.
#[derive(Debug, Clone)]
pub struct ConsentDecl {
    pub doc_type: String,
    pub version: String,
}

#[derive(Clone)]
pub struct AuthService {
    db: Database,
    audit: AuditTrail,
    limiter: RateLimiter,
    mailer: Arc<dyn Mailer>,
    settings: AuthSettings,
}

impl AuthService {
    pub fn new(
        db: Database,
        audit: AuditTrail,
        limiter: RateLimiter,
        mailer: Arc<dyn Mailer>,
        settings: AuthSettings,
    ) -> Self {
        Self {
            db,
            audit,
            limiter,
            mailer,
            settings,
        }
    }

    /// Issue a login challenge for an email address.
    ///
    /// Anti-enumeration: a rate-limited request returns a fresh random
    /// challenge id and no OTP, indistinguishable from the success shape.
    pub async fn request_challenge(
        &self,
        email: &str,
        ip: &str,
        _user_agent: &str,
        request_id: &str,
    ) -> Result<ChallengeIssued, AppError> {
        let email_norm = crypto::normalize_identity(email);
        let email_hmac = crypto::keyed_hash(&self.settings.secret, &email_norm)?;
        let ip_hmac = crypto::derive(&self.settings.secret, "ip", ip)?;

        // Independent budgets per email and per ip; either one exhausted
        // suppresses the OTP. Storage failure denies (fail closed).
        let email_ok = self
            .limiter
            .allow_fail_closed(
                OP_CHALLENGE_EMAIL,
                &email_hmac,
                self.settings.challenge_email_window_seconds,
                self.settings.challenge_email_limit,
            )
            .await;
        let ip_ok = self
            .limiter
            .allow_fail_closed(
                OP_CHALLENGE_IP,
                &ip_hmac,
                self.settings.challenge_ip_window_seconds,
                self.settings.challenge_ip_limit,
            )
            .await;

        if !email_ok || !ip_ok {
            let event = AuditEvent::new(
                AuditAction::RateLimitExceeded,
                AuditResult::Denied,
                None,
                Some("challenge"),
                None,
                Some(ReasonCode::RateLimited),
                Some(serde_json::json!({
                    "operation": if email_ok { OP_CHALLENGE_IP } else { OP_CHALLENGE_EMAIL },
                    "request_id": request_id,
                })),
            );
            // The decoy response must go out even if the audit insert fails.
            if let Err(e) = self.audit.record(&event).await {
                tracing::error!(error = %e, "Audit write failed for rate-limited challenge");
            }
            return Ok(ChallengeIssued {
                challenge_id: Uuid::new_v4(),
                dev_otp: None,
            });
        }

        let user = self
            .db
            .upsert_user_by_email_hmac(&User::new(email_hmac.clone()))
            .await?;

        let challenge_id = Uuid::new_v4();
        let otp = crypto::random_otp();
        let otp_hash = crypto::otp_hash(&self.settings.secret, &otp, challenge_id)?;
        let challenge = Challenge::new(
            challenge_id,
            email_hmac,
            otp_hash,
            self.settings.otp_ttl_seconds,
        );

        let event = AuditEvent::new(
            AuditAction::ChallengeCreated,
            AuditResult::Success,
            Some(user.user_id),
            Some("challenge"),
            Some(challenge_id),
            None,
            Some(serde_json::json!({ "request_id": request_id })),
        );
        self.db.create_challenge(&challenge, &event).await?;
        self.audit.mirror(&event).await;

        // Delivery happens outside the persistence transaction so a slow or
        // failing mail provider cannot hold a database lock. A failed
        // delivery leaves the OTP valid and does not fail the request.
        if let Err(e) = self.mailer.send_otp(&email_norm, &otp).await {
            tracing::warn!(error = %e, "Sign-in code delivery failed");
            let event = AuditEvent::new(
                AuditAction::ChallengeDeliveryFailed,
                AuditResult::Error,
                Some(user.user_id),
                Some("challenge"),
                Some(challenge_id),
                Some(ReasonCode::DeliveryFailed),
                Some(serde_json::json!({ "request_id": request_id })),
            );
            if let Err(audit_err) = self.audit.record(&event).await {
                tracing::error!(error = %audit_err, "Audit write failed for delivery failure");
            }
        }

        Ok(ChallengeIssued {
            challenge_id,
            dev_otp: self.settings.expose_dev_otp.then_some(otp),
        })
    }

    /// Verify an OTP against its challenge and mint a session.
    ///
    /// Ordered fail-fast pipeline; every exit is audited. Failure reasons
    /// that would reveal account existence all collapse into `INVALID`.
    #[allow(clippy::too_many_arguments)]
    pub async fn verify_challenge_and_create_session(
        &self,
        email: &str,
        challenge_id: Uuid,
        otp: &str,
        consents: &[ConsentDecl],
        ip: &str,
        user_agent: &str,
        request_id: &str,
    ) -> Result<SessionIssued, AuthFlowError> {
        let now = Utc::now();
        let email_norm = crypto::normalize_identity(email);
        let email_hmac = crypto::keyed_hash(&self.settings.secret, &email_norm)
            .map_err(AppError::InternalError)?;
        let ip_hmac =
            crypto::derive(&self.settings.secret, "ip", ip).map_err(AppError::InternalError)?;
        let ua_hmac = crypto::derive(&self.settings.secret, "ua", user_agent)
            .map_err(AppError::InternalError)?;

        if !self
            .limiter
            .allow_fail_closed(
                OP_VERIFY_IP,
                &ip_hmac,
                self.settings.verify_ip_window_seconds,
                self.settings.verify_ip_limit,
            )
            .await
        {
            self.audit_verify_denied(None, challenge_id, ReasonCode::RateLimited, request_id)
                .await?;
            return Err(AuthFlowError::RateLimited);
        }

        let Some(user) = self.db.find_user_by_email_hmac(&email_hmac).await? else {
            // Never reveal that the email is unknown.
            self.audit_verify_denied(None, challenge_id, ReasonCode::UnknownUser, request_id)
                .await?;
            return Err(AuthFlowError::Invalid);
        };

        let challenge = self.db.find_challenge(challenge_id).await?;
        let challenge = match challenge {
            Some(c) if c.email_hmac == email_hmac => c,
            // Missing challenge and mismatched email binding are equally INVALID.
            _ => {
                self.audit_verify_denied(
                    Some(user.user_id),
                    challenge_id,
                    ReasonCode::Invalid,
                    request_id,
                )
                .await?;
                return Err(AuthFlowError::Invalid);
            }
        };

        if challenge.is_used() {
            self.audit_verify_denied(
                Some(user.user_id),
                challenge_id,
                ReasonCode::Invalid,
                request_id,
            )
            .await?;
            return Err(AuthFlowError::Invalid);
        }

        if challenge.is_expired(now) {
            self.audit_verify_denied(
                Some(user.user_id),
                challenge_id,
                ReasonCode::Expired,
                request_id,
            )
            .await?;
            return Err(AuthFlowError::Expired);
        }

        if challenge.is_locked() {
            self.audit_verify_denied(
                Some(user.user_id),
                challenge_id,
                ReasonCode::Locked,
                request_id,
            )
            .await?;
            return Err(AuthFlowError::Locked);
        }

        let expected = crypto::otp_hash(&self.settings.secret, otp, challenge_id)
            .map_err(AppError::InternalError)?;
        if !crypto::constant_time_eq(&expected, &challenge.otp_hash) {
            let event = AuditEvent::new(
                AuditAction::ChallengeVerifyFailed,
                AuditResult::Denied,
                Some(user.user_id),
                Some("challenge"),
                Some(challenge_id),
                Some(ReasonCode::Invalid),
                Some(serde_json::json!({
                    "request_id": request_id,
                    "attempt": challenge.attempts + 1,
                    "attempt_max": MAX_OTP_ATTEMPTS,
                })),
            );
            self.db
                .record_failed_otp_attempt(challenge_id, &event)
                .await?;
            self.audit.mirror(&event).await;
            return Err(AuthFlowError::Invalid);
        }

        // Consent gate. Missing document and stale version both surface as
        // CONSENT_REQUIRED to the caller; the audit trail keeps them apart.
        for (doc_type, required_version) in &self.settings.required_consents {
            let supplied = consents.iter().find(|c| &c.doc_type == doc_type);
            let reason = match supplied {
                None => Some(ReasonCode::ConsentMissing),
                Some(c) if &c.version != required_version => {
                    Some(ReasonCode::ConsentVersionMismatch)
                }
                Some(_) => None,
            };
            if let Some(reason) = reason {
                self.audit_verify_denied(Some(user.user_id), challenge_id, reason, request_id)
                    .await?;
                return Err(AuthFlowError::ConsentRequired);
            }
        }

        let consent_records: Vec<ConsentRecord> = self
            .settings
            .required_consents
            .iter()
            .map(|(doc_type, version)| {
                ConsentRecord::new(
                    user.user_id,
                    doc_type.clone(),
                    version.clone(),
                    ip_hmac.clone(),
                    ua_hmac.clone(),
                )
            })
            .collect();

        let token = crypto::random_token();
        let token_hash = crypto::keyed_hash(&self.settings.secret, &token)
            .map_err(AppError::InternalError)?;
        let session = Session::new(user.user_id, token_hash, self.settings.session_ttl_seconds);
        let expires_at = session.expires_at;

        let events = vec![
            AuditEvent::new(
                AuditAction::ConsentRecorded,
                AuditResult::Success,
                Some(user.user_id),
                Some("challenge"),
                Some(challenge_id),
                None,
                Some(serde_json::json!({
                    "documents": self
                        .settings
                        .required_consents
                        .iter()
                        .map(|(d, v)| format!("{}@{}", d, v))
                        .collect::<Vec<_>>(),
                })),
            ),
            AuditEvent::new(
                AuditAction::SessionCreated,
                AuditResult::Success,
                Some(user.user_id),
                Some("session"),
                Some(session.session_id),
                None,
                Some(serde_json::json!({ "request_id": request_id })),
            ),
        ];

        let finalized = self
            .db
            .finalize_verified_challenge(challenge_id, &consent_records, &session, &events)
            .await?;
        if !finalized {
            // Another verifier consumed the challenge first; replays are INVALID.
            self.audit_verify_denied(
                Some(user.user_id),
                challenge_id,
                ReasonCode::Invalid,
                request_id,
            )
            .await?;
            return Err(AuthFlowError::Invalid);
        }
        for event in &events {
            self.audit.mirror(event).await;
        }

        Ok(SessionIssued {
            access_token: token,
            expires_at,
        })
    }

    /// Resolve a bearer token to the live (user_id, role) pair.
    pub async fn resolve_session(&self, token: &str) -> Result<Option<Actor>, AppError> {
        let token_hash = crypto::keyed_hash(&self.settings.secret, token)?;
        let Some((user_id, role_code)) = self.db.resolve_session_actor(&token_hash).await? else {
            return Ok(None);
        };
        let role = role_code
            .parse()
            .map_err(|e: String| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(Some(Actor { user_id, role }))
    }

    /// Revoke the session behind a bearer token. No-op if already gone.
    pub async fn logout(&self, actor: &Actor, token: &str, request_id: &str) -> Result<(), AppError> {
        let token_hash = crypto::keyed_hash(&self.settings.secret, token)?;
        let event = AuditEvent::new(
            AuditAction::SessionRevoked,
            AuditResult::Success,
            Some(actor.user_id),
            Some("session"),
            None,
            None,
            Some(serde_json::json!({ "request_id": request_id })),
        );
        self.db.revoke_session(&token_hash, &event).await?;
        self.audit.mirror(&event).await;
        Ok(())
    }

    async fn audit_verify_denied(
        &self,
        actor_user_id: Option<Uuid>,
        challenge_id: Uuid,
        reason: ReasonCode,
        request_id: &str,
    ) -> Result<(), AppError> {
        let event = AuditEvent::new(
            AuditAction::ChallengeVerifyFailed,
            AuditResult::Denied,
            actor_user_id,
            Some("challenge"),
            Some(challenge_id),
            Some(reason),
            Some(serde_json::json!({ "request_id": request_id })),
        );
        self.audit.record(&event).await
    }
}
