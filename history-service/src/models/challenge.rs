//! Challenge model - short-lived OTP verification records.

use chrono::{DateTime, Duration, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// A challenge locks after this many failed OTP attempts. Terminal.
pub const MAX_OTP_ATTEMPTS: i32 = 5;

/// Challenge entity. The OTP itself is never stored; only its
/// challenge-bound keyed hash is.
#[derive(Debug, Clone, FromRow)]
pub struct Challenge {
    pub challenge_id: Uuid,
    pub email_hmac: String,
    pub otp_hash: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub attempts: i32,
}

impl Challenge {
    /// The caller supplies the id because the stored OTP hash is bound to it.
    pub fn new(challenge_id: Uuid, email_hmac: String, otp_hash: String, ttl_seconds: i64) -> Self {
        let now = Utc::now();
        Self {
            challenge_id,
            email_hmac,
            otp_hash,
            created_at: now,
            expires_at: now + Duration::seconds(ttl_seconds),
            used_at: None,
            attempts: 0,
        }
    }

    pub fn is_used(&self) -> bool {
        self.used_at.is_some()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn is_locked(&self) -> bool {
        self.attempts >= MAX_OTP_ATTEMPTS
    }
}
