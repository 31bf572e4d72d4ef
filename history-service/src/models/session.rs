//! Session model - long-lived bearer-token records.

use chrono::{DateTime, Duration, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Session entity. Stores the keyed hash of the bearer token; the raw token
/// is returned to the caller exactly once and never persisted.
#[derive(Debug, Clone, FromRow)]
pub struct Session {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(user_id: Uuid, token_hash: String, ttl_seconds: i64) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4(),
            user_id,
            token_hash,
            created_at: now,
            expires_at: now + Duration::seconds(ttl_seconds),
            revoked_at: None,
        }
    }

    /// A session is valid iff it has not been revoked and has not expired.
    /// Expiry is lazy; readers must re-check it every time.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && now <= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validity_requires_not_revoked_and_not_expired() {
        let mut s = Session::new(Uuid::new_v4(), "token-hash".to_string(), 3600);
        let now = Utc::now();
        assert!(s.is_valid(now));
        assert!(!s.is_valid(now + Duration::seconds(3601)));

        s.revoked_at = Some(now);
        assert!(!s.is_valid(now));
    }
}
