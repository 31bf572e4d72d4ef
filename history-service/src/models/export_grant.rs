//! Export grant model - one-time, TTL-bound tokens gating full exports.

use chrono::{DateTime, Duration, Utc};
use sqlx::FromRow;
use uuid::Uuid;

pub const MIN_GRANT_TTL_SECONDS: i64 = 60;
pub const MAX_GRANT_TTL_SECONDS: i64 = 3600;
pub const DEFAULT_GRANT_TTL_SECONDS: i64 = 600;
pub const DEFAULT_GRANT_USES: i32 = 1;
pub const MAX_GRANT_USES: i32 = 3;

/// Export grant entity. Only the keyed hash of the grant token is stored.
#[derive(Debug, Clone, FromRow)]
pub struct ExportGrant {
    pub grant_id: Uuid,
    pub resource_type: String,
    pub resource_id: Uuid,
    pub token_hmac: String,
    pub issued_by_role: String,
    pub issued_by_user_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub remaining_uses: i32,
    pub created_at: DateTime<Utc>,
}

impl ExportGrant {
    /// Create a grant, clamping the TTL and use count to their bounded
    /// ranges regardless of caller input.
    pub fn new(
        resource_type: String,
        resource_id: Uuid,
        token_hmac: String,
        issued_by_role: String,
        issued_by_user_id: Uuid,
        ttl_seconds: Option<i64>,
        uses: Option<i32>,
    ) -> Self {
        let now = Utc::now();
        Self {
            grant_id: Uuid::new_v4(),
            resource_type,
            resource_id,
            token_hmac,
            issued_by_role,
            issued_by_user_id,
            expires_at: now + Duration::seconds(clamp_ttl(ttl_seconds)),
            remaining_uses: clamp_uses(uses),
            created_at: now,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

pub fn clamp_ttl(ttl_seconds: Option<i64>) -> i64 {
    ttl_seconds
        .unwrap_or(DEFAULT_GRANT_TTL_SECONDS)
        .clamp(MIN_GRANT_TTL_SECONDS, MAX_GRANT_TTL_SECONDS)
}

pub fn clamp_uses(uses: Option<i32>) -> i32 {
    uses.unwrap_or(DEFAULT_GRANT_USES).clamp(1, MAX_GRANT_USES)
}
