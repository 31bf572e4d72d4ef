//! Consent model - versioned document acceptance records.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Consent record entity. The client's ip and user-agent are stored only as
/// purpose-namespaced keyed hashes.
#[derive(Debug, Clone, FromRow)]
pub struct ConsentRecord {
    pub consent_id: Uuid,
    pub user_id: Uuid,
    pub doc_type: String,
    pub doc_version: String,
    pub ip_hmac: String,
    pub ua_hmac: String,
    pub granted_at: DateTime<Utc>,
}

impl ConsentRecord {
    pub fn new(
        user_id: Uuid,
        doc_type: String,
        doc_version: String,
        ip_hmac: String,
        ua_hmac: String,
    ) -> Self {
        Self {
            consent_id: Uuid::new_v4(),
            user_id,
            doc_type,
            doc_version,
            ip_hmac,
            ua_hmac,
            granted_at: Utc::now(),
        }
    }
}
