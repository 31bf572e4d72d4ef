//! Storage-backed fixed-window rate limiter.
//!
//! One counter row per (operation, hashed identity) key, bumped by a single
//! atomic upsert, so the limiter holds across processes and replicas.
//!
//! Fixed windows allow up to 2x the limit across a window boundary. That
//! imprecision is a documented tradeoff for the single-statement hot path,
//! not a bug.

use service_core::error::AppError;

use super::database::Database;

#[derive(Clone)]
pub struct RateLimiter {
    db: Database,
}

impl RateLimiter {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Count this call against the key's current window and report whether
    /// it is within budget.
    pub async fn check_and_increment(
        &self,
        operation: &str,
        identity_hash: &str,
        window_seconds: i64,
        limit: i64,
    ) -> Result<bool, AppError> {
        let key = format!("{}:{}", operation, identity_hash);
        let count = self.db.bump_rate_counter(&key, window_seconds).await?;
        Ok(count <= limit)
    }

    /// Fail-closed wrapper for authentication paths: a storage failure
    /// denies the attempt, because silently unlimited auth attempts are a
    /// worse failure than one rejected legitimate request.
    pub async fn allow_fail_closed(
        &self,
        operation: &str,
        identity_hash: &str,
        window_seconds: i64,
        limit: i64,
    ) -> bool {
        match self
            .check_and_increment(operation, identity_hash, window_seconds, limit)
            .await
        {
            Ok(allowed) => allowed,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    operation = operation,
                    "Rate-limit storage unavailable; denying"
                );
                false
            }
        }
    }
}
