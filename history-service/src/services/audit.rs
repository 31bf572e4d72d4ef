//! Audit trail service.
//!
//! The primary `audit_events` write either participates in the caller's
//! business transaction (see `Database`) or goes through `record` here and
//! is expected to succeed. The optional secondary sink mirrors events into
//! a legacy table and is strictly best-effort: a sink failure never fails
//! the business operation it accompanies.

use service_core::async_trait::async_trait;
use service_core::error::AppError;
use sqlx::postgres::PgPool;
use std::sync::Arc;

use crate::models::AuditEvent;

use super::database::Database;

/// Destination for mirrored audit events.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn mirror(&self, event: &AuditEvent) -> Result<(), AppError>;
}

/// Fixed, versioned adapter for the legacy `legacy_events` table. Writes a
/// known column set; if the table is absent the insert fails and is
/// swallowed upstream.
pub struct LegacyEventSink {
    pool: PgPool,
}

impl LegacyEventSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for LegacyEventSink {
    async fn mirror(&self, event: &AuditEvent) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO legacy_events (event_key, happened_at, actor_ref, subject_ref, outcome, extra_json)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&event.action_code)
        .bind(event.at)
        .bind(event.actor_user_id.map(|id| id.to_string()))
        .bind(event.target_id.map(|id| id.to_string()))
        .bind(&event.result_code)
        .bind(&event.redacted_metadata)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct AuditTrail {
    db: Database,
    sink: Option<Arc<dyn AuditSink>>,
}

impl AuditTrail {
    pub fn new(db: Database, sink: Option<Arc<dyn AuditSink>>) -> Self {
        Self { db, sink }
    }

    /// Append an event. The primary insert propagates failure; the mirror
    /// does not.
    pub async fn record(&self, event: &AuditEvent) -> Result<(), AppError> {
        self.db.insert_audit_event(event).await?;
        self.mirror(event).await;
        Ok(())
    }

    /// Mirror-only path for events whose primary insert already happened
    /// inside a business transaction.
    pub async fn mirror(&self, event: &AuditEvent) {
        if let Some(sink) = &self.sink {
            if let Err(e) = sink.mirror(event).await {
                tracing::warn!(
                    error = %e,
                    action = %event.action_code,
                    "Secondary audit mirror failed"
                );
            }
        }
    }
}
