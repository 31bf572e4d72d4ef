//! PostgreSQL storage layer.
//!
//! Every multi-step mutation that must be atomic runs inside a single
//! transaction here; the two contended counters (rate-limit windows and
//! grant uses) are single conditional statements so concurrent callers
//! cannot lose updates.

use service_core::error::AppError;
use sqlx::postgres::PgPool;
use uuid::Uuid;

use crate::models::{
    AuditEvent, Challenge, ConsentRecord, ExportGrant, Session, User, VehicleRecord,
};

/// PostgreSQL database wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database wrapper from a connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Health check - ping the database.
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Database health check failed: {}", e);
                AppError::DatabaseError(anyhow::anyhow!("Database health check failed: {}", e))
            })?;
        Ok(())
    }

    // ==================== User Operations ====================

    /// Find user by ID.
    pub async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, AppError> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    /// Find user by email hash.
    pub async fn find_user_by_email_hmac(
        &self,
        email_hmac: &str,
    ) -> Result<Option<User>, AppError> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE email_hmac = $1")
            .bind(email_hmac)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    /// Insert-or-ignore a user keyed by email hash, then return the stored
    /// row. Idempotent: concurrent first-time requests for the same email
    /// converge on one row via the unique constraint.
    pub async fn upsert_user_by_email_hmac(&self, user: &User) -> Result<User, AppError> {
        sqlx::query(
            r#"
            INSERT INTO users (user_id, email_hmac, role_code, status_code, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (email_hmac) DO NOTHING
            "#,
        )
        .bind(user.user_id)
        .bind(&user.email_hmac)
        .bind(&user.role_code)
        .bind(&user.status_code)
        .bind(user.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        sqlx::query_as::<_, User>("SELECT * FROM users WHERE email_hmac = $1")
            .bind(&user.email_hmac)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    /// Change a user's role and write the accompanying audit event in the
    /// same transaction.
    pub async fn update_user_role(
        &self,
        user_id: Uuid,
        new_role_code: &str,
        event: &AuditEvent,
    ) -> Result<(), AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        sqlx::query("UPDATE users SET role_code = $1 WHERE user_id = $2")
            .bind(new_role_code)
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        insert_audit_event_tx(&mut tx, event).await?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    // ==================== Challenge Operations ====================

    /// Persist a new challenge and its audit event atomically.
    pub async fn create_challenge(
        &self,
        challenge: &Challenge,
        event: &AuditEvent,
    ) -> Result<(), AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        sqlx::query(
            r#"
            INSERT INTO challenges (challenge_id, email_hmac, otp_hash, created_at, expires_at, used_at, attempts)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(challenge.challenge_id)
        .bind(&challenge.email_hmac)
        .bind(&challenge.otp_hash)
        .bind(challenge.created_at)
        .bind(challenge.expires_at)
        .bind(challenge.used_at)
        .bind(challenge.attempts)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        insert_audit_event_tx(&mut tx, event).await?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    /// Find challenge by ID.
    pub async fn find_challenge(&self, challenge_id: Uuid) -> Result<Option<Challenge>, AppError> {
        sqlx::query_as::<_, Challenge>("SELECT * FROM challenges WHERE challenge_id = $1")
            .bind(challenge_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    /// Count a failed OTP attempt and record it, atomically. Returns the
    /// attempt count after the increment.
    pub async fn record_failed_otp_attempt(
        &self,
        challenge_id: Uuid,
        event: &AuditEvent,
    ) -> Result<i32, AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        let (attempts,): (i32,) = sqlx::query_as(
            "UPDATE challenges SET attempts = attempts + 1 WHERE challenge_id = $1 RETURNING attempts",
        )
        .bind(challenge_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        insert_audit_event_tx(&mut tx, event).await?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(attempts)
    }

    /// Finalize a successful verification: mark the challenge used (exactly
    /// once), persist consent records, mint the session, and write the audit
    /// events, all in one transaction. Returns false without side effects
    /// when another verifier already consumed the challenge.
    pub async fn finalize_verified_challenge(
        &self,
        challenge_id: Uuid,
        consents: &[ConsentRecord],
        session: &Session,
        events: &[AuditEvent],
    ) -> Result<bool, AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        // Conditional check-then-set: a challenge transitions to USED at
        // most once even under concurrent verifiers.
        let marked = sqlx::query(
            "UPDATE challenges SET used_at = NOW() WHERE challenge_id = $1 AND used_at IS NULL",
        )
        .bind(challenge_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        if marked.rows_affected() == 0 {
            tx.rollback()
                .await
                .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
            return Ok(false);
        }

        for consent in consents {
            sqlx::query(
                r#"
                INSERT INTO user_consents (consent_id, user_id, doc_type, doc_version, ip_hmac, ua_hmac, granted_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(consent.consent_id)
            .bind(consent.user_id)
            .bind(&consent.doc_type)
            .bind(&consent.doc_version)
            .bind(&consent.ip_hmac)
            .bind(&consent.ua_hmac)
            .bind(consent.granted_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        }

        sqlx::query(
            r#"
            INSERT INTO sessions (session_id, user_id, token_hash, created_at, expires_at, revoked_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(session.session_id)
        .bind(session.user_id)
        .bind(&session.token_hash)
        .bind(session.created_at)
        .bind(session.expires_at)
        .bind(session.revoked_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        for event in events {
            insert_audit_event_tx(&mut tx, event).await?;
        }

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(true)
    }

    // ==================== Session Operations ====================

    /// Resolve a bearer-token hash to (user_id, role_code). The role is read
    /// live from the user row, never from the session, so role changes take
    /// effect on the next request.
    pub async fn resolve_session_actor(
        &self,
        token_hash: &str,
    ) -> Result<Option<(Uuid, String)>, AppError> {
        sqlx::query_as::<_, (Uuid, String)>(
            r#"
            SELECT u.user_id, u.role_code
            FROM sessions s
            JOIN users u ON u.user_id = s.user_id
            WHERE s.token_hash = $1
              AND s.revoked_at IS NULL
              AND s.expires_at > NOW()
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    /// Revoke the session matching a token hash and record the logout.
    /// Idempotent: revoking an unknown or already-revoked token is a no-op.
    /// Returns whether a live session was actually revoked.
    pub async fn revoke_session(
        &self,
        token_hash: &str,
        event: &AuditEvent,
    ) -> Result<bool, AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        let revoked = sqlx::query(
            "UPDATE sessions SET revoked_at = NOW() WHERE token_hash = $1 AND revoked_at IS NULL",
        )
        .bind(token_hash)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        insert_audit_event_tx(&mut tx, event).await?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(revoked.rows_affected() > 0)
    }

    // ==================== Rate-Limit Operations ====================

    /// Bump the fixed-window counter for a key and return the count inside
    /// the current window. A single atomic upsert: either the window is
    /// stale and resets to 1, or the count increments in place. Safe under
    /// concurrent callers without in-process locking.
    pub async fn bump_rate_counter(
        &self,
        limit_key: &str,
        window_seconds: i64,
    ) -> Result<i64, AppError> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO rate_limit_counters (limit_key, window_start, count)
            VALUES ($1, NOW(), 1)
            ON CONFLICT (limit_key) DO UPDATE SET
                count = CASE
                    WHEN NOW() - rate_limit_counters.window_start >= INTERVAL '1 second' * $2
                    THEN 1
                    ELSE rate_limit_counters.count + 1
                END,
                window_start = CASE
                    WHEN NOW() - rate_limit_counters.window_start >= INTERVAL '1 second' * $2
                    THEN NOW()
                    ELSE rate_limit_counters.window_start
                END
            RETURNING count
            "#,
        )
        .bind(limit_key)
        .bind(window_seconds)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(count)
    }

    // ==================== Export Grant Operations ====================

    /// Persist a new export grant and its audit event atomically.
    pub async fn create_export_grant(
        &self,
        grant: &ExportGrant,
        event: &AuditEvent,
    ) -> Result<(), AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        sqlx::query(
            r#"
            INSERT INTO export_grants (grant_id, resource_type, resource_id, token_hmac, issued_by_role, issued_by_user_id, expires_at, remaining_uses, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(grant.grant_id)
        .bind(&grant.resource_type)
        .bind(grant.resource_id)
        .bind(&grant.token_hmac)
        .bind(&grant.issued_by_role)
        .bind(grant.issued_by_user_id)
        .bind(grant.expires_at)
        .bind(grant.remaining_uses)
        .bind(grant.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        insert_audit_event_tx(&mut tx, event).await?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    /// Find the grant matching a (resource, token hash) pair.
    pub async fn find_export_grant(
        &self,
        resource_type: &str,
        resource_id: Uuid,
        token_hmac: &str,
    ) -> Result<Option<ExportGrant>, AppError> {
        sqlx::query_as::<_, ExportGrant>(
            "SELECT * FROM export_grants WHERE resource_type = $1 AND resource_id = $2 AND token_hmac = $3",
        )
        .bind(resource_type)
        .bind(resource_id)
        .bind(token_hmac)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    /// Spend one use of a grant and record the consumption atomically. The
    /// decrement is guarded by the same row predicate, so two consumers
    /// racing on the last use cannot both succeed. Returns whether this
    /// caller won a use; a lost race writes nothing.
    pub async fn consume_grant_use(
        &self,
        grant_id: Uuid,
        event: &AuditEvent,
    ) -> Result<bool, AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        let result = sqlx::query(
            r#"
            UPDATE export_grants
            SET remaining_uses = remaining_uses - 1
            WHERE grant_id = $1 AND remaining_uses > 0 AND expires_at > NOW()
            "#,
        )
        .bind(grant_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

        if result.rows_affected() == 0 {
            tx.rollback()
                .await
                .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
            return Ok(false);
        }

        insert_audit_event_tx(&mut tx, event).await?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(true)
    }

    // ==================== Vehicle Record Operations ====================

    /// Find a vehicle record by ID.
    pub async fn find_vehicle_by_id(
        &self,
        vehicle_id: Uuid,
    ) -> Result<Option<VehicleRecord>, AppError> {
        sqlx::query_as::<_, VehicleRecord>("SELECT * FROM vehicle_records WHERE vehicle_id = $1")
            .bind(vehicle_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }

    /// Insert a vehicle record. This service never mutates vehicles; the
    /// writer exists for bootstrap and test seeding.
    pub async fn insert_vehicle_record(&self, vehicle: &VehicleRecord) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO vehicle_records (vehicle_id, org_id, vin, owner_email, mileage_km, service_notes, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(vehicle.vehicle_id)
        .bind(vehicle.org_id)
        .bind(&vehicle.vin)
        .bind(&vehicle.owner_email)
        .bind(vehicle.mileage_km)
        .bind(&vehicle.service_notes)
        .bind(vehicle.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    // ==================== Audit Event Operations ====================

    /// Insert an audit event outside any caller transaction.
    pub async fn insert_audit_event(&self, event: &AuditEvent) -> Result<(), AppError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
        insert_audit_event_conn(&mut *conn, event).await
    }

    /// Find audit events by action code, newest first.
    pub async fn find_audit_events_by_action(
        &self,
        action_code: &str,
    ) -> Result<Vec<AuditEvent>, AppError> {
        sqlx::query_as::<_, AuditEvent>(
            "SELECT * FROM audit_events WHERE action_code = $1 ORDER BY at DESC",
        )
        .bind(action_code)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))
    }
}

async fn insert_audit_event_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    event: &AuditEvent,
) -> Result<(), AppError> {
    insert_audit_event_conn(&mut *tx, event).await
}

async fn insert_audit_event_conn(
    conn: &mut sqlx::PgConnection,
    event: &AuditEvent,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO audit_events (event_id, at, action_code, result_code, actor_user_id, target_type, target_id, reason_code, redacted_metadata)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(event.event_id)
    .bind(event.at)
    .bind(&event.action_code)
    .bind(&event.result_code)
    .bind(event.actor_user_id)
    .bind(&event.target_type)
    .bind(event.target_id)
    .bind(&event.reason_code)
    .bind(&event.redacted_metadata)
    .execute(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;
    Ok(())
}
