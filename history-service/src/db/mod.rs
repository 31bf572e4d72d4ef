//! Database module for PostgreSQL connection management and schema
//! bootstrap.

use crate::config::DatabaseConfig;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

/// Create a PostgreSQL connection pool.
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    tracing::info!("Connecting to PostgreSQL...");

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&config.url)
        .await?;

    tracing::info!("Successfully connected to PostgreSQL");

    Ok(pool)
}

/// Idempotent schema bootstrap. Each table is independently creatable, with
/// indices on every hashed lookup key. Running this repeatedly is a no-op.
pub async fn init_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    tracing::info!("Ensuring database schema...");

    const STATEMENTS: &[&str] = &[
        r#"
        CREATE TABLE IF NOT EXISTS users (
            user_id UUID PRIMARY KEY,
            email_hmac TEXT NOT NULL UNIQUE,
            role_code TEXT NOT NULL,
            status_code TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_users_email_hmac ON users (email_hmac)",
        r#"
        CREATE TABLE IF NOT EXISTS challenges (
            challenge_id UUID PRIMARY KEY,
            email_hmac TEXT NOT NULL,
            otp_hash TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            expires_at TIMESTAMPTZ NOT NULL,
            used_at TIMESTAMPTZ,
            attempts INT NOT NULL DEFAULT 0
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_challenges_email_hmac ON challenges (email_hmac)",
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            session_id UUID PRIMARY KEY,
            user_id UUID NOT NULL,
            token_hash TEXT NOT NULL UNIQUE,
            created_at TIMESTAMPTZ NOT NULL,
            expires_at TIMESTAMPTZ NOT NULL,
            revoked_at TIMESTAMPTZ
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_sessions_user_id ON sessions (user_id)",
        "CREATE INDEX IF NOT EXISTS idx_sessions_token_hash ON sessions (token_hash)",
        r#"
        CREATE TABLE IF NOT EXISTS user_consents (
            consent_id UUID PRIMARY KEY,
            user_id UUID NOT NULL,
            doc_type TEXT NOT NULL,
            doc_version TEXT NOT NULL,
            ip_hmac TEXT NOT NULL,
            ua_hmac TEXT NOT NULL,
            granted_at TIMESTAMPTZ NOT NULL
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_user_consents_user_id ON user_consents (user_id)",
        r#"
        CREATE TABLE IF NOT EXISTS rate_limit_counters (
            limit_key TEXT PRIMARY KEY,
            window_start TIMESTAMPTZ NOT NULL,
            count BIGINT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS export_grants (
            grant_id UUID PRIMARY KEY,
            resource_type TEXT NOT NULL,
            resource_id UUID NOT NULL,
            token_hmac TEXT NOT NULL,
            issued_by_role TEXT NOT NULL,
            issued_by_user_id UUID NOT NULL,
            expires_at TIMESTAMPTZ NOT NULL,
            remaining_uses INT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_export_grants_lookup ON export_grants (resource_type, resource_id, token_hmac)",
        r#"
        CREATE TABLE IF NOT EXISTS audit_events (
            event_id UUID PRIMARY KEY,
            at TIMESTAMPTZ NOT NULL,
            action_code TEXT NOT NULL,
            result_code TEXT NOT NULL,
            actor_user_id UUID,
            target_type TEXT,
            target_id UUID,
            reason_code TEXT,
            redacted_metadata JSONB
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_audit_events_action ON audit_events (action_code, at)",
        r#"
        CREATE TABLE IF NOT EXISTS vehicle_records (
            vehicle_id UUID PRIMARY KEY,
            org_id UUID NOT NULL,
            vin TEXT NOT NULL,
            owner_email TEXT NOT NULL,
            mileage_km INT NOT NULL,
            service_notes TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL
        )
        "#,
    ];

    for statement in STATEMENTS {
        sqlx::query(statement).execute(pool).await?;
    }

    tracing::info!("Database schema ready");
    Ok(())
}

/// Check database health.
pub async fn health_check(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}
