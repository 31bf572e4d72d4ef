//! Audit-trail and redaction invariants: no PII ever round-trips out of the
//! audit log, redacted views carry the marker, and the secondary sink is
//! strictly best-effort.

mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use common::*;
use history_service::build_router;
use history_service::models::{AuditAction, AuditEvent, AuditResult, Role};
use history_service::services::redact::DENYLIST_SUBSTRINGS;
use history_service::services::{AuditSink, AuditTrail, LegacyEventSink};
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

fn assert_no_denylisted_keys(value: &Value, context: &str) {
    match value {
        Value::Object(obj) => {
            for (key, nested) in obj {
                let lowered = key.to_lowercase();
                for banned in DENYLIST_SUBSTRINGS {
                    assert!(
                        !lowered.contains(banned),
                        "audit metadata key '{}' matches denylisted '{}' in {}",
                        key,
                        banned,
                        context
                    );
                }
                assert_no_denylisted_keys(nested, context);
            }
        }
        Value::Array(items) => {
            for item in items {
                assert_no_denylisted_keys(item, context);
            }
        }
        _ => {}
    }
}

#[tokio::test]
async fn a_full_auth_and_export_flow_leaves_no_pii_in_the_audit_log() {
    let state = spawn_state().await.expect("state");
    let email = unique_email();

    // Exercise every audited path once.
    let issued = state
        .auth
        .request_challenge(&email, "10.1.0.1", "audit-agent", "req-1")
        .await
        .expect("challenge");
    let otp = issued.dev_otp.expect("dev otp");
    let session = state
        .auth
        .verify_challenge_and_create_session(
            &email,
            issued.challenge_id,
            &otp,
            &valid_consents(),
            "10.1.0.1",
            "audit-agent",
            "req-2",
        )
        .await
        .expect("verify");
    let actor = state
        .auth
        .resolve_session(&session.access_token)
        .await
        .expect("resolve")
        .expect("actor");
    state
        .auth
        .logout(&actor, &session.access_token, "req-3")
        .await
        .expect("logout");

    let vehicle = seed_vehicle(&state).await.expect("vehicle");
    let issuer = history_service::models::Actor {
        user_id: actor.user_id,
        role: Role::Superadmin,
    };
    let grant = state
        .exports
        .issue_grant("vehicle", vehicle.vehicle_id, &issuer, None, None)
        .await
        .expect("grant");
    state
        .exports
        .full_export("vehicle", vehicle.vehicle_id, &grant.export_token, &issuer)
        .await
        .expect("full export");

    // Every audit row must be free of denylisted metadata keys, and no
    // metadata value may carry the raw token or OTP.
    let rows: Vec<(String, Option<Value>)> =
        sqlx::query_as("SELECT action_code, redacted_metadata FROM audit_events")
            .fetch_all(state.db.pool())
            .await
            .expect("audit rows");
    assert!(!rows.is_empty());

    for (action, metadata) in &rows {
        if let Some(metadata) = metadata {
            assert_no_denylisted_keys(metadata, action);
            let rendered = metadata.to_string();
            assert!(!rendered.contains(&otp), "raw OTP leaked via {}", action);
            assert!(
                !rendered.contains(&grant.export_token),
                "raw export token leaked via {}",
                action
            );
        }
    }
}

#[tokio::test]
async fn audit_constructor_filters_hostile_metadata() {
    let state = spawn_state().await.expect("state");

    // A worst-case call site that shovels PII into metadata wholesale.
    let event = AuditEvent::new(
        AuditAction::AccessDenied,
        AuditResult::Denied,
        None,
        Some("user"),
        Some(Uuid::new_v4()),
        None,
        Some(serde_json::json!({
            "email": "leak@example.com",
            "phone_number": "+49123456",
            "access_token": "super-secret",
            "otp": "123456",
            "nested": {"home_address": "Somewhere 1", "allowed": "yes"},
            "outcome": "denied",
        })),
    );
    state.audit.record(&event).await.expect("record");

    let rows = state
        .db
        .find_audit_events_by_action(AuditAction::AccessDenied.as_str())
        .await
        .expect("rows");
    let stored = rows
        .iter()
        .find(|e| e.event_id == event.event_id)
        .expect("event present");
    let metadata = stored.redacted_metadata.as_ref().expect("metadata");
    assert_no_denylisted_keys(metadata, "access_denied");
    assert_eq!(metadata["outcome"], "denied");
    assert_eq!(metadata["nested"]["allowed"], "yes");
}

#[tokio::test]
async fn redacted_endpoint_masks_pii_and_carries_the_marker() {
    let state = spawn_state().await.expect("state");
    let app = build_router(state.clone()).await.expect("router");
    let vehicle = seed_vehicle(&state).await.expect("vehicle");
    let (_, token) = seed_session(&state, Role::User).await.expect("session");

    let request = Request::builder()
        .method("GET")
        .uri(format!("/export/vehicle/{}", vehicle.vehicle_id))
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).expect("json");
    let data = &body["data"];

    assert_eq!(data["redacted"], true);
    assert!(data.get("owner_email").is_none(), "owner_email must be dropped");
    // vin survives as a keyed pseudonym, joinable but not reversible.
    let vin = data["vin"].as_str().expect("vin present");
    assert_ne!(vin, vehicle.vin);
    assert_eq!(data["mileage_km"], vehicle.mileage_km);
}

#[tokio::test]
async fn legacy_mirror_is_best_effort_both_ways() {
    let pool = create_test_pool().await.expect("pool");
    sqlx::query("DROP TABLE IF EXISTS legacy_events")
        .execute(&pool)
        .await
        .expect("drop legacy table");

    let state = create_test_state(pool.clone(), create_test_config());
    let mirrored = AuditTrail::new(
        state.db.clone(),
        Some(Arc::new(LegacyEventSink::new(pool.clone())) as Arc<dyn AuditSink>),
    );

    // With the table absent the sink insert fails; the primary write must
    // still land and the call must still succeed.
    let event = AuditEvent::new(
        AuditAction::SessionRevoked,
        AuditResult::Success,
        Some(Uuid::new_v4()),
        Some("session"),
        None,
        None,
        None,
    );
    mirrored.record(&event).await.expect("primary write survives");

    let rows = state
        .db
        .find_audit_events_by_action(AuditAction::SessionRevoked.as_str())
        .await
        .expect("rows");
    assert!(rows.iter().any(|e| e.event_id == event.event_id));

    // Once the table exists, events mirror into it.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS legacy_events (
            event_key TEXT NOT NULL,
            happened_at TIMESTAMPTZ NOT NULL,
            actor_ref TEXT,
            subject_ref TEXT,
            outcome TEXT,
            extra_json JSONB
        )
        "#,
    )
    .execute(&pool)
    .await
    .expect("create legacy table");

    let actor_id = Uuid::new_v4();
    let event = AuditEvent::new(
        AuditAction::RoleChanged,
        AuditResult::Success,
        Some(actor_id),
        Some("user"),
        Some(Uuid::new_v4()),
        None,
        None,
    );
    mirrored.record(&event).await.expect("record");

    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM legacy_events WHERE actor_ref = $1")
            .bind(actor_id.to_string())
            .fetch_one(&pool)
            .await
            .expect("count");
    assert_eq!(count, 1);
}
