//! Challenge/verify/session lifecycle tests against PostgreSQL.

mod common;

use common::*;
use history_service::models::Role;
use history_service::services::AuthFlowError;
use history_service::utils::crypto;
use uuid::Uuid;

#[tokio::test]
async fn happy_path_issues_a_session_exactly_once() {
    let state = spawn_state().await.expect("state");
    let email = unique_email();

    let issued = state
        .auth
        .request_challenge(&email, "10.0.0.1", "test-agent", "req-1")
        .await
        .expect("challenge");
    let otp = issued.dev_otp.expect("dev otp exposed in test config");

    let session = state
        .auth
        .verify_challenge_and_create_session(
            &email,
            issued.challenge_id,
            &otp,
            &valid_consents(),
            "10.0.0.1",
            "test-agent",
            "req-2",
        )
        .await
        .expect("verify succeeds");

    let actor = state
        .auth
        .resolve_session(&session.access_token)
        .await
        .expect("resolve")
        .expect("live session");
    assert_eq!(actor.role, Role::User);

    // Replaying the same OTP against the consumed challenge is INVALID.
    let replay = state
        .auth
        .verify_challenge_and_create_session(
            &email,
            issued.challenge_id,
            &otp,
            &valid_consents(),
            "10.0.0.1",
            "test-agent",
            "req-3",
        )
        .await;
    assert!(matches!(replay, Err(AuthFlowError::Invalid)));
}

#[tokio::test]
async fn five_wrong_attempts_lock_the_challenge_for_good() {
    let state = spawn_state().await.expect("state");
    let email = unique_email();

    let issued = state
        .auth
        .request_challenge(&email, "10.0.0.2", "test-agent", "req-1")
        .await
        .expect("challenge");
    let otp = issued.dev_otp.expect("dev otp");
    // A wrong OTP that cannot collide with the real one.
    let wrong = if otp == "000000" { "000001" } else { "000000" };

    for _ in 0..5 {
        let result = state
            .auth
            .verify_challenge_and_create_session(
                &email,
                issued.challenge_id,
                wrong,
                &valid_consents(),
                "10.0.0.2",
                "test-agent",
                "req-n",
            )
            .await;
        assert!(matches!(result, Err(AuthFlowError::Invalid)));
    }

    // Even the correct OTP is refused once locked.
    let result = state
        .auth
        .verify_challenge_and_create_session(
            &email,
            issued.challenge_id,
            &otp,
            &valid_consents(),
            "10.0.0.2",
            "test-agent",
            "req-6",
        )
        .await;
    assert!(matches!(result, Err(AuthFlowError::Locked)));
}

#[tokio::test]
async fn expired_challenge_is_refused_with_correct_otp() {
    let state = spawn_state().await.expect("state");
    let email = unique_email();

    let issued = state
        .auth
        .request_challenge(&email, "10.0.0.3", "test-agent", "req-1")
        .await
        .expect("challenge");
    let otp = issued.dev_otp.expect("dev otp");

    sqlx::query("UPDATE challenges SET expires_at = NOW() - INTERVAL '1 second' WHERE challenge_id = $1")
        .bind(issued.challenge_id)
        .execute(state.db.pool())
        .await
        .expect("age the challenge");

    let result = state
        .auth
        .verify_challenge_and_create_session(
            &email,
            issued.challenge_id,
            &otp,
            &valid_consents(),
            "10.0.0.3",
            "test-agent",
            "req-2",
        )
        .await;
    assert!(matches!(result, Err(AuthFlowError::Expired)));
}

#[tokio::test]
async fn consent_gate_blocks_missing_and_stale_versions() {
    let state = spawn_state().await.expect("state");
    let email = unique_email();

    let issued = state
        .auth
        .request_challenge(&email, "10.0.0.4", "test-agent", "req-1")
        .await
        .expect("challenge");
    let otp = issued.dev_otp.expect("dev otp");

    // No consents at all.
    let result = state
        .auth
        .verify_challenge_and_create_session(
            &email,
            issued.challenge_id,
            &otp,
            &[],
            "10.0.0.4",
            "test-agent",
            "req-2",
        )
        .await;
    assert!(matches!(result, Err(AuthFlowError::ConsentRequired)));

    // Right documents, stale terms version.
    let mut stale = valid_consents();
    stale[0].version = "2019-06".to_string();
    let result = state
        .auth
        .verify_challenge_and_create_session(
            &email,
            issued.challenge_id,
            &otp,
            &stale,
            "10.0.0.4",
            "test-agent",
            "req-3",
        )
        .await;
    assert!(matches!(result, Err(AuthFlowError::ConsentRequired)));

    // The gate consumed nothing: the correct consents still work.
    let session = state
        .auth
        .verify_challenge_and_create_session(
            &email,
            issued.challenge_id,
            &otp,
            &valid_consents(),
            "10.0.0.4",
            "test-agent",
            "req-4",
        )
        .await
        .expect("verify succeeds after consent fix");
    assert!(!session.access_token.is_empty());
}

#[tokio::test]
async fn rate_limited_challenge_request_returns_a_decoy() {
    let pool = create_test_pool().await.expect("pool");
    let mut config = create_test_config();
    config.rate_limit.challenge_email_limit = 2;
    let state = create_test_state(pool, config);

    let email = unique_email();
    for _ in 0..2 {
        let issued = state
            .auth
            .request_challenge(&email, "10.0.0.5", "test-agent", "req")
            .await
            .expect("within budget");
        assert!(issued.dev_otp.is_some());
    }

    // Third request: same 200-shaped result, but no OTP and no challenge row.
    let decoy = state
        .auth
        .request_challenge(&email, "10.0.0.5", "test-agent", "req")
        .await
        .expect("still ok");
    assert!(decoy.dev_otp.is_none());
    assert!(state
        .db
        .find_challenge(decoy.challenge_id)
        .await
        .expect("lookup")
        .is_none());
}

#[tokio::test]
async fn unknown_email_and_wrong_binding_are_equally_invalid() {
    let state = spawn_state().await.expect("state");
    let email_a = unique_email();
    let email_b = unique_email();

    let issued = state
        .auth
        .request_challenge(&email_a, "10.0.0.6", "test-agent", "req-1")
        .await
        .expect("challenge");
    let otp = issued.dev_otp.expect("dev otp");

    // Unknown email: same generic INVALID as everything else.
    let result = state
        .auth
        .verify_challenge_and_create_session(
            "nobody@example.com",
            issued.challenge_id,
            &otp,
            &valid_consents(),
            "10.0.0.6",
            "test-agent",
            "req-2",
        )
        .await;
    assert!(matches!(result, Err(AuthFlowError::Invalid)));

    // Known email, but the challenge is bound to a different address.
    state
        .auth
        .request_challenge(&email_b, "10.0.0.6", "test-agent", "req-3")
        .await
        .expect("second user exists");
    let result = state
        .auth
        .verify_challenge_and_create_session(
            &email_b,
            issued.challenge_id,
            &otp,
            &valid_consents(),
            "10.0.0.6",
            "test-agent",
            "req-4",
        )
        .await;
    assert!(matches!(result, Err(AuthFlowError::Invalid)));
}

#[tokio::test]
async fn logout_revokes_and_is_idempotent() {
    let state = spawn_state().await.expect("state");
    let (_, token) = seed_session(&state, Role::User).await.expect("session");

    let actor = state
        .auth
        .resolve_session(&token)
        .await
        .expect("resolve")
        .expect("live");

    state
        .auth
        .logout(&actor, &token, "req-1")
        .await
        .expect("logout");
    assert!(state
        .auth
        .resolve_session(&token)
        .await
        .expect("resolve")
        .is_none());

    // Second logout is a no-op, not an error.
    state
        .auth
        .logout(&actor, &token, "req-2")
        .await
        .expect("idempotent logout");
}

#[tokio::test]
async fn expired_sessions_are_invalid_at_read_time() {
    let state = spawn_state().await.expect("state");
    let (user, _) = seed_session(&state, Role::User).await.expect("session");

    let token = crypto::random_token();
    let token_hash = crypto::keyed_hash(TEST_SECRET, &token).expect("hash");
    sqlx::query(
        r#"
        INSERT INTO sessions (session_id, user_id, token_hash, created_at, expires_at, revoked_at)
        VALUES ($1, $2, $3, NOW() - INTERVAL '2 days', NOW() - INTERVAL '1 day', NULL)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user.user_id)
    .bind(&token_hash)
    .execute(state.db.pool())
    .await
    .expect("insert stale session");

    assert!(state
        .auth
        .resolve_session(&token)
        .await
        .expect("resolve")
        .is_none());
}

#[tokio::test]
async fn role_changes_apply_without_re_login() {
    let state = spawn_state().await.expect("state");
    let (user, token) = seed_session(&state, Role::User).await.expect("session");

    sqlx::query("UPDATE users SET role_code = $1 WHERE user_id = $2")
        .bind(Role::Vip.as_str())
        .bind(user.user_id)
        .execute(state.db.pool())
        .await
        .expect("promote");

    let actor = state
        .auth
        .resolve_session(&token)
        .await
        .expect("resolve")
        .expect("live");
    assert_eq!(actor.role, Role::Vip);
}
