//! Route-level RBAC tests: deny-by-default guards, the blanket moderator
//! exclusion, and the role-change escalation rules.

mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use common::*;
use history_service::build_router;
use history_service::models::Role;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}

fn get(path: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(path);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

fn post_json(path: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

#[tokio::test]
async fn moderator_is_forbidden_on_every_non_allowlisted_route() {
    let state = spawn_state().await.expect("state");
    let app = build_router(state.clone()).await.expect("router");
    let (_, token) = seed_session(&state, Role::Moderator).await.expect("session");

    let resource = Uuid::new_v4();
    let sensitive_gets = [
        format!("/export/vehicle/{}", resource),
        format!("/export/vehicle/{}/full", resource),
    ];
    for path in &sensitive_gets {
        let response = app
            .clone()
            .oneshot(get(path, Some(&token)))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::FORBIDDEN, "GET {}", path);
    }

    let sensitive_posts = [
        (
            format!("/admin/users/{}/role", Uuid::new_v4()),
            serde_json::json!({"role": "vip"}),
        ),
        (
            format!("/export/vehicle/{}/grant", resource),
            serde_json::json!({}),
        ),
    ];
    for (path, body) in sensitive_posts {
        let response = app
            .clone()
            .oneshot(post_json(&path, Some(&token), body))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::FORBIDDEN, "POST {}", path);
    }
}

#[tokio::test]
async fn moderator_keeps_access_to_identity_routes() {
    let state = spawn_state().await.expect("state");
    let app = build_router(state.clone()).await.expect("router");
    let (user, token) = seed_session(&state, Role::Moderator).await.expect("session");

    let response = app
        .clone()
        .oneshot(get("/auth/me", Some(&token)))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["user_id"], serde_json::json!(user.user_id));
    assert_eq!(body["role"], "moderator");
}

#[tokio::test]
async fn the_moderator_layer_is_invisible_to_other_roles() {
    let state = spawn_state().await.expect("state");
    let app = build_router(state.clone()).await.expect("router");
    let vehicle = seed_vehicle(&state).await.expect("vehicle");

    // Roles allowed on the redacted view see it; the layer changes nothing.
    for role in [Role::User, Role::Vip, Role::Dealer, Role::Admin, Role::Superadmin] {
        let (_, token) = seed_session(&state, role).await.expect("session");
        let response = app
            .clone()
            .oneshot(get(
                &format!("/export/vehicle/{}", vehicle.vehicle_id),
                Some(&token),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK, "role {:?}", role);
    }
}

#[tokio::test]
async fn unauthenticated_requests_get_401_everywhere_guarded() {
    let state = spawn_state().await.expect("state");
    let app = build_router(state.clone()).await.expect("router");

    let paths = vec![
        "/auth/me".to_string(),
        format!("/export/vehicle/{}", Uuid::new_v4()),
    ];
    for path in &paths {
        let response = app.clone().oneshot(get(path, None)).await.expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "GET {}", path);
    }

    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/admin/users/{}/role", Uuid::new_v4()),
            None,
            serde_json::json!({"role": "vip"}),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn role_change_matrix_enforces_escalation_rules() {
    let state = spawn_state().await.expect("state");
    let app = build_router(state.clone()).await.expect("router");

    let target = seed_user(&state, Role::User).await.expect("target");
    let (_, user_token) = seed_session(&state, Role::User).await.expect("user");
    let (_, admin_token) = seed_session(&state, Role::Admin).await.expect("admin");
    let (_, super_token) = seed_session(&state, Role::Superadmin).await.expect("super");

    // A plain user is forbidden outright.
    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/admin/users/{}/role", target.user_id),
            Some(&user_token),
            serde_json::json!({"role": "vip"}),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // An admin cannot mint superadmins.
    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/admin/users/{}/role", target.user_id),
            Some(&admin_token),
            serde_json::json!({"role": "superadmin"}),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(response).await["error"], "superadmin_required");

    // An admin can assign ordinary roles.
    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/admin/users/{}/role", target.user_id),
            Some(&admin_token),
            serde_json::json!({"role": "vip", "reason": "loyal customer"}),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["old_role"], "user");
    assert_eq!(body["new_role"], "vip");

    // A superadmin can mint superadmins.
    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/admin/users/{}/role", target.user_id),
            Some(&super_token),
            serde_json::json!({"role": "superadmin"}),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    // Unknown role name.
    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/admin/users/{}/role", target.user_id),
            Some(&admin_token),
            serde_json::json!({"role": "root"}),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "invalid_role");

    // Unknown user.
    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/admin/users/{}/role", Uuid::new_v4()),
            Some(&admin_token),
            serde_json::json!({"role": "vip"}),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn export_grant_routes_demand_superadmin() {
    let state = spawn_state().await.expect("state");
    let app = build_router(state.clone()).await.expect("router");
    let vehicle = seed_vehicle(&state).await.expect("vehicle");

    let (_, admin_token) = seed_session(&state, Role::Admin).await.expect("admin");
    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/export/vehicle/{}/grant", vehicle.vehicle_id),
            Some(&admin_token),
            serde_json::json!({}),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let (_, super_token) = seed_session(&state, Role::Superadmin).await.expect("super");
    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/export/vehicle/{}/grant", vehicle.vehicle_id),
            Some(&super_token),
            serde_json::json!({"ttl_seconds": 300}),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["export_token"].as_str().is_some());
}

#[tokio::test]
async fn full_export_route_handles_token_header_states() {
    let state = spawn_state().await.expect("state");
    let app = build_router(state.clone()).await.expect("router");
    let vehicle = seed_vehicle(&state).await.expect("vehicle");
    let (_, super_token) = seed_session(&state, Role::Superadmin).await.expect("super");

    // Missing header is a 400.
    let response = app
        .clone()
        .oneshot(get(
            &format!("/export/vehicle/{}/full", vehicle.vehicle_id),
            Some(&super_token),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Garbage token is a 403 with a distinguishable code.
    let request = Request::builder()
        .method("GET")
        .uri(format!("/export/vehicle/{}/full", vehicle.vehicle_id))
        .header(header::AUTHORIZATION, format!("Bearer {}", super_token))
        .header("x-export-token", "garbage")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(response).await["detail"], "token_invalid");
}

#[tokio::test]
async fn sixth_challenge_request_in_window_still_looks_issued() {
    let pool = create_test_pool().await.expect("pool");
    let mut config = create_test_config();
    config.rate_limit.challenge_email_limit = 5;
    let state = create_test_state(pool, config);
    let app = build_router(state.clone()).await.expect("router");

    let email = unique_email();
    let mut last = None;
    for _ in 0..6 {
        let response = app
            .clone()
            .oneshot(post_json(
                "/auth/request",
                None,
                serde_json::json!({"email": email}),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        last = Some(body_json(response).await);
    }

    let body = last.expect("six responses");
    assert_eq!(body["ok"], true);
    assert!(body["challenge_id"].as_str().is_some());
    assert_eq!(body["dev_otp"], Value::Null);
}
