use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use service_core::error::AppError;

use crate::{
    dtos::auth::{
        LogoutResponse, MeResponse, RequestChallengeRequest, RequestChallengeResponse,
        SessionResponse, VerifyChallengeRequest,
    },
    middleware::AuthActor,
    services::{AuthFlowError, ConsentDecl},
    utils::ValidatedJson,
    AppState,
};

use super::ClientInfo;

/// Request a sign-in challenge for an email address
///
/// Always 200 with an identical shape: the caller cannot tell a rate-limited
/// or unknown-address request apart from a delivered one.
#[utoipa::path(
    post,
    path = "/auth/request",
    request_body = RequestChallengeRequest,
    responses(
        (status = 200, description = "Challenge issued (or silently suppressed)", body = RequestChallengeResponse),
        (status = 400, description = "Malformed request", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn request_challenge(
    State(state): State<AppState>,
    client: ClientInfo,
    ValidatedJson(req): ValidatedJson<RequestChallengeRequest>,
) -> Result<impl IntoResponse, AppError> {
    let issued = state
        .auth
        .request_challenge(&req.email, &client.ip, &client.user_agent, &client.request_id)
        .await?;

    Ok((
        StatusCode::OK,
        Json(RequestChallengeResponse {
            ok: true,
            challenge_id: issued.challenge_id,
            message: "If the address is valid, a sign-in code is on its way.".to_string(),
            dev_otp: issued.dev_otp,
        }),
    ))
}

/// Verify an OTP and mint a bearer session
#[utoipa::path(
    post,
    path = "/auth/verify",
    request_body = VerifyChallengeRequest,
    responses(
        (status = 200, description = "Session created", body = SessionResponse),
        (status = 400, description = "detail: INVALID | EXPIRED | CONSENT_REQUIRED", body = ErrorResponse),
        (status = 429, description = "detail: RATE_LIMIT | LOCKED", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn verify_challenge(
    State(state): State<AppState>,
    client: ClientInfo,
    ValidatedJson(req): ValidatedJson<VerifyChallengeRequest>,
) -> Result<impl IntoResponse, AuthFlowError> {
    let consents: Vec<ConsentDecl> = req
        .consents
        .into_iter()
        .map(|c| ConsentDecl {
            doc_type: c.doc_type,
            version: c.version,
        })
        .collect();

    let session = state
        .auth
        .verify_challenge_and_create_session(
            &req.email,
            req.challenge_id,
            &req.otp,
            &consents,
            &client.ip,
            &client.user_agent,
            &client.request_id,
        )
        .await?;

    Ok((
        StatusCode::OK,
        Json(SessionResponse {
            access_token: session.access_token,
            token_type: "bearer".to_string(),
            expires_at: session.expires_at,
        }),
    ))
}

/// Who am I
#[utoipa::path(
    get,
    path = "/auth/me",
    responses(
        (status = 200, description = "The live (user, role) pair", body = MeResponse),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse)
    ),
    tag = "Authentication",
    security(("bearer_auth" = []))
)]
pub async fn me(AuthActor(actor): AuthActor) -> Result<impl IntoResponse, AppError> {
    Ok((
        StatusCode::OK,
        Json(MeResponse {
            user_id: actor.user_id,
            role: actor.role.as_str().to_string(),
        }),
    ))
}

/// Revoke the current session
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses(
        (status = 200, description = "Session revoked (idempotent)", body = LogoutResponse),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse)
    ),
    tag = "Authentication",
    security(("bearer_auth" = []))
)]
pub async fn logout(
    State(state): State<AppState>,
    client: ClientInfo,
    AuthActor(actor): AuthActor,
    headers: axum::http::HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Missing bearer token")))?;

    state.auth.logout(&actor, token, &client.request_id).await?;

    Ok((StatusCode::OK, Json(LogoutResponse { ok: true })))
}
