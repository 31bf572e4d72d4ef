use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;

use crate::{models::Actor, AppState};

fn bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
}

/// Resolve the bearer token (if any) to an `Actor` and stash it in request
/// extensions. Never rejects: routes that demand authentication layer a
/// hard guard on top. Runs on every route so the blanket moderator policy
/// can see who is calling.
pub async fn resolve_actor_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if let Some(token) = bearer_token(&req) {
        if let Some(actor) = state.auth.resolve_session(token).await? {
            req.extensions_mut().insert(actor);
        }
    }
    Ok(next.run(req).await)
}

/// Hard authentication gate: 401 unless an actor resolved upstream.
pub async fn auth_middleware(req: Request, next: Next) -> Result<Response, AppError> {
    if req.extensions().get::<Actor>().is_none() {
        return Err(AppError::Unauthorized(anyhow::anyhow!(
            "Missing or invalid bearer token"
        )));
    }
    Ok(next.run(req).await)
}

/// Extractor handing handlers the resolved actor.
pub struct AuthActor(pub Actor);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthActor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let actor = parts.extensions.get::<Actor>().ok_or_else(|| {
            AppError::Unauthorized(anyhow::anyhow!("Missing or invalid bearer token"))
        })?;
        Ok(AuthActor(*actor))
    }
}
