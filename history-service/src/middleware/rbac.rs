//! Role-based access guards.
//!
//! Two independent, composable checks: per-route role requirements
//! (deny-by-default inclusion) and a blanket moderator exclusion applied to
//! the whole router. Moderator is the one role whose access is defined by
//! exclusion - everything except content routes - because the content
//! surface is small and stable while "everything else" keeps growing; a
//! per-route exclusion would have to be remembered on every new route.

use axum::{extract::Request, middleware::Next, response::Response};
use service_core::error::AppError;

use crate::models::{Actor, Role};

/// Path prefixes a moderator may reach: the content-management surface and
/// the identity/public routes everyone needs.
pub const MODERATOR_ALLOWED_PREFIXES: &[&str] = &[
    "/content/",
    "/auth/",
    "/public/",
    "/health",
    "/docs",
    "/.well-known/",
];

fn moderator_allowed(path: &str) -> bool {
    MODERATOR_ALLOWED_PREFIXES
        .iter()
        .any(|prefix| path.starts_with(prefix) || path == prefix.trim_end_matches('/'))
}

/// Blanket layer: deny iff the resolved role is exactly moderator and the
/// path is outside the allowlist. Idempotent for every other role.
pub async fn forbid_moderator(req: Request, next: Next) -> Result<Response, AppError> {
    let is_moderator = req
        .extensions()
        .get::<Actor>()
        .map(|actor| actor.role == Role::Moderator)
        .unwrap_or(false);

    if is_moderator && !moderator_allowed(req.uri().path()) {
        return Err(AppError::Forbidden(anyhow::anyhow!("forbidden")));
    }
    Ok(next.run(req).await)
}

/// Deny-by-default role check: unauthenticated without an actor, forbidden
/// when the role is outside the allowed set.
pub fn ensure_role(actor: Option<&Actor>, allowed: &[Role]) -> Result<Actor, AppError> {
    let actor = actor.ok_or_else(|| {
        AppError::Unauthorized(anyhow::anyhow!("Missing or invalid bearer token"))
    })?;
    if !allowed.contains(&actor.role) {
        return Err(AppError::Forbidden(anyhow::anyhow!("forbidden")));
    }
    Ok(*actor)
}

/// Route guard for the admin surface.
pub async fn admin_guard(req: Request, next: Next) -> Result<Response, AppError> {
    ensure_role(
        req.extensions().get::<Actor>(),
        &[Role::Admin, Role::Superadmin],
    )?;
    Ok(next.run(req).await)
}

/// Route guard for the export-grant surface.
pub async fn superadmin_guard(req: Request, next: Next) -> Result<Response, AppError> {
    ensure_role(req.extensions().get::<Actor>(), &[Role::Superadmin])?;
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn actor(role: Role) -> Actor {
        Actor {
            user_id: Uuid::new_v4(),
            role,
        }
    }

    #[test]
    fn ensure_role_denies_without_actor() {
        let err = ensure_role(None, &[Role::Admin]).unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[test]
    fn ensure_role_denies_outside_allowed_set() {
        let a = actor(Role::User);
        let err = ensure_role(Some(&a), &[Role::Admin, Role::Superadmin]).unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[test]
    fn ensure_role_passes_the_actor_through() {
        let a = actor(Role::Superadmin);
        let resolved = ensure_role(Some(&a), &[Role::Superadmin]).unwrap();
        assert_eq!(resolved, a);
    }

    #[test]
    fn moderator_allowlist_covers_content_and_identity_routes() {
        assert!(moderator_allowed("/content/blog/posts"));
        assert!(moderator_allowed("/auth/me"));
        assert!(moderator_allowed("/auth/logout"));
        assert!(moderator_allowed("/public/qr/WVW123"));
        assert!(moderator_allowed("/health"));
    }

    #[test]
    fn moderator_allowlist_excludes_sensitive_routes() {
        assert!(!moderator_allowed("/admin/users/abc/role"));
        assert!(!moderator_allowed("/export/vehicle/abc"));
        assert!(!moderator_allowed("/export/vehicle/abc/full"));
    }
}
