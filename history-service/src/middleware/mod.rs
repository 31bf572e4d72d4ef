mod auth;
mod rbac;

pub use auth::{auth_middleware, resolve_actor_middleware, AuthActor};
pub use rbac::{
    admin_guard, ensure_role, forbid_moderator, superadmin_guard, MODERATOR_ALLOWED_PREFIXES,
};
