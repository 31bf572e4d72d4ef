use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use service_core::error::AppError;
use uuid::Uuid;

use crate::{
    dtos::admin::{ChangeRoleRequest, ChangeRoleResponse},
    middleware::AuthActor,
    models::{AuditAction, AuditEvent, AuditResult, ReasonCode, Role},
    AppState,
};

use super::ClientInfo;

/// Change a user's role
///
/// Admin or superadmin only (route guard). Assigning `superadmin` is
/// restricted to superadmin actors: no self-escalation path exists, and no
/// lower role can grant it.
#[utoipa::path(
    post,
    path = "/admin/users/{user_id}/role",
    params(("user_id" = Uuid, Path, description = "Target user")),
    request_body = ChangeRoleRequest,
    responses(
        (status = 200, description = "Role changed", body = ChangeRoleResponse),
        (status = 400, description = "invalid_role", body = ErrorResponse),
        (status = 403, description = "forbidden or superadmin_required", body = ErrorResponse),
        (status = 404, description = "user_not_found", body = ErrorResponse)
    ),
    tag = "Admin",
    security(("bearer_auth" = []))
)]
pub async fn change_role(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    client: ClientInfo,
    AuthActor(actor): AuthActor,
    Json(req): Json<ChangeRoleRequest>,
) -> Result<impl IntoResponse, AppError> {
    let new_role: Role = req.role.parse().map_err(|_: String| {
        AppError::BadRequest(anyhow::anyhow!("invalid_role"))
    })?;

    let Some(target) = state.db.find_user_by_id(user_id).await? else {
        audit_role_denied(&state, &actor, user_id, ReasonCode::UserNotFound, &client).await;
        return Err(AppError::NotFound(anyhow::anyhow!("user_not_found")));
    };

    if new_role == Role::Superadmin && actor.role != Role::Superadmin {
        audit_role_denied(&state, &actor, user_id, ReasonCode::SuperadminRequired, &client).await;
        return Err(AppError::Forbidden(anyhow::anyhow!("superadmin_required")));
    }

    let old_role = target.role_code.clone();
    let event = AuditEvent::new(
        AuditAction::RoleChanged,
        AuditResult::Success,
        Some(actor.user_id),
        Some("user"),
        Some(user_id),
        None,
        Some(serde_json::json!({
            "old_role": old_role,
            "new_role": new_role.as_str(),
            "reason": req.reason,
            "request_id": client.request_id,
        })),
    );
    state
        .db
        .update_user_role(user_id, new_role.as_str(), &event)
        .await?;
    state.audit.mirror(&event).await;

    Ok((
        StatusCode::OK,
        Json(ChangeRoleResponse {
            ok: true,
            user_id,
            old_role,
            new_role: new_role.as_str().to_string(),
            at: Utc::now(),
        }),
    ))
}

async fn audit_role_denied(
    state: &AppState,
    actor: &crate::models::Actor,
    target_user_id: Uuid,
    reason: ReasonCode,
    client: &ClientInfo,
) {
    let event = AuditEvent::new(
        AuditAction::RoleChanged,
        AuditResult::Denied,
        Some(actor.user_id),
        Some("user"),
        Some(target_user_id),
        Some(reason),
        Some(serde_json::json!({ "request_id": client.request_id })),
    );
    if let Err(e) = state.audit.record(&event).await {
        tracing::error!(error = %e, "Audit write failed for denied role change");
    }
}
