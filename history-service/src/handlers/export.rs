use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::{
    dtos::export::{
        FullExportResponse, IssueGrantRequest, IssueGrantResponse, RedactedExportResponse,
    },
    middleware::{ensure_role, AuthActor},
    services::{ExportService, ExportTokenError},
    AppState,
};

const EXPORT_TOKEN_HEADER: &str = "x-export-token";

/// Mint a one-time export grant
///
/// Superadmin only (route guard). TTL and use-count are clamped server-side.
#[utoipa::path(
    post,
    path = "/export/{resource_type}/{resource_id}/grant",
    params(
        ("resource_type" = String, Path, description = "Resource type"),
        ("resource_id" = Uuid, Path, description = "Resource id")
    ),
    request_body(content = IssueGrantRequest, description = "Optional TTL/uses overrides"),
    responses(
        (status = 200, description = "Grant issued; the token is shown exactly once", body = IssueGrantResponse),
        (status = 400, description = "Unknown resource type", body = ErrorResponse),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse),
        (status = 403, description = "forbidden", body = ErrorResponse)
    ),
    tag = "Export",
    security(("bearer_auth" = []))
)]
pub async fn issue_grant(
    State(state): State<AppState>,
    Path((resource_type, resource_id)): Path<(String, Uuid)>,
    AuthActor(actor): AuthActor,
    body: Option<Json<IssueGrantRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let req = body.map(|Json(req)| req).unwrap_or_default();

    let grant = state
        .exports
        .issue_grant(&resource_type, resource_id, &actor, req.ttl_seconds, req.uses)
        .await?;

    Ok((
        StatusCode::OK,
        Json(IssueGrantResponse {
            export_token: grant.export_token,
            expires_at: grant.expires_at,
        }),
    ))
}

/// Consume an export grant and download the full row, encrypted
#[utoipa::path(
    get,
    path = "/export/{resource_type}/{resource_id}/full",
    params(
        ("resource_type" = String, Path, description = "Resource type"),
        ("resource_id" = Uuid, Path, description = "Resource id"),
        ("x-export-token" = String, Header, description = "Grant token")
    ),
    responses(
        (status = 200, description = "Encrypted full export", body = FullExportResponse),
        (status = 400, description = "Missing export-token header", body = ErrorResponse),
        (status = 403, description = "detail: token_invalid | token_expired | token_used", body = ErrorResponse)
    ),
    tag = "Export",
    security(("bearer_auth" = []))
)]
pub async fn full_export(
    State(state): State<AppState>,
    Path((resource_type, resource_id)): Path<(String, Uuid)>,
    AuthActor(actor): AuthActor,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ExportTokenError> {
    let token = headers
        .get(EXPORT_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            ExportTokenError::Internal(AppError::BadRequest(anyhow::anyhow!(
                "Missing {} header",
                EXPORT_TOKEN_HEADER
            )))
        })?;

    let ciphertext = state
        .exports
        .full_export(&resource_type, resource_id, token, &actor)
        .await?;

    Ok((StatusCode::OK, Json(FullExportResponse { ciphertext })))
}

/// Read the redacted view of a resource
///
/// Allowed roles depend on the resource type; moderator is denied everywhere
/// by the blanket guard before this handler runs.
#[utoipa::path(
    get,
    path = "/export/{resource_type}/{resource_id}",
    params(
        ("resource_type" = String, Path, description = "Resource type"),
        ("resource_id" = Uuid, Path, description = "Resource id")
    ),
    responses(
        (status = 200, description = "Redacted row", body = RedactedExportResponse),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse),
        (status = 403, description = "forbidden", body = ErrorResponse),
        (status = 404, description = "No such resource", body = ErrorResponse)
    ),
    tag = "Export",
    security(("bearer_auth" = []))
)]
pub async fn redacted_export(
    State(state): State<AppState>,
    Path((resource_type, resource_id)): Path<(String, Uuid)>,
    AuthActor(actor): AuthActor,
) -> Result<impl IntoResponse, AppError> {
    ensure_role(Some(&actor), ExportService::allowed_roles_for(&resource_type))?;

    let data = state
        .exports
        .redacted_export(&resource_type, resource_id, &actor)
        .await?;

    Ok((StatusCode::OK, Json(RedactedExportResponse { data })))
}
