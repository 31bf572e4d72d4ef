pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use service_core::axum::{
    extract::State,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Json, Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    security_headers::security_headers_middleware, tracing::request_id_middleware,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::{openapi::security::SecurityScheme, Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

use crate::config::HistoryConfig;
use crate::services::{AuditTrail, AuthService, Database, ExportService};

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check,
        handlers::auth::request_challenge,
        handlers::auth::verify_challenge,
        handlers::auth::me,
        handlers::auth::logout,
        handlers::admin::change_role,
        handlers::export::issue_grant,
        handlers::export::full_export,
        handlers::export::redacted_export,
    ),
    components(
        schemas(
            dtos::ErrorResponse,
            dtos::auth::RequestChallengeRequest,
            dtos::auth::RequestChallengeResponse,
            dtos::auth::ConsentDeclDto,
            dtos::auth::VerifyChallengeRequest,
            dtos::auth::SessionResponse,
            dtos::auth::MeResponse,
            dtos::auth::LogoutResponse,
            dtos::admin::ChangeRoleRequest,
            dtos::admin::ChangeRoleResponse,
            dtos::export::IssueGrantRequest,
            dtos::export::IssueGrantResponse,
            dtos::export::FullExportResponse,
            dtos::export::RedactedExportResponse,
            models::Role,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Authentication", description = "Challenge/session authentication"),
        (name = "Admin", description = "Role administration"),
        (name = "Export", description = "Redacted reads and one-time full exports"),
        (name = "Observability", description = "Service health")
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    utoipa::openapi::security::HttpBuilder::new()
                        .scheme(utoipa::openapi::security::HttpAuthScheme::Bearer)
                        .build(),
                ),
            );
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: HistoryConfig,
    pub db: Database,
    pub auth: AuthService,
    pub exports: ExportService,
    pub audit: AuditTrail,
}

pub async fn build_router(state: AppState) -> Result<Router, AppError> {
    // Admin routes: role inclusion guard on top of the global layers.
    let admin_routes = Router::new()
        .route(
            "/admin/users/:user_id/role",
            post(handlers::admin::change_role),
        )
        .layer(from_fn(middleware::admin_guard));

    // Grant issue/consume: superadmin only.
    let export_grant_routes = Router::new()
        .route(
            "/export/:resource_type/:resource_id/grant",
            post(handlers::export::issue_grant),
        )
        .route(
            "/export/:resource_type/:resource_id/full",
            get(handlers::export::full_export),
        )
        .layer(from_fn(middleware::superadmin_guard));

    // Authenticated surface; per-resource role checks run in the handler.
    let authed_routes = Router::new()
        .route("/auth/me", get(handlers::auth::me))
        .route("/auth/logout", post(handlers::auth::logout))
        .route(
            "/export/:resource_type/:resource_id",
            get(handlers::export::redacted_export),
        )
        .layer(from_fn(middleware::auth_middleware));

    let mut app = Router::new()
        .route("/health", get(health_check))
        .route("/auth/request", post(handlers::auth::request_challenge))
        .route("/auth/verify", post(handlers::auth::verify_challenge));

    let swagger_enabled = match state.config.environment {
        config::Environment::Dev => true,
        config::Environment::Prod => state.config.swagger.enabled == config::SwaggerMode::Public,
    };

    if swagger_enabled {
        app =
            app.merge(SwaggerUi::new("/docs").url("/.well-known/openapi.json", ApiDoc::openapi()));
    } else {
        app = app.route(
            "/.well-known/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        );
    }

    let app = app
        .merge(admin_routes)
        .merge(export_grant_routes)
        .merge(authed_routes)
        .with_state(state.clone())
        // Blanket moderator exclusion; per-route guards above stay
        // independent of it.
        .layer(from_fn(middleware::forbid_moderator))
        // Actor resolution runs on every route so the moderator layer and
        // the route guards all see the same resolved identity.
        .layer(from_fn_with_state(
            state.clone(),
            middleware::resolve_actor_middleware,
        ))
        .layer(
            TraceLayer::new_for_http().make_span_with(
                |request: &service_core::axum::http::Request<_>| {
                    let request_id = request
                        .headers()
                        .get("x-request-id")
                        .and_then(|value| value.to_str().ok())
                        .unwrap_or("-");

                    tracing::info_span!(
                        "http_request",
                        request_id = %request_id,
                        method = %request.method(),
                        uri = %request.uri(),
                        version = ?request.version(),
                    )
                },
            ),
        )
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(
                    state
                        .config
                        .security
                        .allowed_origins
                        .iter()
                        .map(|o| {
                            o.parse::<service_core::axum::http::HeaderValue>()
                                .unwrap_or_else(|e| {
                                    tracing::error!(
                                        "Invalid CORS origin '{}': {}. Using fallback.",
                                        o,
                                        e
                                    );
                                    service_core::axum::http::HeaderValue::from_static("*")
                                })
                        })
                        .collect::<Vec<service_core::axum::http::HeaderValue>>(),
                )
                .allow_methods([
                    service_core::axum::http::Method::GET,
                    service_core::axum::http::Method::POST,
                    service_core::axum::http::Method::OPTIONS,
                ])
                .allow_headers([
                    service_core::axum::http::header::AUTHORIZATION,
                    service_core::axum::http::header::CONTENT_TYPE,
                    service_core::axum::http::header::HeaderName::from_static("x-export-token"),
                    service_core::axum::http::header::HeaderName::from_static("x-request-id"),
                ]),
        );

    Ok(app)
}

/// Service health check
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
        (status = 500, description = "Service is unhealthy")
    ),
    tag = "Observability"
)]
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.db.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Database health check failed");
        e
    })?;

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "environment": format!("{:?}", state.config.environment),
        "checks": {
            "postgres": "up"
        }
    })))
}
