//! HTTP router for api-guard
//!
//! This module defines the axum router that handles all HTTP requests.
//! It provides routes for:
//! - Health checks (open)
//! - Token-gated API routes under `/api`
//! - Identity and settings administration under `/panel` (session only)

use axum::{
    extract::{Path, Request, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Json},
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::auth::AuthManager;
use crate::database::Database;
use crate::error::IdentityError;
use crate::models::{CreateIdentityRequest, IdentityInfo, RateSettings};

use super::middleware::{
    api_auth_middleware, api_identity, context_user, session_admin_middleware,
};

/// Shared application state
pub struct AppState<D: Database> {
    /// Authentication manager
    pub auth_manager: Arc<AuthManager<D>>,

    /// Database
    pub database: Arc<D>,
}

impl<D: Database> Clone for AppState<D> {
    fn clone(&self) -> Self {
        Self {
            auth_manager: Arc::clone(&self.auth_manager),
            database: Arc::clone(&self.database),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Body of `PUT /panel/api-users/:id/quota`
#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateQuotaRequest {
    pub quota_per_minute: i64,
}

/// Build the main application router
///
/// Routes under `/api` run behind `api_auth_middleware`. Administration under
/// `/panel` runs behind `session_admin_middleware` and never accepts API tokens.
pub fn build_router<D: Database + 'static>(state: AppState<D>) -> Router {
    let api = Router::new()
        .route("/api/whoami", get(whoami_handler))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state.auth_manager),
            api_auth_middleware::<D>,
        ));

    let admin = Router::new()
        .route(
            "/panel/api-users",
            get(admin_list_identities_handler::<D>).post(admin_create_identity_handler::<D>),
        )
        .route(
            "/panel/api-users/:id",
            get(admin_get_identity_handler::<D>).delete(admin_delete_identity_handler::<D>),
        )
        .route(
            "/panel/api-users/:id/enable",
            post(admin_enable_identity_handler::<D>),
        )
        .route(
            "/panel/api-users/:id/disable",
            post(admin_disable_identity_handler::<D>),
        )
        .route(
            "/panel/api-users/:id/rotate",
            post(admin_rotate_identity_handler::<D>),
        )
        .route(
            "/panel/api-users/:id/quota",
            put(admin_update_quota_handler::<D>),
        )
        .route(
            "/panel/api-settings",
            get(admin_get_settings_handler::<D>).put(admin_update_settings_handler::<D>),
        )
        .route_layer(middleware::from_fn(session_admin_middleware));

    Router::new()
        .route("/health", get(health_handler::<D>))
        .merge(api)
        .merge(admin)
        .with_state(state)
}

// =============================================================================
// Health Handler
// =============================================================================

/// Health check endpoint handler
///
/// Reports "degraded" when the identity store cannot be queried.
async fn health_handler<D: Database + 'static>(
    State(state): State<AppState<D>>,
) -> impl IntoResponse {
    let (status, label) = match state.database.count_identities().await {
        Ok(_) => (StatusCode::OK, "healthy"),
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "degraded")
        }
    };

    (
        status,
        Json(HealthResponse {
            status: label.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}

// =============================================================================
// API and Admin Handlers
// =============================================================================

fn error_body(message: impl Into<String>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "error": message.into() }))
}

/// Map lifecycle errors to responses; store details are logged, not returned
fn identity_error_response(
    error: IdentityError,
    action: &str,
) -> (StatusCode, Json<serde_json::Value>) {
    match error {
        IdentityError::EmptyName => (StatusCode::BAD_REQUEST, error_body(error.to_string())),
        IdentityError::DuplicateName(_) => (StatusCode::CONFLICT, error_body(error.to_string())),
        IdentityError::NotFound(_) => (StatusCode::NOT_FOUND, error_body("Identity not found")),
        IdentityError::Hash(_) | IdentityError::Database(_) => {
            tracing::error!(error = %error, "Failed to {}", action);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_body(format!("Failed to {}", action)),
            )
        }
    }
}

/// Who the current request acts as
async fn whoami_handler(request: Request) -> impl IntoResponse {
    let extensions = request.extensions();
    let identity = api_identity(extensions).map(IdentityInfo::from);

    match context_user(extensions) {
        Some(user) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "id": user.id,
                "username": user.username,
                "identity": identity,
            })),
        ),
        None => (StatusCode::NOT_FOUND, error_body("No user")),
    }
}

/// List identities handler
async fn admin_list_identities_handler<D: Database + 'static>(
    State(state): State<AppState<D>>,
) -> impl IntoResponse {
    match state.auth_manager.list_identities().await {
        Ok(identities) => {
            let identities: Vec<IdentityInfo> = identities.iter().map(IdentityInfo::from).collect();
            (
                StatusCode::OK,
                Json(serde_json::json!({ "identities": identities })),
            )
        }
        Err(e) => identity_error_response(e, "list identities"),
    }
}

/// Create identity handler
///
/// The response is the only place the plaintext token ever appears.
async fn admin_create_identity_handler<D: Database + 'static>(
    State(state): State<AppState<D>>,
    Json(req): Json<CreateIdentityRequest>,
) -> impl IntoResponse {
    match state.auth_manager.create_identity(req).await {
        Ok(created) => (
            StatusCode::CREATED,
            Json(serde_json::json!({
                "identity": created.identity,
                "token": created.token,
            })),
        ),
        Err(e) => identity_error_response(e, "create identity"),
    }
}

/// Get identity by ID handler
async fn admin_get_identity_handler<D: Database + 'static>(
    State(state): State<AppState<D>>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    match state.auth_manager.get_identity(id).await {
        Ok(identity) => (
            StatusCode::OK,
            Json(serde_json::json!({ "identity": IdentityInfo::from(&identity) })),
        ),
        Err(e) => identity_error_response(e, "get identity"),
    }
}

async fn set_enabled<D: Database + 'static>(
    state: AppState<D>,
    id: i64,
    enabled: bool,
) -> (StatusCode, Json<serde_json::Value>) {
    match state.auth_manager.set_enabled(id, enabled).await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({ "id": id, "enabled": enabled })),
        ),
        Err(e) => identity_error_response(e, "update identity"),
    }
}

/// Enable identity handler
async fn admin_enable_identity_handler<D: Database + 'static>(
    State(state): State<AppState<D>>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    set_enabled(state, id, true).await
}

/// Disable identity handler
async fn admin_disable_identity_handler<D: Database + 'static>(
    State(state): State<AppState<D>>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    set_enabled(state, id, false).await
}

/// Delete identity handler
async fn admin_delete_identity_handler<D: Database + 'static>(
    State(state): State<AppState<D>>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    match state.auth_manager.delete_identity(id).await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({ "message": "Identity deleted" })),
        ),
        Err(e) => identity_error_response(e, "delete identity"),
    }
}

/// Rotate identity secret handler
async fn admin_rotate_identity_handler<D: Database + 'static>(
    State(state): State<AppState<D>>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    match state.auth_manager.rotate_identity(id).await {
        Ok(rotated) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "identity": rotated.identity,
                "token": rotated.token,
            })),
        ),
        Err(e) => identity_error_response(e, "rotate identity"),
    }
}

/// Update identity quota handler
async fn admin_update_quota_handler<D: Database + 'static>(
    State(state): State<AppState<D>>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateQuotaRequest>,
) -> impl IntoResponse {
    match state.auth_manager.update_quota(id, req.quota_per_minute).await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "id": id,
                "quota_per_minute": req.quota_per_minute.max(0),
            })),
        ),
        Err(e) => identity_error_response(e, "update quota"),
    }
}

/// Get rate settings handler
///
/// Reports stored values; a store failure is a 500, not the request-path
/// fallback.
async fn admin_get_settings_handler<D: Database + 'static>(
    State(state): State<AppState<D>>,
) -> impl IntoResponse {
    match state.auth_manager.stored_rate_settings().await {
        Ok(settings) => (StatusCode::OK, Json(serde_json::json!(settings))),
        Err(e) => {
            tracing::error!(error = %e, "Failed to load settings");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_body("Failed to load settings"),
            )
        }
    }
}

/// Update rate settings handler
async fn admin_update_settings_handler<D: Database + 'static>(
    State(state): State<AppState<D>>,
    Json(settings): Json<RateSettings>,
) -> impl IntoResponse {
    match state.auth_manager.update_rate_settings(settings).await {
        Ok(stored) => (StatusCode::OK, Json(serde_json::json!(stored))),
        Err(e) => {
            tracing::error!(error = %e, "Failed to update settings");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_body("Failed to update settings"),
            )
        }
    }
}
