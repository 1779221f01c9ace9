use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use std::sync::Arc;
use tracing::error;
use will_iam_authz::types::{PermissionRequest, PermissionsAttribute};
use will_iam_authz::{AmEntry, Permission, Principal, RequestOutcome};

use crate::{
    error::Result,
    models::{AmQuery, HasPermissionQuery, HealthResponse},
    state::AppState,
};

/// Pings the stores; 500 when they are unreachable
pub async fn healthcheck(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    match state.stores.health.ping().await {
        Ok(()) => (StatusCode::OK, Json(HealthResponse { healthy: true })),
        Err(err) => {
            error!(error = %err, "Healthcheck failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(HealthResponse { healthy: false }),
            )
        }
    }
}

/// Lists the AM entries under `prefix`, annotated with the caller's rights
pub async fn am_list(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<AmQuery>,
) -> Result<Json<Vec<AmEntry>>> {
    let entries = state
        .enumerator
        .list_for(&principal.service_account_id, &query.prefix)
        .await?;
    Ok(Json(entries))
}

/// 200 when the caller holds `permission`, 403 otherwise
pub async fn has_permission(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<HasPermissionQuery>,
) -> Result<StatusCode> {
    let has = state
        .evaluator
        .has_permission(&principal.service_account_id, &query.permission)
        .await?;
    Ok(if has {
        StatusCode::OK
    } else {
        StatusCode::FORBIDDEN
    })
}

/// One boolean per permission in the body, in order
pub async fn has_permissions(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Json(permissions): Json<Vec<String>>,
) -> Result<Json<Vec<bool>>> {
    let results = state
        .evaluator
        .has_permissions_strings(&principal.service_account_id, &permissions)
        .await?;
    Ok(Json(results))
}

/// Grants every listed permission to every listed role
pub async fn attribute_permissions(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Json(attribute): Json<PermissionsAttribute>,
) -> Result<Json<Vec<Permission>>> {
    let created = state
        .permissions
        .attribute(&principal.service_account_id, attribute)
        .await?;
    Ok(Json(created))
}

/// 200 when deleted, 204 when there was nothing to delete
pub async fn delete_permission(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let deleted = state
        .permissions
        .delete(&principal.service_account_id, &id)
        .await?;
    Ok(if deleted {
        StatusCode::OK
    } else {
        StatusCode::NO_CONTENT
    })
}

/// 202 with the stored request, or 204 when the caller already holds the permission
pub async fn create_permission_request(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Json(request): Json<PermissionRequest>,
) -> Result<Response> {
    let outcome = state
        .permissions
        .create_request(&principal.service_account_id, request)
        .await?;
    Ok(match outcome {
        RequestOutcome::AlreadyHeld => StatusCode::NO_CONTENT.into_response(),
        RequestOutcome::Filed(filed) => (StatusCode::ACCEPTED, Json(filed)).into_response(),
    })
}

/// Requests filed by the caller
pub async fn list_permission_requests(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<Vec<PermissionRequest>>> {
    let requests = state
        .permissions
        .requests_for(&principal.service_account_id)
        .await?;
    Ok(Json(requests))
}
