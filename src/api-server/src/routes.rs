//! Route definitions for the API server
//!
//! `GET /healthcheck` is open. Everything else requires credentials:
//!
//! - `GET /am`
//! - `GET /permissions/has`, `POST /permissions/hasMany`
//! - `PUT /permissions/attribute`, `DELETE /permissions/:id`
//! - `PUT /permissions/requests`, `GET /permissions/requests`

use crate::{handlers, middleware, state::AppState};
use axum::{
    middleware as axum_middleware,
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;

/// Create the application router with all routes and middleware
pub fn create_router(state: Arc<AppState>) -> Router {
    let authenticated = Router::new()
        .route("/am", get(handlers::am_list))
        .route("/permissions/has", get(handlers::has_permission))
        .route("/permissions/hasMany", post(handlers::has_permissions))
        .route("/permissions/attribute", put(handlers::attribute_permissions))
        .route(
            "/permissions/requests",
            put(handlers::create_permission_request).get(handlers::list_permission_requests),
        )
        .route("/permissions/:id", delete(handlers::delete_permission))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    // outermost first: the id is set before the span opens
    let layers = ServiceBuilder::new()
        .layer(middleware::set_request_id_layer())
        .layer(middleware::trace_layer())
        .layer(middleware::propagate_request_id_layer())
        .layer(middleware::cors_layer());

    Router::new()
        .route("/healthcheck", get(handlers::healthcheck))
        .merge(authenticated)
        .with_state(state)
        .layer(layers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
        response::Response,
    };
    use tower::ServiceExt;
    use will_iam_authz::types::{KeyPair, PermissionRequest, PermissionRequestState};
    use will_iam_authz::{
        AmEntry, IamConfig, InMemoryLock, Locker, Permission, ServiceAccountManager,
    };

    fn create_test_state() -> Arc<AppState> {
        Arc::new(AppState::in_memory(&IamConfig::default()).unwrap())
    }

    /// Key pair account holding `grants`
    async fn account(state: &AppState, grants: &[&str]) -> KeyPair {
        account_with_id(state, grants).await.1
    }

    async fn account_with_id(state: &AppState, grants: &[&str]) -> (String, KeyPair) {
        let locker = Locker::new(Arc::new(InMemoryLock::new()), Default::default());
        let accounts = ServiceAccountManager::new(state.stores.clone(), locker);
        let (sa, key_pair) = accounts.create_key_pair_type("tester").await.unwrap();
        for grant in grants {
            accounts
                .bootstrap_permission(&sa.id, Permission::parse(grant).unwrap())
                .await
                .unwrap();
        }
        (sa.id, key_pair)
    }

    fn authorization(key_pair: &KeyPair) -> String {
        format!("KeyPair {}:{}", key_pair.key_id, key_pair.key_secret)
    }

    async fn get_as(state: &Arc<AppState>, key_pair: &KeyPair, uri: &str) -> Response {
        create_router(state.clone())
            .oneshot(
                Request::builder()
                    .uri(uri)
                    .header(header::AUTHORIZATION, authorization(key_pair))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn send_as(
        state: &Arc<AppState>,
        key_pair: &KeyPair,
        method: &str,
        uri: &str,
        body: &str,
    ) -> Response {
        create_router(state.clone())
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .header(header::AUTHORIZATION, authorization(key_pair))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn json_body<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_healthcheck() {
        let app = create_router(create_test_state());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/healthcheck")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = json_body(response).await;
        assert_eq!(body["healthy"], true);
    }

    #[tokio::test]
    async fn test_auth_required() {
        for uri in ["/am?prefix=", "/permissions/has?permission=Maestro::RL::A::x"] {
            let response = create_router(create_test_state())
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{}", uri);
            let body: serde_json::Value = json_body(response).await;
            assert_eq!(body["status"], 401);
        }
    }

    #[tokio::test]
    async fn test_has_permission() {
        let state = create_test_state();
        let key_pair = account(&state, &["Maestro::RL::EditScheduler::*"]).await;

        let response = get_as(
            &state,
            &key_pair,
            "/permissions/has?permission=Maestro::RL::EditScheduler::sch-1",
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = get_as(
            &state,
            &key_pair,
            "/permissions/has?permission=Maestro::RO::EditScheduler::sch-1",
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = get_as(&state, &key_pair, "/permissions/has?permission=Maestro::RL").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = get_as(&state, &key_pair, "/permissions/has").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_has_permissions_batch() {
        let state = create_test_state();
        let key_pair = account(&state, &["Maestro::RO::*::*"]).await;

        let response = send_as(
            &state,
            &key_pair,
            "POST",
            "/permissions/hasMany",
            r#"["Maestro::RL::A::x","Other::RL::A::x","Maestro::RO::B::y::z"]"#,
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        let results: Vec<bool> = json_body(response).await;
        assert_eq!(results, vec![true, false, true]);

        let response = send_as(
            &state,
            &key_pair,
            "POST",
            "/permissions/hasMany",
            r#"["Maestro::RL::A::x","Maestro::RL"]"#,
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_permission_requests() {
        let state = create_test_state();
        let key_pair = account(&state, &["Maestro::RL::ListSchedulers::*"]).await;

        let response = send_as(
            &state,
            &key_pair,
            "PUT",
            "/permissions/requests",
            r#"{"service":"Maestro","action":"ListSchedulers","resourceHierarchy":"x"}"#,
        )
        .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = send_as(
            &state,
            &key_pair,
            "PUT",
            "/permissions/requests",
            r#"{"service":"Maestro","action":"EditScheduler","resourceHierarchy":"x::*","message":"on call"}"#,
        )
        .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let filed: PermissionRequest = json_body(response).await;
        assert_eq!(filed.state, PermissionRequestState::Created);

        let response = get_as(&state, &key_pair, "/permissions/requests").await;
        assert_eq!(response.status(), StatusCode::OK);
        let listed: Vec<PermissionRequest> = json_body(response).await;
        assert_eq!(listed, vec![filed]);
    }

    #[tokio::test]
    async fn test_attribute_and_delete_permissions() {
        let state = create_test_state();
        let root = account(&state, &["*::RO::*::*"]).await;
        let (member_id, member) = account_with_id(&state, &[]).await;
        let member_sa = state.stores.service_accounts.get(&member_id).await.unwrap();

        let body = format!(
            r#"{{"rolesIds":["{}"],"permissions":["Maestro::RL::EditScheduler::*"]}}"#,
            member_sa.base_role_id
        );
        let response = send_as(&state, &member, "PUT", "/permissions/attribute", &body).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = send_as(&state, &root, "PUT", "/permissions/attribute", &body).await;
        assert_eq!(response.status(), StatusCode::OK);
        let created: Vec<Permission> = json_body(response).await;
        let id = created[0].id.clone().unwrap();

        let uri = format!("/permissions/{}", id);
        let response = send_as(&state, &member, "DELETE", &uri, "").await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = send_as(&state, &root, "DELETE", &uri, "").await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = send_as(&state, &root, "DELETE", &uri, "").await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_am_lists_services() {
        let state = create_test_state();
        let key_pair = account(&state, &[]).await;

        let response = get_as(&state, &key_pair, "/am?prefix=Will").await;
        assert_eq!(response.status(), StatusCode::OK);
        let entries: Vec<AmEntry> = json_body(response).await;
        assert_eq!(entries, vec![AmEntry::partial("Will.IAM")]);

        let response = get_as(&state, &key_pair, "/am").await;
        let entries: Vec<AmEntry> = json_body(response).await;
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_am_unregistered_service_is_not_found() {
        let state = create_test_state();
        let key_pair = account(&state, &[]).await;

        let response = get_as(&state, &key_pair, "/am?prefix=Nope::").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_am_marks_rights() {
        let state = create_test_state();
        let key_pair = account(&state, &["Will.IAM::RL::CreateRoles::*"]).await;

        let response = get_as(&state, &key_pair, "/am?prefix=Will.IAM::CreateRoles::").await;
        assert_eq!(response.status(), StatusCode::OK);

        let entries: Vec<AmEntry> = json_body(response).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].prefix, "Will.IAM::CreateRoles::*");
        assert!(entries[0].complete);
        assert!(entries[0].lender);
        assert!(!entries[0].owner);
    }

    #[tokio::test]
    async fn test_request_id_header() {
        let response = create_router(create_test_state())
            .oneshot(
                Request::builder()
                    .uri("/healthcheck")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(response.headers().contains_key(middleware::X_REQUEST_ID));

        // rejected requests carry the caller's id too
        let response = create_router(create_test_state())
            .oneshot(
                Request::builder()
                    .uri("/am")
                    .header(middleware::X_REQUEST_ID, "abc-123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[middleware::X_REQUEST_ID], "abc-123");
    }
}
