//! PostgreSQL backend tests
//!
//! Run with a disposable database:
//! `TEST_DATABASE_URL=postgres://... cargo test -p will-iam-authz -- --ignored`

#![cfg(feature = "postgres")]

use std::sync::Arc;
use std::time::Duration;
use will_iam_authz::auth::{DistributedLock, PgLeaseLock};
use will_iam_authz::config::DatabaseConfig;
use will_iam_authz::store::TokensStore;
use will_iam_authz::types::{PermissionRequest, PermissionRequestState, RoleWithNested};
use will_iam_authz::{
    AuthorizationEvaluator, IamError, InMemoryLock, Locker, Permission, PermissionManager,
    PgStore, RequestOutcome, RoleManager, ServiceAccountManager, Stores, Token,
};

async fn store() -> PgStore {
    let url = std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL must be set");
    let store = PgStore::connect(&DatabaseConfig {
        url: Some(url),
        ..DatabaseConfig::default()
    })
    .await
    .unwrap();
    store.run_migrations().await.unwrap();
    store
}

fn unique(name: &str) -> String {
    format!("{}-{}", name, uuid::Uuid::new_v4())
}

#[tokio::test]
#[ignore]
async fn test_service_account_lifecycle() {
    let stores = Stores::new(Arc::new(store().await));
    let locker = Locker::new(Arc::new(InMemoryLock::new()), Default::default());
    let accounts = ServiceAccountManager::new(stores.clone(), locker);

    let (sa, key_pair) = accounts.create_key_pair_type(&unique("bot")).await.unwrap();
    assert_eq!(
        accounts
            .authenticate_key_pair(&key_pair.key_id, &key_pair.key_secret)
            .await
            .unwrap(),
        sa.id
    );

    accounts
        .bootstrap_permission(&sa.id, Permission::parse("Maestro::RO::*::*").unwrap())
        .await
        .unwrap();
    let evaluator = AuthorizationEvaluator::new(stores.permissions.clone());
    assert!(evaluator
        .has_permission(&sa.id, "Maestro::RL::EditScheduler::x")
        .await
        .unwrap());

    let roles = accounts.roles(&sa.id).await.unwrap();
    assert_eq!(roles.len(), 1);
    assert!(roles[0].is_base_role);
}

#[tokio::test]
#[ignore]
async fn test_role_update_is_atomic() {
    let stores = Stores::new(Arc::new(store().await));
    let locker = Locker::new(Arc::new(InMemoryLock::new()), Default::default());
    let accounts = ServiceAccountManager::new(stores.clone(), locker);
    let evaluator = AuthorizationEvaluator::new(stores.permissions.clone());
    let roles = RoleManager::new(stores.clone(), evaluator);

    let (root, _) = accounts.create_key_pair_type(&unique("root")).await.unwrap();
    accounts
        .bootstrap_permission(&root.id, Permission::parse("*::RO::*::*").unwrap())
        .await
        .unwrap();

    let name = unique("editors");
    let role = roles
        .create(
            &root.id,
            RoleWithNested::from_strings(&name, &["Maestro::RL::A::*"], vec![root.id.clone()])
                .unwrap(),
        )
        .await
        .unwrap();

    let err = roles
        .update(
            &root.id,
            &role.id,
            RoleWithNested::from_strings("renamed", &[] as &[&str], vec![unique("missing")])
                .unwrap(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, IamError::Transaction(_)));

    let details = roles.get(&role.id).await.unwrap();
    assert_eq!(details.name, name);
    assert_eq!(details.permissions, vec!["Maestro::RL::A::*"]);
}

#[tokio::test]
#[ignore]
async fn test_permission_requests_and_delete() {
    let stores = Stores::new(Arc::new(store().await));
    let locker = Locker::new(Arc::new(InMemoryLock::new()), Default::default());
    let accounts = ServiceAccountManager::new(stores.clone(), locker);
    let permissions = PermissionManager::new(
        stores.clone(),
        AuthorizationEvaluator::new(stores.permissions.clone()),
    );

    let (root, _) = accounts.create_key_pair_type(&unique("root")).await.unwrap();
    accounts
        .bootstrap_permission(&root.id, Permission::parse("*::RO::*::*").unwrap())
        .await
        .unwrap();
    let (requester, _) = accounts.create_key_pair_type(&unique("requester")).await.unwrap();

    let request =
        PermissionRequest::new("Maestro", "EditScheduler".into(), "*".parse().unwrap(), "hi");
    let RequestOutcome::Filed(filed) =
        permissions.create_request(&requester.id, request).await.unwrap()
    else {
        panic!("request should have been filed");
    };
    let listed = permissions.requests_for(&requester.id).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, filed.id);
    assert_eq!(listed[0].state, PermissionRequestState::Created);

    let granted = accounts
        .create_permission(
            &root.id,
            &requester.id,
            Permission::parse("Maestro::RL::A::*").unwrap(),
        )
        .await
        .unwrap();
    let id = granted.id.unwrap();
    assert!(permissions.delete(&root.id, &id).await.unwrap());
    assert!(!permissions.delete(&root.id, &id).await.unwrap());
}

#[tokio::test]
#[ignore]
async fn test_token_upsert() {
    let store = store().await;
    let access_token = unique("token");
    let mut token = Token {
        access_token: access_token.clone(),
        provider_access_token: "p-1".to_string(),
        refresh_token: "r".to_string(),
        token_type: "Bearer".to_string(),
        expiry: chrono::Utc::now(),
        email: "dev@example.com".to_string(),
    };
    store.save(&token).await.unwrap();
    token.provider_access_token = "p-2".to_string();
    store.save(&token).await.unwrap();

    assert_eq!(store.get(&access_token).await.unwrap().provider_access_token, "p-2");
}

#[tokio::test]
#[ignore]
async fn test_lease_lock_is_exclusive() {
    let store = store().await;
    let lock = PgLeaseLock::new(store.pool().clone());
    let name = unique("lock");

    let token = lock.try_lock(&name, Duration::from_secs(5)).await.unwrap().unwrap();
    assert!(lock.try_lock(&name, Duration::from_secs(5)).await.unwrap().is_none());
    lock.unlock(&name, &token).await.unwrap();
    assert!(lock.try_lock(&name, Duration::from_secs(5)).await.unwrap().is_some());
}
