//! Shared fixtures for integration tests

#![allow(dead_code)]

use axum::Router;
use std::sync::Arc;
use will_iam_authz::auth::{InMemoryLock, Locker};
use will_iam_authz::config::LockConfig;
use will_iam_authz::types::{KeyPair, ServiceAccount};
use will_iam_authz::{AuthorizationEvaluator, InMemoryStore, Permission, ServiceAccountManager, Stores};

pub struct Fixture {
    pub backend: Arc<InMemoryStore>,
    pub stores: Stores,
    pub locker: Locker,
    pub evaluator: AuthorizationEvaluator,
    pub accounts: ServiceAccountManager,
}

impl Fixture {
    pub fn new() -> Self {
        let backend = Arc::new(InMemoryStore::new());
        let stores = Stores::new(backend.clone());
        Self::with_stores(backend, stores)
    }

    pub fn with_stores(backend: Arc<InMemoryStore>, stores: Stores) -> Self {
        let locker = Locker::new(Arc::new(InMemoryLock::new()), lock_config());
        Self {
            backend,
            evaluator: AuthorizationEvaluator::new(stores.permissions.clone()),
            accounts: ServiceAccountManager::new(stores.clone(), locker.clone()),
            stores,
            locker,
        }
    }

    /// Key pair account holding `*::RO::*::*`
    pub async fn root(&self) -> (ServiceAccount, KeyPair) {
        let (root, key_pair) = self.accounts.create_key_pair_type("root").await.unwrap();
        self.grant(&root.id, "*::RO::*::*").await;
        (root, key_pair)
    }

    /// Key pair account without any grant
    pub async fn account(&self, name: &str) -> ServiceAccount {
        self.accounts.create_key_pair_type(name).await.unwrap().0
    }

    pub async fn grant(&self, service_account_id: &str, permission: &str) {
        self.accounts
            .bootstrap_permission(service_account_id, Permission::parse(permission).unwrap())
            .await
            .unwrap();
    }
}

/// Generous budget so contended tests never time out on slow machines
pub fn lock_config() -> LockConfig {
    LockConfig {
        ttl_ms: 5_000,
        max_attempts: 2_000,
        retry_delay_ms: 2,
    }
}

/// Serves `router` on an ephemeral local port, returning its base URL
pub async fn spawn(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}
