use std::sync::Arc;
use std::time::Instant;
use tracing::info;
use will_iam_authz::auth::{
    Authenticator, DistributedLock, GoogleProvider, InMemoryAuthCache, InMemoryLock, Locker,
    PgLeaseLock, RefreshGuard, TokenAuthCache,
};
use will_iam_authz::{
    AccessEnumerator, AuthorizationEvaluator, IamConfig, InMemoryStore, PermissionManager,
    PgStore, ServiceAccountManager, Stores,
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub stores: Stores,

    /// Grant evaluation for `/permissions/has` and `/permissions/hasMany`
    pub evaluator: AuthorizationEvaluator,

    /// Bulk grants, deletion and permission requests
    pub permissions: PermissionManager,

    /// Federation-wide AM listing
    pub enumerator: Arc<AccessEnumerator>,

    /// Resolves `Authorization` headers to principals
    pub authenticator: Authenticator,

    /// Server start time for uptime calculation
    pub start_time: Instant,

    /// Application version
    pub version: String,
}

impl AppState {
    /// Wires every component over `stores`, serializing refreshes through `lock`
    pub fn new(
        stores: Stores,
        lock: Arc<dyn DistributedLock>,
        config: &IamConfig,
    ) -> will_iam_authz::Result<Self> {
        let locker = Locker::new(lock, config.refresh_lock.clone());
        let evaluator = AuthorizationEvaluator::new(stores.permissions.clone());
        let accounts = ServiceAccountManager::new(stores.clone(), locker.clone());

        let refresh = RefreshGuard::new(stores.tokens.clone(), locker);
        let provider = GoogleProvider::new(config.google.clone(), stores.tokens.clone(), refresh)?;
        let tokens = TokenAuthCache::new(
            config.auth_cache.clone(),
            Arc::new(InMemoryAuthCache::with_capacity(config.auth_cache.capacity)),
            Arc::new(provider),
            accounts.clone(),
        );

        let enumerator = AccessEnumerator::new(
            stores.services.clone(),
            stores.roles.clone(),
            evaluator.clone(),
            &config.am,
        )?;

        Ok(Self {
            permissions: PermissionManager::new(stores.clone(), evaluator.clone()),
            evaluator,
            enumerator: Arc::new(enumerator),
            authenticator: Authenticator::new(accounts, Arc::new(tokens)),
            stores,
            start_time: Instant::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }

    /// In-memory stores and lock, for development and tests
    pub fn in_memory(config: &IamConfig) -> will_iam_authz::Result<Self> {
        let stores = Stores::new(Arc::new(InMemoryStore::new()));
        Self::new(stores, Arc::new(InMemoryLock::new()), config)
    }

    /// Postgres when a database URL is configured, in-memory otherwise
    pub async fn from_config(config: &IamConfig) -> will_iam_authz::Result<Self> {
        if config.database.url.is_none() {
            info!("No database configured, using in-memory stores");
            return Self::in_memory(config);
        }

        let store = Arc::new(PgStore::connect(&config.database).await?);
        store.run_migrations().await?;
        info!("Connected to PostgreSQL and applied migrations");

        let lock = Arc::new(PgLeaseLock::new(store.pool().clone()));
        Self::new(Stores::new(store), lock, config)
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
