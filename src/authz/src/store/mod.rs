//! Collaborator stores
//!
//! Reads go through the per-entity store traits. Multi-row writes go through a
//! [`Transaction`] obtained from [`TransactionSource::begin`], which is either
//! committed as a whole or rolled back.

use crate::error::Result;
use crate::permission::Permission;
use crate::types::{PermissionRequest, Role, RoleBinding, Service, ServiceAccount, Token};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;

pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::InMemoryStore;

#[cfg(feature = "postgres")]
pub use postgres::PgStore;

/// Role lookups
#[async_trait]
pub trait RolesStore: Send + Sync {
    /// Get a role by ID
    async fn get(&self, id: &str) -> Result<Role>;

    async fn list(&self) -> Result<Vec<Role>>;

    /// Roles bound to a service account
    async fn for_service_account_id(&self, service_account_id: &str) -> Result<Vec<Role>>;

    /// Roles whose name starts with `prefix` (case-insensitive), in storage order
    async fn with_name_prefix(&self, prefix: &str, limit: usize) -> Result<Vec<Role>>;

    /// Service accounts bound to a role
    async fn service_accounts(&self, role_id: &str) -> Result<Vec<ServiceAccount>>;
}

/// Permission lookups
#[async_trait]
pub trait PermissionsStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Permission>;

    /// Aggregated grants of every role bound to a service account
    async fn for_service_account(&self, service_account_id: &str) -> Result<Vec<Permission>>;

    async fn for_role(&self, role_id: &str) -> Result<Vec<Permission>>;
}

/// Permission requests filed by service accounts
#[async_trait]
pub trait PermissionRequestsStore: Send + Sync {
    /// Requests filed by `service_account_id`, oldest first
    async fn created_by(&self, service_account_id: &str) -> Result<Vec<PermissionRequest>>;
}

/// Service account lookups
#[async_trait]
pub trait ServiceAccountsStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<ServiceAccount>;

    async fn with_email(&self, email: &str) -> Result<ServiceAccount>;

    async fn with_key_id(&self, key_id: &str) -> Result<ServiceAccount>;

    async fn list(&self) -> Result<Vec<ServiceAccount>>;

    /// Service accounts whose name or email contains `term` (case-insensitive)
    async fn search(&self, term: &str) -> Result<Vec<ServiceAccount>>;
}

/// Registered services
#[async_trait]
pub trait ServicesStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Service>;

    /// All services in registration order
    async fn list(&self) -> Result<Vec<Service>>;

    async fn with_permission_name(&self, permission_name: &str) -> Result<Service>;
}

/// OAuth2 token records keyed by the caller-facing access token
#[async_trait]
pub trait TokensStore: Send + Sync {
    async fn get(&self, access_token: &str) -> Result<Token>;

    /// Insert or replace the record for `token.access_token`
    async fn save(&self, token: &Token) -> Result<()>;
}

/// Multi-row write unit
///
/// Writes are visible to other readers only after [`Transaction::commit`].
/// Dropping a transaction without committing discards its writes.
#[async_trait]
pub trait Transaction: Send {
    async fn create_role(&mut self, role: &Role) -> Result<()>;

    async fn update_role(&mut self, role: &Role) -> Result<()>;

    async fn bind_role(&mut self, binding: &RoleBinding) -> Result<()>;

    /// Removes every binding of a role
    async fn drop_bindings(&mut self, role_id: &str) -> Result<()>;

    /// Removes every permission of a role
    async fn drop_permissions(&mut self, role_id: &str) -> Result<()>;

    /// Stores a permission bound to `permission.role_id`, returning it with its ID
    async fn create_permission(&mut self, permission: &Permission) -> Result<Permission>;

    /// Removes one permission; `EntityNotFound` when it does not exist
    async fn delete_permission(&mut self, id: &str) -> Result<()>;

    /// Stores `request`, returning it with its ID
    async fn create_permission_request(
        &mut self,
        request: &PermissionRequest,
    ) -> Result<PermissionRequest>;

    async fn create_service_account(&mut self, service_account: &ServiceAccount) -> Result<()>;

    async fn update_service_account(&mut self, service_account: &ServiceAccount) -> Result<()>;

    async fn create_service(&mut self, service: &Service) -> Result<()>;

    async fn update_service(&mut self, service: &Service) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Opens transactions
#[async_trait]
pub trait TransactionSource: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn Transaction>>;
}

/// Backend liveness check
#[async_trait]
pub trait Healthcheck: Send + Sync {
    async fn ping(&self) -> Result<()>;
}

/// Shared handles to every collaborator store
#[derive(Clone)]
pub struct Stores {
    pub roles: Arc<dyn RolesStore>,
    pub permissions: Arc<dyn PermissionsStore>,
    pub permission_requests: Arc<dyn PermissionRequestsStore>,
    pub service_accounts: Arc<dyn ServiceAccountsStore>,
    pub services: Arc<dyn ServicesStore>,
    pub tokens: Arc<dyn TokensStore>,
    pub transactions: Arc<dyn TransactionSource>,
    pub health: Arc<dyn Healthcheck>,
}

impl Stores {
    /// Bundles a backend implementing every store trait
    pub fn new<B>(backend: Arc<B>) -> Self
    where
        B: RolesStore
            + PermissionsStore
            + PermissionRequestsStore
            + ServiceAccountsStore
            + ServicesStore
            + TokensStore
            + TransactionSource
            + Healthcheck
            + 'static,
    {
        Self {
            roles: backend.clone(),
            permissions: backend.clone(),
            permission_requests: backend.clone(),
            service_accounts: backend.clone(),
            services: backend.clone(),
            tokens: backend.clone(),
            transactions: backend.clone(),
            health: backend,
        }
    }
}

/// Runs `work` inside a transaction, committing on success and rolling back on error
///
/// A failing step surfaces as [`IamError::Transaction`](crate::error::IamError::Transaction).
pub async fn in_transaction<T, F>(source: &dyn TransactionSource, work: F) -> Result<T>
where
    T: Send,
    F: for<'t> FnOnce(&'t mut Box<dyn Transaction>) -> BoxFuture<'t, Result<T>> + Send,
{
    let mut tx = source.begin().await?;
    match work(&mut tx).await {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            tracing::warn!(error = %err, "Rolling back transaction");
            if let Err(rollback_err) = tx.rollback().await {
                tracing::error!(error = %rollback_err, "Rollback failed");
            }
            Err(match err {
                crate::error::IamError::Transaction(_) => err,
                other => crate::error::IamError::Transaction(other.to_string()),
            })
        }
    }
}
