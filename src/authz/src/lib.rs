//! # Will.IAM Authorization Core
//!
//! Fine-grained permission encoding, grant evaluation, hierarchical access
//! management (AM) enumeration across a federation of services, and cached
//! OAuth2 authentication with lock-guarded token refresh.
//!
//! ## Features
//!
//! - **Permission codec** for `Service::RO|RL::Action::Resource::...` strings
//! - **Evaluator** checking candidate permissions against aggregated grants
//! - **AM enumerator** with local and remote (delegated) sources
//! - **Token auth cache** serializing refreshes through a distributed lock
//! - **Transactional management** of roles, service accounts, services and
//!   permission grants and requests
//!
//! ## Example
//!
//! ```rust
//! use will_iam_authz::{AuthorizationEvaluator, InMemoryStore, Permission, Stores};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let stores = Stores::new(Arc::new(InMemoryStore::new()));
//!     let evaluator = AuthorizationEvaluator::new(stores.permissions.clone());
//!
//!     let candidate = Permission::parse("Maestro::RL::EditScheduler::sch-1")?;
//!     let grant = Permission::parse("Maestro::RO::*::*")?;
//!     assert!(candidate.is_present(&[grant]));
//!
//!     let has = evaluator
//!         .has_permission("unknown-account", "Maestro::RL::EditScheduler::sch-1")
//!         .await?;
//!     assert!(!has);
//!
//!     Ok(())
//! }
//! ```

pub mod am;
pub mod auth;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod management;
pub mod permission;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use am::{AccessEnumerator, AmSource, LocalAmSource, RemoteAmSource};
pub use auth::{
    Authenticator, Credentials, DistributedLock, InMemoryLock, Locker, Principal, TokenAuthCache,
};
pub use config::IamConfig;
pub use error::{IamError, PermissionError, Result};
pub use evaluator::AuthorizationEvaluator;
pub use management::{
    PermissionManager, RequestOutcome, RoleManager, ServiceAccountManager, ServiceManager,
};
pub use permission::{Action, OwnershipLevel, Permission, ResourceHierarchy};
pub use store::{InMemoryStore, Stores};
pub use types::{AccessTokenAuth, AmEntry, Role, RoleBinding, Service, ServiceAccount, Token};

#[cfg(feature = "postgres")]
pub use auth::PgLeaseLock;
#[cfg(feature = "postgres")]
pub use store::PgStore;

/// Reserved permission name of this service
pub const SERVICE_NAME: &str = "Will.IAM";

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
