//! Management use cases
//!
//! Every multi-row write runs inside one [`Transaction`](crate::store::Transaction).
//! Mutations that grant permissions are gated by the evaluator: the actor
//! must hold the matching `Will.IAM` lender permission and own everything it
//! hands out.

pub mod permissions;
pub mod roles;
pub mod service_accounts;
pub mod services;

pub use permissions::{PermissionManager, RequestOutcome};
pub use roles::RoleManager;
pub use service_accounts::ServiceAccountManager;
pub use services::{NewService, ServiceManager, ServiceUpdate};
