//! Access management (AM) enumeration
//!
//! Given a partial permission prefix, lists the next level of the namespace
//! tree. The shape of the answer depends on how many `::` separated parts the
//! prefix has:
//!
//! - `Will.I` lists registered service names starting with the prefix
//! - `Will.IAM::Edit` lists actions of that service
//! - `Will.IAM::EditRole::` lists resources under that action
//!
//! Prefixes for this service are answered by a [`LocalAmSource`]; any other
//! service is asked through its own AM endpoint with a [`RemoteAmSource`] and
//! the answer is re-qualified with the service segment.

use crate::config::AmConfig;
use crate::error::{IamError, Result};
use crate::evaluator::AuthorizationEvaluator;
use crate::permission::{OwnershipLevel, Permission, SEPARATOR};
use crate::store::{RolesStore, ServicesStore};
use crate::types::AmEntry;
use crate::SERVICE_NAME;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub mod catalog;
pub mod local;
pub mod remote;

pub use local::LocalAmSource;
pub use remote::RemoteAmSource;

/// Enumerates one service's namespace
///
/// `prefix` and the returned entry prefixes are relative to the service, i.e.
/// without the leading service segment.
#[async_trait]
pub trait AmSource: Send + Sync {
    async fn list(&self, prefix: &str) -> Result<Vec<AmEntry>>;
}

/// Federation-wide AM enumerator
pub struct AccessEnumerator {
    services: Arc<dyn ServicesStore>,
    local: Arc<dyn AmSource>,
    evaluator: AuthorizationEvaluator,
    client: reqwest::Client,
    delegation_timeout: Duration,
}

impl AccessEnumerator {
    pub fn new(
        services: Arc<dyn ServicesStore>,
        roles: Arc<dyn RolesStore>,
        evaluator: AuthorizationEvaluator,
        config: &AmConfig,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.delegation_timeout())
            .build()
            .map_err(|e| IamError::Internal(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            services,
            local: Arc::new(LocalAmSource::new(roles, config.role_suggestion_limit)),
            evaluator,
            client,
            delegation_timeout: config.delegation_timeout(),
        })
    }

    /// Lists the entries under `prefix`
    pub async fn list(&self, prefix: &str) -> Result<Vec<AmEntry>> {
        let Some((service, rest)) = prefix.split_once(SEPARATOR) else {
            return self.list_services(prefix).await;
        };

        let source = self.source_for(service).await?;
        let mut entries = source.list(rest).await?;
        for entry in &mut entries {
            entry.prefix = format!("{}{}{}", service, SEPARATOR, entry.prefix);
        }
        Ok(entries)
    }

    /// Lists entries under `prefix`, marking complete ones with the principal's rights
    pub async fn list_for(&self, service_account_id: &str, prefix: &str) -> Result<Vec<AmEntry>> {
        let mut entries = self.list(prefix).await?;
        if !entries.iter().any(|e| e.complete) {
            return Ok(entries);
        }

        let grants = self.evaluator.permissions_for(service_account_id).await?;
        for entry in entries.iter_mut().filter(|e| e.complete) {
            entry.owner = holds(&entry.prefix, OwnershipLevel::Owner, &grants);
            entry.lender = holds(&entry.prefix, OwnershipLevel::Lender, &grants);
        }
        Ok(entries)
    }

    async fn list_services(&self, prefix: &str) -> Result<Vec<AmEntry>> {
        let services = self.services.list().await?;
        Ok(std::iter::once(SERVICE_NAME.to_string())
            .chain(services.into_iter().map(|s| s.permission_name))
            .filter(|name| name.starts_with(prefix))
            .map(AmEntry::partial)
            .collect())
    }

    /// Picks the source answering for `service`
    ///
    /// An unregistered service fails with `EntityNotFound`.
    async fn source_for(&self, service: &str) -> Result<Arc<dyn AmSource>> {
        if service == SERVICE_NAME {
            return Ok(self.local.clone());
        }

        let registered = self
            .services
            .with_permission_name(service)
            .await
            .map_err(|err| {
                if err.is_not_found() {
                    debug!(service = %service, "AM listing for unregistered service");
                }
                err
            })?;
        Ok(Arc::new(RemoteAmSource::new(
            self.client.clone(),
            registered.permission_name,
            registered.am_url,
            self.delegation_timeout,
        )))
    }
}

/// Whether `grants` cover the complete entry `prefix` at `level`
fn holds(prefix: &str, level: OwnershipLevel, grants: &[Permission]) -> bool {
    let Some((service, rest)) = prefix.split_once(SEPARATOR) else {
        return false;
    };
    let candidate = format!("{}{sep}{}{sep}{}", service, level, rest, sep = SEPARATOR);
    match Permission::parse(&candidate) {
        Ok(permission) => permission.is_present(grants),
        Err(_) => false,
    }
}
