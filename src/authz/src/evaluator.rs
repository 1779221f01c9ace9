//! Authorization evaluator
//!
//! Decides whether a service account's aggregated grants satisfy candidate
//! permissions. Grants are fetched once per call; evaluation itself is a pure
//! function of the fetched data.

use crate::error::{IamError, Result};
use crate::permission::{OwnershipLevel, Permission};
use crate::store::PermissionsStore;
use std::sync::Arc;
use tracing::debug;

/// Checks principals' grants against candidate permissions
#[derive(Clone)]
pub struct AuthorizationEvaluator {
    permissions: Arc<dyn PermissionsStore>,
}

impl AuthorizationEvaluator {
    pub fn new(permissions: Arc<dyn PermissionsStore>) -> Self {
        Self { permissions }
    }

    /// Aggregated grants of every role bound to the service account
    pub async fn permissions_for(&self, service_account_id: &str) -> Result<Vec<Permission>> {
        self.permissions.for_service_account(service_account_id).await
    }

    /// Parses `permission` and checks it against the principal's grants
    pub async fn has_permission(&self, service_account_id: &str, permission: &str) -> Result<bool> {
        let candidate = Permission::parse(permission)?;
        let grants = self.permissions_for(service_account_id).await?;
        let has = candidate.is_present(&grants);
        if !has {
            debug!(
                service_account_id = %service_account_id,
                permission = %candidate,
                "Permission denied"
            );
        }
        Ok(has)
    }

    /// One result per candidate, aligned with the input
    pub async fn has_permissions(
        &self,
        service_account_id: &str,
        candidates: &[Permission],
    ) -> Result<Vec<bool>> {
        let grants = self.permissions_for(service_account_id).await?;
        Ok(candidates.iter().map(|c| c.is_present(&grants)).collect())
    }

    /// Parses every string first; any malformed entry fails the whole call
    pub async fn has_permissions_strings<S: AsRef<str>>(
        &self,
        service_account_id: &str,
        candidates: &[S],
    ) -> Result<Vec<bool>> {
        let parsed = candidates
            .iter()
            .map(|s| Permission::parse(s.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        self.has_permissions(service_account_id, &parsed).await
    }

    /// Whether the principal owns every candidate
    ///
    /// Each candidate is evaluated at the owner level regardless of the level
    /// it was given with, so a principal may only hand out what it owns.
    pub async fn has_all_owner_permissions(
        &self,
        service_account_id: &str,
        candidates: &[Permission],
    ) -> Result<bool> {
        let owned: Vec<Permission> = candidates
            .iter()
            .cloned()
            .map(|p| p.with_ownership_level(OwnershipLevel::Owner))
            .collect();
        let has = self.has_permissions(service_account_id, &owned).await?;
        Ok(has.into_iter().all(|h| h))
    }

    /// Like [`has_permission`](Self::has_permission), failing with `Forbidden` on denial
    pub async fn require_permission(&self, service_account_id: &str, permission: &str) -> Result<()> {
        if self.has_permission(service_account_id, permission).await? {
            Ok(())
        } else {
            Err(IamError::Forbidden(format!("missing permission {}", permission)))
        }
    }

    /// Like [`has_all_owner_permissions`](Self::has_all_owner_permissions), failing with `Forbidden`
    pub async fn require_all_owner_permissions(
        &self,
        service_account_id: &str,
        candidates: &[Permission],
    ) -> Result<()> {
        if self
            .has_all_owner_permissions(service_account_id, candidates)
            .await?
        {
            Ok(())
        } else {
            debug!(
                service_account_id = %service_account_id,
                count = candidates.len(),
                "Owner permission check denied"
            );
            Err(IamError::Forbidden(
                "owner level required on every granted permission".to_string(),
            ))
        }
    }
}
