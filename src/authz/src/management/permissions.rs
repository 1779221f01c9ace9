//! Permission use cases: bulk attribution, deletion and permission requests

use crate::am::catalog::EDIT_ROLE;
use crate::error::Result;
use crate::evaluator::AuthorizationEvaluator;
use crate::permission::{self_lender_permission, Permission};
use crate::store::{in_transaction, Stores};
use crate::types::{PermissionRequest, PermissionRequestState, PermissionsAttribute};
use chrono::Utc;
use tracing::{debug, info};

/// What filing a permission request did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    /// The requester already holds the lender permission; nothing was stored
    AlreadyHeld,
    /// The request was stored in the `created` state
    Filed(PermissionRequest),
}

/// Grants, revokes and requests permissions on behalf of an acting service account
#[derive(Clone)]
pub struct PermissionManager {
    stores: Stores,
    evaluator: AuthorizationEvaluator,
}

impl PermissionManager {
    pub fn new(stores: Stores, evaluator: AuthorizationEvaluator) -> Self {
        Self { stores, evaluator }
    }

    pub async fn get(&self, id: &str) -> Result<Permission> {
        self.stores.permissions.get(id).await
    }

    /// Grants every permission to every role in one transaction
    ///
    /// `actor` must own each permission and hold `Will.IAM::RL::EditRole::<id>`
    /// for each role. Either every grant is stored or none is.
    pub async fn attribute(
        &self,
        actor: &str,
        attribute: PermissionsAttribute,
    ) -> Result<Vec<Permission>> {
        let permissions = attribute.parsed()?;
        self.evaluator
            .require_all_owner_permissions(actor, &permissions)
            .await?;
        for role_id in &attribute.roles_ids {
            self.evaluator
                .require_permission(actor, &self_lender_permission(EDIT_ROLE, role_id))
                .await?;
            self.stores.roles.get(role_id).await?;
        }

        let roles_ids = attribute.roles_ids;
        let created = in_transaction(self.stores.transactions.as_ref(), move |tx| {
            Box::pin(async move {
                let mut created = Vec::with_capacity(roles_ids.len() * permissions.len());
                for role_id in &roles_ids {
                    for permission in &permissions {
                        created.push(
                            tx.create_permission(&permission.clone().with_role(role_id.as_str()))
                                .await?,
                        );
                    }
                }
                Ok(created)
            })
        })
        .await?;

        info!(actor = %actor, grants = created.len(), "Attributed permissions");
        Ok(created)
    }

    /// Deletes a permission the actor owns
    ///
    /// Returns `false` when no permission has that ID, so repeated deletes are
    /// harmless.
    pub async fn delete(&self, actor: &str, id: &str) -> Result<bool> {
        let permission = match self.stores.permissions.get(id).await {
            Ok(permission) => permission,
            Err(err) if err.is_not_found() => {
                debug!(permission_id = %id, "Permission already gone");
                return Ok(false);
            }
            Err(err) => return Err(err),
        };
        self.evaluator
            .require_all_owner_permissions(actor, std::slice::from_ref(&permission))
            .await?;

        let id_owned = id.to_string();
        in_transaction(self.stores.transactions.as_ref(), move |tx| {
            Box::pin(async move { tx.delete_permission(&id_owned).await })
        })
        .await?;

        info!(permission_id = %id, actor = %actor, "Deleted permission");
        Ok(true)
    }

    /// Files a request for the lender permission described by `request`
    pub async fn create_request(
        &self,
        actor: &str,
        request: PermissionRequest,
    ) -> Result<RequestOutcome> {
        if self
            .evaluator
            .has_permission(actor, &request.to_lender_string())
            .await?
        {
            return Ok(RequestOutcome::AlreadyHeld);
        }

        let now = Utc::now();
        let request = PermissionRequest {
            service_account_id: actor.to_string(),
            state: PermissionRequestState::Created,
            created_at: now,
            updated_at: now,
            ..request
        };
        let stored = in_transaction(self.stores.transactions.as_ref(), move |tx| {
            Box::pin(async move { tx.create_permission_request(&request).await })
        })
        .await?;

        info!(
            request_id = %stored.id,
            actor = %actor,
            permission = %stored.to_lender_string(),
            "Filed permission request"
        );
        Ok(RequestOutcome::Filed(stored))
    }

    /// Requests filed by `actor`
    pub async fn requests_for(&self, actor: &str) -> Result<Vec<PermissionRequest>> {
        self.stores.permission_requests.created_by(actor).await
    }
}
