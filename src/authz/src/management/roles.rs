//! Role use cases

use crate::am::catalog::{CREATE_ROLES, EDIT_ROLE};
use crate::error::{IamError, Result};
use crate::evaluator::AuthorizationEvaluator;
use crate::permission::{self_lender_permission, Permission, WILDCARD};
use crate::store::{in_transaction, Stores, Transaction};
use crate::types::{Role, RoleBinding, RoleDetails, RoleWithNested, ServiceAccountSummary};
use chrono::Utc;
use tracing::info;

/// Creates and edits roles on behalf of an acting service account
#[derive(Clone)]
pub struct RoleManager {
    stores: Stores,
    evaluator: AuthorizationEvaluator,
}

impl RoleManager {
    pub fn new(stores: Stores, evaluator: AuthorizationEvaluator) -> Self {
        Self { stores, evaluator }
    }

    /// Creates a role with its permissions and bindings
    ///
    /// `actor` needs `Will.IAM::RL::CreateRoles::*` and must own every
    /// permission the role grants.
    pub async fn create(&self, actor: &str, rwn: RoleWithNested) -> Result<Role> {
        rwn.validate()?;
        self.evaluator
            .require_permission(actor, &self_lender_permission(CREATE_ROLES, WILDCARD))
            .await?;
        self.evaluator
            .require_all_owner_permissions(actor, &rwn.permissions)
            .await?;

        let role = Role::new(rwn.name.clone());
        let created = in_transaction(self.stores.transactions.as_ref(), move |tx| {
            Box::pin(async move {
                tx.create_role(&role).await?;
                replace_nested(tx, &role.id, &rwn).await?;
                Ok(role)
            })
        })
        .await?;

        info!(role_id = %created.id, actor = %actor, "Created role");
        Ok(created)
    }

    /// Replaces a role's name, permissions and bindings as a whole
    ///
    /// `actor` needs `Will.IAM::RL::EditRole::<role_id>` and must own every
    /// permission the role will grant. A base role stays bound to its owning
    /// account only; naming any other account fails with `Validation`.
    pub async fn update(&self, actor: &str, role_id: &str, rwn: RoleWithNested) -> Result<Role> {
        rwn.validate()?;
        self.evaluator
            .require_permission(actor, &self_lender_permission(EDIT_ROLE, role_id))
            .await?;
        self.evaluator
            .require_all_owner_permissions(actor, &rwn.permissions)
            .await?;

        let current = self.stores.roles.get(role_id).await?;
        let rebind = if current.is_base_role {
            self.check_base_role_bindings(&current, &rwn).await?;
            false
        } else {
            true
        };
        let role = Role {
            name: rwn.name.clone(),
            updated_at: Utc::now(),
            ..current
        };
        let updated = in_transaction(self.stores.transactions.as_ref(), move |tx| {
            Box::pin(async move {
                tx.drop_permissions(&role.id).await?;
                create_permissions(tx, &role.id, &rwn.permissions).await?;
                if rebind {
                    tx.drop_bindings(&role.id).await?;
                    bind_all(tx, &role.id, &rwn.service_accounts_ids).await?;
                }
                tx.update_role(&role).await?;
                Ok(role)
            })
        })
        .await?;

        info!(role_id = %updated.id, actor = %actor, "Updated role");
        Ok(updated)
    }

    async fn check_base_role_bindings(&self, role: &Role, rwn: &RoleWithNested) -> Result<()> {
        let owners = self.stores.roles.service_accounts(&role.id).await?;
        let foreign = rwn
            .service_accounts_ids
            .iter()
            .find(|id| !owners.iter().any(|owner| &owner.id == *id));
        match foreign {
            Some(id) => Err(IamError::Validation(format!(
                "base role {} cannot be bound to service account {}",
                role.id, id
            ))),
            None => Ok(()),
        }
    }

    /// Adds a single permission to a role; `actor` must own it
    pub async fn create_permission(
        &self,
        actor: &str,
        role_id: &str,
        permission: Permission,
    ) -> Result<Permission> {
        self.evaluator
            .require_all_owner_permissions(actor, std::slice::from_ref(&permission))
            .await?;
        self.stores.roles.get(role_id).await?;

        let permission = permission.with_role(role_id);
        in_transaction(self.stores.transactions.as_ref(), move |tx| {
            Box::pin(async move { tx.create_permission(&permission).await })
        })
        .await
    }

    /// Role with its formatted permissions and bound accounts
    pub async fn get(&self, role_id: &str) -> Result<RoleDetails> {
        let role = self.stores.roles.get(role_id).await?;
        let permissions = self.stores.permissions.for_role(role_id).await?;
        let service_accounts = self.stores.roles.service_accounts(role_id).await?;

        Ok(RoleDetails {
            id: role.id,
            name: role.name,
            permissions: permissions.iter().map(ToString::to_string).collect(),
            service_accounts: service_accounts.iter().map(ServiceAccountSummary::from).collect(),
        })
    }

    pub async fn permissions(&self, role_id: &str) -> Result<Vec<Permission>> {
        self.stores.permissions.for_role(role_id).await
    }

    pub async fn with_name_prefix(&self, prefix: &str, limit: usize) -> Result<Vec<Role>> {
        self.stores.roles.with_name_prefix(prefix, limit).await
    }

    pub async fn list(&self) -> Result<Vec<Role>> {
        self.stores.roles.list().await
    }
}

async fn replace_nested(
    tx: &mut Box<dyn Transaction>,
    role_id: &str,
    rwn: &RoleWithNested,
) -> Result<()> {
    create_permissions(tx, role_id, &rwn.permissions).await?;
    bind_all(tx, role_id, &rwn.service_accounts_ids).await
}

async fn create_permissions(
    tx: &mut Box<dyn Transaction>,
    role_id: &str,
    permissions: &[Permission],
) -> Result<()> {
    for permission in permissions {
        tx.create_permission(&permission.clone().with_role(role_id))
            .await?;
    }
    Ok(())
}

async fn bind_all(
    tx: &mut Box<dyn Transaction>,
    role_id: &str,
    service_accounts_ids: &[String],
) -> Result<()> {
    for service_account_id in service_accounts_ids {
        tx.bind_role(&RoleBinding::new(role_id, service_account_id.as_str()))
            .await?;
    }
    Ok(())
}
