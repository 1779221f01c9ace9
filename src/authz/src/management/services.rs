//! Service registration use cases

use super::service_accounts::{build_key_pair, create_in};
use crate::am::catalog::{CREATE_SERVICES, EDIT_SERVICE};
use crate::error::{IamError, Result};
use crate::evaluator::AuthorizationEvaluator;
use crate::permission::{
    self_lender_permission, Action, OwnershipLevel, Permission, ResourceHierarchy, SEPARATOR,
    WILDCARD,
};
use crate::store::{in_transaction, Stores};
use crate::types::{KeyPair, Service};
use crate::SERVICE_NAME;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Fields of a service being registered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewService {
    pub name: String,
    pub permission_name: String,
    pub am_url: String,
}

/// Editable fields of a registered service
pub type ServiceUpdate = NewService;

impl NewService {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(IamError::Validation("name is required".to_string()));
        }
        if self.permission_name.trim().is_empty() {
            return Err(IamError::Validation("permissionName is required".to_string()));
        }
        if self.permission_name.contains(SEPARATOR) || self.permission_name == WILDCARD {
            return Err(IamError::Validation(format!(
                "permissionName cannot contain '{}' or be '{}'",
                SEPARATOR, WILDCARD
            )));
        }
        if self.permission_name == SERVICE_NAME {
            return Err(IamError::Validation(format!(
                "permissionName {} is reserved",
                SERVICE_NAME
            )));
        }
        if self.am_url.trim().is_empty() {
            return Err(IamError::Validation("amUrl is required".to_string()));
        }
        Ok(())
    }
}

/// Registers federation members
#[derive(Clone)]
pub struct ServiceManager {
    stores: Stores,
    evaluator: AuthorizationEvaluator,
}

impl ServiceManager {
    pub fn new(stores: Stores, evaluator: AuthorizationEvaluator) -> Self {
        Self { stores, evaluator }
    }

    /// Registers a service
    ///
    /// Creates a key pair service account acting for the service and grants
    /// full ownership of the service's namespace to it and to `creator`, all
    /// in one transaction. The key pair is only returned here.
    pub async fn create(&self, creator: &str, new: NewService) -> Result<(Service, KeyPair)> {
        new.validate()?;
        self.evaluator
            .require_permission(creator, &self_lender_permission(CREATE_SERVICES, WILDCARD))
            .await?;
        let creator_sa = self.stores.service_accounts.get(creator).await?;

        let (service_account, key_pair) = build_key_pair(&new.name);
        let now = Utc::now();
        let service = Service {
            id: uuid::Uuid::new_v4().to_string(),
            name: new.name,
            permission_name: new.permission_name,
            service_account_id: service_account.id.clone(),
            creator_service_account_id: creator_sa.id.clone(),
            am_url: new.am_url,
            created_at: now,
            updated_at: now,
        };

        let created = in_transaction(self.stores.transactions.as_ref(), move |tx| {
            Box::pin(async move {
                let service_account = create_in(tx, service_account).await?;
                tx.create_service(&service).await?;
                for role_id in [&service_account.base_role_id, &creator_sa.base_role_id] {
                    let grant = full_ownership(&service.permission_name).with_role(role_id.as_str());
                    tx.create_permission(&grant).await?;
                }
                Ok(service)
            })
        })
        .await?;

        info!(
            service_id = %created.id,
            permission_name = %created.permission_name,
            creator = %creator,
            "Registered service"
        );
        Ok((created, key_pair))
    }

    pub async fn list(&self) -> Result<Vec<Service>> {
        self.stores.services.list().await
    }

    pub async fn get(&self, id: &str) -> Result<Service> {
        self.stores.services.get(id).await
    }

    /// Edits a service; `actor` needs `Will.IAM::RL::EditService::<id>`
    pub async fn update(&self, actor: &str, id: &str, update: ServiceUpdate) -> Result<Service> {
        update.validate()?;
        self.evaluator
            .require_permission(actor, &self_lender_permission(EDIT_SERVICE, id))
            .await?;

        let current = self.stores.services.get(id).await?;
        let service = Service {
            name: update.name,
            permission_name: update.permission_name,
            am_url: update.am_url,
            updated_at: Utc::now(),
            ..current
        };
        in_transaction(self.stores.transactions.as_ref(), move |tx| {
            Box::pin(async move {
                tx.update_service(&service).await?;
                Ok(service)
            })
        })
        .await
    }
}

/// `<permission_name>::RO::*::*`
fn full_ownership(permission_name: &str) -> Permission {
    Permission::new(
        permission_name,
        OwnershipLevel::Owner,
        Action::new(WILDCARD),
        ResourceHierarchy::all(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_service(permission_name: &str) -> NewService {
        NewService {
            name: "Maestro".to_string(),
            permission_name: permission_name.to_string(),
            am_url: "http://maestro/am".to_string(),
        }
    }

    #[test]
    fn test_validate_permission_name() {
        assert!(new_service("Maestro").validate().is_ok());
        assert!(new_service("").validate().is_err());
        assert!(new_service("Mae::stro").validate().is_err());
        assert!(new_service("*").validate().is_err());
        assert!(new_service(SERVICE_NAME).validate().is_err());
    }

    #[test]
    fn test_full_ownership_format() {
        let p = full_ownership("Maestro");
        assert_eq!(p.to_string(), "Maestro::RO::*::*");
        assert!(p.has_service_full_ownership());
    }
}
