//! Service account use cases

use crate::auth::lock::Locker;
use crate::error::{IamError, Result};
use crate::evaluator::AuthorizationEvaluator;
use crate::permission::Permission;
use crate::store::{in_transaction, Stores, Transaction};
use crate::types::{AuthenticationType, KeyPair, Role, RoleBinding, ServiceAccount};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::Utc;
use rand::RngCore;
use tracing::{info, warn};

const KEY_SECRET_BYTES: usize = 32;

/// Creates, authenticates and inspects service accounts
#[derive(Clone)]
pub struct ServiceAccountManager {
    stores: Stores,
    locker: Locker,
    evaluator: AuthorizationEvaluator,
}

impl ServiceAccountManager {
    pub fn new(stores: Stores, locker: Locker) -> Self {
        let evaluator = AuthorizationEvaluator::new(stores.permissions.clone());
        Self {
            stores,
            locker,
            evaluator,
        }
    }

    /// Creates `service_account` with its base role and binding in one transaction
    pub async fn create(&self, service_account: ServiceAccount) -> Result<ServiceAccount> {
        in_transaction(self.stores.transactions.as_ref(), move |tx| {
            Box::pin(async move { create_in(tx, service_account).await })
        })
        .await
    }

    /// Creates a key pair service account; the secret is only returned here
    pub async fn create_key_pair_type(&self, name: &str) -> Result<(ServiceAccount, KeyPair)> {
        let (service_account, key_pair) = build_key_pair(name);
        let created = self.create(service_account).await?;
        info!(service_account_id = %created.id, "Created key pair service account");
        Ok((created, key_pair))
    }

    /// Creates an email-bound service account
    pub async fn create_oauth2_type(&self, name: &str, email: &str) -> Result<ServiceAccount> {
        let created = self.create(build_oauth2(name, email, None)).await?;
        info!(service_account_id = %created.id, "Created OAuth2 service account");
        Ok(created)
    }

    /// Returns the service account id owning the key pair
    pub async fn authenticate_key_pair(&self, key_id: &str, key_secret: &str) -> Result<String> {
        let sa = self.stores.service_accounts.with_key_id(key_id).await?;
        let stored = sa
            .key_secret_digest
            .as_deref()
            .ok_or_else(|| IamError::Unauthenticated("service account has no key pair".to_string()))?;
        let stored = blake3::Hash::from_hex(stored)
            .map_err(|e| IamError::Internal(format!("corrupt key secret digest: {}", e)))?;

        // blake3::Hash equality is constant time
        if stored == blake3::hash(key_secret.as_bytes()) {
            Ok(sa.id)
        } else {
            Err(IamError::Unauthenticated("invalid key pair".to_string()))
        }
    }

    pub async fn get(&self, id: &str) -> Result<ServiceAccount> {
        self.stores.service_accounts.get(id).await
    }

    pub async fn list(&self) -> Result<Vec<ServiceAccount>> {
        self.stores.service_accounts.list().await
    }

    pub async fn search(&self, term: &str) -> Result<Vec<ServiceAccount>> {
        self.stores.service_accounts.search(term).await
    }

    /// Roles bound to the service account
    pub async fn roles(&self, id: &str) -> Result<Vec<Role>> {
        self.stores.roles.for_service_account_id(id).await
    }

    /// Aggregated grants of the service account
    pub async fn permissions(&self, id: &str) -> Result<Vec<Permission>> {
        self.stores.permissions.for_service_account(id).await
    }

    /// Grants `permission` to account `id` through its base role; `actor` must own it
    pub async fn create_permission(
        &self,
        actor: &str,
        id: &str,
        permission: Permission,
    ) -> Result<Permission> {
        self.evaluator
            .require_all_owner_permissions(actor, std::slice::from_ref(&permission))
            .await?;
        let created = self.bootstrap_permission(id, permission).await?;
        info!(service_account_id = %id, actor = %actor, "Granted permission");
        Ok(created)
    }

    /// Grants `permission` to account `id` without checking anyone's rights
    ///
    /// Only for provisioning the first owner of a fresh installation, when no
    /// account exists that could hand the permission out.
    pub async fn bootstrap_permission(&self, id: &str, permission: Permission) -> Result<Permission> {
        let sa = self.get(id).await?;
        let permission = permission.with_role(sa.base_role_id);
        in_transaction(self.stores.transactions.as_ref(), move |tx| {
            Box::pin(async move { tx.create_permission(&permission).await })
        })
        .await
    }

    /// Returns the account bound to `email`, creating it on first sight
    ///
    /// Creation is serialized per email so concurrent first logins create one
    /// account. A changed picture is written back.
    pub async fn ensure_for_email(&self, email: &str, picture: Option<&str>) -> Result<ServiceAccount> {
        match self.stores.service_accounts.with_email(email).await {
            Ok(sa) => return self.sync_picture(sa, picture).await,
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }

        let name = format!("service-account-email:{}", blake3::hash(email.as_bytes()).to_hex());
        let guard = self.locker.acquire(&name).await?;
        let result = self.ensure_locked(email, picture).await;
        if let Err(e) = guard.release().await {
            warn!(error = %e, "Failed to release service account lock");
        }
        result
    }

    async fn ensure_locked(&self, email: &str, picture: Option<&str>) -> Result<ServiceAccount> {
        match self.stores.service_accounts.with_email(email).await {
            Ok(sa) => self.sync_picture(sa, picture).await,
            Err(err) if err.is_not_found() => {
                let created = self.create(build_oauth2(email, email, picture)).await?;
                info!(service_account_id = %created.id, "Created service account on first login");
                Ok(created)
            }
            Err(err) => Err(err),
        }
    }

    async fn sync_picture(&self, sa: ServiceAccount, picture: Option<&str>) -> Result<ServiceAccount> {
        let Some(picture) = picture.filter(|p| !p.is_empty()) else {
            return Ok(sa);
        };
        if sa.picture.as_deref() == Some(picture) {
            return Ok(sa);
        }

        let updated = ServiceAccount {
            picture: Some(picture.to_string()),
            updated_at: Utc::now(),
            ..sa
        };
        in_transaction(self.stores.transactions.as_ref(), move |tx| {
            Box::pin(async move {
                tx.update_service_account(&updated).await?;
                Ok(updated)
            })
        })
        .await
    }
}

/// Creates the base role, the account pointing at it and their binding
pub(crate) async fn create_in(
    tx: &mut Box<dyn Transaction>,
    mut service_account: ServiceAccount,
) -> Result<ServiceAccount> {
    let role = Role::base_for(&service_account.id);
    tx.create_role(&role).await?;

    service_account.base_role_id = role.id.clone();
    tx.create_service_account(&service_account).await?;

    tx.bind_role(&RoleBinding::new(&role.id, &service_account.id))
        .await?;
    Ok(service_account)
}

fn blank(name: &str, authentication_type: AuthenticationType) -> ServiceAccount {
    let now = Utc::now();
    ServiceAccount {
        id: uuid::Uuid::new_v4().to_string(),
        name: name.to_string(),
        authentication_type,
        key_id: None,
        key_secret_digest: None,
        email: None,
        picture: None,
        base_role_id: String::new(),
        created_at: now,
        updated_at: now,
    }
}

/// Builds a key pair account with a random secret; only its digest is kept on the account
pub(crate) fn build_key_pair(name: &str) -> (ServiceAccount, KeyPair) {
    let mut secret = [0u8; KEY_SECRET_BYTES];
    rand::thread_rng().fill_bytes(&mut secret);
    let key_pair = KeyPair {
        key_id: uuid::Uuid::new_v4().to_string(),
        key_secret: URL_SAFE_NO_PAD.encode(secret),
    };

    let mut sa = blank(name, AuthenticationType::KeyPair);
    sa.key_id = Some(key_pair.key_id.clone());
    sa.key_secret_digest = Some(blake3::hash(key_pair.key_secret.as_bytes()).to_hex().to_string());
    (sa, key_pair)
}

fn build_oauth2(name: &str, email: &str, picture: Option<&str>) -> ServiceAccount {
    let mut sa = blank(name, AuthenticationType::OAuth2);
    sa.email = Some(email.to_string());
    sa.picture = picture.map(str::to_string);
    sa
}
