//! Core IAM types

use crate::permission::{Action, OwnershipLevel, Permission, ResourceHierarchy, SEPARATOR};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Unique role identifier
pub type RoleId = String;

/// Unique service account identifier
pub type ServiceAccountId = String;

/// Named set of permissions bound to service accounts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    pub id: RoleId,
    pub name: String,

    /// Exclusive role implicitly owned by exactly one service account
    #[serde(default)]
    pub is_base_role: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Role {
    /// Creates a role with a fresh identifier
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            is_base_role: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Creates the base role of a service account
    pub fn base_for(service_account_id: &str) -> Self {
        let mut role = Self::new(format!("service-account:{}", service_account_id));
        role.is_base_role = true;
        role
    }
}

/// Many-to-many association between roles and service accounts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleBinding {
    pub id: String,
    pub role_id: RoleId,
    pub service_account_id: ServiceAccountId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RoleBinding {
    pub fn new(role_id: impl Into<String>, service_account_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role_id: role_id.into(),
            service_account_id: service_account_id.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// How a service account proves its identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthenticationType {
    /// Email bound, authenticated through the OAuth2 provider
    OAuth2,
    /// Key id and secret pair
    KeyPair,
}

impl AuthenticationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OAuth2 => "oauth2",
            Self::KeyPair => "keypair",
        }
    }
}

impl std::str::FromStr for AuthenticationType {
    type Err = crate::error::IamError;

    fn from_str(s: &str) -> crate::error::Result<Self> {
        match s {
            "oauth2" => Ok(Self::OAuth2),
            "keypair" => Ok(Self::KeyPair),
            other => Err(crate::error::IamError::Validation(format!(
                "unknown authentication type '{}'",
                other
            ))),
        }
    }
}

/// Principal identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccount {
    pub id: ServiceAccountId,
    pub name: String,
    pub authentication_type: AuthenticationType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,

    /// BLAKE3 digest of the key secret; never serialized
    #[serde(skip)]
    pub key_secret_digest: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,

    pub base_role_id: RoleId,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Key pair handed out once when a key pair service account is created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyPair {
    pub key_id: String,
    pub key_secret: String,
}

/// Service registered in the federation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: String,
    pub name: String,

    /// First segment of this service's permissions
    pub permission_name: String,

    /// Service account acting on behalf of the service
    pub service_account_id: ServiceAccountId,

    pub creator_service_account_id: ServiceAccountId,

    /// The service's own AM endpoint
    #[serde(rename = "amUrl")]
    pub am_url: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Persisted OAuth2 token record
///
/// `access_token` is the token handed to the caller at code exchange and stays
/// the lookup key; `provider_access_token` rotates on every refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    pub access_token: String,
    pub provider_access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expiry: DateTime<Utc>,
    pub email: String,
}

impl Token {
    /// Whether the provider token has expired at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry <= now
    }
}

/// Outcome of authenticating an access token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessTokenAuth {
    pub service_account_id: ServiceAccountId,
    pub access_token: String,
    pub email: String,
}

/// One node of the AM enumeration tree
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmEntry {
    pub prefix: String,

    #[serde(default)]
    pub alias: String,

    /// Requesting principal owns this prefix
    #[serde(default)]
    pub owner: bool,

    /// Requesting principal may exercise this prefix
    #[serde(default)]
    pub lender: bool,

    /// Terminal, grantable permission prefix
    #[serde(default)]
    pub complete: bool,
}

impl AmEntry {
    /// Intermediate node
    pub fn partial(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Default::default()
        }
    }

    /// Terminal node
    pub fn complete(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            complete: true,
            ..Default::default()
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = alias.into();
        self
    }
}

/// Role with the full permission set and bindings it should end up with
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleWithNested {
    pub name: String,

    #[serde(default)]
    pub permissions: Vec<Permission>,

    #[serde(default)]
    pub service_accounts_ids: Vec<ServiceAccountId>,
}

impl RoleWithNested {
    /// Builds from permission strings
    pub fn from_strings<S: AsRef<str>>(
        name: impl Into<String>,
        permissions: &[S],
        service_accounts_ids: Vec<ServiceAccountId>,
    ) -> crate::error::Result<Self> {
        let permissions = permissions
            .iter()
            .map(|p| Permission::parse(p.as_ref()))
            .collect::<crate::error::Result<Vec<_>>>()?;

        Ok(Self {
            name: name.into(),
            permissions,
            service_accounts_ids,
        })
    }

    pub fn validate(&self) -> crate::error::Result<()> {
        if self.name.trim().is_empty() {
            return Err(crate::error::IamError::Validation("name is required".to_string()));
        }
        Ok(())
    }
}

/// Service account fields exposed in role details
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccountSummary {
    pub id: ServiceAccountId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
}

impl From<&ServiceAccount> for ServiceAccountSummary {
    fn from(sa: &ServiceAccount) -> Self {
        Self {
            id: sa.id.clone(),
            name: sa.name.clone(),
            email: sa.email.clone(),
            picture: sa.picture.clone(),
        }
    }
}

/// Role with formatted permissions and bound accounts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleDetails {
    pub id: RoleId,
    pub name: String,
    pub permissions: Vec<String>,
    pub service_accounts: Vec<ServiceAccountSummary>,
}

/// Lifecycle of a [`PermissionRequest`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionRequestState {
    #[default]
    Created,
    Granted,
    Denied,
}

impl PermissionRequestState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Granted => "granted",
            Self::Denied => "denied",
        }
    }
}

impl std::str::FromStr for PermissionRequestState {
    type Err = crate::error::IamError;

    fn from_str(s: &str) -> crate::error::Result<Self> {
        match s {
            "created" => Ok(Self::Created),
            "granted" => Ok(Self::Granted),
            "denied" => Ok(Self::Denied),
            other => Err(crate::error::IamError::Validation(format!(
                "unknown permission request state '{}'",
                other
            ))),
        }
    }
}

/// A service account asking for a permission it does not hold yet
///
/// Only `service`, `action`, `resourceHierarchy` and `message` are read from
/// request bodies. The rest is assigned when the request is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRequest {
    #[serde(default)]
    pub id: String,

    /// Requesting account
    #[serde(default)]
    pub service_account_id: ServiceAccountId,

    pub service: String,
    pub action: Action,
    pub resource_hierarchy: ResourceHierarchy,

    #[serde(default)]
    pub message: String,

    #[serde(default)]
    pub state: PermissionRequestState,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl PermissionRequest {
    pub fn new(
        service: impl Into<String>,
        action: Action,
        resource_hierarchy: ResourceHierarchy,
        message: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            service_account_id: String::new(),
            service: service.into(),
            action,
            resource_hierarchy,
            message: message.into(),
            state: PermissionRequestState::Created,
            created_at: now,
            updated_at: now,
        }
    }

    /// The lender permission this request asks for
    pub fn to_lender_string(&self) -> String {
        format!(
            "{}{sep}{}{sep}{}{sep}{}",
            self.service,
            OwnershipLevel::Lender,
            self.action,
            self.resource_hierarchy,
            sep = SEPARATOR
        )
    }
}

/// Grants the same permissions to several roles at once
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionsAttribute {
    pub roles_ids: Vec<RoleId>,

    /// Permission strings
    pub permissions: Vec<String>,

    /// Alias per permission string
    #[serde(default)]
    pub permissions_aliases: HashMap<String, String>,
}

impl PermissionsAttribute {
    /// Parses every permission string and attaches its alias
    pub fn parsed(&self) -> crate::error::Result<Vec<Permission>> {
        self.permissions
            .iter()
            .map(|s| {
                let permission = Permission::parse(s)?;
                Ok(match self.permissions_aliases.get(s) {
                    Some(alias) => permission.with_alias(alias.clone()),
                    None => permission,
                })
            })
            .collect()
    }
}
