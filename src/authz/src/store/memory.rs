//! In-memory store backend
//!
//! Rows live in insertion-ordered vectors behind a single `RwLock`. A
//! transaction works on a private snapshot and records its operations; commit
//! replays them against the live state and swaps it in one step.

use super::{
    Healthcheck, PermissionRequestsStore, PermissionsStore, RolesStore, ServiceAccountsStore, ServicesStore, TokensStore,
    Transaction, TransactionSource,
};
use crate::error::{IamError, Result};
use crate::permission::Permission;
use crate::types::{PermissionRequest, Role, RoleBinding, Service, ServiceAccount, Token};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Default)]
struct State {
    roles: Vec<Role>,
    bindings: Vec<RoleBinding>,
    permissions: Vec<Permission>,
    permission_requests: Vec<PermissionRequest>,
    service_accounts: Vec<ServiceAccount>,
    services: Vec<Service>,
    tokens: HashMap<String, Token>,
}

#[derive(Debug, Clone)]
enum Op {
    CreateRole(Role),
    UpdateRole(Role),
    BindRole(RoleBinding),
    DropBindings(String),
    DropPermissions(String),
    CreatePermission(Permission),
    DeletePermission(String),
    CreatePermissionRequest(PermissionRequest),
    CreateServiceAccount(ServiceAccount),
    UpdateServiceAccount(ServiceAccount),
    CreateService(Service),
    UpdateService(Service),
}

impl State {
    fn role(&self, id: &str) -> Option<&Role> {
        self.roles.iter().find(|r| r.id == id)
    }

    fn service_account(&self, id: &str) -> Option<&ServiceAccount> {
        self.service_accounts.iter().find(|sa| sa.id == id)
    }

    fn apply(&mut self, op: &Op) -> Result<()> {
        match op {
            Op::CreateRole(role) => {
                if self.role(&role.id).is_some() {
                    return Err(IamError::Validation(format!("role {} already exists", role.id)));
                }
                self.roles.push(role.clone());
            }
            Op::UpdateRole(role) => {
                let existing = self
                    .roles
                    .iter_mut()
                    .find(|r| r.id == role.id)
                    .ok_or_else(|| IamError::not_found("role", &role.id))?;
                existing.name = role.name.clone();
                existing.updated_at = Utc::now();
            }
            Op::BindRole(binding) => {
                if self.role(&binding.role_id).is_none() {
                    return Err(IamError::not_found("role", &binding.role_id));
                }
                if self.service_account(&binding.service_account_id).is_none() {
                    return Err(IamError::not_found(
                        "service account",
                        &binding.service_account_id,
                    ));
                }
                let bound = self.bindings.iter().any(|b| {
                    b.role_id == binding.role_id
                        && b.service_account_id == binding.service_account_id
                });
                if !bound {
                    self.bindings.push(binding.clone());
                }
            }
            Op::DropBindings(role_id) => self.bindings.retain(|b| &b.role_id != role_id),
            Op::DropPermissions(role_id) => self
                .permissions
                .retain(|p| p.role_id.as_deref() != Some(role_id.as_str())),
            Op::CreatePermission(permission) => {
                let role_id = permission
                    .role_id
                    .as_deref()
                    .ok_or_else(|| IamError::Validation("permission has no role".to_string()))?;
                if self.role(role_id).is_none() {
                    return Err(IamError::not_found("role", role_id));
                }
                self.permissions.push(permission.clone());
            }
            Op::DeletePermission(id) => {
                let before = self.permissions.len();
                self.permissions.retain(|p| p.id.as_deref() != Some(id.as_str()));
                if self.permissions.len() == before {
                    return Err(IamError::not_found("permission", id));
                }
            }
            Op::CreatePermissionRequest(request) => {
                if self.service_account(&request.service_account_id).is_none() {
                    return Err(IamError::not_found(
                        "service account",
                        &request.service_account_id,
                    ));
                }
                self.permission_requests.push(request.clone());
            }
            Op::CreateServiceAccount(sa) => {
                if self.role(&sa.base_role_id).is_none() {
                    return Err(IamError::not_found("role", &sa.base_role_id));
                }
                let clash = self.service_accounts.iter().any(|other| {
                    other.id == sa.id
                        || (sa.email.is_some() && other.email == sa.email)
                        || (sa.key_id.is_some() && other.key_id == sa.key_id)
                });
                if clash {
                    return Err(IamError::Validation(format!(
                        "service account {} already exists",
                        sa.name
                    )));
                }
                self.service_accounts.push(sa.clone());
            }
            Op::UpdateServiceAccount(sa) => {
                let existing = self
                    .service_accounts
                    .iter_mut()
                    .find(|other| other.id == sa.id)
                    .ok_or_else(|| IamError::not_found("service account", &sa.id))?;
                existing.name = sa.name.clone();
                existing.picture = sa.picture.clone();
                existing.updated_at = Utc::now();
            }
            Op::CreateService(service) => {
                if self.service_account(&service.service_account_id).is_none() {
                    return Err(IamError::not_found(
                        "service account",
                        &service.service_account_id,
                    ));
                }
                let clash = self.services.iter().any(|other| {
                    other.name == service.name || other.permission_name == service.permission_name
                });
                if clash {
                    return Err(IamError::Validation(format!(
                        "service {} already exists",
                        service.name
                    )));
                }
                self.services.push(service.clone());
            }
            Op::UpdateService(service) => {
                let existing = self
                    .services
                    .iter_mut()
                    .find(|other| other.id == service.id)
                    .ok_or_else(|| IamError::not_found("service", &service.id))?;
                existing.name = service.name.clone();
                existing.permission_name = service.permission_name.clone();
                existing.am_url = service.am_url.clone();
                existing.updated_at = Utc::now();
            }
        }
        Ok(())
    }
}

/// Store backend keeping every table in process memory
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RolesStore for InMemoryStore {
    async fn get(&self, id: &str) -> Result<Role> {
        let state = self.state.read().await;
        state
            .role(id)
            .cloned()
            .ok_or_else(|| IamError::not_found("role", id))
    }

    async fn list(&self) -> Result<Vec<Role>> {
        Ok(self.state.read().await.roles.clone())
    }

    async fn for_service_account_id(&self, service_account_id: &str) -> Result<Vec<Role>> {
        let state = self.state.read().await;
        Ok(state
            .roles
            .iter()
            .filter(|r| {
                state
                    .bindings
                    .iter()
                    .any(|b| b.role_id == r.id && b.service_account_id == service_account_id)
            })
            .cloned()
            .collect())
    }

    async fn with_name_prefix(&self, prefix: &str, limit: usize) -> Result<Vec<Role>> {
        let prefix = prefix.to_lowercase();
        let state = self.state.read().await;
        Ok(state
            .roles
            .iter()
            .filter(|r| r.name.to_lowercase().starts_with(&prefix))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn service_accounts(&self, role_id: &str) -> Result<Vec<ServiceAccount>> {
        let state = self.state.read().await;
        Ok(state
            .service_accounts
            .iter()
            .filter(|sa| {
                state
                    .bindings
                    .iter()
                    .any(|b| b.role_id == role_id && b.service_account_id == sa.id)
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PermissionsStore for InMemoryStore {
    async fn get(&self, id: &str) -> Result<Permission> {
        let state = self.state.read().await;
        state
            .permissions
            .iter()
            .find(|p| p.id.as_deref() == Some(id))
            .cloned()
            .ok_or_else(|| IamError::not_found("permission", id))
    }

    async fn for_service_account(&self, service_account_id: &str) -> Result<Vec<Permission>> {
        let state = self.state.read().await;
        let role_ids: Vec<&str> = state
            .bindings
            .iter()
            .filter(|b| b.service_account_id == service_account_id)
            .map(|b| b.role_id.as_str())
            .collect();

        Ok(state
            .permissions
            .iter()
            .filter(|p| {
                p.role_id
                    .as_deref()
                    .map(|id| role_ids.contains(&id))
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn for_role(&self, role_id: &str) -> Result<Vec<Permission>> {
        let state = self.state.read().await;
        Ok(state
            .permissions
            .iter()
            .filter(|p| p.role_id.as_deref() == Some(role_id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PermissionRequestsStore for InMemoryStore {
    async fn created_by(&self, service_account_id: &str) -> Result<Vec<PermissionRequest>> {
        let state = self.state.read().await;
        Ok(state
            .permission_requests
            .iter()
            .filter(|r| r.service_account_id == service_account_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ServiceAccountsStore for InMemoryStore {
    async fn get(&self, id: &str) -> Result<ServiceAccount> {
        let state = self.state.read().await;
        state
            .service_account(id)
            .cloned()
            .ok_or_else(|| IamError::not_found("service account", id))
    }

    async fn with_email(&self, email: &str) -> Result<ServiceAccount> {
        let state = self.state.read().await;
        state
            .service_accounts
            .iter()
            .find(|sa| sa.email.as_deref() == Some(email))
            .cloned()
            .ok_or_else(|| IamError::not_found("service account", email))
    }

    async fn with_key_id(&self, key_id: &str) -> Result<ServiceAccount> {
        let state = self.state.read().await;
        state
            .service_accounts
            .iter()
            .find(|sa| sa.key_id.as_deref() == Some(key_id))
            .cloned()
            .ok_or_else(|| IamError::not_found("service account", key_id))
    }

    async fn list(&self) -> Result<Vec<ServiceAccount>> {
        Ok(self.state.read().await.service_accounts.clone())
    }

    async fn search(&self, term: &str) -> Result<Vec<ServiceAccount>> {
        let term = term.to_lowercase();
        let state = self.state.read().await;
        Ok(state
            .service_accounts
            .iter()
            .filter(|sa| {
                sa.name.to_lowercase().contains(&term)
                    || sa
                        .email
                        .as_deref()
                        .map(|e| e.to_lowercase().contains(&term))
                        .unwrap_or(false)
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ServicesStore for InMemoryStore {
    async fn get(&self, id: &str) -> Result<Service> {
        let state = self.state.read().await;
        state
            .services
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or_else(|| IamError::not_found("service", id))
    }

    async fn list(&self) -> Result<Vec<Service>> {
        Ok(self.state.read().await.services.clone())
    }

    async fn with_permission_name(&self, permission_name: &str) -> Result<Service> {
        let state = self.state.read().await;
        state
            .services
            .iter()
            .find(|s| s.permission_name == permission_name)
            .cloned()
            .ok_or_else(|| IamError::not_found("service", permission_name))
    }
}

#[async_trait]
impl TokensStore for InMemoryStore {
    async fn get(&self, access_token: &str) -> Result<Token> {
        let state = self.state.read().await;
        state
            .tokens
            .get(access_token)
            .cloned()
            .ok_or_else(|| IamError::not_found("token", "<redacted>"))
    }

    async fn save(&self, token: &Token) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .tokens
            .insert(token.access_token.clone(), token.clone());
        Ok(())
    }
}

#[async_trait]
impl Healthcheck for InMemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl TransactionSource for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let snapshot = self.state.read().await.clone();
        Ok(Box::new(InMemoryTransaction {
            live: self.state.clone(),
            working: snapshot,
            ops: Vec::new(),
        }))
    }
}

/// Transaction over an [`InMemoryStore`]
pub struct InMemoryTransaction {
    live: Arc<RwLock<State>>,
    working: State,
    ops: Vec<Op>,
}

impl InMemoryTransaction {
    fn stage(&mut self, op: Op) -> Result<()> {
        self.working.apply(&op)?;
        self.ops.push(op);
        Ok(())
    }
}

#[async_trait]
impl Transaction for InMemoryTransaction {
    async fn create_role(&mut self, role: &Role) -> Result<()> {
        self.stage(Op::CreateRole(role.clone()))
    }

    async fn update_role(&mut self, role: &Role) -> Result<()> {
        self.stage(Op::UpdateRole(role.clone()))
    }

    async fn bind_role(&mut self, binding: &RoleBinding) -> Result<()> {
        self.stage(Op::BindRole(binding.clone()))
    }

    async fn drop_bindings(&mut self, role_id: &str) -> Result<()> {
        self.stage(Op::DropBindings(role_id.to_string()))
    }

    async fn drop_permissions(&mut self, role_id: &str) -> Result<()> {
        self.stage(Op::DropPermissions(role_id.to_string()))
    }

    async fn create_permission(&mut self, permission: &Permission) -> Result<Permission> {
        let mut stored = permission.clone();
        stored.id = Some(uuid::Uuid::new_v4().to_string());
        self.stage(Op::CreatePermission(stored.clone()))?;
        Ok(stored)
    }

    async fn delete_permission(&mut self, id: &str) -> Result<()> {
        self.stage(Op::DeletePermission(id.to_string()))
    }

    async fn create_permission_request(
        &mut self,
        request: &PermissionRequest,
    ) -> Result<PermissionRequest> {
        let mut stored = request.clone();
        stored.id = uuid::Uuid::new_v4().to_string();
        self.stage(Op::CreatePermissionRequest(stored.clone()))?;
        Ok(stored)
    }

    async fn create_service_account(&mut self, service_account: &ServiceAccount) -> Result<()> {
        self.stage(Op::CreateServiceAccount(service_account.clone()))
    }

    async fn update_service_account(&mut self, service_account: &ServiceAccount) -> Result<()> {
        self.stage(Op::UpdateServiceAccount(service_account.clone()))
    }

    async fn create_service(&mut self, service: &Service) -> Result<()> {
        self.stage(Op::CreateService(service.clone()))
    }

    async fn update_service(&mut self, service: &Service) -> Result<()> {
        self.stage(Op::UpdateService(service.clone()))
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut live = self.live.write().await;
        let mut next = live.clone();
        for op in &self.ops {
            next.apply(op)
                .map_err(|e| IamError::Transaction(format!("commit conflict: {}", e)))?;
        }
        *live = next;
        tracing::debug!(ops = self.ops.len(), "Committed in-memory transaction");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        tracing::debug!(ops = self.ops.len(), "Discarded in-memory transaction");
        Ok(())
    }
}
