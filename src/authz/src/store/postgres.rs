//! PostgreSQL store backend

use super::{
    Healthcheck, PermissionRequestsStore, PermissionsStore, RolesStore, ServiceAccountsStore, ServicesStore, TokensStore,
    Transaction, TransactionSource,
};
use crate::config::DatabaseConfig;
use crate::error::{IamError, Result};
use crate::permission::Permission;
use crate::types::{PermissionRequest, Role, RoleBinding, Service, ServiceAccount, Token};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row};
use std::time::Duration;

const ROLE_COLUMNS: &str = "r.id, r.name, r.is_base_role, r.created_at, r.updated_at";

const SERVICE_ACCOUNT_COLUMNS: &str = "sa.id, sa.name, sa.authentication_type, sa.key_id, \
     sa.key_secret_digest, sa.email, sa.picture, sa.base_role_id, sa.created_at, sa.updated_at";

const PERMISSION_COLUMNS: &str =
    "p.id, p.role_id, p.service, p.ownership_level, p.action, p.resource_hierarchy, p.alias";

const PERMISSION_REQUEST_COLUMNS: &str = "pr.id, pr.service_account_id, pr.service, pr.action, \
     pr.resource_hierarchy, pr.message, pr.state, pr.created_at, pr.updated_at";

const SERVICE_COLUMNS: &str = "s.id, s.name, s.permission_name, s.service_account_id, \
     s.creator_service_account_id, s.am_url, s.created_at, s.updated_at";

/// PostgreSQL store with connection pooling
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect using the configured URL
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| IamError::Validation("database url is not configured".to_string()))?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .idle_timeout(Duration::from_secs(600))
            .connect(url)
            .await
            .map_err(|e| IamError::Database(format!("Failed to connect to database: {}", e)))?;

        Ok(Self { pool })
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| IamError::Database(format!("Migration failed: {}", e)))?;
        Ok(())
    }

    /// Get database pool for advanced queries
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn role_from_row(row: &PgRow) -> Result<Role> {
    Ok(Role {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        is_base_role: row.try_get("is_base_role")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn service_account_from_row(row: &PgRow) -> Result<ServiceAccount> {
    let authentication_type: String = row.try_get("authentication_type")?;
    Ok(ServiceAccount {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        authentication_type: authentication_type.parse()?,
        key_id: row.try_get("key_id")?,
        key_secret_digest: row.try_get("key_secret_digest")?,
        email: row.try_get("email")?,
        picture: row.try_get("picture")?,
        base_role_id: row.try_get("base_role_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn permission_from_row(row: &PgRow) -> Result<Permission> {
    let ownership_level: String = row.try_get("ownership_level")?;
    let action: String = row.try_get("action")?;
    let resource_hierarchy: String = row.try_get("resource_hierarchy")?;
    Ok(Permission {
        id: row.try_get("id")?,
        role_id: row.try_get("role_id")?,
        service: row.try_get("service")?,
        ownership_level: ownership_level.parse()?,
        action: action.as_str().into(),
        resource_hierarchy: resource_hierarchy.parse()?,
        alias: row.try_get("alias")?,
    })
}

fn permission_request_from_row(row: &PgRow) -> Result<PermissionRequest> {
    let action: String = row.try_get("action")?;
    let resource_hierarchy: String = row.try_get("resource_hierarchy")?;
    let state: String = row.try_get("state")?;
    Ok(PermissionRequest {
        id: row.try_get("id")?,
        service_account_id: row.try_get("service_account_id")?,
        service: row.try_get("service")?,
        action: action.as_str().into(),
        resource_hierarchy: resource_hierarchy.parse()?,
        message: row.try_get("message")?,
        state: state.parse()?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn service_from_row(row: &PgRow) -> Result<Service> {
    Ok(Service {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        permission_name: row.try_get("permission_name")?,
        service_account_id: row.try_get("service_account_id")?,
        creator_service_account_id: row.try_get("creator_service_account_id")?,
        am_url: row.try_get("am_url")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn token_from_row(row: &PgRow) -> Result<Token> {
    Ok(Token {
        access_token: row.try_get("access_token")?,
        provider_access_token: row.try_get("provider_access_token")?,
        refresh_token: row.try_get("refresh_token")?,
        token_type: row.try_get("token_type")?,
        expiry: row.try_get("expiry")?,
        email: row.try_get("email")?,
    })
}

/// Escapes LIKE metacharacters so user input matches literally
fn like_escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

#[async_trait]
impl RolesStore for PgStore {
    async fn get(&self, id: &str) -> Result<Role> {
        let row = sqlx::query(&format!("SELECT {} FROM roles r WHERE r.id = $1", ROLE_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| IamError::not_found("role", id))?;
        role_from_row(&row)
    }

    async fn list(&self) -> Result<Vec<Role>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM roles r ORDER BY r.created_at, r.id",
            ROLE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(role_from_row).collect()
    }

    async fn for_service_account_id(&self, service_account_id: &str) -> Result<Vec<Role>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM roles r \
             JOIN role_bindings rb ON rb.role_id = r.id \
             WHERE rb.service_account_id = $1 \
             ORDER BY r.created_at, r.id",
            ROLE_COLUMNS
        ))
        .bind(service_account_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(role_from_row).collect()
    }

    async fn with_name_prefix(&self, prefix: &str, limit: usize) -> Result<Vec<Role>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM roles r WHERE r.name ILIKE $1 || '%' \
             ORDER BY r.created_at, r.id LIMIT $2",
            ROLE_COLUMNS
        ))
        .bind(like_escape(prefix))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(role_from_row).collect()
    }

    async fn service_accounts(&self, role_id: &str) -> Result<Vec<ServiceAccount>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM service_accounts sa \
             JOIN role_bindings rb ON rb.service_account_id = sa.id \
             WHERE rb.role_id = $1 \
             ORDER BY sa.created_at, sa.id",
            SERVICE_ACCOUNT_COLUMNS
        ))
        .bind(role_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(service_account_from_row).collect()
    }
}

#[async_trait]
impl PermissionsStore for PgStore {
    async fn get(&self, id: &str) -> Result<Permission> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM permissions p WHERE p.id = $1",
            PERMISSION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| IamError::not_found("permission", id))?;
        permission_from_row(&row)
    }

    async fn for_service_account(&self, service_account_id: &str) -> Result<Vec<Permission>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM permissions p \
             JOIN role_bindings rb ON rb.role_id = p.role_id \
             WHERE rb.service_account_id = $1 \
             ORDER BY p.created_at, p.id",
            PERMISSION_COLUMNS
        ))
        .bind(service_account_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(permission_from_row).collect()
    }

    async fn for_role(&self, role_id: &str) -> Result<Vec<Permission>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM permissions p WHERE p.role_id = $1 ORDER BY p.created_at, p.id",
            PERMISSION_COLUMNS
        ))
        .bind(role_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(permission_from_row).collect()
    }
}

#[async_trait]
impl PermissionRequestsStore for PgStore {
    async fn created_by(&self, service_account_id: &str) -> Result<Vec<PermissionRequest>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM permission_requests pr WHERE pr.service_account_id = $1 \
             ORDER BY pr.created_at, pr.id",
            PERMISSION_REQUEST_COLUMNS
        ))
        .bind(service_account_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(permission_request_from_row).collect()
    }
}

#[async_trait]
impl ServiceAccountsStore for PgStore {
    async fn get(&self, id: &str) -> Result<ServiceAccount> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM service_accounts sa WHERE sa.id = $1",
            SERVICE_ACCOUNT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| IamError::not_found("service account", id))?;
        service_account_from_row(&row)
    }

    async fn with_email(&self, email: &str) -> Result<ServiceAccount> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM service_accounts sa WHERE sa.email = $1",
            SERVICE_ACCOUNT_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| IamError::not_found("service account", email))?;
        service_account_from_row(&row)
    }

    async fn with_key_id(&self, key_id: &str) -> Result<ServiceAccount> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM service_accounts sa WHERE sa.key_id = $1",
            SERVICE_ACCOUNT_COLUMNS
        ))
        .bind(key_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| IamError::not_found("service account", key_id))?;
        service_account_from_row(&row)
    }

    async fn list(&self) -> Result<Vec<ServiceAccount>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM service_accounts sa ORDER BY sa.created_at, sa.id",
            SERVICE_ACCOUNT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(service_account_from_row).collect()
    }

    async fn search(&self, term: &str) -> Result<Vec<ServiceAccount>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM service_accounts sa \
             WHERE sa.name ILIKE '%' || $1 || '%' OR sa.email ILIKE '%' || $1 || '%' \
             ORDER BY sa.created_at, sa.id",
            SERVICE_ACCOUNT_COLUMNS
        ))
        .bind(like_escape(term))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(service_account_from_row).collect()
    }
}

#[async_trait]
impl ServicesStore for PgStore {
    async fn get(&self, id: &str) -> Result<Service> {
        let row = sqlx::query(&format!("SELECT {} FROM services s WHERE s.id = $1", SERVICE_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| IamError::not_found("service", id))?;
        service_from_row(&row)
    }

    async fn list(&self) -> Result<Vec<Service>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM services s ORDER BY s.created_at, s.id",
            SERVICE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(service_from_row).collect()
    }

    async fn with_permission_name(&self, permission_name: &str) -> Result<Service> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM services s WHERE s.permission_name = $1",
            SERVICE_COLUMNS
        ))
        .bind(permission_name)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| IamError::not_found("service", permission_name))?;
        service_from_row(&row)
    }
}

#[async_trait]
impl TokensStore for PgStore {
    async fn get(&self, access_token: &str) -> Result<Token> {
        let row = sqlx::query(
            "SELECT access_token, provider_access_token, refresh_token, token_type, expiry, email \
             FROM tokens WHERE access_token = $1",
        )
        .bind(access_token)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| IamError::not_found("token", "<redacted>"))?;
        token_from_row(&row)
    }

    async fn save(&self, token: &Token) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tokens (access_token, provider_access_token, refresh_token, token_type, expiry, email, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            ON CONFLICT (access_token)
            DO UPDATE SET
                provider_access_token = EXCLUDED.provider_access_token,
                refresh_token = EXCLUDED.refresh_token,
                token_type = EXCLUDED.token_type,
                expiry = EXCLUDED.expiry,
                email = EXCLUDED.email,
                updated_at = NOW()
            "#,
        )
        .bind(&token.access_token)
        .bind(&token.provider_access_token)
        .bind(&token.refresh_token)
        .bind(&token.token_type)
        .bind(token.expiry)
        .bind(&token.email)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Healthcheck for PgStore {
    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl TransactionSource for PgStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTransaction { tx }))
    }
}

/// Transaction wrapping a `sqlx` Postgres transaction
pub struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn create_role(&mut self, role: &Role) -> Result<()> {
        sqlx::query(
            "INSERT INTO roles (id, name, is_base_role, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&role.id)
        .bind(&role.name)
        .bind(role.is_base_role)
        .bind(role.created_at)
        .bind(role.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_role(&mut self, role: &Role) -> Result<()> {
        let result = sqlx::query("UPDATE roles SET name = $2, updated_at = NOW() WHERE id = $1")
            .bind(&role.id)
            .bind(&role.name)
            .execute(&mut *self.tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(IamError::not_found("role", &role.id));
        }
        Ok(())
    }

    async fn bind_role(&mut self, binding: &RoleBinding) -> Result<()> {
        sqlx::query(
            "INSERT INTO role_bindings (id, role_id, service_account_id, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (role_id, service_account_id) DO NOTHING",
        )
        .bind(&binding.id)
        .bind(&binding.role_id)
        .bind(&binding.service_account_id)
        .bind(binding.created_at)
        .bind(binding.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn drop_bindings(&mut self, role_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM role_bindings WHERE role_id = $1")
            .bind(role_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn drop_permissions(&mut self, role_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM permissions WHERE role_id = $1")
            .bind(role_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn create_permission(&mut self, permission: &Permission) -> Result<Permission> {
        let role_id = permission
            .role_id
            .as_deref()
            .ok_or_else(|| IamError::Validation("permission has no role".to_string()))?;

        let mut stored = permission.clone();
        let id = uuid::Uuid::new_v4().to_string();

        sqlx::query(
            "INSERT INTO permissions \
             (id, role_id, service, ownership_level, action, resource_hierarchy, alias) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&id)
        .bind(role_id)
        .bind(&permission.service)
        .bind(permission.ownership_level.as_str())
        .bind(permission.action.as_str())
        .bind(permission.resource_hierarchy.to_string())
        .bind(&permission.alias)
        .execute(&mut *self.tx)
        .await?;

        stored.id = Some(id);
        Ok(stored)
    }

    async fn delete_permission(&mut self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM permissions WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(IamError::not_found("permission", id));
        }
        Ok(())
    }

    async fn create_permission_request(
        &mut self,
        request: &PermissionRequest,
    ) -> Result<PermissionRequest> {
        let mut stored = request.clone();
        stored.id = uuid::Uuid::new_v4().to_string();

        sqlx::query(
            "INSERT INTO permission_requests \
             (id, service_account_id, service, action, resource_hierarchy, message, state, \
              created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(&stored.id)
        .bind(&stored.service_account_id)
        .bind(&stored.service)
        .bind(stored.action.as_str())
        .bind(stored.resource_hierarchy.to_string())
        .bind(&stored.message)
        .bind(stored.state.as_str())
        .bind(stored.created_at)
        .bind(stored.updated_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(stored)
    }

    async fn create_service_account(&mut self, service_account: &ServiceAccount) -> Result<()> {
        sqlx::query(
            "INSERT INTO service_accounts \
             (id, name, authentication_type, key_id, key_secret_digest, email, picture, \
              base_role_id, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(&service_account.id)
        .bind(&service_account.name)
        .bind(service_account.authentication_type.as_str())
        .bind(&service_account.key_id)
        .bind(&service_account.key_secret_digest)
        .bind(&service_account.email)
        .bind(&service_account.picture)
        .bind(&service_account.base_role_id)
        .bind(service_account.created_at)
        .bind(service_account.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_service_account(&mut self, service_account: &ServiceAccount) -> Result<()> {
        let result = sqlx::query(
            "UPDATE service_accounts SET name = $2, picture = $3, updated_at = NOW() WHERE id = $1",
        )
        .bind(&service_account.id)
        .bind(&service_account.name)
        .bind(&service_account.picture)
        .execute(&mut *self.tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(IamError::not_found("service account", &service_account.id));
        }
        Ok(())
    }

    async fn create_service(&mut self, service: &Service) -> Result<()> {
        sqlx::query(
            "INSERT INTO services \
             (id, name, permission_name, service_account_id, creator_service_account_id, \
              am_url, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(&service.id)
        .bind(&service.name)
        .bind(&service.permission_name)
        .bind(&service.service_account_id)
        .bind(&service.creator_service_account_id)
        .bind(&service.am_url)
        .bind(service.created_at)
        .bind(service.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_service(&mut self, service: &Service) -> Result<()> {
        let result = sqlx::query(
            "UPDATE services SET name = $2, permission_name = $3, am_url = $4, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(&service.id)
        .bind(&service.name)
        .bind(&service.permission_name)
        .bind(&service.am_url)
        .execute(&mut *self.tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(IamError::not_found("service", &service.id));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
