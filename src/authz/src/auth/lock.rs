//! Named mutual-exclusion leases shared across instances
//!
//! A [`DistributedLock`] hands out expiring leases identified by a random
//! token. [`Locker`] adds the bounded acquisition loop on top.

use crate::config::LockConfig;
use crate::error::{IamError, Result};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Lease-based lock backend
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Tries once to take the lease `name`; returns the holder token on success
    async fn try_lock(&self, name: &str, ttl: Duration) -> Result<Option<String>>;

    /// Releases the lease if `token` still holds it
    async fn unlock(&self, name: &str, token: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
struct Lease {
    token: String,
    expires_at: Instant,
}

/// Process-local lock table
#[derive(Default)]
pub struct InMemoryLock {
    leases: DashMap<String, Lease>,
}

impl InMemoryLock {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DistributedLock for InMemoryLock {
    async fn try_lock(&self, name: &str, ttl: Duration) -> Result<Option<String>> {
        let now = Instant::now();
        let token = uuid::Uuid::new_v4().to_string();
        let lease = Lease {
            token: token.clone(),
            expires_at: now + ttl,
        };

        match self.leases.entry(name.to_string()) {
            Entry::Occupied(mut held) => {
                if held.get().expires_at <= now {
                    held.insert(lease);
                    Ok(Some(token))
                } else {
                    Ok(None)
                }
            }
            Entry::Vacant(free) => {
                free.insert(lease);
                Ok(Some(token))
            }
        }
    }

    async fn unlock(&self, name: &str, token: &str) -> Result<()> {
        self.leases.remove_if(name, |_, lease| lease.token == token);
        Ok(())
    }
}

/// Lock backed by lease rows in the `locks` table
#[cfg(feature = "postgres")]
#[derive(Clone)]
pub struct PgLeaseLock {
    pool: sqlx::PgPool,
}

#[cfg(feature = "postgres")]
impl PgLeaseLock {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[cfg(feature = "postgres")]
#[async_trait]
impl DistributedLock for PgLeaseLock {
    async fn try_lock(&self, name: &str, ttl: Duration) -> Result<Option<String>> {
        let token = uuid::Uuid::new_v4().to_string();
        let acquired: Option<(String,)> = sqlx::query_as(
            r#"
            INSERT INTO locks (name, token, expires_at)
            VALUES ($1, $2, NOW() + make_interval(secs => $3))
            ON CONFLICT (name)
            DO UPDATE SET token = EXCLUDED.token, expires_at = EXCLUDED.expires_at
            WHERE locks.expires_at < NOW()
            RETURNING token
            "#,
        )
        .bind(name)
        .bind(&token)
        .bind(ttl.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        Ok(acquired.map(|(token,)| token))
    }

    async fn unlock(&self, name: &str, token: &str) -> Result<()> {
        sqlx::query("DELETE FROM locks WHERE name = $1 AND token = $2")
            .bind(name)
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Acquires leases with a bounded retry loop
#[derive(Clone)]
pub struct Locker {
    lock: Arc<dyn DistributedLock>,
    config: LockConfig,
}

impl Locker {
    pub fn new(lock: Arc<dyn DistributedLock>, config: LockConfig) -> Self {
        Self { lock, config }
    }

    /// Takes the lease `name`, retrying every `retry_delay` up to `max_attempts` times
    pub async fn acquire(&self, name: &str) -> Result<LockGuard> {
        for attempt in 1..=self.config.max_attempts {
            if let Some(token) = self.lock.try_lock(name, self.config.ttl()).await? {
                if attempt > 1 {
                    debug!(lock = %name, attempts = attempt, "Lock acquired after contention");
                }
                return Ok(LockGuard {
                    lock: self.lock.clone(),
                    name: name.to_string(),
                    token,
                });
            }
            tokio::time::sleep(self.config.retry_delay()).await;
        }

        warn!(lock = %name, attempts = self.config.max_attempts, "Lock acquisition timed out");
        Err(IamError::LockTimeout {
            name: name.to_string(),
            attempts: self.config.max_attempts,
        })
    }
}

/// Held lease; expires on its own if never released
#[must_use = "the lease stays held until released or expired"]
pub struct LockGuard {
    lock: Arc<dyn DistributedLock>,
    name: String,
    token: String,
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl LockGuard {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn release(self) -> Result<()> {
        self.lock.unlock(&self.name, &self.token).await
    }
}
