//! Access token authentication cache

use super::oauth2::OAuth2Provider;
use crate::config::AuthCacheConfig;
use crate::error::Result;
use crate::management::ServiceAccountManager;
use crate::types::AccessTokenAuth;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// TTL-bounded storage for authentication outcomes
#[async_trait]
pub trait AuthCacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<AccessTokenAuth>>;

    async fn put(&self, key: &str, auth: &AccessTokenAuth, ttl: Duration) -> Result<()>;
}

const DEFAULT_CAPACITY: usize = 10_000;

/// Process-local [`AuthCacheStore`] holding at most `capacity` entries
///
/// Expired entries are dropped on read and swept before an insert that would
/// exceed the capacity. If the cache is still full after the sweep, the entry
/// closest to expiry makes room.
pub struct InMemoryAuthCache {
    entries: DashMap<String, (AccessTokenAuth, Instant)>,
    capacity: usize,
}

impl Default for InMemoryAuthCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl InMemoryAuthCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl AuthCacheStore for InMemoryAuthCache {
    async fn get(&self, key: &str) -> Result<Option<AccessTokenAuth>> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if entry.1 > now {
                return Ok(Some(entry.0.clone()));
            }
        }
        self.entries.remove_if(key, |_, (_, expires_at)| *expires_at <= now);
        Ok(None)
    }

    async fn put(&self, key: &str, auth: &AccessTokenAuth, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        if !self.entries.contains_key(key) && self.entries.len() >= self.capacity {
            self.make_room(now);
        }
        self.entries.insert(key.to_string(), (auth.clone(), now + ttl));
        Ok(())
    }
}

impl InMemoryAuthCache {
    fn make_room(&self, now: Instant) {
        let before = self.entries.len();
        self.entries.retain(|_, (_, expires_at)| *expires_at > now);

        while self.entries.len() >= self.capacity {
            let soonest = self
                .entries
                .iter()
                .min_by_key(|entry| entry.value().1)
                .map(|entry| entry.key().clone());
            match soonest {
                Some(key) => {
                    self.entries.remove(&key);
                }
                None => break,
            }
        }

        debug!(
            evicted = before - self.entries.len(),
            remaining = self.entries.len(),
            "Made room in auth cache"
        );
    }
}

/// Resolves bearer tokens to service accounts without hitting the provider on every request
pub struct TokenAuthCache {
    config: AuthCacheConfig,
    cache: Arc<dyn AuthCacheStore>,
    provider: Arc<dyn OAuth2Provider>,
    accounts: ServiceAccountManager,
}

impl TokenAuthCache {
    pub fn new(
        config: AuthCacheConfig,
        cache: Arc<dyn AuthCacheStore>,
        provider: Arc<dyn OAuth2Provider>,
        accounts: ServiceAccountManager,
    ) -> Self {
        Self {
            config,
            cache,
            provider,
            accounts,
        }
    }

    /// Authenticates `access_token`, serving repeated calls from the cache
    ///
    /// On a miss the provider verifies (and possibly refreshes) the token, the
    /// service account bound to its email is created on first sight, and the
    /// outcome is cached under a hash of the caller's token.
    pub async fn authenticate(&self, access_token: &str) -> Result<AccessTokenAuth> {
        let key = cache_key(access_token);

        if self.config.enabled {
            if let Some(hit) = self.cache.get(&key).await? {
                debug!(service_account_id = %hit.service_account_id, "Auth cache hit");
                return Ok(hit);
            }
            debug!("Auth cache miss");
        }

        let result = self.provider.authenticate(access_token).await?;
        let account = self
            .accounts
            .ensure_for_email(&result.email, result.picture.as_deref())
            .await?;

        let auth = AccessTokenAuth {
            service_account_id: account.id,
            access_token: access_token.to_string(),
            email: result.email,
        };

        if self.config.enabled {
            self.cache.put(&key, &auth, self.config.ttl()).await?;
        }

        Ok(auth)
    }

    /// Completes the OAuth2 code flow and registers the account
    pub async fn exchange_code(&self, code: &str) -> Result<AccessTokenAuth> {
        let result = self.provider.exchange_code(code).await?;
        let account = self
            .accounts
            .ensure_for_email(&result.email, result.picture.as_deref())
            .await?;

        Ok(AccessTokenAuth {
            service_account_id: account.id,
            access_token: result.access_token,
            email: result.email,
        })
    }

    pub fn build_auth_url(&self, state: &str) -> Result<String> {
        self.provider.build_auth_url(state)
    }
}

fn cache_key(access_token: &str) -> String {
    format!("access-token-auth:{}", blake3::hash(access_token.as_bytes()).to_hex())
}
