//! Configuration for the authorization core
//!
//! Every component receives its configuration at construction time. Values can
//! be deserialized or read from `WILL_IAM_*` environment variables.

use crate::auth::oauth2::GoogleConfig;
use serde::Deserialize;
use std::time::Duration;

/// Access token authentication cache
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AuthCacheConfig {
    /// Serve repeated authentications from the cache
    pub enabled: bool,

    /// Entry time-to-live in seconds
    pub ttl_secs: u64,

    /// Maximum entries held by the in-process cache
    pub capacity: usize,
}

impl Default for AuthCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 300,
            capacity: 10_000,
        }
    }
}

impl AuthCacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Distributed lock used to serialize token refreshes
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Lease length in milliseconds
    pub ttl_ms: u64,

    /// Acquisition attempts before giving up
    pub max_attempts: u32,

    /// Delay between attempts in milliseconds
    pub retry_delay_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 1_000,
            max_attempts: 100,
            retry_delay_ms: 5,
        }
    }
}

impl LockConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Access management enumeration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AmConfig {
    /// Timeout for calls to a peer service's AM endpoint, in milliseconds
    pub delegation_timeout_ms: u64,

    /// Maximum roles suggested for a role-scoped action
    pub role_suggestion_limit: usize,
}

impl Default for AmConfig {
    fn default() -> Self {
        Self {
            delegation_timeout_ms: 3_000,
            role_suggestion_limit: 10,
        }
    }
}

impl AmConfig {
    pub fn delegation_timeout(&self) -> Duration {
        Duration::from_millis(self.delegation_timeout_ms)
    }
}

/// PostgreSQL connection settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Connection string; stores stay in memory when unset
    pub url: Option<String>,

    pub max_connections: u32,

    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 20,
            acquire_timeout_secs: 5,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IamConfig {
    pub auth_cache: AuthCacheConfig,
    pub refresh_lock: LockConfig,
    pub am: AmConfig,
    pub database: DatabaseConfig,
    pub google: GoogleConfig,
}

impl IamConfig {
    /// Reads configuration from `WILL_IAM_*` environment variables
    ///
    /// Unset or unparsable variables keep their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: std::str::FromStr>(
            lookup: &dyn Fn(&str) -> Option<String>,
            key: &str,
            default: T,
        ) -> T {
            lookup(key).and_then(|v| v.parse().ok()).unwrap_or(default)
        }

        let lookup: &dyn Fn(&str) -> Option<String> = &lookup;
        let defaults = Self::default();

        let auth_cache = AuthCacheConfig {
            enabled: parsed(lookup, "WILL_IAM_AUTH_CACHE_ENABLED", defaults.auth_cache.enabled),
            ttl_secs: parsed(lookup, "WILL_IAM_AUTH_CACHE_TTL_SECS", defaults.auth_cache.ttl_secs),
            capacity: parsed(lookup, "WILL_IAM_AUTH_CACHE_CAPACITY", defaults.auth_cache.capacity),
        };

        let refresh_lock = LockConfig {
            ttl_ms: parsed(lookup, "WILL_IAM_REFRESH_LOCK_TTL_MS", defaults.refresh_lock.ttl_ms),
            max_attempts: parsed(
                lookup,
                "WILL_IAM_REFRESH_LOCK_MAX_ATTEMPTS",
                defaults.refresh_lock.max_attempts,
            ),
            retry_delay_ms: parsed(
                lookup,
                "WILL_IAM_REFRESH_LOCK_RETRY_DELAY_MS",
                defaults.refresh_lock.retry_delay_ms,
            ),
        };

        let am = AmConfig {
            delegation_timeout_ms: parsed(
                lookup,
                "WILL_IAM_AM_DELEGATION_TIMEOUT_MS",
                defaults.am.delegation_timeout_ms,
            ),
            role_suggestion_limit: parsed(
                lookup,
                "WILL_IAM_AM_ROLE_SUGGESTION_LIMIT",
                defaults.am.role_suggestion_limit,
            ),
        };

        let database = DatabaseConfig {
            url: lookup("WILL_IAM_DATABASE_URL"),
            max_connections: parsed(
                lookup,
                "WILL_IAM_DATABASE_MAX_CONNECTIONS",
                defaults.database.max_connections,
            ),
            acquire_timeout_secs: parsed(
                lookup,
                "WILL_IAM_DATABASE_ACQUIRE_TIMEOUT_SECS",
                defaults.database.acquire_timeout_secs,
            ),
        };

        let g = defaults.google;
        let google = GoogleConfig {
            client_id: lookup("WILL_IAM_GOOGLE_CLIENT_ID").unwrap_or(g.client_id),
            client_secret: lookup("WILL_IAM_GOOGLE_CLIENT_SECRET").unwrap_or(g.client_secret),
            redirect_url: lookup("WILL_IAM_GOOGLE_REDIRECT_URL").unwrap_or(g.redirect_url),
            auth_endpoint: lookup("WILL_IAM_GOOGLE_AUTH_ENDPOINT").unwrap_or(g.auth_endpoint),
            token_endpoint: lookup("WILL_IAM_GOOGLE_TOKEN_ENDPOINT").unwrap_or(g.token_endpoint),
            userinfo_endpoint: lookup("WILL_IAM_GOOGLE_USERINFO_ENDPOINT")
                .unwrap_or(g.userinfo_endpoint),
            hosted_domains: lookup("WILL_IAM_GOOGLE_HOSTED_DOMAINS")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|d| !d.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or(g.hosted_domains),
            request_timeout_ms: parsed(
                lookup,
                "WILL_IAM_GOOGLE_REQUEST_TIMEOUT_MS",
                g.request_timeout_ms,
            ),
        };

        Self {
            auth_cache,
            refresh_lock,
            am,
            database,
            google,
        }
    }
}
