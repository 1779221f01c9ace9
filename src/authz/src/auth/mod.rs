//! Principal resolution
//!
//! Inbound credentials are either a key pair, checked directly against the
//! service accounts store, or an OAuth2 bearer token, resolved through the
//! [`TokenAuthCache`].

use crate::error::{IamError, Result};
use crate::management::ServiceAccountManager;
use crate::types::ServiceAccountId;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

pub mod cache;
pub mod lock;
pub mod oauth2;
pub mod refresh;

pub use cache::{AuthCacheStore, InMemoryAuthCache, TokenAuthCache};
pub use lock::{DistributedLock, InMemoryLock, LockGuard, Locker};
pub use oauth2::{AuthResult, GoogleConfig, GoogleProvider, OAuth2Provider};
pub use refresh::RefreshGuard;

#[cfg(feature = "postgres")]
pub use lock::PgLeaseLock;

/// Credentials carried by an `Authorization` header
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// `KeyPair <keyID>:<keySecret>`
    KeyPair { key_id: String, key_secret: String },
    /// `Bearer <accessToken>`
    Bearer(String),
}

impl Credentials {
    /// Parses an `Authorization` header value
    pub fn from_header(value: &str) -> Result<Self> {
        let mut parts = value.split(' ');
        let (Some(scheme), Some(payload), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(IamError::Unauthenticated(
                "authorization header must be '<scheme> <credentials>'".to_string(),
            ));
        };
        if payload.is_empty() {
            return Err(IamError::Unauthenticated("empty credentials".to_string()));
        }

        match scheme {
            "KeyPair" => match payload.split_once(':') {
                Some((key_id, key_secret)) if !key_id.is_empty() && !key_secret.is_empty() => {
                    Ok(Self::KeyPair {
                        key_id: key_id.to_string(),
                        key_secret: key_secret.to_string(),
                    })
                }
                _ => Err(IamError::Unauthenticated(
                    "key pair must be '<keyID>:<keySecret>'".to_string(),
                )),
            },
            "Bearer" => Ok(Self::Bearer(payload.to_string())),
            other => Err(IamError::Unauthenticated(format!(
                "unsupported authorization scheme '{}'",
                other
            ))),
        }
    }
}

// Secrets stay out of logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeyPair { key_id, .. } => f
                .debug_struct("KeyPair")
                .field("key_id", key_id)
                .field("key_secret", &"<redacted>")
                .finish(),
            Self::Bearer(_) => f.debug_tuple("Bearer").field(&"<redacted>").finish(),
        }
    }
}

/// Authenticated caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub service_account_id: ServiceAccountId,

    /// Caller-facing access token, for bearer authentication
    pub access_token: Option<String>,
}

/// Resolves credentials to a [`Principal`]
#[derive(Clone)]
pub struct Authenticator {
    accounts: ServiceAccountManager,
    tokens: Arc<TokenAuthCache>,
}

impl Authenticator {
    pub fn new(accounts: ServiceAccountManager, tokens: Arc<TokenAuthCache>) -> Self {
        Self { accounts, tokens }
    }

    /// Authenticates `credentials`
    ///
    /// Unknown key pairs, unknown tokens and provider rejections all surface
    /// as `Unauthenticated`. Lock timeouts and store failures pass through.
    pub async fn authenticate(&self, credentials: &Credentials) -> Result<Principal> {
        let outcome = match credentials {
            Credentials::KeyPair { key_id, key_secret } => self
                .accounts
                .authenticate_key_pair(key_id, key_secret)
                .await
                .map(|service_account_id| Principal {
                    service_account_id,
                    access_token: None,
                }),
            Credentials::Bearer(access_token) => {
                self.tokens
                    .authenticate(access_token)
                    .await
                    .map(|auth| Principal {
                        service_account_id: auth.service_account_id,
                        access_token: Some(auth.access_token),
                    })
            }
        };

        outcome.map_err(|err| match err {
            IamError::EntityNotFound { .. } | IamError::OAuth2(_) => {
                debug!(error = %err, "Credentials rejected");
                IamError::Unauthenticated(err.to_string())
            }
            other => other,
        })
    }

    pub fn tokens(&self) -> &TokenAuthCache {
        &self.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_pair() {
        let creds = Credentials::from_header("KeyPair kid:secret").unwrap();
        assert_eq!(
            creds,
            Credentials::KeyPair {
                key_id: "kid".to_string(),
                key_secret: "secret".to_string()
            }
        );
    }

    #[test]
    fn test_parse_bearer() {
        let creds = Credentials::from_header("Bearer abc.def").unwrap();
        assert_eq!(creds, Credentials::Bearer("abc.def".to_string()));
    }

    #[test]
    fn test_reject_malformed_headers() {
        for header in [
            "",
            "Bearer",
            "Bearer ",
            "Bearer a b",
            "Basic dXNlcjpwYXNz",
            "KeyPair kid",
            "KeyPair :secret",
            "KeyPair kid:",
        ] {
            let err = Credentials::from_header(header).unwrap_err();
            assert!(matches!(err, IamError::Unauthenticated(_)), "{}", header);
        }
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let creds = Credentials::from_header("KeyPair kid:topsecret").unwrap();
        assert!(!format!("{:?}", creds).contains("topsecret"));
        let bearer = Credentials::from_header("Bearer tok123").unwrap();
        assert!(!format!("{:?}", bearer).contains("tok123"));
    }
}
