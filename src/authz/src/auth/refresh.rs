//! Lock-guarded token refresh

use super::lock::Locker;
use crate::error::Result;
use crate::store::TokensStore;
use crate::types::Token;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Ensures an expired token is refreshed at most once across concurrent callers
///
/// The first caller to take the per-token lock refreshes and persists the
/// record. Callers that waited on the lock re-read the stored record and find
/// it fresh.
#[derive(Clone)]
pub struct RefreshGuard {
    tokens: Arc<dyn TokensStore>,
    locker: Locker,
}

impl RefreshGuard {
    pub fn new(tokens: Arc<dyn TokensStore>, locker: Locker) -> Self {
        Self { tokens, locker }
    }

    /// Returns the stored token for `access_token`, running `refresh` first if it expired
    pub async fn fresh_token<F, Fut>(&self, access_token: &str, refresh: F) -> Result<Token>
    where
        F: FnOnce(Token) -> Fut + Send,
        Fut: Future<Output = Result<Token>> + Send,
    {
        let token = self.tokens.get(access_token).await?;
        if !token.is_expired(Utc::now()) {
            return Ok(token);
        }

        let guard = self.locker.acquire(&lock_name(access_token)).await?;
        let result = self.refresh_locked(access_token, refresh).await;
        if let Err(e) = guard.release().await {
            warn!(error = %e, "Failed to release token refresh lock");
        }
        result
    }

    async fn refresh_locked<F, Fut>(&self, access_token: &str, refresh: F) -> Result<Token>
    where
        F: FnOnce(Token) -> Fut + Send,
        Fut: Future<Output = Result<Token>> + Send,
    {
        let current = self.tokens.get(access_token).await?;
        if !current.is_expired(Utc::now()) {
            debug!("Token already refreshed by another caller");
            return Ok(current);
        }

        let refreshed = refresh(current).await?;
        self.tokens.save(&refreshed).await?;
        info!(email = %refreshed.email, expiry = %refreshed.expiry, "Refreshed provider token");
        Ok(refreshed)
    }
}

/// Lock name derived from a hash so raw tokens never reach the lock backend
fn lock_name(access_token: &str) -> String {
    format!("token-refresh:{}", blake3::hash(access_token.as_bytes()).to_hex())
}
