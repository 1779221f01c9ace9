//! OAuth2 provider contract and the Google implementation

use super::refresh::RefreshGuard;
use crate::error::{IamError, Result};
use crate::store::TokensStore;
use crate::types::Token;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Outcome of a successful provider authentication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResult {
    /// Caller-facing access token
    pub access_token: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
}

/// External identity provider
#[async_trait]
pub trait OAuth2Provider: Send + Sync {
    /// URL the user agent is sent to for consent
    fn build_auth_url(&self, state: &str) -> Result<String>;

    /// Trades an authorization code for a stored token
    async fn exchange_code(&self, code: &str) -> Result<AuthResult>;

    /// Verifies a previously issued access token, refreshing it when expired
    async fn authenticate(&self, access_token: &str) -> Result<AuthResult>;
}

/// Google OAuth2 client settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: String,
    pub auth_endpoint: String,
    pub token_endpoint: String,
    pub userinfo_endpoint: String,

    /// Allowed G Suite domains; empty allows any account
    pub hosted_domains: Vec<String>,

    pub request_timeout_ms: u64,
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_url: String::new(),
            auth_endpoint: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            token_endpoint: "https://www.googleapis.com/oauth2/v4/token".to_string(),
            userinfo_endpoint: "https://www.googleapis.com/oauth2/v2/userinfo".to_string(),
            hosted_domains: Vec::new(),
            request_timeout_ms: 5_000,
        }
    }
}

impl GoogleConfig {
    fn allows_domain(&self, hosted_domain: Option<&str>) -> bool {
        if self.hosted_domains.is_empty() {
            return true;
        }
        hosted_domain
            .map(|hd| self.hosted_domains.iter().any(|allowed| allowed == hd))
            .unwrap_or(false)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    token_type: String,
    #[serde(default)]
    expires_in: i64,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    email: String,
    #[serde(default)]
    hd: Option<String>,
    #[serde(default)]
    picture: Option<String>,
}

const SCOPES: &str =
    "https://www.googleapis.com/auth/userinfo.profile https://www.googleapis.com/auth/userinfo.email";

/// Google as OAuth2 provider
pub struct GoogleProvider {
    config: GoogleConfig,
    tokens: Arc<dyn TokensStore>,
    refresh: RefreshGuard,
    client: reqwest::Client,
}

impl GoogleProvider {
    pub fn new(config: GoogleConfig, tokens: Arc<dyn TokensStore>, refresh: RefreshGuard) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| IamError::Internal(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            tokens,
            refresh,
            client,
        })
    }

    async fn request_token(&self, form: &[(&str, &str)]) -> Result<TokenResponse> {
        let response = self
            .client
            .post(&self.config.token_endpoint)
            .form(form)
            .send()
            .await
            .map_err(|e| IamError::OAuth2(format!("token endpoint unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(IamError::OAuth2(format!("token endpoint answered {}", status)));
        }

        response
            .json()
            .await
            .map_err(|e| IamError::OAuth2(format!("invalid token response: {}", e)))
    }

    async fn user_info(&self, provider_access_token: &str) -> Result<UserInfo> {
        let response = self
            .client
            .get(&self.config.userinfo_endpoint)
            .bearer_auth(provider_access_token)
            .send()
            .await
            .map_err(|e| IamError::OAuth2(format!("userinfo endpoint unreachable: {}", e)))?;

        match response.status() {
            status if status.is_success() => response
                .json()
                .await
                .map_err(|e| IamError::OAuth2(format!("invalid userinfo response: {}", e))),
            StatusCode::UNAUTHORIZED => Err(IamError::Unauthenticated(
                "access token rejected by provider".to_string(),
            )),
            status => Err(IamError::OAuth2(format!("userinfo endpoint answered {}", status))),
        }
    }

    fn check_domain(&self, info: &UserInfo) -> Result<()> {
        if self.config.allows_domain(info.hd.as_deref()) {
            Ok(())
        } else {
            warn!(email = %info.email, hosted_domain = ?info.hd, "Hosted domain not allowed");
            Err(IamError::Unauthenticated(format!(
                "email from non-allowed hosted domain {}",
                info.hd.as_deref().unwrap_or("<none>")
            )))
        }
    }

    /// Exchanges the refresh token for a new provider access token
    async fn refresh_token(&self, token: Token) -> Result<Token> {
        debug!(email = %token.email, "Refreshing provider token");
        let response = self
            .request_token(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", token.refresh_token.as_str()),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ])
            .await?;

        Ok(Token {
            provider_access_token: response.access_token,
            refresh_token: response.refresh_token.unwrap_or(token.refresh_token),
            token_type: response.token_type,
            expiry: Utc::now() + chrono::Duration::seconds(response.expires_in),
            ..token
        })
    }
}

#[async_trait]
impl OAuth2Provider for GoogleProvider {
    fn build_auth_url(&self, state: &str) -> Result<String> {
        let url = reqwest::Url::parse_with_params(
            &self.config.auth_endpoint,
            &[
                ("state", state),
                ("redirect_uri", self.config.redirect_url.as_str()),
                ("client_id", self.config.client_id.as_str()),
                ("scope", SCOPES),
                ("access_type", "offline"),
                ("include_granted_scopes", "true"),
                ("response_type", "code"),
                ("prompt", "consent"),
            ],
        )
        .map_err(|e| IamError::OAuth2(format!("invalid auth endpoint: {}", e)))?;
        Ok(url.into())
    }

    async fn exchange_code(&self, code: &str) -> Result<AuthResult> {
        let response = self
            .request_token(&[
                ("code", code),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("redirect_uri", self.config.redirect_url.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .await?;

        let info = self.user_info(&response.access_token).await?;
        self.check_domain(&info)?;

        let token = Token {
            access_token: response.access_token.clone(),
            provider_access_token: response.access_token,
            refresh_token: response.refresh_token.unwrap_or_default(),
            token_type: response.token_type,
            expiry: Utc::now() + chrono::Duration::seconds(response.expires_in),
            email: info.email.clone(),
        };
        self.tokens.save(&token).await?;

        Ok(AuthResult {
            access_token: token.access_token,
            email: info.email,
            picture: info.picture,
        })
    }

    async fn authenticate(&self, access_token: &str) -> Result<AuthResult> {
        let token = self
            .refresh
            .fresh_token(access_token, |t| self.refresh_token(t))
            .await
            .map_err(|e| match e {
                IamError::EntityNotFound { .. } => {
                    IamError::Unauthenticated("access token not found".to_string())
                }
                other => other,
            })?;

        let info = self.user_info(&token.provider_access_token).await?;
        self.check_domain(&info)?;

        Ok(AuthResult {
            access_token: token.access_token,
            email: info.email,
            picture: info.picture,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hosted_domain_allow_list() {
        let mut config = GoogleConfig::default();
        assert!(config.allows_domain(None));

        config.hosted_domains = vec!["example.com".to_string()];
        assert!(config.allows_domain(Some("example.com")));
        assert!(!config.allows_domain(Some("evil.com")));
        assert!(!config.allows_domain(None));
    }

    #[test]
    fn test_token_response_defaults() {
        let response: TokenResponse =
            serde_json::from_str(r#"{"access_token":"a","expires_in":3599}"#).unwrap();
        assert_eq!(response.token_type, "Bearer");
        assert!(response.refresh_token.is_none());
    }
}
