//! AM source delegating to a peer service's `/am` endpoint

use super::AmSource;
use crate::error::{IamError, Result};
use crate::types::AmEntry;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

/// HTTP client bound to one registered service's AM URL
///
/// The peer receives the prefix with its own service segment stripped and
/// answers with entries relative to its namespace.
pub struct RemoteAmSource {
    client: reqwest::Client,
    service: String,
    am_url: String,
    timeout: Duration,
}

impl RemoteAmSource {
    pub fn new(
        client: reqwest::Client,
        service: impl Into<String>,
        am_url: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            service: service.into(),
            am_url: am_url.into(),
            timeout,
        }
    }

    fn failure(&self, reason: impl Into<String>) -> IamError {
        IamError::Delegation {
            service: self.service.clone(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl AmSource for RemoteAmSource {
    async fn list(&self, prefix: &str) -> Result<Vec<AmEntry>> {
        debug!(service = %self.service, am_url = %self.am_url, prefix = %prefix, "Delegating AM listing");

        let response = self
            .client
            .get(&self.am_url)
            .query(&[("prefix", prefix)])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                warn!(service = %self.service, error = %e, "AM delegation request failed");
                self.failure(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(service = %self.service, status = %status, "AM delegation rejected");
            return Err(self.failure(format!("peer answered {}", status)));
        }

        response
            .json::<Vec<AmEntry>>()
            .await
            .map_err(|e| self.failure(format!("invalid AM response: {}", e)))
    }
}
