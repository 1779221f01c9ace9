//! Request and response bodies of the HTTP surface

use serde::{Deserialize, Serialize};

/// `GET /healthcheck` body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub healthy: bool,
}

/// `GET /am` query
#[derive(Debug, Default, Deserialize)]
pub struct AmQuery {
    /// Partial permission; empty lists the registered services
    #[serde(default)]
    pub prefix: String,
}

/// `GET /permissions/has` query
#[derive(Debug, Deserialize)]
pub struct HasPermissionQuery {
    pub permission: String,
}
