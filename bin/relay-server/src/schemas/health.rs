//! Response types for the health endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Body of `GET /healthz`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum HealthStatus {
    /// Credentials are configured and the log directory is writable.
    Healthy {
        /// RFC 3339 time of the check.
        timestamp: String,
    },
    /// Something the relay needs is missing.
    Error { message: String },
}

/// Body of `GET /test`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TestResponse {
    pub status: String,
    pub message: String,
}
