use serde::{Deserialize, Serialize};

use crate::types::SessionId;

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamRequest {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl StreamRequest {
    /// The prompt as received, or `None` when it is empty or whitespace only.
    pub fn prompt(&self) -> Option<&str> {
        (!self.prompt.trim().is_empty()).then_some(self.prompt.as_str())
    }

    pub fn session(&self) -> SessionId {
        SessionId::from_optional(self.session_id.clone())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClearRequest {
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionQuery {
    #[serde(default)]
    pub session_id: Option<String>,
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelResponse {
    pub success: bool,
    pub request_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusResponse {
    pub status: String,
}

impl StatusResponse {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub services: ServiceHealth,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub model_backend: Option<String>,
    pub configured: bool,
    pub active_requests: usize,
}

impl HealthStatus {
    pub fn new(services: ServiceHealth) -> Self {
        let status = if services.configured { "healthy" } else { "degraded" };
        Self {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            services,
        }
    }
}
