//! Shared API models
//!
//! Response envelope and request bodies used by the web API.

use serde::{Deserialize, Serialize};

use crate::reconciliation_store::LicensePlate;

/// Standard API response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_sec: u64,
    pub backend_url: String,
    /// False once the engine has shut down
    pub accepting_writes: bool,
}

/// `POST /api/plates`
#[derive(Debug, Clone, Deserialize)]
pub struct AddPlateRequest {
    pub license_plate: LicensePlate,
}

/// `POST /api/plates/:plate/activate`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActivateRequest {
    #[serde(default)]
    pub duration_minutes: Option<u32>,
}

/// `GET /api/notifications`
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationQuery {
    pub limit: Option<usize>,
}
