//! Upstream light API abstraction.
//!
//! The gateway treats the vendor API as an opaque asynchronous operation that
//! can fail. Implementations map their transport failures onto
//! [`UpstreamError`], which carries enough information for retry
//! classification.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::light::{LightAction, LightDevice, LightState};

/// Upstream failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum UpstreamError {
    /// Rate limit signal. Also the canonical error surfaced once retries are
    /// exhausted on a rate limit.
    #[error("Rate limited by upstream API")]
    RateLimited,

    /// Non-success HTTP status.
    #[error("Upstream returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// Vendor error code reported in a response body.
    #[error("Upstream vendor error {code}: {message}")]
    Vendor { code: u16, message: String },

    /// Request deadline elapsed.
    #[error("Upstream request timed out")]
    Timeout,

    /// Request was cancelled before completing.
    #[error("Upstream request cancelled")]
    Cancelled,

    /// Transport or connection failure.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// The request itself is invalid.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Unknown device.
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Credentials rejected.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

impl UpstreamError {
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    pub fn vendor(code: u16, message: impl Into<String>) -> Self {
        Self::Vendor {
            code,
            message: message.into(),
        }
    }

    /// HTTP-equivalent status code, when one applies.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            UpstreamError::RateLimited => Some(429),
            UpstreamError::Status { status, .. } => Some(*status),
            UpstreamError::Vendor { code, .. } => Some(*code),
            UpstreamError::Timeout => Some(408),
            UpstreamError::InvalidRequest(_) => Some(400),
            UpstreamError::Unauthorized(_) => Some(401),
            UpstreamError::DeviceNotFound(_) => Some(404),
            UpstreamError::Cancelled | UpstreamError::Connection(_) => None,
        }
    }
}

/// Third-party light API.
#[async_trait]
pub trait LightUpstream: Send + Sync {
    /// List every light on the account.
    async fn list_devices(&self) -> Result<Vec<LightDevice>, UpstreamError>;

    /// Read the current state of one light.
    async fn device_state(&self, device_id: &str) -> Result<LightState, UpstreamError>;

    /// Apply one control action.
    async fn control(&self, device_id: &str, action: &LightAction) -> Result<(), UpstreamError>;
}
