//! Trusted device - a browser exempted from the second factor until expiry.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

pub const DEFAULT_TRUSTED_DEVICE_DAYS: i64 = 30;

/// Descriptive metadata captured when the device is remembered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct TrustedDevice {
    pub device_id: Uuid,
    pub user_id: Uuid,
    /// SHA-256 of the cookie token; the token itself is never stored.
    pub token_hash: String,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl TrustedDevice {
    pub fn new(
        user_id: Uuid,
        token_hash: String,
        info: DeviceInfo,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            device_id: Uuid::new_v4(),
            user_id,
            token_hash,
            user_agent: info.user_agent,
            ip_address: info.ip_address,
            expires_at: now + ttl,
            last_used_at: now,
            created_at: now,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// What the console shows in the device list.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TrustedDeviceView {
    pub device_id: Uuid,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl From<TrustedDevice> for TrustedDeviceView {
    fn from(device: TrustedDevice) -> Self {
        Self {
            device_id: device.device_id,
            user_agent: device.user_agent,
            ip_address: device.ip_address,
            expires_at: device.expires_at,
            last_used_at: device.last_used_at,
            created_at: device.created_at,
        }
    }
}
