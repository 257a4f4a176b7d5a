//! Remembered browsers that may skip the second factor until expiry.
//!
//! The cookie carries 32 random bytes (URL-safe base64). Only the SHA-256
//! digest is stored, so a leaked table cannot be replayed as cookies.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

use super::error::ServiceError;
use super::stores::TrustedDeviceStore;
use crate::models::{DeviceInfo, TrustedDevice, DEFAULT_TRUSTED_DEVICE_DAYS};

const TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone)]
pub struct IssuedDevice {
    /// Plain token for the cookie. Not recoverable later.
    pub token: String,
    pub device: TrustedDevice,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCheck {
    pub trusted: bool,
    pub user_id: Option<Uuid>,
}

impl DeviceCheck {
    fn untrusted() -> Self {
        Self {
            trusted: false,
            user_id: None,
        }
    }
}

#[derive(Clone)]
pub struct TrustedDeviceRegistry {
    store: Arc<dyn TrustedDeviceStore>,
    ttl: Duration,
}

impl TrustedDeviceRegistry {
    pub fn new(store: Arc<dyn TrustedDeviceStore>, ttl_days: i64) -> Self {
        Self {
            store,
            ttl: Duration::days(ttl_days),
        }
    }

    pub fn with_default_ttl(store: Arc<dyn TrustedDeviceStore>) -> Self {
        Self::new(store, DEFAULT_TRUSTED_DEVICE_DAYS)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn issue(&self, user_id: Uuid, info: DeviceInfo) -> Result<IssuedDevice, ServiceError> {
        self.issue_at(user_id, info, Utc::now()).await
    }

    pub async fn issue_at(
        &self,
        user_id: Uuid,
        info: DeviceInfo,
        now: DateTime<Utc>,
    ) -> Result<IssuedDevice, ServiceError> {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        let token = URL_SAFE_NO_PAD.encode(bytes);

        let device = TrustedDevice::new(user_id, hash_token(&token), info, self.ttl, now);
        self.store.insert(&device).await?;

        tracing::info!(user_id = %user_id, device_id = %device.device_id, "Trusted device registered");
        Ok(IssuedDevice { token, device })
    }

    pub async fn check(&self, token: &str) -> Result<DeviceCheck, ServiceError> {
        self.check_at(token, Utc::now()).await
    }

    /// Expired entries are deleted here; valid ones get `last_used_at` bumped.
    pub async fn check_at(&self, token: &str, now: DateTime<Utc>) -> Result<DeviceCheck, ServiceError> {
        if token.is_empty() {
            return Ok(DeviceCheck::untrusted());
        }

        let Some(device) = self.store.find_by_token_hash(&hash_token(token)).await? else {
            return Ok(DeviceCheck::untrusted());
        };

        if device.is_expired_at(now) {
            self.store.delete(device.device_id).await?;
            tracing::debug!(device_id = %device.device_id, "Expired trusted device removed");
            return Ok(DeviceCheck::untrusted());
        }

        self.store.touch(device.device_id, now).await?;
        Ok(DeviceCheck {
            trusted: true,
            user_id: Some(device.user_id),
        })
    }

    /// Ownership-checked. Returns false when the device is missing or not owned.
    pub async fn revoke(&self, device_id: Uuid, user_id: Uuid) -> Result<bool, ServiceError> {
        let removed = self.store.delete_owned(device_id, user_id).await?;
        if removed {
            tracing::info!(user_id = %user_id, device_id = %device_id, "Trusted device revoked");
        }
        Ok(removed)
    }

    pub async fn revoke_all(&self, user_id: Uuid) -> Result<usize, ServiceError> {
        let removed = self.store.delete_for_user(user_id).await?;
        tracing::info!(user_id = %user_id, removed, "All trusted devices revoked");
        Ok(removed)
    }

    pub async fn list(&self, user_id: Uuid) -> Result<Vec<TrustedDevice>, ServiceError> {
        self.list_at(user_id, Utc::now()).await
    }

    pub async fn list_at(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<Vec<TrustedDevice>, ServiceError> {
        Ok(self
            .store
            .list_for_user(user_id)
            .await?
            .into_iter()
            .filter(|d| !d.is_expired_at(now))
            .collect())
    }
}

pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}
