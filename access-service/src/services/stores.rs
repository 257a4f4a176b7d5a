//! Storage seams for the access core plus their in-memory implementations.
//!
//! In-memory stores are single-instance. `Database` implements the same
//! async traits on PostgreSQL.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::models::{
    License, LicenseStatus, SecurityEvent, SecurityEventType, TrustedDevice, TwoFactorCredential,
    User,
};

/// Result of the "bind only if still unbound" update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindOutcome {
    /// This call set the binding.
    Bound(License),
    /// Someone else got there first; carries the current row.
    AlreadyBound(License),
    Missing,
}

#[async_trait]
pub trait LicenseStore: Send + Sync {
    async fn find_by_key(&self, license_key: &str) -> Result<Option<License>, anyhow::Error>;

    /// Returns false when the key already exists.
    async fn insert(&self, license: &License) -> Result<bool, anyhow::Error>;

    /// Sets `site_url`, `is_associated` and `ACTIVE` only while `site_url` is null.
    async fn bind_domain_if_unbound(
        &self,
        license_key: &str,
        domain: &str,
        now: DateTime<Utc>,
    ) -> Result<BindOutcome, anyhow::Error>;

    async fn mark_expired(&self, license_key: &str, now: DateTime<Utc>) -> Result<(), anyhow::Error>;

    async fn touch_verified(&self, license_key: &str, now: DateTime<Utc>) -> Result<(), anyhow::Error>;

    /// Clears the binding, leaving status alone.
    async fn clear_binding(
        &self,
        license_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<License>, anyhow::Error>;

    /// Replaces the validity window. An EXPIRED license whose new end date
    /// lies in the future is reopened (ACTIVE when bound, INACTIVE otherwise).
    async fn update_validity(
        &self,
        license_key: &str,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<License>, anyhow::Error>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>, anyhow::Error>;

    /// Case-insensitive lookup.
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, anyhow::Error>;

    /// Returns false when the email is taken.
    async fn insert(&self, user: &User) -> Result<bool, anyhow::Error>;

    async fn save_two_factor(
        &self,
        user_id: Uuid,
        credential: &TwoFactorCredential,
    ) -> Result<bool, anyhow::Error>;

    /// Replace the backup code blob only if it still equals `expected`.
    async fn compare_and_set_backup_codes(
        &self,
        user_id: Uuid,
        expected: &str,
        replacement: &str,
    ) -> Result<bool, anyhow::Error>;
}

#[async_trait]
pub trait TrustedDeviceStore: Send + Sync {
    async fn insert(&self, device: &TrustedDevice) -> Result<(), anyhow::Error>;

    async fn find_by_token_hash(&self, token_hash: &str) -> Result<Option<TrustedDevice>, anyhow::Error>;

    async fn delete(&self, device_id: Uuid) -> Result<bool, anyhow::Error>;

    /// Deletes only when `device_id` belongs to `user_id`.
    async fn delete_owned(&self, device_id: Uuid, user_id: Uuid) -> Result<bool, anyhow::Error>;

    async fn delete_for_user(&self, user_id: Uuid) -> Result<usize, anyhow::Error>;

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<TrustedDevice>, anyhow::Error>;

    async fn touch(&self, device_id: Uuid, now: DateTime<Utc>) -> Result<(), anyhow::Error>;
}

/// Per `(identifier, type)` event lists for the anomaly detector.
pub trait SecurityEventStore: Send + Sync {
    /// Append, drop entries older than `since`, and return how many remain.
    fn append_and_count(&self, event: SecurityEvent, since: DateTime<Utc>) -> usize;

    /// Remove lists whose newest entry is older than the retention for their type.
    fn prune(&self, now: DateTime<Utc>, retention: &dyn Fn(SecurityEventType) -> Duration) -> usize;

    fn events(&self, identifier: &str, event_type: SecurityEventType) -> Vec<SecurityEvent>;
}

// ==================== In-memory implementations ====================

#[derive(Default)]
pub struct InMemoryLicenseStore {
    licenses: DashMap<String, License>,
}

impl InMemoryLicenseStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LicenseStore for InMemoryLicenseStore {
    async fn find_by_key(&self, license_key: &str) -> Result<Option<License>, anyhow::Error> {
        Ok(self.licenses.get(license_key).map(|l| l.clone()))
    }

    async fn insert(&self, license: &License) -> Result<bool, anyhow::Error> {
        match self.licenses.entry(license.license_key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(false),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(license.clone());
                Ok(true)
            }
        }
    }

    async fn bind_domain_if_unbound(
        &self,
        license_key: &str,
        domain: &str,
        now: DateTime<Utc>,
    ) -> Result<BindOutcome, anyhow::Error> {
        // get_mut holds the shard lock for the whole compare-and-set.
        let Some(mut license) = self.licenses.get_mut(license_key) else {
            return Ok(BindOutcome::Missing);
        };

        if license.site_url.is_some() {
            return Ok(BindOutcome::AlreadyBound(license.clone()));
        }

        license.site_url = Some(domain.to_string());
        license.is_associated = true;
        license.status = LicenseStatus::Active;
        license.updated_at = now;
        license.last_verified_at = Some(now);
        Ok(BindOutcome::Bound(license.clone()))
    }

    async fn mark_expired(&self, license_key: &str, now: DateTime<Utc>) -> Result<(), anyhow::Error> {
        if let Some(mut license) = self.licenses.get_mut(license_key) {
            if license.status != LicenseStatus::Expired {
                license.status = LicenseStatus::Expired;
                license.updated_at = now;
            }
        }
        Ok(())
    }

    async fn touch_verified(&self, license_key: &str, now: DateTime<Utc>) -> Result<(), anyhow::Error> {
        if let Some(mut license) = self.licenses.get_mut(license_key) {
            license.last_verified_at = Some(now);
        }
        Ok(())
    }

    async fn clear_binding(
        &self,
        license_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<License>, anyhow::Error> {
        Ok(self.licenses.get_mut(license_key).map(|mut license| {
            license.site_url = None;
            license.is_associated = false;
            license.updated_at = now;
            license.clone()
        }))
    }

    async fn update_validity(
        &self,
        license_key: &str,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<License>, anyhow::Error> {
        Ok(self.licenses.get_mut(license_key).map(|mut license| {
            license.status = license.status_after_renewal(end_date, now);
            license.start_date = start_date;
            license.end_date = end_date;
            license.updated_at = now;
            license.clone()
        }))
    }
}

#[derive(Default)]
pub struct InMemoryUserStore {
    users: DashMap<Uuid, User>,
    by_email: DashMap<String, Uuid>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>, anyhow::Error> {
        Ok(self.users.get(&user_id).map(|u| u.clone()))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, anyhow::Error> {
        let Some(user_id) = self.by_email.get(&email.to_lowercase()).map(|id| *id) else {
            return Ok(None);
        };
        Ok(self.users.get(&user_id).map(|u| u.clone()))
    }

    async fn insert(&self, user: &User) -> Result<bool, anyhow::Error> {
        match self.by_email.entry(user.email.to_lowercase()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(false),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(user.user_id);
                self.users.insert(user.user_id, user.clone());
                Ok(true)
            }
        }
    }

    async fn save_two_factor(
        &self,
        user_id: Uuid,
        credential: &TwoFactorCredential,
    ) -> Result<bool, anyhow::Error> {
        Ok(match self.users.get_mut(&user_id) {
            Some(mut user) => {
                user.two_factor = credential.clone();
                true
            }
            None => false,
        })
    }

    async fn compare_and_set_backup_codes(
        &self,
        user_id: Uuid,
        expected: &str,
        replacement: &str,
    ) -> Result<bool, anyhow::Error> {
        let Some(mut user) = self.users.get_mut(&user_id) else {
            return Ok(false);
        };
        if user.two_factor.encrypted_backup_codes.as_deref() != Some(expected) {
            return Ok(false);
        }
        user.two_factor.encrypted_backup_codes = Some(replacement.to_string());
        Ok(true)
    }
}

#[derive(Default)]
pub struct InMemoryTrustedDeviceStore {
    devices: DashMap<Uuid, TrustedDevice>,
    by_token: DashMap<String, Uuid>,
}

impl InMemoryTrustedDeviceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    fn remove_device(&self, device_id: Uuid) -> Option<TrustedDevice> {
        let (_, device) = self.devices.remove(&device_id)?;
        self.by_token.remove(&device.token_hash);
        Some(device)
    }
}

#[async_trait]
impl TrustedDeviceStore for InMemoryTrustedDeviceStore {
    async fn insert(&self, device: &TrustedDevice) -> Result<(), anyhow::Error> {
        self.by_token
            .insert(device.token_hash.clone(), device.device_id);
        self.devices.insert(device.device_id, device.clone());
        Ok(())
    }

    async fn find_by_token_hash(&self, token_hash: &str) -> Result<Option<TrustedDevice>, anyhow::Error> {
        let Some(device_id) = self.by_token.get(token_hash).map(|id| *id) else {
            return Ok(None);
        };
        Ok(self.devices.get(&device_id).map(|d| d.clone()))
    }

    async fn delete(&self, device_id: Uuid) -> Result<bool, anyhow::Error> {
        Ok(self.remove_device(device_id).is_some())
    }

    async fn delete_owned(&self, device_id: Uuid, user_id: Uuid) -> Result<bool, anyhow::Error> {
        let removed = self
            .devices
            .remove_if(&device_id, |_, device| device.user_id == user_id);
        if let Some((_, device)) = &removed {
            self.by_token.remove(&device.token_hash);
        }
        Ok(removed.is_some())
    }

    async fn delete_for_user(&self, user_id: Uuid) -> Result<usize, anyhow::Error> {
        let owned: Vec<Uuid> = self
            .devices
            .iter()
            .filter(|d| d.user_id == user_id)
            .map(|d| d.device_id)
            .collect();

        Ok(owned
            .into_iter()
            .filter(|id| self.remove_device(*id).is_some())
            .count())
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<TrustedDevice>, anyhow::Error> {
        let mut devices: Vec<TrustedDevice> = self
            .devices
            .iter()
            .filter(|d| d.user_id == user_id)
            .map(|d| d.clone())
            .collect();
        devices.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(devices)
    }

    async fn touch(&self, device_id: Uuid, now: DateTime<Utc>) -> Result<(), anyhow::Error> {
        if let Some(mut device) = self.devices.get_mut(&device_id) {
            device.last_used_at = now;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemorySecurityEventStore {
    events: DashMap<(String, SecurityEventType), Vec<SecurityEvent>>,
}

impl InMemorySecurityEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl SecurityEventStore for InMemorySecurityEventStore {
    fn append_and_count(&self, event: SecurityEvent, since: DateTime<Utc>) -> usize {
        let mut list = self
            .events
            .entry((event.identifier.clone(), event.event_type))
            .or_default();
        list.push(event);
        list.retain(|e| e.occurred_at >= since);
        list.len()
    }

    fn prune(&self, now: DateTime<Utc>, retention: &dyn Fn(SecurityEventType) -> Duration) -> usize {
        let keys: Vec<(String, SecurityEventType)> =
            self.events.iter().map(|e| e.key().clone()).collect();

        keys.into_iter()
            .filter(|key| {
                let cutoff = now - retention(key.1);
                self.events
                    .remove_if(key, |_, list| {
                        list.last().map_or(true, |newest| newest.occurred_at < cutoff)
                    })
                    .is_some()
            })
            .count()
    }

    fn events(&self, identifier: &str, event_type: SecurityEventType) -> Vec<SecurityEvent> {
        self.events
            .get(&(identifier.to_string(), event_type))
            .map(|list| list.clone())
            .unwrap_or_default()
    }
}
