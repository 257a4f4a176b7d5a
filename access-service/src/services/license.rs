//! License activation state machine.
//!
//! `INACTIVE -> ACTIVE (bound)` on the first successful activation,
//! `-> EXPIRED` once the validity window has elapsed (persisted lazily on
//! the activation path). The binding is only ever set through the store's
//! conditional update, so two racing first activations produce one winner.

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;

use super::audit::AuditLog;
use super::error::ServiceError;
use super::metrics;
use super::security_monitor::SecurityMonitor;
use super::stores::{BindOutcome, LicenseStore};
use crate::models::{
    ActivationOutcome, AuditRecord, License, LicenseSnapshot, LicenseStatus, SecurityEventType,
};
use crate::utils::normalize_domain;

pub const ACTIVATION_ENDPOINT: &str = "license.activate";
pub const VERIFY_ENDPOINT: &str = "license.verify";

#[derive(Clone)]
pub struct LicenseService {
    store: Arc<dyn LicenseStore>,
    monitor: SecurityMonitor,
    audit: Arc<dyn AuditLog>,
}

impl LicenseService {
    pub fn new(
        store: Arc<dyn LicenseStore>,
        monitor: SecurityMonitor,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        Self {
            store,
            monitor,
            audit,
        }
    }

    pub fn store(&self) -> &Arc<dyn LicenseStore> {
        &self.store
    }

    /// Read-only status check. Expiry is computed, never written.
    pub async fn verify(&self, license_key: &str, origin: &str) -> Result<LicenseSnapshot, ServiceError> {
        self.verify_at(license_key, origin, Utc::now()).await
    }

    pub async fn verify_at(
        &self,
        license_key: &str,
        origin: &str,
        now: DateTime<Utc>,
    ) -> Result<LicenseSnapshot, ServiceError> {
        let license_key = license_key.trim();
        if license_key.is_empty() {
            return Err(ServiceError::Validation("license_key is required".to_string()));
        }

        match self.store.find_by_key(license_key).await? {
            Some(license) => Ok(license.snapshot_at(now)),
            None => {
                self.monitor
                    .record_at(
                        SecurityEventType::FailedAccess,
                        origin,
                        VERIFY_ENDPOINT,
                        &format!("unknown license key {}", license_key),
                        now,
                    )
                    .await;
                Err(ServiceError::NotFound("License".to_string()))
            }
        }
    }

    pub async fn activate(
        &self,
        license_key: &str,
        domain: &str,
        origin: &str,
    ) -> Result<ActivationOutcome, ServiceError> {
        self.activate_at(license_key, domain, origin, Utc::now()).await
    }

    pub async fn activate_at(
        &self,
        license_key: &str,
        domain: &str,
        origin: &str,
        now: DateTime<Utc>,
    ) -> Result<ActivationOutcome, ServiceError> {
        let started = Instant::now();
        let license_key = license_key.trim();
        if license_key.is_empty() {
            return Err(ServiceError::Validation("license_key is required".to_string()));
        }
        let domain = normalize_domain(domain)
            .ok_or_else(|| ServiceError::Validation("domain is not a valid host".to_string()))?;

        let existing = self.store.find_by_key(license_key).await?;
        let previous_binding = existing.as_ref().and_then(|l| l.site_url.clone());
        let outcome = match existing {
            None => ActivationOutcome::NotFound,
            Some(license) => self.transition(license, &domain, now).await?,
        };

        tracing::info!(
            license_key = %license_key,
            domain = %domain,
            previous_binding = previous_binding.as_deref().unwrap_or("-"),
            origin = %origin,
            outcome = outcome.label(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "License activation"
        );
        metrics::record_activation(outcome.label());

        self.write_audit(license_key, &domain, origin, previous_binding.as_deref(), &outcome)
            .await;

        match &outcome {
            ActivationOutcome::NotFound => {
                self.monitor
                    .record_at(
                        SecurityEventType::FailedAccess,
                        origin,
                        ACTIVATION_ENDPOINT,
                        &format!("unknown license key {} for {}", license_key, domain),
                        now,
                    )
                    .await;
            }
            ActivationOutcome::DomainMismatch { authorized_domain } => {
                self.monitor
                    .record_at(
                        SecurityEventType::FailedAccess,
                        origin,
                        ACTIVATION_ENDPOINT,
                        &format!(
                            "license {} bound to {}, requested by {}",
                            license_key, authorized_domain, domain
                        ),
                        now,
                    )
                    .await;
            }
            _ => {}
        }

        self.monitor
            .record_unusual_hour_access_at(origin, ACTIVATION_ENDPOINT, license_key, now)
            .await;

        Ok(outcome)
    }

    async fn transition(
        &self,
        license: License,
        domain: &str,
        now: DateTime<Utc>,
    ) -> Result<ActivationOutcome, ServiceError> {
        if license.is_expired_at(now) {
            if license.status != LicenseStatus::Expired {
                self.store.mark_expired(&license.license_key, now).await?;
            }
            return Ok(ActivationOutcome::Expired);
        }

        let bound_domain = license.site_url.clone();
        match bound_domain.as_deref() {
            Some(bound) if bound == domain => self.heartbeat(license, now).await,
            Some(bound) => Ok(ActivationOutcome::DomainMismatch {
                authorized_domain: bound.to_string(),
            }),
            None => match self
                .store
                .bind_domain_if_unbound(&license.license_key, domain, now)
                .await?
            {
                BindOutcome::Bound(bound) => Ok(ActivationOutcome::Activated(bound)),
                BindOutcome::AlreadyBound(winner) => {
                    let winning_domain = winner.site_url.clone();
                    match winning_domain.as_deref() {
                        Some(bound) if bound == domain => self.heartbeat(winner, now).await,
                        Some(bound) => Ok(ActivationOutcome::DomainMismatch {
                            authorized_domain: bound.to_string(),
                        }),
                        None => Err(ServiceError::Internal(anyhow::anyhow!(
                            "store reported a binding for {} without a domain",
                            winner.license_key
                        ))),
                    }
                }
                BindOutcome::Missing => Ok(ActivationOutcome::NotFound),
            },
        }
    }

    async fn heartbeat(
        &self,
        mut license: License,
        now: DateTime<Utc>,
    ) -> Result<ActivationOutcome, ServiceError> {
        self.store.touch_verified(&license.license_key, now).await?;
        license.last_verified_at = Some(now);
        Ok(ActivationOutcome::AlreadyValid(license))
    }

    async fn write_audit(
        &self,
        license_key: &str,
        domain: &str,
        origin: &str,
        previous_binding: Option<&str>,
        outcome: &ActivationOutcome,
    ) {
        let mut details = json!({
            "domain": domain,
            "previous_binding": previous_binding,
        });
        if let ActivationOutcome::DomainMismatch { authorized_domain } = outcome {
            details["authorized_domain"] = json!(authorized_domain);
        }

        let record = AuditRecord::new(
            ACTIVATION_ENDPOINT,
            origin,
            Some(license_key.to_string()),
            outcome.label(),
            details,
        );
        if let Err(e) = self.audit.record(record).await {
            tracing::error!(error = %e, license_key = %license_key, "Failed to write audit record");
        }
    }

    /// Administrative release of the binding. Status is left as is.
    pub async fn disassociate(&self, license_key: &str, actor: &str) -> Result<License, ServiceError> {
        let previous = self
            .store
            .find_by_key(license_key)
            .await?
            .ok_or_else(|| ServiceError::NotFound("License".to_string()))?;

        let license = self
            .store
            .clear_binding(license_key, Utc::now())
            .await?
            .ok_or_else(|| ServiceError::NotFound("License".to_string()))?;

        tracing::info!(
            license_key = %license_key,
            previous_binding = previous.site_url.as_deref().unwrap_or("-"),
            "License disassociated"
        );
        self.audit_admin(
            "license.disassociate",
            actor,
            license_key,
            json!({ "previous_binding": previous.site_url }),
        )
        .await;

        Ok(license)
    }

    pub async fn create_license(
        &self,
        license_key: Option<String>,
        client_name: &str,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
        actor: &str,
    ) -> Result<License, ServiceError> {
        if end_date <= start_date {
            return Err(ServiceError::Validation(
                "end_date must be after start_date".to_string(),
            ));
        }

        let license_key = match license_key.map(|k| k.trim().to_string()) {
            Some(key) if !key.is_empty() => key,
            Some(_) => {
                return Err(ServiceError::Validation("license_key must not be blank".to_string()))
            }
            None => generate_license_key(),
        };

        let license = License::new(license_key, client_name.trim(), start_date, end_date);
        if !self.store.insert(&license).await? {
            return Err(ServiceError::Conflict(format!(
                "License {} already exists",
                license.license_key
            )));
        }

        tracing::info!(license_key = %license.license_key, client = %license.client_name, "License created");
        self.audit_admin(
            "license.create",
            actor,
            &license.license_key,
            json!({ "client_name": license.client_name, "end_date": license.end_date }),
        )
        .await;

        Ok(license)
    }

    pub async fn update_validity(
        &self,
        license_key: &str,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
        actor: &str,
    ) -> Result<License, ServiceError> {
        if end_date <= start_date {
            return Err(ServiceError::Validation(
                "end_date must be after start_date".to_string(),
            ));
        }

        let license = self
            .store
            .update_validity(license_key, start_date, end_date, Utc::now())
            .await?
            .ok_or_else(|| ServiceError::NotFound("License".to_string()))?;

        self.audit_admin(
            "license.update_validity",
            actor,
            license_key,
            json!({ "start_date": start_date, "end_date": end_date }),
        )
        .await;

        Ok(license)
    }

    async fn audit_admin(&self, action: &str, actor: &str, license_key: &str, details: serde_json::Value) {
        let record = AuditRecord::new(action, actor, Some(license_key.to_string()), "success", details);
        if let Err(e) = self.audit.record(record).await {
            tracing::error!(error = %e, action = %action, "Failed to write audit record");
        }
    }
}

/// `XXXX-XXXX-XXXX-XXXX`, uppercase hex.
pub fn generate_license_key() -> String {
    let mut bytes = [0u8; 8];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    let hex = hex::encode_upper(bytes);
    hex.as_bytes()
        .chunks(4)
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect::<Vec<_>>()
        .join("-")
}
