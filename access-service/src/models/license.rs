//! License model - a key that can be bound to exactly one customer domain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// Stored lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LicenseStatus {
    Inactive,
    Active,
    Expired,
}

impl LicenseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LicenseStatus::Inactive => "INACTIVE",
            LicenseStatus::Active => "ACTIVE",
            LicenseStatus::Expired => "EXPIRED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INACTIVE" => Some(LicenseStatus::Inactive),
            "ACTIVE" => Some(LicenseStatus::Active),
            "EXPIRED" => Some(LicenseStatus::Expired),
            _ => None,
        }
    }
}

/// License entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct License {
    pub license_key: String,
    pub client_name: String,
    pub status: LicenseStatus,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    /// Normalized domain the key is bound to.
    pub site_url: Option<String>,
    pub is_associated: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_verified_at: Option<DateTime<Utc>>,
}

impl License {
    /// Create a new, never-activated license.
    pub fn new(
        license_key: impl Into<String>,
        client_name: impl Into<String>,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            license_key: license_key.into(),
            client_name: client_name.into(),
            status: LicenseStatus::Inactive,
            start_date,
            end_date,
            site_url: None,
            is_associated: false,
            created_at: now,
            updated_at: now,
            last_verified_at: None,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.end_date
    }

    /// Status as it should be reported at `now`, without touching storage.
    pub fn effective_status_at(&self, now: DateTime<Utc>) -> LicenseStatus {
        if self.is_expired_at(now) {
            LicenseStatus::Expired
        } else {
            self.status
        }
    }

    /// Stored status after the validity window moves to end at `end_date`.
    /// An expired license whose new end lies ahead of `now` goes back to
    /// ACTIVE if bound, otherwise INACTIVE.
    pub fn status_after_renewal(&self, end_date: DateTime<Utc>, now: DateTime<Utc>) -> LicenseStatus {
        match self.status {
            LicenseStatus::Expired if end_date > now && self.is_bound() => LicenseStatus::Active,
            LicenseStatus::Expired if end_date > now => LicenseStatus::Inactive,
            status => status,
        }
    }

    pub fn is_bound(&self) -> bool {
        self.site_url.is_some()
    }

    pub fn snapshot_at(&self, now: DateTime<Utc>) -> LicenseSnapshot {
        let status = self.effective_status_at(now);
        LicenseSnapshot {
            license_key: self.license_key.clone(),
            client_name: self.client_name.clone(),
            status,
            valid: status == LicenseStatus::Active && self.is_associated,
            start_date: self.start_date,
            end_date: self.end_date,
            site_url: self.site_url.clone(),
            is_associated: self.is_associated,
        }
    }
}

/// Read-only view returned to plugins and the console.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LicenseSnapshot {
    pub license_key: String,
    pub client_name: String,
    pub status: LicenseStatus,
    pub valid: bool,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub site_url: Option<String>,
    pub is_associated: bool,
}

/// Result of one activation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationOutcome {
    /// First binding, made by this call.
    Activated(License),
    /// Already bound to the requesting domain.
    AlreadyValid(License),
    /// Bound to someone else; carries the winning domain.
    DomainMismatch { authorized_domain: String },
    Expired,
    NotFound,
}

impl ActivationOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ActivationOutcome::Activated(_) => "activated",
            ActivationOutcome::AlreadyValid(_) => "already_valid",
            ActivationOutcome::DomainMismatch { .. } => "domain_mismatch",
            ActivationOutcome::Expired => "expired",
            ActivationOutcome::NotFound => "not_found",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self,
            ActivationOutcome::Activated(_) | ActivationOutcome::AlreadyValid(_)
        )
    }
}

/// Row shape in PostgreSQL; status is stored as text.
#[derive(Debug, Clone, FromRow)]
pub struct LicenseRow {
    pub license_key: String,
    pub client_name: String,
    pub status: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub site_url: Option<String>,
    pub is_associated: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_verified_at: Option<DateTime<Utc>>,
}

impl TryFrom<LicenseRow> for License {
    type Error = anyhow::Error;

    fn try_from(row: LicenseRow) -> Result<Self, Self::Error> {
        let status = LicenseStatus::parse(&row.status)
            .ok_or_else(|| anyhow::anyhow!("Unknown license status '{}'", row.status))?;
        Ok(Self {
            license_key: row.license_key,
            client_name: row.client_name,
            status,
            start_date: row.start_date,
            end_date: row.end_date,
            site_url: row.site_url,
            is_associated: row.is_associated,
            created_at: row.created_at,
            updated_at: row.updated_at,
            last_verified_at: row.last_verified_at,
        })
    }
}
