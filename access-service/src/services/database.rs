//! PostgreSQL implementations of the store traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use sqlx::postgres::PgPool;
use uuid::Uuid;

use super::audit::AuditLog;
use super::stores::{BindOutcome, LicenseStore, TrustedDeviceStore, UserStore};
use crate::models::{AuditRecord, License, LicenseRow, TrustedDevice, TwoFactorCredential, User, UserRow};

/// PostgreSQL database wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Health check - ping the database.
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Database health check failed: {}", e);
                AppError::DatabaseError(anyhow::anyhow!("Database health check failed: {}", e))
            })?;
        Ok(())
    }
}

fn to_license(row: Option<LicenseRow>) -> Result<Option<License>, anyhow::Error> {
    row.map(License::try_from).transpose()
}

// ==================== Licenses ====================

#[async_trait]
impl LicenseStore for Database {
    async fn find_by_key(&self, license_key: &str) -> Result<Option<License>, anyhow::Error> {
        let row = sqlx::query_as::<_, LicenseRow>("SELECT * FROM licenses WHERE license_key = $1")
            .bind(license_key)
            .fetch_optional(&self.pool)
            .await?;
        to_license(row)
    }

    async fn insert(&self, license: &License) -> Result<bool, anyhow::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO licenses (license_key, client_name, status, start_date, end_date,
                                  site_url, is_associated, created_at, updated_at, last_verified_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (license_key) DO NOTHING
            "#,
        )
        .bind(&license.license_key)
        .bind(&license.client_name)
        .bind(license.status.as_str())
        .bind(license.start_date)
        .bind(license.end_date)
        .bind(&license.site_url)
        .bind(license.is_associated)
        .bind(license.created_at)
        .bind(license.updated_at)
        .bind(license.last_verified_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn bind_domain_if_unbound(
        &self,
        license_key: &str,
        domain: &str,
        now: DateTime<Utc>,
    ) -> Result<BindOutcome, anyhow::Error> {
        let bound = sqlx::query_as::<_, LicenseRow>(
            r#"
            UPDATE licenses
            SET site_url = $2, is_associated = TRUE, status = 'ACTIVE',
                updated_at = $3, last_verified_at = $3
            WHERE license_key = $1 AND site_url IS NULL
            RETURNING *
            "#,
        )
        .bind(license_key)
        .bind(domain)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(license) = to_license(bound)? {
            return Ok(BindOutcome::Bound(license));
        }

        // Lost the race or the key vanished; report the current row.
        Ok(match self.find_by_key(license_key).await? {
            Some(license) => BindOutcome::AlreadyBound(license),
            None => BindOutcome::Missing,
        })
    }

    async fn mark_expired(&self, license_key: &str, now: DateTime<Utc>) -> Result<(), anyhow::Error> {
        sqlx::query(
            "UPDATE licenses SET status = 'EXPIRED', updated_at = $2 WHERE license_key = $1 AND status <> 'EXPIRED'",
        )
        .bind(license_key)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn touch_verified(&self, license_key: &str, now: DateTime<Utc>) -> Result<(), anyhow::Error> {
        sqlx::query("UPDATE licenses SET last_verified_at = $2 WHERE license_key = $1")
            .bind(license_key)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn clear_binding(
        &self,
        license_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<License>, anyhow::Error> {
        let row = sqlx::query_as::<_, LicenseRow>(
            r#"
            UPDATE licenses SET site_url = NULL, is_associated = FALSE, updated_at = $2
            WHERE license_key = $1
            RETURNING *
            "#,
        )
        .bind(license_key)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        to_license(row)
    }

    async fn update_validity(
        &self,
        license_key: &str,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<License>, anyhow::Error> {
        let row = sqlx::query_as::<_, LicenseRow>(
            r#"
            UPDATE licenses
            SET start_date = $2, end_date = $3, updated_at = $4,
                status = CASE
                    WHEN status = 'EXPIRED' AND $3 > $4 AND site_url IS NOT NULL THEN 'ACTIVE'
                    WHEN status = 'EXPIRED' AND $3 > $4 THEN 'INACTIVE'
                    ELSE status
                END
            WHERE license_key = $1
            RETURNING *
            "#,
        )
        .bind(license_key)
        .bind(start_date)
        .bind(end_date)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        to_license(row)
    }
}

// ==================== Users ====================

#[async_trait]
impl UserStore for Database {
    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>, anyhow::Error> {
        let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(User::from))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, anyhow::Error> {
        let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE LOWER(email) = LOWER($1)")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(User::from))
    }

    async fn insert(&self, user: &User) -> Result<bool, anyhow::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO users (user_id, email, password_hash, is_admin, two_factor_secret,
                               two_factor_backup_codes, two_factor_enabled, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(user.user_id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.is_admin)
        .bind(&user.two_factor.encrypted_secret)
        .bind(&user.two_factor.encrypted_backup_codes)
        .bind(user.two_factor.enabled)
        .bind(user.created_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn save_two_factor(
        &self,
        user_id: Uuid,
        credential: &TwoFactorCredential,
    ) -> Result<bool, anyhow::Error> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET two_factor_secret = $2, two_factor_backup_codes = $3, two_factor_enabled = $4
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(&credential.encrypted_secret)
        .bind(&credential.encrypted_backup_codes)
        .bind(credential.enabled)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn compare_and_set_backup_codes(
        &self,
        user_id: Uuid,
        expected: &str,
        replacement: &str,
    ) -> Result<bool, anyhow::Error> {
        let result = sqlx::query(
            r#"
            UPDATE users SET two_factor_backup_codes = $3
            WHERE user_id = $1 AND two_factor_backup_codes = $2
            "#,
        )
        .bind(user_id)
        .bind(expected)
        .bind(replacement)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

// ==================== Trusted devices ====================

#[async_trait]
impl TrustedDeviceStore for Database {
    async fn insert(&self, device: &TrustedDevice) -> Result<(), anyhow::Error> {
        sqlx::query(
            r#"
            INSERT INTO trusted_devices (device_id, user_id, token_hash, user_agent, ip_address,
                                         expires_at, last_used_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(device.device_id)
        .bind(device.user_id)
        .bind(&device.token_hash)
        .bind(&device.user_agent)
        .bind(&device.ip_address)
        .bind(device.expires_at)
        .bind(device.last_used_at)
        .bind(device.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_token_hash(&self, token_hash: &str) -> Result<Option<TrustedDevice>, anyhow::Error> {
        Ok(
            sqlx::query_as::<_, TrustedDevice>("SELECT * FROM trusted_devices WHERE token_hash = $1")
                .bind(token_hash)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn delete(&self, device_id: Uuid) -> Result<bool, anyhow::Error> {
        let result = sqlx::query("DELETE FROM trusted_devices WHERE device_id = $1")
            .bind(device_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_owned(&self, device_id: Uuid, user_id: Uuid) -> Result<bool, anyhow::Error> {
        let result = sqlx::query("DELETE FROM trusted_devices WHERE device_id = $1 AND user_id = $2")
            .bind(device_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_for_user(&self, user_id: Uuid) -> Result<usize, anyhow::Error> {
        let result = sqlx::query("DELETE FROM trusted_devices WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<TrustedDevice>, anyhow::Error> {
        Ok(sqlx::query_as::<_, TrustedDevice>(
            "SELECT * FROM trusted_devices WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn touch(&self, device_id: Uuid, now: DateTime<Utc>) -> Result<(), anyhow::Error> {
        sqlx::query("UPDATE trusted_devices SET last_used_at = $2 WHERE device_id = $1")
            .bind(device_id)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// ==================== Audit ====================

#[async_trait]
impl AuditLog for Database {
    async fn record(&self, record: AuditRecord) -> Result<(), anyhow::Error> {
        sqlx::query(
            r#"
            INSERT INTO audit_records (record_id, action, origin, target, outcome, details, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(record.record_id)
        .bind(&record.action)
        .bind(&record.origin)
        .bind(&record.target)
        .bind(&record.outcome)
        .bind(&record.details)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
