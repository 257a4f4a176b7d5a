//! Console login and the per-user second-factor lifecycle.
//!
//! `DISABLED -> PENDING` when setup starts, `-> ENABLED` after the first
//! valid TOTP with `is_setup`, back to `DISABLED` on disable (password plus
//! a current code). Passwords are checked on every login; a trusted device
//! only waives the second factor.

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use super::audit::AuditLog;
use super::error::ServiceError;
use super::metrics;
use super::security_monitor::SecurityMonitor;
use super::session::{SessionService, SessionToken};
use super::stores::UserStore;
use super::trusted_devices::{IssuedDevice, TrustedDeviceRegistry};
use super::two_factor::{looks_like_totp, TwoFactorService, TwoFactorSetup};
use crate::models::{
    AuditRecord, DeviceInfo, SecurityEventType, TwoFactorCredential, TwoFactorState, User,
};
use crate::utils::{hash_password, verify_password};

pub const LOGIN_ENDPOINT: &str = "auth.login";
pub const TWO_FACTOR_ENDPOINT: &str = "auth.two_factor";
const BACKUP_CODE_CAS_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SecondFactorMethod {
    NotRequired,
    TrustedDevice,
    Totp,
    BackupCode,
}

impl SecondFactorMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecondFactorMethod::NotRequired => "not_required",
            SecondFactorMethod::TrustedDevice => "trusted_device",
            SecondFactorMethod::Totp => "totp",
            SecondFactorMethod::BackupCode => "backup_code",
        }
    }
}

#[derive(Debug)]
pub struct LoginAttempt {
    pub email: String,
    pub password: SecretString,
    pub token: Option<String>,
    pub remember_device: bool,
    /// Value of the trusted-device cookie, if the browser sent one.
    pub device_token: Option<String>,
    pub device_info: DeviceInfo,
    pub origin: String,
}

#[derive(Debug)]
pub enum LoginOutcome {
    Authenticated {
        user: User,
        session: SessionToken,
        method: SecondFactorMethod,
        remembered_device: Option<IssuedDevice>,
    },
    TwoFactorRequired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TwoFactorStatus {
    pub enabled: bool,
    pub pending: bool,
    pub backup_codes_remaining: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyResult {
    pub method: SecondFactorMethod,
    /// True when this call moved the user from PENDING to ENABLED.
    pub enabled_now: bool,
}

#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserStore>,
    two_factor: TwoFactorService,
    devices: TrustedDeviceRegistry,
    sessions: SessionService,
    monitor: SecurityMonitor,
    audit: Arc<dyn AuditLog>,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserStore>,
        two_factor: TwoFactorService,
        devices: TrustedDeviceRegistry,
        sessions: SessionService,
        monitor: SecurityMonitor,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        Self {
            users,
            two_factor,
            devices,
            sessions,
            monitor,
            audit,
        }
    }

    pub fn sessions(&self) -> &SessionService {
        &self.sessions
    }

    pub fn devices(&self) -> &TrustedDeviceRegistry {
        &self.devices
    }

    pub fn two_factor(&self) -> &TwoFactorService {
        &self.two_factor
    }

    /// Create the account unless the email is already registered.
    pub async fn ensure_user(
        &self,
        email: &str,
        password: &SecretString,
        is_admin: bool,
    ) -> Result<User, ServiceError> {
        let email = normalize_email(email);
        if let Some(existing) = self.users.find_by_email(&email).await? {
            return Ok(existing);
        }

        let password_hash = hash_password(password)?;
        let user = User::new(email, password_hash, is_admin);
        if !self.users.insert(&user).await? {
            return self
                .users
                .find_by_email(&user.email)
                .await?
                .ok_or_else(|| ServiceError::Conflict("User already exists".to_string()));
        }

        tracing::info!(user_id = %user.user_id, is_admin, "Console user created");
        Ok(user)
    }

    pub async fn load_user(&self, user_id: Uuid) -> Result<User, ServiceError> {
        self.users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("User".to_string()))
    }

    #[tracing::instrument(skip(self, attempt), fields(origin = %attempt.origin))]
    pub async fn login(&self, attempt: LoginAttempt) -> Result<LoginOutcome, ServiceError> {
        self.login_at(attempt, Utc::now()).await
    }

    pub async fn login_at(
        &self,
        attempt: LoginAttempt,
        now: DateTime<Utc>,
    ) -> Result<LoginOutcome, ServiceError> {
        let email = normalize_email(&attempt.email);
        let user = match self.users.find_by_email(&email).await? {
            Some(user) if verify_password(&attempt.password, &user.password_hash) => user,
            _ => {
                self.reject_login(&attempt.origin, &email, "invalid credentials", now)
                    .await;
                return Err(ServiceError::InvalidCredential);
            }
        };

        let method = if !user.requires_second_factor() {
            SecondFactorMethod::NotRequired
        } else if self.device_vouches_for(&attempt, &user, now).await? {
            SecondFactorMethod::TrustedDevice
        } else {
            let Some(token) = attempt.token.as_deref().filter(|t| !t.trim().is_empty()) else {
                tracing::info!(user_id = %user.user_id, "Second factor required");
                return Ok(LoginOutcome::TwoFactorRequired);
            };

            match self.verify_second_factor(&user, token, now).await? {
                Some(method) => method,
                None => {
                    self.reject_login(&attempt.origin, &email, "invalid second factor", now)
                        .await;
                    return Err(ServiceError::InvalidCredential);
                }
            }
        };

        let remembered_device = match method {
            SecondFactorMethod::Totp | SecondFactorMethod::BackupCode if attempt.remember_device => {
                Some(
                    self.devices
                        .issue_at(user.user_id, attempt.device_info.clone(), now)
                        .await?,
                )
            }
            _ => None,
        };

        let session = self
            .sessions
            .issue(user.user_id, &user.email, user.is_admin)?;

        tracing::info!(user_id = %user.user_id, method = method.as_str(), "Login succeeded");
        self.write_audit(
            LOGIN_ENDPOINT,
            &attempt.origin,
            &user,
            "success",
            json!({ "method": method.as_str(), "remembered": remembered_device.is_some() }),
        )
        .await;

        Ok(LoginOutcome::Authenticated {
            user,
            session,
            method,
            remembered_device,
        })
    }

    async fn device_vouches_for(
        &self,
        attempt: &LoginAttempt,
        user: &User,
        now: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        let Some(token) = attempt.device_token.as_deref() else {
            return Ok(false);
        };
        let check = self.devices.check_at(token, now).await?;
        let vouches = check.trusted && check.user_id == Some(user.user_id);
        metrics::record_two_factor(SecondFactorMethod::TrustedDevice.as_str(), vouches);
        Ok(vouches)
    }

    async fn reject_login(&self, origin: &str, email: &str, reason: &str, now: DateTime<Utc>) {
        tracing::warn!(origin = %origin, reason = %reason, "Login rejected");
        self.monitor
            .record_at(
                SecurityEventType::FailedAccess,
                origin,
                LOGIN_ENDPOINT,
                &format!("{} for {}", reason, email),
                now,
            )
            .await;
        let record = AuditRecord::new(
            LOGIN_ENDPOINT,
            origin,
            Some(email.to_string()),
            "failure",
            json!({ "reason": reason }),
        );
        if let Err(e) = self.audit.record(record).await {
            tracing::error!(error = %e, "Failed to write audit record");
        }
    }

    /// TOTP when the token is six digits, otherwise a backup code.
    /// Returns `None` when the token does not verify.
    pub async fn verify_second_factor(
        &self,
        user: &User,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<SecondFactorMethod>, ServiceError> {
        let Some(encrypted_secret) = user.two_factor.encrypted_secret.as_deref() else {
            return Err(ServiceError::TwoFactorNotConfigured);
        };

        if looks_like_totp(token) {
            let valid = self
                .two_factor
                .verify_encrypted_code_at(encrypted_secret, token, now);
            metrics::record_two_factor(SecondFactorMethod::Totp.as_str(), valid);
            return Ok(valid.then_some(SecondFactorMethod::Totp));
        }

        let consumed = self.consume_backup_code(user.user_id, token).await?;
        metrics::record_two_factor(SecondFactorMethod::BackupCode.as_str(), consumed);
        if consumed {
            tracing::info!(user_id = %user.user_id, "Backup code consumed");
        }
        Ok(consumed.then_some(SecondFactorMethod::BackupCode))
    }

    /// Removes the matched code with a compare-and-set on the stored blob,
    /// so a code can be spent once even under concurrent logins.
    async fn consume_backup_code(&self, user_id: Uuid, code: &str) -> Result<bool, ServiceError> {
        for _ in 0..BACKUP_CODE_CAS_ATTEMPTS {
            let user = self.load_user(user_id).await?;
            let Some(encrypted) = user.two_factor.encrypted_backup_codes else {
                return Ok(false);
            };

            let check = self.two_factor.verify_backup_code(&encrypted, code);
            if !check.valid {
                return Ok(false);
            }

            let replacement = self
                .two_factor
                .encrypt_backup_codes(&check.remaining_codes)?;
            if self
                .users
                .compare_and_set_backup_codes(user_id, &encrypted, &replacement)
                .await?
            {
                return Ok(true);
            }
            tracing::debug!(user_id = %user_id, "Backup codes changed concurrently, retrying");
        }
        Ok(false)
    }

    pub async fn begin_setup(&self, user_id: Uuid) -> Result<TwoFactorSetup, ServiceError> {
        let user = self.load_user(user_id).await?;
        if user.two_factor.state() == TwoFactorState::Enabled {
            return Err(ServiceError::Conflict(
                "Two-factor authentication is already enabled".to_string(),
            ));
        }

        let setup = self.two_factor.generate_secret(&user.email);
        let credential = TwoFactorCredential {
            encrypted_secret: Some(self.two_factor.encrypt(&setup.secret)?),
            encrypted_backup_codes: Some(self.two_factor.encrypt_backup_codes(&setup.backup_codes)?),
            enabled: false,
        };
        self.users.save_two_factor(user_id, &credential).await?;

        tracing::info!(user_id = %user_id, "Two-factor setup started");
        self.write_audit("two_factor.setup", &user_id.to_string(), &user, "pending", json!({}))
            .await;
        Ok(setup)
    }

    pub async fn verify(
        &self,
        user_id: Uuid,
        token: &str,
        is_setup: bool,
    ) -> Result<VerifyResult, ServiceError> {
        self.verify_at(user_id, token, is_setup, Utc::now()).await
    }

    pub async fn verify_at(
        &self,
        user_id: Uuid,
        token: &str,
        is_setup: bool,
        now: DateTime<Utc>,
    ) -> Result<VerifyResult, ServiceError> {
        let user = self.load_user(user_id).await?;
        let state = user.two_factor.state();
        if state == TwoFactorState::Disabled {
            return Err(ServiceError::TwoFactorNotConfigured);
        }

        if is_setup && state == TwoFactorState::Pending {
            // Confirming setup proves the authenticator app works, so only TOTP counts.
            let valid = looks_like_totp(token)
                && self.two_factor.verify_encrypted_code_at(
                    user.two_factor.encrypted_secret.as_deref().unwrap_or_default(),
                    token,
                    now,
                );
            metrics::record_two_factor(SecondFactorMethod::Totp.as_str(), valid);
            if !valid {
                self.reject_second_factor(&user, now).await;
                return Err(ServiceError::InvalidCredential);
            }

            let mut credential = user.two_factor.clone();
            credential.enabled = true;
            self.users.save_two_factor(user_id, &credential).await?;

            tracing::info!(user_id = %user_id, "Two-factor authentication enabled");
            self.write_audit("two_factor.enable", &user_id.to_string(), &user, "success", json!({}))
                .await;
            return Ok(VerifyResult {
                method: SecondFactorMethod::Totp,
                enabled_now: true,
            });
        }

        if state != TwoFactorState::Enabled {
            return Err(ServiceError::TwoFactorNotConfigured);
        }

        match self.verify_second_factor(&user, token, now).await? {
            Some(method) => Ok(VerifyResult {
                method,
                enabled_now: false,
            }),
            None => {
                self.reject_second_factor(&user, now).await;
                Err(ServiceError::InvalidCredential)
            }
        }
    }

    async fn reject_second_factor(&self, user: &User, now: DateTime<Utc>) {
        self.monitor
            .record_at(
                SecurityEventType::FailedAccess,
                &user.user_id.to_string(),
                TWO_FACTOR_ENDPOINT,
                "invalid second factor",
                now,
            )
            .await;
    }

    pub async fn disable(
        &self,
        user_id: Uuid,
        password: &SecretString,
        token: &str,
    ) -> Result<(), ServiceError> {
        self.disable_at(user_id, password, token, Utc::now()).await
    }

    pub async fn disable_at(
        &self,
        user_id: Uuid,
        password: &SecretString,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let user = self.load_user(user_id).await?;
        if !verify_password(password, &user.password_hash) {
            self.reject_second_factor(&user, now).await;
            return Err(ServiceError::InvalidCredential);
        }
        if user.two_factor.state() != TwoFactorState::Enabled {
            return Err(ServiceError::TwoFactorNotConfigured);
        }

        if self.verify_second_factor(&user, token, now).await?.is_none() {
            self.reject_second_factor(&user, now).await;
            return Err(ServiceError::InvalidCredential);
        }

        self.users
            .save_two_factor(user_id, &TwoFactorCredential::default())
            .await?;
        let revoked = self.devices.revoke_all(user_id).await?;

        tracing::info!(user_id = %user_id, revoked_devices = revoked, "Two-factor authentication disabled");
        self.write_audit(
            "two_factor.disable",
            &user_id.to_string(),
            &user,
            "success",
            json!({ "revoked_devices": revoked }),
        )
        .await;
        Ok(())
    }

    pub async fn status(&self, user_id: Uuid) -> Result<TwoFactorStatus, ServiceError> {
        let user = self.load_user(user_id).await?;
        let state = user.two_factor.state();

        let backup_codes_remaining = match user.two_factor.encrypted_backup_codes.as_deref() {
            Some(encrypted) if state == TwoFactorState::Enabled => self
                .two_factor
                .decrypt_backup_codes(encrypted)
                .map(|codes| codes.len())
                .unwrap_or_else(|e| {
                    tracing::error!(error = %e, user_id = %user_id, "Backup codes unreadable");
                    0
                }),
            _ => 0,
        };

        Ok(TwoFactorStatus {
            enabled: state == TwoFactorState::Enabled,
            pending: state == TwoFactorState::Pending,
            backup_codes_remaining,
        })
    }

    /// Replaces the whole list. Requires a current TOTP code.
    pub async fn regenerate_backup_codes(
        &self,
        user_id: Uuid,
        token: &str,
    ) -> Result<Vec<String>, ServiceError> {
        self.regenerate_backup_codes_at(user_id, token, Utc::now()).await
    }

    pub async fn regenerate_backup_codes_at(
        &self,
        user_id: Uuid,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, ServiceError> {
        let user = self.load_user(user_id).await?;
        if user.two_factor.state() != TwoFactorState::Enabled {
            return Err(ServiceError::TwoFactorNotConfigured);
        }

        let valid = looks_like_totp(token)
            && self.two_factor.verify_encrypted_code_at(
                user.two_factor.encrypted_secret.as_deref().unwrap_or_default(),
                token,
                now,
            );
        metrics::record_two_factor(SecondFactorMethod::Totp.as_str(), valid);
        if !valid {
            self.reject_second_factor(&user, now).await;
            return Err(ServiceError::InvalidCredential);
        }

        let codes = super::two_factor::generate_backup_codes();
        let mut credential = user.two_factor.clone();
        credential.encrypted_backup_codes = Some(self.two_factor.encrypt_backup_codes(&codes)?);
        self.users.save_two_factor(user_id, &credential).await?;

        self.write_audit(
            "two_factor.backup_codes_regenerated",
            &user_id.to_string(),
            &user,
            "success",
            json!({ "count": codes.len() }),
        )
        .await;
        Ok(codes)
    }

    async fn write_audit(
        &self,
        action: &str,
        origin: &str,
        user: &User,
        outcome: &str,
        details: serde_json::Value,
    ) {
        let record = AuditRecord::new(action, origin, Some(user.user_id.to_string()), outcome, details);
        if let Err(e) = self.audit.record(record).await {
            tracing::error!(error = %e, action = %action, "Failed to write audit record");
        }
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
