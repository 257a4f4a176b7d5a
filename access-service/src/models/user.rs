//! Console user accounts and their second-factor credential.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// Second-factor material. Both fields hold ciphertext, never plaintext.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TwoFactorCredential {
    pub encrypted_secret: Option<String>,
    pub encrypted_backup_codes: Option<String>,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TwoFactorState {
    Disabled,
    /// Secret issued, waiting for the first valid code.
    Pending,
    Enabled,
}

impl TwoFactorCredential {
    pub fn state(&self) -> TwoFactorState {
        match (self.enabled, self.encrypted_secret.is_some()) {
            (true, true) => TwoFactorState::Enabled,
            (false, true) => TwoFactorState::Pending,
            _ => TwoFactorState::Disabled,
        }
    }
}

#[derive(Debug, Clone)]
pub struct User {
    pub user_id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub is_admin: bool,
    pub two_factor: TwoFactorCredential,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(email: impl Into<String>, password_hash: impl Into<String>, is_admin: bool) -> Self {
        Self {
            user_id: Uuid::new_v4(),
            email: email.into(),
            password_hash: password_hash.into(),
            is_admin,
            two_factor: TwoFactorCredential::default(),
            created_at: Utc::now(),
        }
    }

    /// Whether login must present a second factor.
    pub fn requires_second_factor(&self) -> bool {
        self.two_factor.state() == TwoFactorState::Enabled
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub user_id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub is_admin: bool,
    pub two_factor_secret: Option<String>,
    pub two_factor_backup_codes: Option<String>,
    pub two_factor_enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            user_id: row.user_id,
            email: row.email,
            password_hash: row.password_hash,
            is_admin: row.is_admin,
            two_factor: TwoFactorCredential {
                encrypted_secret: row.two_factor_secret,
                encrypted_backup_codes: row.two_factor_backup_codes,
                enabled: row.two_factor_enabled,
            },
            created_at: row.created_at,
        }
    }
}
