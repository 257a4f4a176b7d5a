//! Second-factor primitives: secret issuance, code checks and backup codes.
//!
//! Nothing here touches storage. Callers persist what they get back.

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::Serialize;
use subtle::ConstantTimeEq;
use utoipa::ToSchema;

use super::crypto::{CryptoError, SecretCipher};
use super::totp;

pub const BACKUP_CODE_COUNT: usize = 10;
const BACKUP_CODE_BYTES: usize = 4;

/// Material shown to the user exactly once during setup.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TwoFactorSetup {
    pub secret: String,
    pub provisioning_uri: String,
    pub backup_codes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupCodeCheck {
    pub valid: bool,
    /// Codes left after removing the match. Untouched when `valid` is false.
    pub remaining_codes: Vec<String>,
}

#[derive(Clone)]
pub struct TwoFactorService {
    cipher: SecretCipher,
    issuer: String,
}

impl TwoFactorService {
    pub fn new(cipher: SecretCipher, issuer: impl Into<String>) -> Self {
        Self {
            cipher,
            issuer: issuer.into(),
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn generate_secret(&self, identity: &str) -> TwoFactorSetup {
        let secret = totp::generate_secret();
        let provisioning_uri = totp::provisioning_uri(&self.issuer, identity, &secret);
        TwoFactorSetup {
            secret,
            provisioning_uri,
            backup_codes: generate_backup_codes(),
        }
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        self.cipher.encrypt(plaintext)
    }

    pub fn decrypt(&self, ciphertext: &str) -> Result<String, CryptoError> {
        self.cipher.decrypt(ciphertext)
    }

    pub fn verify_code(&self, secret: &str, code: &str) -> bool {
        self.verify_code_at(secret, code, Utc::now())
    }

    pub fn verify_code_at(&self, secret: &str, code: &str, now: DateTime<Utc>) -> bool {
        totp::verify_at(secret, code, now, totp::SKEW_STEPS)
    }

    /// Decrypts the stored secret first. A secret that cannot be decrypted
    /// never verifies.
    pub fn verify_encrypted_code_at(
        &self,
        encrypted_secret: &str,
        code: &str,
        now: DateTime<Utc>,
    ) -> bool {
        match self.cipher.decrypt(encrypted_secret) {
            Ok(secret) => self.verify_code_at(&secret, code, now),
            Err(e) => {
                tracing::error!(error = %e, "Stored two-factor secret could not be decrypted");
                false
            }
        }
    }

    pub fn encrypt_backup_codes(&self, codes: &[String]) -> Result<String, CryptoError> {
        let json = serde_json::to_string(codes)
            .map_err(|e| CryptoError::Encryption(e.to_string()))?;
        self.cipher.encrypt(&json)
    }

    pub fn decrypt_backup_codes(&self, encrypted: &str) -> Result<Vec<String>, CryptoError> {
        let json = self.cipher.decrypt(encrypted)?;
        serde_json::from_str(&json).map_err(|e| CryptoError::Decryption(e.to_string()))
    }

    /// Case-insensitive match against the stored list; the matched code is removed.
    pub fn verify_backup_code(&self, encrypted_codes: &str, code: &str) -> BackupCodeCheck {
        let codes = match self.decrypt_backup_codes(encrypted_codes) {
            Ok(codes) => codes,
            Err(e) => {
                tracing::error!(error = %e, "Stored backup codes could not be decrypted");
                return BackupCodeCheck {
                    valid: false,
                    remaining_codes: Vec::new(),
                };
            }
        };

        let candidate = normalize_backup_code(code);
        let position = codes.iter().position(|stored| {
            bool::from(
                normalize_backup_code(stored)
                    .as_bytes()
                    .ct_eq(candidate.as_bytes()),
            )
        });

        match position {
            Some(index) if !candidate.is_empty() => {
                let mut remaining = codes;
                remaining.remove(index);
                BackupCodeCheck {
                    valid: true,
                    remaining_codes: remaining,
                }
            }
            _ => BackupCodeCheck {
                valid: false,
                remaining_codes: codes,
            },
        }
    }
}

fn normalize_backup_code(code: &str) -> String {
    code.trim().replace('-', "").to_ascii_uppercase()
}

/// Ten codes of eight uppercase hex characters.
pub fn generate_backup_codes() -> Vec<String> {
    let mut rng = rand::rngs::OsRng;
    (0..BACKUP_CODE_COUNT)
        .map(|_| {
            let mut bytes = [0u8; BACKUP_CODE_BYTES];
            rng.fill_bytes(&mut bytes);
            hex::encode_upper(bytes)
        })
        .collect()
}

/// Whether `token` looks like a TOTP code rather than a backup code.
pub fn looks_like_totp(token: &str) -> bool {
    let token = token.trim();
    token.len() == totp::DIGITS as usize && token.bytes().all(|b| b.is_ascii_digit())
}
