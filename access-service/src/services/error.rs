use service_core::error::AppError;
use thiserror::Error;

use super::crypto::CryptoError;

/// Domain failures. Activation failures are deliberately collapsed when
/// turned into HTTP responses; the audit trail keeps the distinction.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("License is bound to {authorized_domain}")]
    DomainMismatch { authorized_domain: String },

    #[error("License expired")]
    Expired,

    #[error("Invalid credentials")]
    InvalidCredential,

    #[error("Two-factor authentication is not set up")]
    TwoFactorNotConfigured,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::NotFound(what) => AppError::NotFound(anyhow::anyhow!("{} not found", what)),
            ServiceError::DomainMismatch { .. } | ServiceError::Expired => {
                AppError::Forbidden(anyhow::anyhow!("Access denied"))
            }
            ServiceError::InvalidCredential => {
                AppError::AuthError(anyhow::anyhow!("Invalid credentials"))
            }
            ServiceError::TwoFactorNotConfigured => AppError::BadRequest(anyhow::anyhow!(
                "Two-factor authentication is not set up"
            )),
            ServiceError::Validation(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            ServiceError::Conflict(msg) => AppError::Conflict(anyhow::anyhow!(msg)),
            ServiceError::Crypto(e) => AppError::InternalError(anyhow::anyhow!(e)),
            ServiceError::Database(e) => AppError::DatabaseError(anyhow::anyhow!(e)),
            ServiceError::Internal(e) => AppError::InternalError(e),
        }
    }
}
