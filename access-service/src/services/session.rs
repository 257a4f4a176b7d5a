use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Console session tokens (HS256).
#[derive(Clone)]
pub struct SessionService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiry_minutes: i64,
}

/// Claims for console session tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject (user ID)
    pub sub: String,
    pub email: String,
    pub is_admin: bool,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    pub jti: String,
}

impl SessionClaims {
    pub fn user_id(&self) -> Result<Uuid, anyhow::Error> {
        Uuid::parse_str(&self.sub).map_err(|e| anyhow::anyhow!("Invalid subject in session: {}", e))
    }
}

/// Token response returned to client
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SessionToken {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

impl SessionService {
    pub fn new(secret: &SecretString, expiry_minutes: i64) -> Result<Self, anyhow::Error> {
        let secret = secret.expose_secret().as_bytes();
        if secret.len() < 32 {
            return Err(anyhow::anyhow!("Session secret must be at least 32 bytes"));
        }
        if expiry_minutes <= 0 || Duration::try_minutes(expiry_minutes).is_none() {
            return Err(anyhow::anyhow!("Session expiry out of range: {} minutes", expiry_minutes));
        }

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            expiry_minutes,
        })
    }

    pub fn issue(&self, user_id: Uuid, email: &str, is_admin: bool) -> Result<SessionToken, anyhow::Error> {
        let now = Utc::now();
        let exp = now + Duration::minutes(self.expiry_minutes);

        let claims = SessionClaims {
            sub: user_id.to_string(),
            email: email.to_string(),
            is_admin,
            exp: exp.timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| anyhow::anyhow!("Failed to encode session token: {}", e))?;

        Ok(SessionToken {
            access_token: token,
            token_type: "Bearer".to_string(),
            expires_in: self.expiry_minutes * 60,
        })
    }

    pub fn validate(&self, token: &str) -> Result<SessionClaims, jsonwebtoken::errors::Error> {
        let validation = Validation::new(Algorithm::HS256);
        decode::<SessionClaims>(token, &self.decoding_key, &validation).map(|data| data.claims)
    }
}
