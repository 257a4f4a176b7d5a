use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::services::{SecondFactorMethod, SessionToken};

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "admin@example.com")]
    pub email: String,

    #[validate(length(min = 1, message = "Password is required"))]
    #[schema(example = "password123")]
    pub password: String,

    /// TOTP code or backup code.
    #[schema(example = "123456")]
    pub token: Option<String>,

    #[serde(default)]
    pub remember_device: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LoginResponse {
    #[serde(flatten)]
    pub session: SessionToken,
    pub second_factor: SecondFactorMethod,
    pub device_remembered: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TwoFactorRequiredResponse {
    #[schema(example = "Two-factor code required")]
    pub error: String,
    pub two_factor_required: bool,
}

impl TwoFactorRequiredResponse {
    pub fn new() -> Self {
        Self {
            error: "Two-factor code required".to_string(),
            two_factor_required: true,
        }
    }
}

impl Default for TwoFactorRequiredResponse {
    fn default() -> Self {
        Self::new()
    }
}
