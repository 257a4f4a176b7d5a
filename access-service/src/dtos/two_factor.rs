use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::services::SecondFactorMethod;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct VerifyTwoFactorRequest {
    #[validate(length(min = 1, max = 32, message = "Token is required"))]
    #[schema(example = "123456")]
    pub token: String,

    #[serde(default)]
    pub is_setup: bool,

    #[serde(default)]
    pub remember_device: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct VerifyTwoFactorResponse {
    pub verified: bool,
    pub method: SecondFactorMethod,
    pub enabled: bool,
    pub device_remembered: bool,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct DisableTwoFactorRequest {
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,

    #[validate(length(min = 1, max = 32, message = "Token is required"))]
    pub token: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RegenerateBackupCodesRequest {
    #[validate(length(equal = 6, message = "A current authenticator code is required"))]
    #[schema(example = "123456")]
    pub token: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BackupCodesResponse {
    pub backup_codes: Vec<String>,
}
