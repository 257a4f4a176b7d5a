use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::models::LicenseSnapshot;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct VerifyLicenseRequest {
    #[validate(length(min = 1, max = 128, message = "License key is required"))]
    #[schema(example = "ABC123")]
    pub license_key: String,

    #[validate(length(min = 1, max = 253, message = "Domain is required"))]
    #[schema(example = "example.com")]
    pub domain: String,
}

#[derive(Debug, Deserialize, Validate, IntoParams)]
pub struct VerifyLicenseQuery {
    #[validate(length(min = 1, max = 128, message = "License key is required"))]
    #[param(example = "ABC123")]
    pub license_key: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LicenseVerifyResponse {
    pub valid: bool,
    pub license: LicenseSnapshot,
}
