use chrono::{DateTime, Utc};
use serde::Deserialize;
use utoipa::ToSchema;
use validator::Validate;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateLicenseRequest {
    /// Generated when omitted.
    #[validate(length(min = 1, max = 128))]
    #[schema(example = "ABC123")]
    pub license_key: Option<String>,

    #[validate(length(min = 1, max = 200, message = "Client name is required"))]
    #[schema(example = "Acme Corp")]
    pub client_name: String,

    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateValidityRequest {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}
