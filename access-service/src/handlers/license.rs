use chrono::Utc;
use service_core::{
    axum::{
        extract::{Query, State},
        http::StatusCode,
        response::IntoResponse,
        Json,
    },
    error::AppError,
};
use validator::Validate;

use crate::{
    dtos::license::{LicenseVerifyResponse, VerifyLicenseQuery, VerifyLicenseRequest},
    middleware::ClientOrigin,
    models::ActivationOutcome,
    services::ServiceError,
    utils::ValidatedJson,
    AppState,
};

/// Activate a license for a domain, or heartbeat an existing binding
#[utoipa::path(
    post,
    path = "/license/verify",
    request_body = VerifyLicenseRequest,
    responses(
        (status = 200, description = "License active for this domain", body = LicenseVerifyResponse),
        (status = 403, description = "Access denied", body = ErrorResponse),
        (status = 404, description = "Unknown license key", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse),
        (status = 429, description = "Rate limited", body = ErrorResponse)
    ),
    tag = "License"
)]
#[tracing::instrument(skip(state, req), fields(origin = %origin.ip))]
pub async fn activate_license(
    State(state): State<AppState>,
    origin: ClientOrigin,
    ValidatedJson(req): ValidatedJson<VerifyLicenseRequest>,
) -> Result<impl IntoResponse, AppError> {
    let now = Utc::now();
    let outcome = state
        .license_service
        .activate_at(req.license_key.trim(), &req.domain, &origin.ip, now)
        .await?;

    let license = match outcome {
        ActivationOutcome::Activated(license) | ActivationOutcome::AlreadyValid(license) => license,
        ActivationOutcome::DomainMismatch { authorized_domain } => {
            return Err(ServiceError::DomainMismatch { authorized_domain }.into())
        }
        ActivationOutcome::Expired => return Err(ServiceError::Expired.into()),
        ActivationOutcome::NotFound => {
            return Err(ServiceError::NotFound("License".to_string()).into())
        }
    };

    Ok((
        StatusCode::OK,
        Json(LicenseVerifyResponse {
            valid: true,
            license: license.snapshot_at(now),
        }),
    ))
}

/// Read-only license status
#[utoipa::path(
    get,
    path = "/license/verify",
    params(VerifyLicenseQuery),
    responses(
        (status = 200, description = "Current license state", body = LicenseVerifyResponse),
        (status = 404, description = "Unknown license key", body = ErrorResponse),
        (status = 429, description = "Rate limited", body = ErrorResponse)
    ),
    tag = "License"
)]
pub async fn license_status(
    State(state): State<AppState>,
    origin: ClientOrigin,
    Query(query): Query<VerifyLicenseQuery>,
) -> Result<impl IntoResponse, AppError> {
    query.validate()?;

    let snapshot = state
        .license_service
        .verify(query.license_key.trim(), &origin.ip)
        .await?;

    Ok(Json(LicenseVerifyResponse {
        valid: snapshot.valid,
        license: snapshot,
    }))
}
