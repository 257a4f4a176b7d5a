use chrono::Utc;
use service_core::{
    axum::{
        extract::{Path, State},
        http::StatusCode,
        response::IntoResponse,
        Json,
    },
    error::AppError,
};

use crate::{
    dtos::admin::{CreateLicenseRequest, UpdateValidityRequest},
    middleware::ClientOrigin,
    utils::ValidatedJson,
    AppState,
};

fn actor(origin: &ClientOrigin) -> String {
    format!("admin@{}", origin.ip)
}

/// Create a license (starts INACTIVE and unbound)
#[utoipa::path(
    post,
    path = "/admin/licenses",
    request_body = CreateLicenseRequest,
    responses(
        (status = 201, description = "License created", body = LicenseSnapshot),
        (status = 400, description = "Invalid validity window", body = ErrorResponse),
        (status = 401, description = "Invalid admin API key", body = ErrorResponse),
        (status = 409, description = "License key already exists", body = ErrorResponse)
    ),
    tag = "Admin",
    security(("admin_api_key" = []))
)]
pub async fn create_license(
    State(state): State<AppState>,
    origin: ClientOrigin,
    ValidatedJson(req): ValidatedJson<CreateLicenseRequest>,
) -> Result<impl IntoResponse, AppError> {
    let license = state
        .license_service
        .create_license(
            req.license_key,
            &req.client_name,
            req.start_date,
            req.end_date,
            &actor(&origin),
        )
        .await?;

    Ok((StatusCode::CREATED, Json(license.snapshot_at(Utc::now()))))
}

/// Replace a license's validity window
#[utoipa::path(
    patch,
    path = "/admin/licenses/{license_key}/validity",
    params(("license_key" = String, Path, description = "License key")),
    request_body = UpdateValidityRequest,
    responses(
        (status = 200, description = "Validity updated", body = LicenseSnapshot),
        (status = 400, description = "Invalid validity window", body = ErrorResponse),
        (status = 404, description = "Unknown license key", body = ErrorResponse)
    ),
    tag = "Admin",
    security(("admin_api_key" = []))
)]
pub async fn update_validity(
    State(state): State<AppState>,
    origin: ClientOrigin,
    Path(license_key): Path<String>,
    ValidatedJson(req): ValidatedJson<UpdateValidityRequest>,
) -> Result<impl IntoResponse, AppError> {
    let license = state
        .license_service
        .update_validity(&license_key, req.start_date, req.end_date, &actor(&origin))
        .await?;

    Ok(Json(license.snapshot_at(Utc::now())))
}

/// Release a license's domain binding
#[utoipa::path(
    post,
    path = "/admin/licenses/{license_key}/disassociate",
    params(("license_key" = String, Path, description = "License key")),
    responses(
        (status = 200, description = "Binding cleared", body = LicenseSnapshot),
        (status = 404, description = "Unknown license key", body = ErrorResponse)
    ),
    tag = "Admin",
    security(("admin_api_key" = []))
)]
pub async fn disassociate_license(
    State(state): State<AppState>,
    origin: ClientOrigin,
    Path(license_key): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let license = state
        .license_service
        .disassociate(&license_key, &actor(&origin))
        .await?;

    Ok(Json(license.snapshot_at(Utc::now())))
}
