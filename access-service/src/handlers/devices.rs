use service_core::{
    axum::{
        extract::{Path, State},
        http::StatusCode,
        response::IntoResponse,
        Json,
    },
    error::AppError,
};
use uuid::Uuid;

use crate::{middleware::AuthUser, models::TrustedDeviceView, services::ServiceError, AppState};

/// Devices currently exempt from the second factor
#[utoipa::path(
    get,
    path = "/auth/devices",
    responses(
        (status = 200, description = "Trusted devices, newest first", body = [TrustedDeviceView]),
        (status = 401, description = "Missing or invalid session", body = ErrorResponse)
    ),
    tag = "Two-Factor",
    security(("bearer_auth" = []))
)]
pub async fn list_devices(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let devices = state
        .auth_service
        .devices()
        .list(user.user_id()?)
        .await?
        .into_iter()
        .map(TrustedDeviceView::from)
        .collect::<Vec<_>>();

    Ok(Json(devices))
}

/// Forget a trusted device
#[utoipa::path(
    delete,
    path = "/auth/devices/{device_id}",
    params(("device_id" = Uuid, Path, description = "Device id")),
    responses(
        (status = 204, description = "Device revoked"),
        (status = 404, description = "No such device for this user", body = ErrorResponse)
    ),
    tag = "Two-Factor",
    security(("bearer_auth" = []))
)]
pub async fn revoke_device(
    State(state): State<AppState>,
    user: AuthUser,
    Path(device_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let removed = state
        .auth_service
        .devices()
        .revoke(device_id, user.user_id()?)
        .await?;

    if !removed {
        return Err(ServiceError::NotFound("Device".to_string()).into());
    }
    Ok(StatusCode::NO_CONTENT)
}
