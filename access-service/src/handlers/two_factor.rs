use axum_extra::extract::cookie::CookieJar;
use secrecy::SecretString;
use service_core::{
    axum::{extract::State, response::IntoResponse, Json},
    error::AppError,
};

use super::session::{expired_device_cookie, trusted_device_cookie};
use crate::{
    dtos::{
        two_factor::{
            BackupCodesResponse, DisableTwoFactorRequest, RegenerateBackupCodesRequest,
            VerifyTwoFactorRequest, VerifyTwoFactorResponse,
        },
        MessageResponse,
    },
    middleware::{AuthUser, ClientOrigin},
    services::SecondFactorMethod,
    utils::ValidatedJson,
    AppState,
};

/// Start two-factor setup
///
/// The secret and backup codes are shown once; the account stays PENDING
/// until a code is confirmed with `is_setup`.
#[utoipa::path(
    post,
    path = "/auth/2fa/setup",
    responses(
        (status = 200, description = "Secret issued", body = TwoFactorSetup),
        (status = 401, description = "Missing or invalid session", body = ErrorResponse),
        (status = 409, description = "Already enabled", body = ErrorResponse)
    ),
    tag = "Two-Factor",
    security(("bearer_auth" = []))
)]
pub async fn setup(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let setup = state.auth_service.begin_setup(user.user_id()?).await?;
    Ok(Json(setup))
}

/// Verify a second-factor code
#[utoipa::path(
    post,
    path = "/auth/2fa/verify",
    request_body = VerifyTwoFactorRequest,
    responses(
        (status = 200, description = "Code accepted", body = VerifyTwoFactorResponse),
        (status = 400, description = "Two-factor not set up", body = ErrorResponse),
        (status = 401, description = "Invalid code", body = ErrorResponse)
    ),
    tag = "Two-Factor",
    security(("bearer_auth" = []))
)]
#[tracing::instrument(skip_all, fields(user_id = %user.0.sub))]
pub async fn verify(
    State(state): State<AppState>,
    user: AuthUser,
    origin: ClientOrigin,
    jar: CookieJar,
    ValidatedJson(req): ValidatedJson<VerifyTwoFactorRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = user.user_id()?;
    let result = state
        .auth_service
        .verify(user_id, req.token.trim(), req.is_setup)
        .await?;

    let remembered = match result.method {
        SecondFactorMethod::Totp | SecondFactorMethod::BackupCode if req.remember_device => Some(
            state
                .auth_service
                .devices()
                .issue(user_id, origin.device_info())
                .await?,
        ),
        _ => None,
    };

    let device_remembered = remembered.is_some();
    let jar = match remembered {
        Some(device) => jar.add(trusted_device_cookie(
            device.token,
            state.auth_service.devices().ttl(),
        )),
        None => jar,
    };

    Ok((
        jar,
        Json(VerifyTwoFactorResponse {
            verified: true,
            method: result.method,
            enabled: true,
            device_remembered,
        }),
    ))
}

/// Turn two-factor authentication off
///
/// Requires the password and a current code (TOTP or backup). Every trusted
/// device is revoked.
#[utoipa::path(
    post,
    path = "/auth/2fa/disable",
    request_body = DisableTwoFactorRequest,
    responses(
        (status = 200, description = "Disabled", body = MessageResponse),
        (status = 400, description = "Two-factor not enabled", body = ErrorResponse),
        (status = 401, description = "Invalid password or code", body = ErrorResponse)
    ),
    tag = "Two-Factor",
    security(("bearer_auth" = []))
)]
pub async fn disable(
    State(state): State<AppState>,
    user: AuthUser,
    jar: CookieJar,
    ValidatedJson(req): ValidatedJson<DisableTwoFactorRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .auth_service
        .disable(
            user.user_id()?,
            &SecretString::new(req.password),
            req.token.trim(),
        )
        .await?;

    Ok((
        jar.remove(expired_device_cookie()),
        Json(MessageResponse::new("Two-factor authentication disabled")),
    ))
}

/// Current two-factor state
#[utoipa::path(
    get,
    path = "/auth/2fa/status",
    responses(
        (status = 200, description = "Two-factor state", body = TwoFactorStatus),
        (status = 401, description = "Missing or invalid session", body = ErrorResponse)
    ),
    tag = "Two-Factor",
    security(("bearer_auth" = []))
)]
pub async fn status(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let status = state.auth_service.status(user.user_id()?).await?;
    Ok(Json(status))
}

/// Replace the backup code list
#[utoipa::path(
    post,
    path = "/auth/2fa/backup-codes/regenerate",
    request_body = RegenerateBackupCodesRequest,
    responses(
        (status = 200, description = "New backup codes", body = BackupCodesResponse),
        (status = 401, description = "Invalid code", body = ErrorResponse)
    ),
    tag = "Two-Factor",
    security(("bearer_auth" = []))
)]
pub async fn regenerate_backup_codes(
    State(state): State<AppState>,
    user: AuthUser,
    ValidatedJson(req): ValidatedJson<RegenerateBackupCodesRequest>,
) -> Result<impl IntoResponse, AppError> {
    let backup_codes = state
        .auth_service
        .regenerate_backup_codes(user.user_id()?, req.token.trim())
        .await?;
    Ok(Json(BackupCodesResponse { backup_codes }))
}
