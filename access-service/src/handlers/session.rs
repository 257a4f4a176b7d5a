use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use secrecy::SecretString;
use service_core::{
    axum::{
        extract::State,
        http::StatusCode,
        response::{IntoResponse, Response},
        Json,
    },
    error::AppError,
};

use crate::{
    dtos::auth::{LoginRequest, LoginResponse, TwoFactorRequiredResponse},
    middleware::ClientOrigin,
    services::{LoginAttempt, LoginOutcome},
    utils::ValidatedJson,
    AppState,
};

pub const TRUSTED_DEVICE_COOKIE: &str = "trusted_device";

pub(crate) fn trusted_device_cookie(token: String, ttl: chrono::Duration) -> Cookie<'static> {
    Cookie::build((TRUSTED_DEVICE_COOKIE, token))
        .path("/")
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Strict)
        .max_age(time::Duration::seconds(ttl.num_seconds()))
        .build()
}

pub(crate) fn expired_device_cookie() -> Cookie<'static> {
    Cookie::build(TRUSTED_DEVICE_COOKIE).path("/").build()
}

/// Console login with password and, when enabled, a second factor
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = LoginResponse),
        (status = 401, description = "Invalid credentials, or a second factor is required", body = TwoFactorRequiredResponse),
        (status = 422, description = "Validation error", body = ErrorResponse),
        (status = 429, description = "Rate limited", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
#[tracing::instrument(skip(state, jar, req), fields(origin = %origin.ip))]
pub async fn login(
    State(state): State<AppState>,
    origin: ClientOrigin,
    jar: CookieJar,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<Response, AppError> {
    let attempt = LoginAttempt {
        email: req.email,
        password: SecretString::new(req.password),
        token: req.token,
        remember_device: req.remember_device,
        device_token: jar.get(TRUSTED_DEVICE_COOKIE).map(|c| c.value().to_string()),
        device_info: origin.device_info(),
        origin: origin.ip.clone(),
    };

    match state.auth_service.login(attempt).await? {
        LoginOutcome::TwoFactorRequired => Ok((
            StatusCode::UNAUTHORIZED,
            Json(TwoFactorRequiredResponse::new()),
        )
            .into_response()),
        LoginOutcome::Authenticated {
            session,
            method,
            remembered_device,
            ..
        } => {
            let device_remembered = remembered_device.is_some();
            let jar = match remembered_device {
                Some(device) => jar.add(trusted_device_cookie(
                    device.token,
                    state.auth_service.devices().ttl(),
                )),
                None => jar,
            };

            Ok((
                jar,
                Json(LoginResponse {
                    session,
                    second_factor: method,
                    device_remembered,
                }),
            )
                .into_response())
        }
    }
}
