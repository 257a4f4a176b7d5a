pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use service_core::axum::{
    extract::FromRef,
    http::{header, HeaderName, HeaderValue, Method, Request},
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, patch, post},
    Router,
};
use service_core::middleware::{
    client_ip::TrustedProxies,
    rate_limit::{rate_limit_middleware, RateLimitConfig, RateLimitLayer, RateLimitObserver, RateLimiter},
    security_headers::security_headers_middleware,
    tracing::request_id_middleware,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::{
    openapi::security::{ApiKey, ApiKeyValue, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::config::AccessConfig;
use crate::services::{
    AuditLog, AuthService, Database, InMemoryLicenseStore, InMemorySecurityEventStore,
    InMemoryTrustedDeviceStore, InMemoryUserStore, LicenseService, LicenseStore, LogNotifier,
    NotificationChannel, SecretCipher, SecurityMonitor, SessionService, TracingAuditLog,
    TrustedDeviceRegistry, TrustedDeviceStore, TwoFactorService, UserStore,
};
use service_core::error::AppError;
use std::sync::Arc;

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check,
        handlers::license::activate_license,
        handlers::license::license_status,
        handlers::admin::create_license,
        handlers::admin::update_validity,
        handlers::admin::disassociate_license,
        handlers::session::login,
        handlers::two_factor::setup,
        handlers::two_factor::verify,
        handlers::two_factor::disable,
        handlers::two_factor::status,
        handlers::two_factor::regenerate_backup_codes,
        handlers::devices::list_devices,
        handlers::devices::revoke_device,
    ),
    components(
        schemas(
            dtos::ErrorResponse,
            dtos::MessageResponse,
            dtos::license::VerifyLicenseRequest,
            dtos::license::LicenseVerifyResponse,
            dtos::admin::CreateLicenseRequest,
            dtos::admin::UpdateValidityRequest,
            dtos::auth::LoginRequest,
            dtos::auth::LoginResponse,
            dtos::auth::TwoFactorRequiredResponse,
            dtos::two_factor::VerifyTwoFactorRequest,
            dtos::two_factor::VerifyTwoFactorResponse,
            dtos::two_factor::DisableTwoFactorRequest,
            dtos::two_factor::RegenerateBackupCodesRequest,
            dtos::two_factor::BackupCodesResponse,
            models::LicenseSnapshot,
            models::LicenseStatus,
            models::TrustedDeviceView,
            services::SessionToken,
            services::SecondFactorMethod,
            services::TwoFactorSetup,
            services::TwoFactorStatus,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "License", description = "License activation and domain binding"),
        (name = "Authentication", description = "Console login"),
        (name = "Two-Factor", description = "Second factor and trusted devices"),
        (name = "Admin", description = "License administration"),
        (name = "Observability", description = "Service health and monitoring"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    utoipa::openapi::security::HttpBuilder::new()
                        .scheme(utoipa::openapi::security::HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
            components.add_security_scheme(
                "admin_api_key",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new("x-admin-api-key"))),
            );
        }
    }
}

/// The stores and channels the services run against.
pub struct Collaborators {
    pub licenses: Arc<dyn LicenseStore>,
    pub users: Arc<dyn UserStore>,
    pub devices: Arc<dyn TrustedDeviceStore>,
    pub audit: Arc<dyn AuditLog>,
    pub notifier: Arc<dyn NotificationChannel>,
    pub rate_limiter: RateLimiter,
    pub db: Option<Database>,
}

impl Collaborators {
    /// Single-instance deployment; nothing survives a restart.
    pub fn in_memory() -> Self {
        Self {
            licenses: Arc::new(InMemoryLicenseStore::new()),
            users: Arc::new(InMemoryUserStore::new()),
            devices: Arc::new(InMemoryTrustedDeviceStore::new()),
            audit: Arc::new(TracingAuditLog),
            notifier: Arc::new(LogNotifier),
            rate_limiter: RateLimiter::in_memory(),
            db: None,
        }
    }

    pub fn postgres(db: Database) -> Self {
        let store = Arc::new(db.clone());
        Self {
            licenses: store.clone(),
            users: store.clone(),
            devices: store.clone(),
            audit: store,
            notifier: Arc::new(LogNotifier),
            rate_limiter: RateLimiter::in_memory(),
            db: Some(db),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationChannel>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditLog>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_rate_limiter(mut self, rate_limiter: RateLimiter) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: AccessConfig,
    pub db: Option<Database>,
    pub license_service: LicenseService,
    pub auth_service: AuthService,
    pub monitor: SecurityMonitor,
    pub rate_limiter: RateLimiter,
}

impl AppState {
    pub fn new(config: AccessConfig, collaborators: Collaborators) -> Result<Self, AppError> {
        let cipher = SecretCipher::from_key_material(&config.two_factor.encryption_key)
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("TWO_FACTOR_ENCRYPTION_KEY: {}", e)))?;
        let sessions = SessionService::new(&config.session.secret, config.session.expiry_minutes)
            .map_err(AppError::ConfigError)?;

        let monitor = SecurityMonitor::new(
            Arc::new(InMemorySecurityEventStore::new()),
            collaborators.notifier,
            config.monitor.local_offset,
        );

        let license_service = LicenseService::new(
            collaborators.licenses,
            monitor.clone(),
            collaborators.audit.clone(),
        );

        let auth_service = AuthService::new(
            collaborators.users,
            TwoFactorService::new(cipher, config.two_factor.issuer.clone()),
            TrustedDeviceRegistry::new(collaborators.devices, config.two_factor.trusted_device_days),
            sessions,
            monitor.clone(),
            collaborators.audit,
        );

        Ok(Self {
            config,
            db: collaborators.db,
            license_service,
            auth_service,
            monitor,
            rate_limiter: collaborators.rate_limiter,
        })
    }

    fn rate_limit_layer(&self, config: RateLimitConfig) -> RateLimitLayer {
        let observer: Arc<dyn RateLimitObserver> = Arc::new(self.monitor.clone());
        RateLimitLayer::new(self.rate_limiter.clone(), config)
            .with_trusted_proxies(self.config.security.trusted_proxies.clone())
            .with_observer(observer)
    }
}

impl FromRef<AppState> for TrustedProxies {
    fn from_ref(state: &AppState) -> Self {
        state.config.security.trusted_proxies.clone()
    }
}

pub async fn build_router(state: AppState) -> Result<Router, AppError> {
    // License activation: the untrusted plugin surface
    let license_routes = Router::new()
        .route(
            "/license/verify",
            post(handlers::license::activate_license).get(handlers::license::license_status),
        )
        .layer(from_fn_with_state(
            state.rate_limit_layer(RateLimitConfig::high()),
            rate_limit_middleware,
        ));

    // Admin routes
    let admin_routes = Router::new()
        .route("/admin/licenses", post(handlers::admin::create_license))
        .route(
            "/admin/licenses/:license_key/validity",
            patch(handlers::admin::update_validity),
        )
        .route(
            "/admin/licenses/:license_key/disassociate",
            post(handlers::admin::disassociate_license),
        )
        .layer(from_fn_with_state(
            state.clone(),
            middleware::admin_auth_middleware,
        ))
        .layer(from_fn_with_state(
            state.rate_limit_layer(RateLimitConfig::low()),
            rate_limit_middleware,
        ));

    // Login and second-factor key material
    let login_route = Router::new()
        .route("/auth/login", post(handlers::session::login))
        .layer(from_fn_with_state(
            state.rate_limit_layer(RateLimitConfig::critical()),
            rate_limit_middleware,
        ));

    let two_factor_routes = Router::new()
        .route("/auth/2fa/setup", post(handlers::two_factor::setup))
        .route("/auth/2fa/verify", post(handlers::two_factor::verify))
        .route("/auth/2fa/disable", post(handlers::two_factor::disable))
        .route(
            "/auth/2fa/backup-codes/regenerate",
            post(handlers::two_factor::regenerate_backup_codes),
        )
        .layer(from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ))
        .layer(from_fn_with_state(
            state.rate_limit_layer(RateLimitConfig::critical()),
            rate_limit_middleware,
        ));

    let session_reads = Router::new()
        .route("/auth/2fa/status", get(handlers::two_factor::status))
        .route("/auth/devices", get(handlers::devices::list_devices))
        .route(
            "/auth/devices/:device_id",
            delete(handlers::devices::revoke_device),
        )
        .layer(from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ))
        .layer(from_fn_with_state(
            state.rate_limit_layer(RateLimitConfig::medium()),
            rate_limit_middleware,
        ));

    let mut app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(handlers::metrics::metrics));

    if state.config.swagger.enabled {
        app =
            app.merge(SwaggerUi::new("/docs").url("/.well-known/openapi.json", ApiDoc::openapi()));
    } else {
        app = app.route(
            "/.well-known/openapi.json",
            get(|| async { service_core::axum::Json(ApiDoc::openapi()) }),
        );
    }

    let allowed_origins = state
        .config
        .security
        .allowed_origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!("Invalid CORS origin '{}': {}. Skipping.", o, e);
                None
            }
        })
        .collect::<Vec<HeaderValue>>();

    let app = app
        .merge(license_routes)
        .merge(admin_routes)
        .merge(login_route)
        .merge(two_factor_routes)
        .merge(session_reads)
        .with_state(state.clone())
        .layer(from_fn(middleware::metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
            let request_id = request
                .headers()
                .get("x-request-id")
                .and_then(|value| value.to_str().ok())
                .unwrap_or("-");

            tracing::info_span!(
                "http_request",
                request_id = %request_id,
                method = %request.method(),
                uri = %request.uri(),
                version = ?request.version(),
            )
        }))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(allowed_origins)
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PATCH,
                    Method::DELETE,
                    Method::OPTIONS,
                ])
                .allow_headers([
                    header::AUTHORIZATION,
                    header::CONTENT_TYPE,
                    HeaderName::from_static("x-admin-api-key"),
                ]),
        );

    Ok(app)
}

/// Service health check
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
        (status = 500, description = "Service is unhealthy")
    ),
    tag = "Observability"
)]
pub async fn health_check(
    service_core::axum::extract::State(state): service_core::axum::extract::State<AppState>,
) -> Result<service_core::axum::Json<serde_json::Value>, AppError> {
    let postgres = match &state.db {
        Some(db) => {
            db.health_check().await.map_err(|e| {
                tracing::error!(error = %e, "PostgreSQL health check failed");
                e
            })?;
            "up"
        }
        None => "not_configured",
    };

    Ok(service_core::axum::Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "environment": format!("{:?}", state.config.environment),
        "checks": {
            "postgresql": postgres,
        }
    })))
}
