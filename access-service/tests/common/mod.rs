//! Shared setup for access-service integration tests.
//!
//! Every test gets its own router over in-memory stores, a recording
//! notifier and an in-memory audit log.

#![allow(dead_code)]

use access_service::{
    build_router,
    config::{
        AccessConfig, Environment, MonitorConfig, SecurityConfig, SessionConfig, SweepConfig,
        SwaggerConfig, TwoFactorConfig,
    },
    models::{License, User},
    services::{
        metrics::init_metrics, totp, InMemoryAuditLog, InMemoryLicenseStore, LicenseStore,
        RecordingNotifier,
    },
    AppState, Collaborators,
};
use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use chrono::{Duration, Offset, Utc};
use http_body_util::BodyExt;
use secrecy::SecretString;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::util::ServiceExt;

pub const TEST_ADMIN_API_KEY: &str = "test-admin-key-12345";
pub const TEST_ENCRYPTION_KEY: &str =
    "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";
pub const TEST_SESSION_SECRET: &str = "test-session-secret-that-is-long-enough-for-hs256";
pub const ADMIN_EMAIL: &str = "admin@example.com";
pub const ADMIN_PASSWORD: &str = "correct horse battery staple";
/// Socket peer for requests that carry a client address; configured as a
/// trusted proxy so its `X-Forwarded-For` is honored.
pub const PROXY_PEER: &str = "127.0.0.1:40000";

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Value of the `trusted_device` cookie set by this response, if any.
    pub fn trusted_device_cookie(&self) -> Option<String> {
        self.headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find(|v| v.starts_with("trusted_device=") && !v.starts_with("trusted_device=;"))
            .and_then(|v| v.split(';').next())
            .and_then(|pair| pair.split_once('='))
            .map(|(_, value)| value.to_string())
            .filter(|value| !value.is_empty())
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub licenses: Arc<InMemoryLicenseStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub audit: Arc<InMemoryAuditLog>,
}

pub fn test_config() -> AccessConfig {
    AccessConfig {
        common: service_core::config::Config::default(),
        environment: Environment::Dev,
        service_name: "access-service-test".to_string(),
        service_version: "test".to_string(),
        log_level: "error".to_string(),
        otlp_endpoint: None,
        database: None,
        redis_url: None,
        security: SecurityConfig {
            allowed_origins: vec!["http://localhost:3000".to_string()],
            admin_api_key: SecretString::new(TEST_ADMIN_API_KEY.to_string()),
            trusted_proxies: "127.0.0.1".parse().expect("Invalid proxy list"),
        },
        two_factor: TwoFactorConfig {
            encryption_key: SecretString::new(TEST_ENCRYPTION_KEY.to_string()),
            issuer: "License Console".to_string(),
            trusted_device_days: 30,
        },
        session: SessionConfig {
            secret: SecretString::new(TEST_SESSION_SECRET.to_string()),
            expiry_minutes: 60,
        },
        monitor: MonitorConfig {
            local_offset: Utc.fix(),
            alert_webhook_url: None,
        },
        sweeps: SweepConfig {
            rate_limit_seconds: 60,
            security_event_seconds: 300,
        },
        swagger: SwaggerConfig { enabled: false },
    }
}

impl TestApp {
    pub async fn spawn() -> Self {
        let _ = init_metrics();

        let licenses = Arc::new(InMemoryLicenseStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let audit = Arc::new(InMemoryAuditLog::new());

        let mut collaborators = Collaborators::in_memory()
            .with_notifier(notifier.clone())
            .with_audit(audit.clone());
        collaborators.licenses = licenses.clone();

        let state = AppState::new(test_config(), collaborators).expect("Failed to build state");
        let router = build_router(state.clone())
            .await
            .expect("Failed to build router");

        Self {
            router,
            state,
            licenses,
            notifier,
            audit,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Request failed");

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to read body")
            .to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };

        TestResponse {
            status,
            headers,
            body,
        }
    }

    /// Seed an unbound license valid from yesterday for `days_left` days.
    pub async fn seed_license(&self, key: &str, days_left: i64) -> License {
        let now = Utc::now();
        let license = License::new(key, "Acme Corp", now - Duration::days(1), now + Duration::days(days_left));
        assert!(self.licenses.insert(&license).await.unwrap());
        license
    }

    pub async fn seed_expired_license(&self, key: &str) -> License {
        let now = Utc::now();
        let license = License::new(key, "Lapsed Ltd", now - Duration::days(60), now - Duration::days(1));
        assert!(self.licenses.insert(&license).await.unwrap());
        license
    }

    pub async fn activate(&self, key: &str, domain: &str, ip: Option<&str>) -> TestResponse {
        let body = serde_json::json!({ "license_key": key, "domain": domain });
        self.send(json_request(Method::POST, "/license/verify", &body, ip))
            .await
    }

    pub async fn create_admin(&self) -> User {
        self.state
            .auth_service
            .ensure_user(
                ADMIN_EMAIL,
                &SecretString::new(ADMIN_PASSWORD.to_string()),
                true,
            )
            .await
            .expect("Failed to create admin")
    }

    pub fn bearer_for(&self, user: &User) -> String {
        self.state
            .auth_service
            .sessions()
            .issue(user.user_id, &user.email, user.is_admin)
            .expect("Failed to issue session")
            .access_token
    }

    /// Run setup and confirm it; returns the plain secret and backup codes.
    pub async fn enable_two_factor(&self, user: &User) -> (String, Vec<String>) {
        let setup = self
            .state
            .auth_service
            .begin_setup(user.user_id)
            .await
            .expect("Setup failed");
        let code = totp::current_code(&setup.secret, Utc::now()).expect("Invalid secret");
        self.state
            .auth_service
            .verify(user.user_id, &code, true)
            .await
            .expect("Confirmation failed");
        (setup.secret, setup.backup_codes)
    }

    /// Poll until the recording notifier holds `count` alerts or give up.
    pub async fn wait_for_alerts(&self, count: usize) -> usize {
        for _ in 0..50 {
            let seen = self.notifier.alerts().len();
            if seen >= count {
                return seen;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        self.notifier.alerts().len()
    }
}

pub fn json_request(method: Method, uri: &str, body: &Value, ip: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(ip) = ip {
        builder = builder
            .header("x-forwarded-for", ip)
            .extension(proxy_peer());
    }
    builder
        .body(Body::from(body.to_string()))
        .expect("Failed to build request")
}

pub fn empty_request(method: Method, uri: &str, ip: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(ip) = ip {
        builder = builder
            .header("x-forwarded-for", ip)
            .extension(proxy_peer());
    }
    builder.body(Body::empty()).expect("Failed to build request")
}

fn proxy_peer() -> ConnectInfo<SocketAddr> {
    ConnectInfo(PROXY_PEER.parse().expect("Invalid peer address"))
}

/// Replace the socket peer, as if the request arrived directly from `addr`.
pub fn from_peer(mut request: Request<Body>, addr: &str) -> Request<Body> {
    let addr: SocketAddr = addr.parse().expect("Invalid peer address");
    request.extensions_mut().insert(ConnectInfo(addr));
    request
}

pub fn with_bearer(mut request: Request<Body>, token: &str) -> Request<Body> {
    request.headers_mut().insert(
        header::AUTHORIZATION,
        format!("Bearer {}", token).parse().expect("Invalid token header"),
    );
    request
}

pub fn with_header(mut request: Request<Body>, name: &'static str, value: &str) -> Request<Body> {
    request
        .headers_mut()
        .insert(name, value.parse().expect("Invalid header value"));
    request
}
