use chrono::{FixedOffset, Offset, Utc};
use secrecy::SecretString;
use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use service_core::middleware::client_ip::TrustedProxies;
use std::env;
use std::time::Duration;

use crate::models::DEFAULT_TRUSTED_DEVICE_DAYS;

pub const MAX_TRUSTED_DEVICE_DAYS: i64 = 365;
/// One week.
pub const MAX_SESSION_EXPIRY_MINUTES: i64 = 7 * 24 * 60;

#[derive(Debug, Clone)]
pub struct AccessConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: Option<DatabaseConfig>,
    pub redis_url: Option<String>,
    pub security: SecurityConfig,
    pub two_factor: TwoFactorConfig,
    pub session: SessionConfig,
    pub monitor: MonitorConfig,
    pub sweeps: SweepConfig,
    pub swagger: SwaggerConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
    pub admin_api_key: SecretString,
    /// Peers whose `X-Forwarded-For` is believed. Empty means the socket
    /// peer is always the client.
    pub trusted_proxies: TrustedProxies,
}

#[derive(Debug, Clone)]
pub struct TwoFactorConfig {
    /// 32 bytes, hex or base64.
    pub encryption_key: SecretString,
    pub issuer: String,
    pub trusted_device_days: i64,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub secret: SecretString,
    pub expiry_minutes: i64,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Offset used to decide the local hour for unusual-hour probes.
    pub local_offset: FixedOffset,
    pub alert_webhook_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub rate_limit_seconds: u64,
    pub security_event_seconds: u64,
}

impl SweepConfig {
    pub fn intervals(&self) -> crate::services::SweepIntervals {
        crate::services::SweepIntervals {
            rate_limit: Duration::from_secs(self.rate_limit_seconds),
            security_events: Duration::from_secs(self.security_event_seconds),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SwaggerConfig {
    pub enabled: bool,
}

impl AccessConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = AccessConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("access-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: optional_env("OTEL_EXPORTER_OTLP_ENDPOINT"),
            database: match optional_env("DATABASE_URL") {
                Some(url) => Some(DatabaseConfig {
                    url,
                    max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "10", is_prod)?,
                    min_connections: parse_env("DATABASE_MIN_CONNECTIONS", "1", is_prod)?,
                }),
                None => None,
            },
            redis_url: optional_env("REDIS_URL"),
            security: SecurityConfig {
                allowed_origins: get_env("ALLOWED_ORIGINS", Some("http://localhost:3000"), is_prod)?
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                admin_api_key: SecretString::new(get_env("ADMIN_API_KEY", None, true)?),
                trusted_proxies: optional_env("TRUSTED_PROXIES")
                    .map(|v| v.parse::<TrustedProxies>())
                    .transpose()
                    .map_err(|e| AppError::ConfigError(anyhow::anyhow!("TRUSTED_PROXIES: {}", e)))?
                    .unwrap_or_default(),
            },
            two_factor: TwoFactorConfig {
                encryption_key: SecretString::new(get_env("TWO_FACTOR_ENCRYPTION_KEY", None, true)?),
                issuer: get_env("TOTP_ISSUER", Some("License Console"), is_prod)?,
                trusted_device_days: parse_env(
                    "TRUSTED_DEVICE_DAYS",
                    &DEFAULT_TRUSTED_DEVICE_DAYS.to_string(),
                    is_prod,
                )?,
            },
            session: SessionConfig {
                secret: SecretString::new(get_env("SESSION_SECRET", None, true)?),
                expiry_minutes: parse_env("SESSION_EXPIRY_MINUTES", "60", is_prod)?,
            },
            monitor: MonitorConfig {
                local_offset: parse_offset(&get_env("LOCAL_UTC_OFFSET", Some("+00:00"), is_prod)?)?,
                alert_webhook_url: optional_env("ALERT_WEBHOOK_URL"),
            },
            sweeps: SweepConfig {
                rate_limit_seconds: parse_env("SWEEP_RATE_LIMIT_SECONDS", "60", is_prod)?,
                security_event_seconds: parse_env("SWEEP_SECURITY_EVENTS_SECONDS", "300", is_prod)?,
            },
            swagger: SwaggerConfig {
                enabled: get_env("ENABLE_SWAGGER", Some(if is_prod { "false" } else { "true" }), is_prod)?
                    .parse()
                    .unwrap_or(false),
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if !(1..=MAX_SESSION_EXPIRY_MINUTES).contains(&self.session.expiry_minutes) {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "SESSION_EXPIRY_MINUTES must be between 1 and {}",
                MAX_SESSION_EXPIRY_MINUTES
            )));
        }

        if !(1..=MAX_TRUSTED_DEVICE_DAYS).contains(&self.two_factor.trusted_device_days) {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "TRUSTED_DEVICE_DAYS must be between 1 and {}",
                MAX_TRUSTED_DEVICE_DAYS
            )));
        }

        if self.sweeps.rate_limit_seconds == 0 || self.sweeps.security_event_seconds == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "Sweep intervals must be positive"
            )));
        }

        if let Some(db) = &self.database {
            if db.min_connections > db.max_connections {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "DATABASE_MIN_CONNECTIONS exceeds DATABASE_MAX_CONNECTIONS"
                )));
            }
        }

        if self.environment == Environment::Prod {
            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Wildcard CORS origin not allowed in production"
                )));
            }

            if self.database.is_none() {
                tracing::warn!("DATABASE_URL not set in production - license and user data will not survive a restart");
            }

            if self.swagger.enabled {
                tracing::warn!("Swagger UI is enabled in production");
            }
        }

        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
}

/// `+05:30`, `-08:00` or `Z`.
pub fn parse_offset(value: &str) -> Result<FixedOffset, AppError> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("z") || value.eq_ignore_ascii_case("utc") {
        return Ok(Utc.fix());
    }

    let invalid = || AppError::ConfigError(anyhow::anyhow!("Invalid UTC offset: {}", value));

    let (sign, rest) = match value.as_bytes().first() {
        Some(b'+') => (1, &value[1..]),
        Some(b'-') => (-1, &value[1..]),
        _ => return Err(invalid()),
    };
    let (hours, minutes) = rest.split_once(':').ok_or_else(invalid)?;
    let hours = unsigned_digits(hours, 1..=2).ok_or_else(invalid)?;
    let minutes = unsigned_digits(minutes, 2..=2).ok_or_else(invalid)?;
    if hours > 14 || minutes >= 60 {
        return Err(invalid());
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}

/// Plain ASCII digits only; `i32::from_str` would also take a sign.
fn unsigned_digits(s: &str, len: std::ops::RangeInclusive<usize>) -> Option<i32> {
    if !len.contains(&s.len()) || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}
