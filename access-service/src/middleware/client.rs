use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use service_core::middleware::client_ip::TrustedProxies;
use std::convert::Infallible;

use crate::models::DeviceInfo;

/// Caller address as used for audit and security events. Resolved the
/// same way as the rate limiter keys requests; `unknown` without a peer.
#[derive(Debug, Clone)]
pub struct ClientOrigin {
    pub ip: String,
    pub user_agent: Option<String>,
}

impl ClientOrigin {
    pub fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            user_agent: self.user_agent.clone(),
            ip_address: Some(self.ip.clone()),
        }
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for ClientOrigin
where
    TrustedProxies: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let ip = TrustedProxies::from_ref(state)
            .resolve_parts(&parts.headers, &parts.extensions)
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "unknown".to_string());

        let user_agent = parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.chars().take(512).collect());

        Ok(Self { ip, user_agent })
    }
}
