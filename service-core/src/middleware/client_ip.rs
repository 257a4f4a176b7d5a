//! Client address resolution behind reverse proxies.
//!
//! `X-Forwarded-For` is only believed when the TCP peer is a configured
//! proxy. Anyone else could put an arbitrary address there.

use axum::{
    extract::ConnectInfo,
    http::{Extensions, HeaderMap},
};
use std::{
    net::{IpAddr, SocketAddr},
    str::FromStr,
    sync::Arc,
};

pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Peers allowed to report the client address via `X-Forwarded-For`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustedProxies(Arc<[IpAddr]>);

impl TrustedProxies {
    pub fn new(proxies: impl IntoIterator<Item = IpAddr>) -> Self {
        Self(proxies.into_iter().collect())
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        self.0.iter().any(|p| p == ip || p.to_canonical() == ip.to_canonical())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[IpAddr] {
        &self.0
    }

    /// Address of the client given the socket peer and request headers.
    ///
    /// The first forwarded hop wins when the peer is trusted and the hop
    /// parses; otherwise the peer itself. `None` only without a peer.
    pub fn resolve(&self, headers: &HeaderMap, peer: Option<IpAddr>) -> Option<IpAddr> {
        let peer = peer?;
        if !self.contains(&peer) {
            return Some(peer);
        }

        headers
            .get(FORWARDED_FOR_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.split(',').next())
            .and_then(|s| s.trim().parse::<IpAddr>().ok())
            .or(Some(peer))
    }

    /// [`resolve`](Self::resolve) with the peer taken from axum's `ConnectInfo`.
    pub fn resolve_parts(&self, headers: &HeaderMap, extensions: &Extensions) -> Option<IpAddr> {
        self.resolve(headers, peer_ip(extensions))
    }
}

impl FromStr for TrustedProxies {
    type Err = std::net::AddrParseError;

    /// Comma-separated addresses; blanks are skipped.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse::<IpAddr>)
            .collect::<Result<Vec<_>, _>>()
            .map(Self::new)
    }
}

pub fn peer_ip(extensions: &Extensions) -> Option<IpAddr> {
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}
