//! Client IP resolution.
//!
//! The address recorded for each exchange is chosen by an [`IpStrategy`]
//! configured once on the [`CaptureConfig`](crate::CaptureConfig).
//! Resolution never fails: a missing header or peer address yields `""`.

use http::request::Parts;
use http::HeaderMap;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use crate::error::ConfigError;

/// Header injected by the CDN with the connecting client address.
pub const PROXY_IP_HEADER: &str = "cf-connecting-ip";
/// Standard forwarding chain header.
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
/// Real client IP header set by common reverse proxies.
pub const X_REAL_IP: &str = "x-real-ip";

/// Transport-level peer address of the connection.
///
/// The host server inserts this into the request extensions when it accepts
/// a connection; [`IpStrategy::RemoteSocket`] reads it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerAddr(pub SocketAddr);

/// How to find the client IP of a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IpStrategy {
    /// Read the CDN connecting-IP header verbatim.
    ProxyHeader,
    /// Left-most address of `X-Forwarded-For`, else `X-Real-IP`.
    #[default]
    ForwardedOrRealIp,
    /// Peer address of the socket as `host:port`.
    ///
    /// Behind any reverse proxy this is the proxy's address. Local use only.
    RemoteSocket,
}

impl IpStrategy {
    /// Resolve the client IP for a request.
    pub fn resolve(&self, parts: &Parts) -> String {
        match self {
            IpStrategy::ProxyHeader => header_str(&parts.headers, PROXY_IP_HEADER),
            IpStrategy::ForwardedOrRealIp => forwarded_or_real_ip(&parts.headers),
            IpStrategy::RemoteSocket => parts
                .extensions
                .get::<PeerAddr>()
                .map(|peer| peer.0.to_string())
                .unwrap_or_default(),
        }
    }

    /// Stable name used in configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            IpStrategy::ProxyHeader => "proxy-header",
            IpStrategy::ForwardedOrRealIp => "forwarded",
            IpStrategy::RemoteSocket => "remote",
        }
    }
}

/// Resolve the client IP, treating an unset strategy as "unknown".
pub fn resolve_client_ip(parts: &Parts, strategy: Option<IpStrategy>) -> String {
    strategy.map(|s| s.resolve(parts)).unwrap_or_default()
}

impl fmt::Display for IpStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IpStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "proxy-header" | "cloudflare" => Ok(IpStrategy::ProxyHeader),
            "forwarded" | "forwarded-or-real-ip" => Ok(IpStrategy::ForwardedOrRealIp),
            "remote" | "remote-socket" => Ok(IpStrategy::RemoteSocket),
            other => Err(ConfigError::UnknownIpStrategy(other.to_string())),
        }
    }
}

fn forwarded_or_real_ip(headers: &HeaderMap) -> String {
    let forwarded = header_str(headers, X_FORWARDED_FOR);
    if !forwarded.is_empty() {
        return match forwarded.find(", ") {
            Some(idx) => forwarded[..idx].to_string(),
            None => forwarded,
        };
    }

    header_str(headers, X_REAL_IP)
}

/// First value of a header, or `""`.
fn header_str(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
        .unwrap_or_default()
}
