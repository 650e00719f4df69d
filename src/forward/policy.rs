//! Request policy of the forwarding proxy: target validation, SSRF
//! defenses, and the host allow-list.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use axum::http::StatusCode;
use serde::Serialize;
use tracing::debug;
use url::Url;

use crate::url_normalize::host_matches;

/// Why the proxy refused a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyRejection {
    MethodNotAllowed,
    MissingUrlParam,
    InvalidTargetUrl,
    UnsupportedProtocol,
    CredentialInUrl,
    PrivateHostBlocked,
    HostNotAllowed,
    UpstreamFetchFailed { message: String, timeout_ms: u64 },
}

impl ProxyRejection {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyRejection::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ProxyRejection::MissingUrlParam
            | ProxyRejection::InvalidTargetUrl
            | ProxyRejection::UnsupportedProtocol
            | ProxyRejection::CredentialInUrl => StatusCode::BAD_REQUEST,
            ProxyRejection::PrivateHostBlocked | ProxyRejection::HostNotAllowed => {
                StatusCode::FORBIDDEN
            }
            ProxyRejection::UpstreamFetchFailed { .. } => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Wire code returned in the `error` field.
    pub fn code(&self) -> &'static str {
        match self {
            ProxyRejection::MethodNotAllowed => "method_not_allowed",
            ProxyRejection::MissingUrlParam => "missing_url_param",
            ProxyRejection::InvalidTargetUrl => "invalid_target_url",
            ProxyRejection::UnsupportedProtocol => "unsupported_protocol",
            ProxyRejection::CredentialInUrl => "credential_in_url_not_allowed",
            ProxyRejection::PrivateHostBlocked => "private_host_blocked",
            ProxyRejection::HostNotAllowed => "host_not_allowed",
            ProxyRejection::UpstreamFetchFailed { .. } => "upstream_fetch_failed",
        }
    }

    pub fn body(&self) -> RejectionBody<'_> {
        match self {
            ProxyRejection::UpstreamFetchFailed {
                message,
                timeout_ms,
            } => RejectionBody {
                error: self.code(),
                message: Some(message),
                timeout_ms: Some(*timeout_ms),
            },
            _ => RejectionBody {
                error: self.code(),
                message: None,
                timeout_ms: None,
            },
        }
    }
}

impl std::fmt::Display for ProxyRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// JSON error body.
#[derive(Debug, Serialize)]
pub struct RejectionBody<'a> {
    pub error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// Outcome of checking one proxy request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardingDecision {
    pub target: Url,
    /// Lowercased host without IPv6 brackets or trailing dot.
    pub host: String,
    pub allowed: bool,
    pub private: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum AllowRule {
    Any,
    Exact(String),
    /// `*.example.com`: the domain and any subdomain.
    Suffix(String),
}

impl AllowRule {
    fn parse(entry: &str) -> Option<Self> {
        let entry = entry.trim().trim_end_matches('.').to_ascii_lowercase();
        if entry.is_empty() {
            return None;
        }
        if entry == "*" {
            return Some(AllowRule::Any);
        }
        match entry.strip_prefix("*.") {
            Some(suffix) if !suffix.is_empty() => Some(AllowRule::Suffix(suffix.to_string())),
            Some(_) => None,
            None => Some(AllowRule::Exact(entry)),
        }
    }

    fn matches(&self, host: &str) -> bool {
        match self {
            AllowRule::Any => true,
            AllowRule::Exact(exact) => host == exact,
            AllowRule::Suffix(suffix) => host_matches(host, suffix),
        }
    }
}

/// Allow-list and private-host settings applied to each request.
#[derive(Debug, Clone)]
pub struct ForwardPolicy {
    allowlist: Vec<AllowRule>,
    block_private_hosts: bool,
}

impl ForwardPolicy {
    /// An empty allow-list admits every public host.
    pub fn new<S: AsRef<str>>(allowlist: &[S], block_private_hosts: bool) -> Self {
        Self {
            allowlist: allowlist
                .iter()
                .filter_map(|e| AllowRule::parse(e.as_ref()))
                .collect(),
            block_private_hosts,
        }
    }

    /// Checks the `url` parameter of a request, in wire-contract order.
    pub fn evaluate(&self, raw: Option<&str>) -> Result<ForwardingDecision, ProxyRejection> {
        let raw = raw
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(ProxyRejection::MissingUrlParam)?;
        let target = Url::parse(raw).map_err(|_| ProxyRejection::InvalidTargetUrl)?;

        if !matches!(target.scheme(), "http" | "https") {
            return Err(ProxyRejection::UnsupportedProtocol);
        }
        if !target.username().is_empty() || target.password().is_some() {
            return Err(ProxyRejection::CredentialInUrl);
        }

        let host = target
            .host_str()
            .map(normalize_host)
            .filter(|h| !h.is_empty())
            .ok_or(ProxyRejection::InvalidTargetUrl)?;

        let private = is_private_host(&host);
        if private && self.block_private_hosts {
            debug!(host = %host, "private host blocked");
            return Err(ProxyRejection::PrivateHostBlocked);
        }

        let allowed = self.is_allowed(&host);
        if !allowed {
            debug!(host = %host, "host not in allow-list");
            return Err(ProxyRejection::HostNotAllowed);
        }

        Ok(ForwardingDecision {
            target,
            host,
            allowed,
            private,
        })
    }

    pub fn is_allowed(&self, host: &str) -> bool {
        self.allowlist.is_empty() || self.allowlist.iter().any(|rule| rule.matches(host))
    }

    pub fn blocks_private_hosts(&self) -> bool {
        self.block_private_hosts
    }

    /// Resolves the decision's host and rejects it if any address is
    /// private. Hosts that fail to resolve pass; the upstream fetch will
    /// fail on its own.
    pub async fn check_resolved(&self, decision: &ForwardingDecision) -> Result<(), ProxyRejection> {
        if !self.block_private_hosts || decision.host.parse::<IpAddr>().is_ok() {
            return Ok(());
        }
        let port = decision.target.port_or_known_default().unwrap_or(80);
        let Ok(addrs) = tokio::net::lookup_host((decision.host.as_str(), port)).await else {
            return Ok(());
        };
        for addr in addrs {
            if is_private_ip(addr.ip()) {
                debug!(host = %decision.host, ip = %addr.ip(), "host resolves to private address");
                return Err(ProxyRejection::PrivateHostBlocked);
            }
        }
        Ok(())
    }
}

fn normalize_host(host: &str) -> String {
    host.trim_start_matches('[')
        .trim_end_matches(']')
        .trim_end_matches('.')
        .to_ascii_lowercase()
}

/// Loopback, private, link-local, and local-suffix hosts.
pub fn is_private_host(host: &str) -> bool {
    let host = normalize_host(host);
    if let Ok(ip) = host.parse::<IpAddr>() {
        return is_private_ip(ip);
    }
    host == "localhost"
        || host.ends_with(".localhost")
        || host == "local"
        || host.ends_with(".local")
}

pub fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_private_v4(v4),
        IpAddr::V6(v6) => is_private_v6(v6),
    }
}

fn is_private_v4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        // carrier-grade NAT, 100.64.0.0/10
        || (a == 100 && (64..128).contains(&b))
}

fn is_private_v6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped().or_else(|| embedded_v4(ip)) {
        return is_private_v4(v4);
    }
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        // unique local fc00::/7
        || (first & 0xfe00) == 0xfc00
        // link-local fe80::/10
        || (first & 0xffc0) == 0xfe80
}

/// The IPv4 address carried in the low 32 bits of IPv4-compatible
/// (`::a.b.c.d`) and NAT64 well-known prefix (`64:ff9b::/96`) addresses.
fn embedded_v4(ip: Ipv6Addr) -> Option<Ipv4Addr> {
    let segments = ip.segments();
    let compatible = segments[..6] == [0; 6] && !ip.is_loopback() && !ip.is_unspecified();
    let nat64 = segments[..6] == [0x64, 0xff9b, 0, 0, 0, 0];
    if !(compatible || nat64) {
        return None;
    }
    let [.., a, b, c, d] = ip.octets();
    Some(Ipv4Addr::new(a, b, c, d))
}
