//! Stateless forwarding proxy: `GET /?url=<target>` fetched on the caller's
//! behalf after protocol, credential, private-host, and allow-list checks.
//!
//! Deployed on its own via the `a3s-forward-proxy` binary; direct fetches
//! reach it through [`ForwardingEndpoint`](crate::proxy::ForwardingEndpoint).

pub mod policy;
pub mod server;

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use policy::{ForwardPolicy, ForwardingDecision, ProxyRejection};
pub use server::{router, serve, ProxyState};

/// Value of the `x-proxy-by` response header.
pub const PROXY_NAME: &str = "a3s-forward-proxy";

/// Settings of the proxy server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwardProxyConfig {
    /// Listen address.
    pub bind: String,
    /// Exact hosts and `*.suffix` patterns. Empty admits every public host.
    pub allowlist: Vec<String>,
    pub block_private_hosts: bool,
    /// Pass `cookie` upstream and `set-cookie` back.
    pub forward_cookies: bool,
    pub upstream_timeout_ms: u64,
    /// TTL of the response cache in seconds; 0 disables caching.
    pub cache_ttl_s: u64,
    pub cache_capacity: u64,
    /// Also reject hosts whose DNS records point at private addresses.
    pub resolve_dns: bool,
}

impl Default for ForwardProxyConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8787".to_string(),
            allowlist: Vec::new(),
            block_private_hosts: true,
            forward_cookies: false,
            upstream_timeout_ms: 15_000,
            cache_ttl_s: 0,
            cache_capacity: 1_000,
            resolve_dns: false,
        }
    }
}

impl ForwardProxyConfig {
    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        (self.cache_ttl_s > 0).then(|| Duration::from_secs(self.cache_ttl_s))
    }

    pub fn policy(&self) -> ForwardPolicy {
        ForwardPolicy::new(&self.allowlist, self.block_private_hosts)
    }
}
