//! Outbound routing: an upstream HTTP/SOCKS proxy and the forwarding-proxy
//! endpoint that direct fetches can be sent through.

use reqwest::Proxy as ReqwestProxy;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Result, SearchError};

/// Proxy protocol type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyProtocol {
    /// HTTP proxy
    #[default]
    Http,
    /// HTTPS proxy
    Https,
    /// SOCKS5 proxy
    Socks5,
}

/// An outbound proxy used for every HTTP request the crate makes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
    pub protocol: ProxyProtocol,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ProxyConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            protocol: ProxyProtocol::Http,
            username: None,
            password: None,
        }
    }

    pub fn with_protocol(mut self, protocol: ProxyProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Parses `scheme://[user:pass@]host[:port]`.
    ///
    /// Missing ports default to 8080 for HTTP(S) and 1080 for SOCKS5.
    pub fn parse(raw: &str) -> Result<Self> {
        let url = Url::parse(raw.trim())?;

        let protocol = match url.scheme() {
            "http" => ProxyProtocol::Http,
            "https" => ProxyProtocol::Https,
            "socks5" | "socks5h" => ProxyProtocol::Socks5,
            scheme => {
                return Err(SearchError::Config(format!(
                    "Unsupported proxy protocol: {scheme}"
                )))
            }
        };

        let host = url
            .host_str()
            .ok_or_else(|| SearchError::Config("Missing proxy host".to_string()))?;
        let port = url.port().unwrap_or(match protocol {
            ProxyProtocol::Http | ProxyProtocol::Https => 8080,
            ProxyProtocol::Socks5 => 1080,
        });

        let mut config = ProxyConfig::new(host, port).with_protocol(protocol);
        if let Some(password) = url.password() {
            config = config.with_auth(url.username(), password);
        }
        Ok(config)
    }

    /// Returns the proxy URL string.
    pub fn url(&self) -> String {
        let scheme = match self.protocol {
            ProxyProtocol::Http => "http",
            ProxyProtocol::Https => "https",
            ProxyProtocol::Socks5 => "socks5",
        };

        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => {
                format!("{}://{}:{}@{}:{}", scheme, user, pass, self.host, self.port)
            }
            _ => format!("{}://{}:{}", scheme, self.host, self.port),
        }
    }

    /// Builds the reqwest proxy covering all schemes.
    pub fn to_reqwest(&self) -> Result<ReqwestProxy> {
        ReqwestProxy::all(self.url())
            .map_err(|e| SearchError::Config(format!("Invalid proxy URL: {e}")))
    }
}

/// Address of a deployed forwarding proxy (`GET {base}?url=<target>`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardingEndpoint {
    base: String,
}

impl ForwardingEndpoint {
    pub fn new(base: impl AsRef<str>) -> Result<Self> {
        let base = base.as_ref().trim().trim_end_matches('/');
        let parsed = Url::parse(base)?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(SearchError::Config(format!(
                "Forwarding endpoint must be http(s): {base}"
            )));
        }
        Ok(Self {
            base: base.to_string(),
        })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// The URL that retrieves `target` through the proxy.
    pub fn target_url(&self, target: &str) -> String {
        format!("{}?url={}", self.base, urlencoding::encode(target))
    }
}
