//! HTTP surface of the forwarding proxy.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{RawQuery, State};
use axum::http::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT_ENCODING, AUTHORIZATION, CACHE_CONTROL, COOKIE, RANGE,
    SET_COOKIE,
};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;
use moka::future::Cache;
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use super::policy::{ForwardPolicy, ForwardingDecision, ProxyRejection};
use super::{ForwardProxyConfig, PROXY_NAME};
use crate::{Result, SearchError};

/// Connection-scoped headers never forwarded in either direction.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Inbound headers describing the client or the edge in front of us.
const INBOUND_ONLY: &[&str] = &[
    "host",
    "content-length",
    "forwarded",
    "x-forwarded-for",
    "x-forwarded-host",
    "x-forwarded-proto",
    "x-forwarded-port",
    "x-real-ip",
    "true-client-ip",
    "cf-connecting-ip",
    "cf-ipcountry",
    "cf-ray",
    "cf-visitor",
    "cf-worker",
    "cdn-loop",
];

const HEADER_PROXY_BY: &str = "x-proxy-by";
const HEADER_PROXY_TARGET: &str = "x-proxy-target";
const HEADER_PROXY_CACHE: &str = "x-proxy-cache";

#[derive(Debug, Clone)]
struct CachedResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

/// Shared, read-only state of the proxy.
pub struct ProxyState {
    config: ForwardProxyConfig,
    policy: ForwardPolicy,
    client: reqwest::Client,
    cache: Option<Cache<String, CachedResponse>>,
}

impl ProxyState {
    pub fn new(config: ForwardProxyConfig) -> Result<Self> {
        // Redirects are returned to the caller; following them here would
        // skip the host checks for the redirect target.
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .no_gzip()
            .no_brotli()
            .build()
            .map_err(|e| SearchError::Config(format!("Failed to build proxy client: {e}")))?;

        let cache = config.cache_ttl().map(|ttl| {
            Cache::builder()
                .max_capacity(config.cache_capacity)
                .time_to_live(ttl)
                .build()
        });

        Ok(Self {
            policy: config.policy(),
            config,
            client,
            cache,
        })
    }

    pub fn config(&self) -> &ForwardProxyConfig {
        &self.config
    }

    async fn handle(
        &self,
        method: Method,
        query: Option<&str>,
        headers: &HeaderMap,
    ) -> std::result::Result<Response, ProxyRejection> {
        if method != Method::GET && method != Method::HEAD {
            return Err(ProxyRejection::MethodNotAllowed);
        }

        let target = query.and_then(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .find(|(key, _)| key == "url")
                .map(|(_, value)| value.into_owned())
        });
        let decision = self.policy.evaluate(target.as_deref())?;
        if self.config.resolve_dns {
            self.policy.check_resolved(&decision).await?;
        }

        let cache_key = (self.cache.is_some()
            && method == Method::GET
            && request_is_cacheable(headers, self.config.forward_cookies))
        .then(|| cache_key_for(&decision, headers));

        if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
            if let Some(hit) = cache.get(key).await {
                debug!(url = %key, "proxy cache hit");
                let mut headers = hit.headers;
                headers.insert(HEADER_PROXY_CACHE, HeaderValue::from_static("HIT"));
                return Ok((hit.status, headers, hit.body).into_response());
            }
        }

        let timeout_ms = self.config.upstream_timeout_ms;
        let started = Instant::now();
        let send = self
            .client
            .request(method, decision.target.clone())
            .headers(upstream_request_headers(headers, self.config.forward_cookies))
            .send();

        let upstream = match tokio::time::timeout(self.config.upstream_timeout(), send).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!(url = %decision.target, error = %e, "upstream fetch failed");
                return Err(ProxyRejection::UpstreamFetchFailed {
                    message: e.to_string(),
                    timeout_ms,
                });
            }
            Err(_) => {
                warn!(url = %decision.target, timeout_ms, "upstream fetch timed out");
                return Err(ProxyRejection::UpstreamFetchFailed {
                    message: format!("upstream did not respond within {timeout_ms}ms"),
                    timeout_ms,
                });
            }
        };

        let status = upstream.status();
        let storable =
            status == StatusCode::OK && response_is_cacheable(upstream.headers(), self.config.forward_cookies);
        let mut response_headers = downstream_headers(upstream.headers(), self.config.forward_cookies);
        tag(&mut response_headers, &decision);
        info!(
            url = %decision.target,
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "forwarded"
        );

        match (&self.cache, cache_key) {
            (Some(cache), Some(key)) if storable => {
                let body = upstream
                    .bytes()
                    .await
                    .map_err(|e| ProxyRejection::UpstreamFetchFailed {
                        message: e.to_string(),
                        timeout_ms,
                    })?;
                let max_age = format!("public, max-age={}", self.config.cache_ttl_s);
                if let Ok(value) = HeaderValue::from_str(&max_age) {
                    response_headers.insert(CACHE_CONTROL, value);
                }
                cache
                    .insert(
                        key,
                        CachedResponse {
                            status,
                            headers: response_headers.clone(),
                            body: body.clone(),
                        },
                    )
                    .await;
                response_headers.insert(HEADER_PROXY_CACHE, HeaderValue::from_static("MISS"));
                Ok((status, response_headers, body).into_response())
            }
            _ => {
                let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
                *response.status_mut() = status;
                *response.headers_mut() = response_headers;
                Ok(response)
            }
        }
    }
}

impl IntoResponse for ProxyRejection {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}

/// Builds the proxy router: `/healthz` plus the forwarder on every other path.
pub fn router(config: ForwardProxyConfig) -> Result<Router> {
    let state = Arc::new(ProxyState::new(config)?);
    Ok(Router::new()
        .route("/healthz", get(health))
        .fallback(forward)
        .with_state(state)
        .layer(TraceLayer::new_for_http()))
}

/// Serves the proxy on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, config: ForwardProxyConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(config)?;
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "forward proxy listening");
    }
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| SearchError::Other(format!("proxy server failed: {e}")))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "ok": true }))
}

async fn forward(
    State(state): State<Arc<ProxyState>>,
    method: Method,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Response {
    match state.handle(method, query.as_deref(), &headers).await {
        Ok(response) => response,
        Err(rejection) => {
            debug!(code = rejection.code(), "request rejected");
            rejection.into_response()
        }
    }
}

/// Headers named in `Connection` are hop-by-hop too.
fn connection_listed(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all("connection")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect()
}

fn upstream_request_headers(inbound: &HeaderMap, forward_cookies: bool) -> HeaderMap {
    let listed = connection_listed(inbound);
    let mut headers = HeaderMap::new();
    for (name, value) in inbound {
        let key = name.as_str();
        let dropped = HOP_BY_HOP.contains(&key)
            || INBOUND_ONLY.contains(&key)
            || key.starts_with("x-proxy-")
            || listed.iter().any(|l| l == key)
            || (!forward_cookies && *name == COOKIE);
        if !dropped {
            headers.append(name.clone(), value.clone());
        }
    }
    headers
}

fn downstream_headers(upstream: &HeaderMap, forward_cookies: bool) -> HeaderMap {
    let listed = connection_listed(upstream);
    let mut headers = HeaderMap::new();
    for (name, value) in upstream {
        let key = name.as_str();
        let dropped = HOP_BY_HOP.contains(&key)
            || listed.iter().any(|l| l == key)
            || (!forward_cookies && *name == SET_COOKIE);
        if !dropped {
            headers.append(name.clone(), value.clone());
        }
    }
    headers
}

/// Requests carrying credentials or asking for part of a resource get
/// caller-specific answers and bypass the cache.
fn request_is_cacheable(headers: &HeaderMap, forward_cookies: bool) -> bool {
    !headers.contains_key(AUTHORIZATION)
        && !headers.contains_key(RANGE)
        && !(forward_cookies && headers.contains_key(COOKIE))
}

fn response_is_cacheable(headers: &HeaderMap, forward_cookies: bool) -> bool {
    if forward_cookies && headers.contains_key(SET_COOKIE) {
        return false;
    }
    !headers.get_all(CACHE_CONTROL).iter().any(|value| {
        value.to_str().is_ok_and(|v| {
            v.split(',').any(|directive| {
                let directive = directive.trim().to_ascii_lowercase();
                directive == "private" || directive == "no-store"
            })
        })
    })
}

/// Bodies pass through still encoded, so the accepted encodings are part
/// of the key.
fn cache_key_for(decision: &ForwardingDecision, headers: &HeaderMap) -> String {
    let encoding = headers
        .get(ACCEPT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    format!("{} {}", encoding.trim(), decision.target)
}

fn tag(headers: &mut HeaderMap, decision: &ForwardingDecision) {
    headers.insert(
        HeaderName::from_static(HEADER_PROXY_BY),
        HeaderValue::from_static(PROXY_NAME),
    );
    if let Ok(target) = HeaderValue::from_str(decision.target.as_str()) {
        headers.insert(HeaderName::from_static(HEADER_PROXY_TARGET), target);
    }
}
