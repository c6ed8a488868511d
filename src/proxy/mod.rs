//! Proxy module for forwarding requests to upstream services
//!
//! This module handles request forwarding, including:
//! - Target parsing (`host:port` or `http://host:port/base`)
//! - URI rewriting onto the upstream's scheme, authority and base path
//! - Hop-by-hop header removal and `Host` / `X-Forwarded-For` rewriting
//! - Per-upstream call timeouts
//!
//! Response bodies are streamed back without buffering.

use crate::config::UpstreamConfig;
use crate::error::GatewayError;
use axum::body::Body;
use axum::http::header::{HeaderName, HeaderValue, HOST};
use axum::http::uri::{Authority, PathAndQuery, Scheme};
use axum::http::{HeaderMap, Request, Response, Uri, Version};
use hyper::body::Incoming;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, warn};

type HttpClient = Client<HttpConnector, Body>;

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Reverse proxy for a single upstream
#[derive(Clone)]
pub struct ReverseProxy {
    name: String,
    scheme: Scheme,
    authority: Authority,
    base_path: String,
    timeout: Duration,
    client: HttpClient,
}

impl ReverseProxy {
    /// Create a proxy for an upstream target, sharing `client`
    pub fn new(
        name: &str,
        target: &str,
        timeout: Duration,
        client: HttpClient,
    ) -> anyhow::Result<Self> {
        let (scheme, authority, base_path) = parse_target(target)?;
        Ok(Self {
            name: name.to_string(),
            scheme,
            authority,
            base_path,
            timeout,
            client,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The upstream's base URL
    pub fn target(&self) -> String {
        format!("{}://{}{}", self.scheme, self.authority, self.base_path)
    }

    /// Map an inbound URI onto the upstream
    pub fn target_uri(&self, uri: &Uri) -> Result<Uri, GatewayError> {
        let path = uri.path();
        let joined = match (self.base_path.is_empty(), uri.query()) {
            (true, None) => path.to_string(),
            (true, Some(q)) => format!("{}?{}", path, q),
            (false, None) => format!("{}{}", self.base_path, path),
            (false, Some(q)) => format!("{}{}?{}", self.base_path, path, q),
        };
        let path_and_query = PathAndQuery::try_from(joined)
            .map_err(|e| GatewayError::UpstreamRequest(format!("invalid upstream path: {}", e)))?;

        Uri::builder()
            .scheme(self.scheme.clone())
            .authority(self.authority.clone())
            .path_and_query(path_and_query)
            .build()
            .map_err(|e| GatewayError::UpstreamRequest(format!("invalid upstream uri: {}", e)))
    }

    /// Forward a request to the upstream and return its response
    pub async fn forward(
        &self,
        req: Request<Body>,
        client_addr: Option<SocketAddr>,
    ) -> Result<Response<Body>, GatewayError> {
        let (mut parts, body) = req.into_parts();
        parts.uri = self.target_uri(&parts.uri)?;
        // the client speaks HTTP/1.1 to upstreams whatever the caller used
        parts.version = Version::HTTP_11;

        strip_hop_by_hop_headers(&mut parts.headers);
        if let Ok(host) = HeaderValue::from_str(self.authority.as_str()) {
            parts.headers.insert(HOST, host);
        }
        if let Some(addr) = client_addr {
            append_forwarded_for(&mut parts.headers, addr);
        }

        debug!(upstream = %self.name, uri = %parts.uri, "Forwarding request");

        let outbound = Request::from_parts(parts, body);
        let response = tokio::time::timeout(self.timeout, self.client.request(outbound))
            .await
            .map_err(|_| GatewayError::UpstreamTimeout(self.name.clone()))?
            .map_err(|e| {
                warn!(upstream = %self.name, error = %e, "Upstream request failed");
                GatewayError::UpstreamRequest(e.to_string())
            })?;

        Ok(relay(response))
    }
}

/// Hand an upstream response back to the caller, streaming its body
fn relay(response: Response<Incoming>) -> Response<Body> {
    let (mut parts, incoming) = response.into_parts();
    strip_hop_by_hop_headers(&mut parts.headers);
    Response::from_parts(parts, Body::new(incoming))
}

/// One reverse proxy per configured upstream, keyed by upstream name
#[derive(Clone, Default)]
pub struct ProxyRegistry {
    proxies: HashMap<String, ReverseProxy>,
}

impl ProxyRegistry {
    /// Build proxies for every upstream whose target parses.
    ///
    /// Upstreams with an unusable target are skipped and stay unreachable
    /// for the lifetime of the process.
    pub fn from_config(upstreams: &[UpstreamConfig]) -> Self {
        let client: HttpClient = Client::builder(TokioExecutor::new()).build_http();

        let proxies = upstreams
            .iter()
            .filter_map(|upstream| {
                match ReverseProxy::new(
                    &upstream.name,
                    &upstream.target,
                    upstream.timeout(),
                    client.clone(),
                ) {
                    Ok(proxy) => Some((upstream.name.clone(), proxy)),
                    Err(e) => {
                        warn!(
                            upstream = %upstream.name,
                            target = %upstream.target,
                            error = %e,
                            "Skipping upstream with invalid target"
                        );
                        None
                    }
                }
            })
            .collect();

        Self { proxies }
    }

    /// Get the proxy for an upstream
    pub fn get(&self, upstream: &str) -> Option<&ReverseProxy> {
        self.proxies.get(upstream)
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }
}

/// Parse an upstream target into scheme, authority and base path.
///
/// A bare `host:port` implies `http://`.
fn parse_target(target: &str) -> anyhow::Result<(Scheme, Authority, String)> {
    let target = target.trim();
    let url = if target.contains("://") {
        target.to_string()
    } else {
        format!("http://{}", target)
    };

    let uri: Uri = url
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid target '{}': {}", target, e))?;

    let scheme = uri
        .scheme()
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("target '{}' has no scheme", target))?;
    if scheme != Scheme::HTTP {
        anyhow::bail!("unsupported scheme '{}' in target '{}'", scheme, target);
    }

    let authority = uri
        .authority()
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("target '{}' has no host", target))?;
    if authority.host().is_empty() {
        anyhow::bail!("target '{}' has no host", target);
    }

    let base_path = uri.path().trim_end_matches('/').to_string();
    Ok((scheme, authority, base_path))
}

/// Check if a header is a hop-by-hop header that should not be forwarded.
///
/// `host` is included because it is always rewritten to the upstream's
/// authority.
fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name.to_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "proxy-connection"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
            | "host"
    )
}

fn strip_hop_by_hop_headers(headers: &mut HeaderMap) {
    // headers named by Connection are hop-by-hop as well
    let listed: Vec<String> = headers
        .get_all(axum::http::header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|name| name.trim().to_lowercase())
        .filter(|name| !name.is_empty())
        .collect();

    let doomed: Vec<HeaderName> = headers
        .keys()
        .filter(|name| is_hop_by_hop_header(name.as_str()) || listed.iter().any(|l| l == name.as_str()))
        .cloned()
        .collect();

    for name in doomed {
        headers.remove(name);
    }
}

fn append_forwarded_for(headers: &mut HeaderMap, addr: SocketAddr) {
    let ip = addr.ip().to_string();
    let value = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(prior) if !prior.is_empty() => format!("{}, {}", prior, ip),
        _ => ip,
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}
