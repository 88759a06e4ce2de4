//! Backend forwarding.
//!
//! # Responsibilities
//! - Rewrite the request URI and `Host` for the chosen backend
//! - Strip hop-by-hop headers (except on the upgrade path)
//! - Add forwarding headers for the function backend
//! - Enforce connect and response timeouts
//! - Map backend failures to 502/504
//!
//! # Design Decisions
//! - Streaming bodies in both directions, no buffering
//! - Backend requests always go out as HTTP/1.1
//! - A timeout only fails the request it belongs to

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use axum::body::Body;
use axum::http::uri::Authority;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Request, Response, StatusCode, Uri, Version};
use axum::response::IntoResponse;
use hyper::body::Incoming;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_FORWARDED_HOST: &str = "x-forwarded-host";
const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Headers that describe one connection and must not be forwarded.
static HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Error forwarding a request to a backend.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("invalid backend request: {0}")]
    InvalidUri(#[from] axum::http::Error),

    #[error("backend request failed: {0}")]
    Connect(#[from] hyper_util::client::legacy::Error),

    #[error("backend did not respond within {0:?}")]
    Timeout(Duration),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::InvalidUri(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::Connect(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> axum::response::Response {
        (self.status(), self.to_string()).into_response()
    }
}

/// A backend endpoint.
#[derive(Debug, Clone)]
pub struct Upstream {
    name: &'static str,
    authority: Authority,
}

impl Upstream {
    pub fn new(name: &'static str, address: &str) -> Result<Self, axum::http::uri::InvalidUri> {
        Ok(Self {
            name,
            authority: Authority::from_str(address)?,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    pub fn origin(&self) -> String {
        format!("http://{}", self.authority)
    }
}

/// How a request is being forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardKind {
    /// To the function backend, with forwarding headers and origin rewrite.
    Function,
    /// To the UI backend.
    Ui,
    /// Protocol upgrade, headers untouched apart from `Host`.
    Upgrade,
}

/// Shared HTTP client for both backends.
#[derive(Clone)]
pub struct ProxyClient {
    client: Client<HttpConnector, Body>,
    response_timeout: Duration,
}

impl ProxyClient {
    pub fn new(connect_timeout: Duration, response_timeout: Duration) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(connect_timeout));
        let client = Client::builder(TokioExecutor::new()).build(connector);
        Self {
            client,
            response_timeout,
        }
    }

    /// Forward `req` to `upstream` with the given path and query.
    pub async fn forward(
        &self,
        upstream: &Upstream,
        req: Request<Body>,
        path_and_query: &str,
        kind: ForwardKind,
        peer: Option<SocketAddr>,
    ) -> Result<Response<Incoming>, ProxyError> {
        let req = prepare(upstream, req, path_and_query, kind, peer)?;

        match tokio::time::timeout(self.response_timeout, self.client.request(req)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ProxyError::Timeout(self.response_timeout)),
        }
    }
}

fn prepare(
    upstream: &Upstream,
    req: Request<Body>,
    path_and_query: &str,
    kind: ForwardKind,
    peer: Option<SocketAddr>,
) -> Result<Request<Body>, ProxyError> {
    let (mut parts, body) = req.into_parts();

    parts.uri = Uri::builder()
        .scheme("http")
        .authority(upstream.authority.clone())
        .path_and_query(path_and_query)
        .build()?;
    parts.version = Version::HTTP_11;

    let original_host = parts.headers.get(header::HOST).cloned();

    if kind != ForwardKind::Upgrade {
        strip_hop_by_hop(&mut parts.headers);
    }
    if let Ok(host) = HeaderValue::from_str(upstream.authority.as_str()) {
        parts.headers.insert(header::HOST, host);
    }

    if kind == ForwardKind::Function {
        add_forwarding_headers(&mut parts.headers, original_host, peer);
        if parts.headers.contains_key(header::ORIGIN) {
            if let Ok(origin) = HeaderValue::from_str(&upstream.origin()) {
                parts.headers.insert(header::ORIGIN, origin);
            }
        }
    }

    Ok(Request::from_parts(parts, body))
}

fn add_forwarding_headers(
    headers: &mut HeaderMap,
    original_host: Option<HeaderValue>,
    peer: Option<SocketAddr>,
) {
    if let Some(peer) = peer {
        let forwarded_for = match headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
            Some(existing) => format!("{existing}, {}", peer.ip()),
            None => peer.ip().to_string(),
        };
        if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
            headers.insert(X_FORWARDED_FOR, value);
        }
    }
    if let Some(host) = original_host {
        headers.entry(X_FORWARDED_HOST).or_insert(host);
    }
    headers
        .entry(X_FORWARDED_PROTO)
        .or_insert(HeaderValue::from_static("http"));
}

/// Remove connection-scoped headers, including any named by `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|token| HeaderName::from_str(token.trim()).ok())
        .collect();
    for name in named.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}

/// Convert a backend response into a client response.
pub fn into_client_response(response: Response<Incoming>) -> Response<Body> {
    let (mut parts, body) = response.into_parts();
    strip_hop_by_hop(&mut parts.headers);
    Response::from_parts(parts, Body::new(body))
}
