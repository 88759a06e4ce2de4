//! Request identity and inspection helpers.
//!
//! # Responsibilities
//! - Allocate a unique per-request handle for request-scoped state
//! - Detect connection-upgrade requests
//! - Append query parameters to a path-and-query string
//!
//! # Design Decisions
//! - The handle comes from a process-wide counter, never from request content,
//!   so two identical concurrent requests can never share one
//! - `X-Request-ID` (tower-http) is for log correlation only

use std::sync::atomic::{AtomicU64, Ordering};

use axum::http::{header, HeaderMap};

/// Header carrying the correlation ID.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Global atomic counter for request handles.
/// Relaxed ordering is enough; only uniqueness matters.
static REQUEST_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for one in-flight request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    /// Allocate a fresh request handle.
    pub fn next() -> Self {
        Self(REQUEST_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Correlation ID set by the request-id layer, if any.
pub fn correlation_id(headers: &HeaderMap) -> &str {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
}

/// `Connection: upgrade` together with an `Upgrade` header.
pub fn is_upgrade_request(headers: &HeaderMap) -> bool {
    let connection_upgrade = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
    connection_upgrade && headers.contains_key(header::UPGRADE)
}

/// Append `params` to the query of `path_and_query`.
pub fn append_query<'a, I>(path_and_query: &str, params: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let (path, query) = match path_and_query.split_once('?') {
        Some((path, query)) => (path, query),
        None => (path_and_query, ""),
    };

    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    let extra = serializer.extend_pairs(params).finish();

    match (query.is_empty(), extra.is_empty()) {
        (true, true) => path.to_string(),
        (false, true) => format!("{path}?{query}"),
        (true, false) => format!("{path}?{extra}"),
        (false, false) => format!("{path}?{query}&{extra}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn request_ids_are_unique() {
        let a = RequestId::next();
        let b = RequestId::next();
        assert_ne!(a, b);
        assert!(b.as_u64() > a.as_u64());
    }

    #[test]
    fn upgrade_detection() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, Upgrade"));
        assert!(!is_upgrade_request(&headers));

        headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
        assert!(is_upgrade_request(&headers));

        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        assert!(!is_upgrade_request(&headers));
    }

    #[test]
    fn query_appending() {
        assert_eq!(append_query("/api/a", [("id", "1")]), "/api/a?id=1");
        assert_eq!(append_query("/api/a?x=y", [("id", "1")]), "/api/a?x=y&id=1");
        assert_eq!(append_query("/api/a?x=y", []), "/api/a?x=y");
        assert_eq!(append_query("/api/a", [("slug", "a b")]), "/api/a?slug=a+b");
    }
}
