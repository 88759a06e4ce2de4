//! Per-request dispatch.
//!
//! # Data Flow
//! ```text
//! Request
//!     → upgrade? ─────────────────────────────→ UI backend (tunnel)
//!     → RuleSet::apply
//!         Redirect(code) ─────────────────────→ status + rule headers, empty body
//!         Applied(path)
//!             → outside namespace ────────────→ UI backend (pass-through)
//!             → RouteTable::resolve
//!                 Found ──────────────────────→ function backend (+ captures in query)
//!                 Found, broken handler ──────→ 500 naming the function
//!                 NotFound | Invalid ─────────→ UI backend, status forced to 404
//!                 Error ──────────────────────→ 500
//! ```
//!
//! # Design Decisions
//! - Deciding (`plan`) is separate from doing (`execute`) so routing can be tested without sockets
//! - Rule headers go on the response first; backend headers of the same name replace them
//! - The fallback status override is a guard owned by the request's own future

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::{HeaderMap, Request, Response, StatusCode};
use axum::response::IntoResponse;

use crate::http::overrides::StatusOverrides;
use crate::http::proxy::{into_client_response, ForwardKind, ProxyClient, ProxyError, Upstream};
use crate::http::request::{append_query, correlation_id, is_upgrade_request, RequestId};
use crate::http::websocket;
use crate::observability::metrics;
use crate::routing::{
    in_namespace, HandlerRef, ResolveResult, RouteTableProvider, RoutingResult, RuleSet,
};

/// Where a request goes and with what.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchPlan {
    /// End the response with a redirect status and no body.
    Redirect { status: StatusCode, headers: HeaderMap },
    /// Forward to the function backend.
    Function {
        uri: String,
        source: String,
        headers: HeaderMap,
    },
    /// The matched function could not be loaded.
    BrokenFunction {
        source: String,
        reason: String,
        headers: HeaderMap,
    },
    /// No function for a function-namespace path. UI renders, status forced.
    Fallback {
        uri: String,
        status: StatusCode,
        kind: &'static str,
        headers: HeaderMap,
    },
    /// Forward to the UI backend unchanged.
    Ui { uri: String, headers: HeaderMap },
    /// Routing reached an inconsistent state.
    Internal { reason: String, headers: HeaderMap },
}

impl DispatchPlan {
    /// Metrics/log label.
    pub fn target(&self) -> &'static str {
        match self {
            DispatchPlan::Redirect { .. } => "redirect",
            DispatchPlan::Function { .. } | DispatchPlan::BrokenFunction { .. } => "function",
            DispatchPlan::Fallback { .. } => "ui-fallback",
            DispatchPlan::Ui { .. } => "ui",
            DispatchPlan::Internal { .. } => "internal",
        }
    }
}

/// Routes requests between the function and UI backends.
pub struct Dispatcher {
    rules: RuleSet,
    namespace: String,
    routes: RouteTableProvider,
    client: ProxyClient,
    function: Upstream,
    ui: Upstream,
    overrides: StatusOverrides,
}

impl Dispatcher {
    pub fn new(
        rules: RuleSet,
        namespace: impl Into<String>,
        routes: RouteTableProvider,
        client: ProxyClient,
        function: Upstream,
        ui: Upstream,
    ) -> Self {
        Self {
            rules,
            namespace: namespace.into(),
            routes,
            client,
            function,
            ui,
            overrides: StatusOverrides::new(),
        }
    }

    /// Registry of pending fallback overrides.
    pub fn overrides(&self) -> &StatusOverrides {
        &self.overrides
    }

    /// Decide how to serve a request. No backend I/O happens here.
    pub async fn plan(&self, method: &str, uri: &str) -> DispatchPlan {
        let outcome = self.rules.apply(method, uri);
        let headers = outcome.headers;

        let path = match outcome.result {
            RoutingResult::Redirect(status) => return DispatchPlan::Redirect { status, headers },
            RoutingResult::Applied(path) => path,
        };

        if !in_namespace(&path, &self.namespace) {
            return DispatchPlan::Ui {
                uri: outcome.uri,
                headers,
            };
        }

        let table = match self.routes.current().await {
            Ok(table) => table,
            Err(e) => {
                return DispatchPlan::Internal {
                    reason: format!("failed to compile function routes: {e}"),
                    headers,
                };
            }
        };

        match table.resolve(&path, method) {
            ResolveResult::Found { route, params } => match route.handler() {
                HandlerRef::Ready { .. } => DispatchPlan::Function {
                    uri: append_query(
                        &outcome.uri,
                        params.iter().map(|(k, v)| (k.as_str(), v.as_str())),
                    ),
                    source: route.source_path().to_string(),
                    headers,
                },
                HandlerRef::Failed { reason } => DispatchPlan::BrokenFunction {
                    source: route.source_path().to_string(),
                    reason: reason.clone(),
                    headers,
                },
            },
            result @ (ResolveResult::NotFound | ResolveResult::Invalid) => DispatchPlan::Fallback {
                uri: outcome.uri,
                status: StatusCode::NOT_FOUND,
                kind: result.kind(),
                headers,
            },
            ResolveResult::Error => DispatchPlan::Internal {
                reason: format!("resolver rejected namespace path {path:?}"),
                headers,
            },
        }
    }

    /// Serve one request end to end.
    pub async fn dispatch(&self, req: Request<Body>, peer: Option<SocketAddr>) -> Response<Body> {
        if is_upgrade_request(req.headers()) {
            tracing::debug!(path = %req.uri().path(), "Tunnelling upgrade request to UI backend");
            return websocket::tunnel(&self.client, &self.ui, req, peer).await;
        }

        let start = Instant::now();
        let id = RequestId::next();
        let method = req.method().clone();
        let uri = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());

        let plan = self.plan(method.as_str(), &uri).await;
        let target = plan.target();

        tracing::debug!(
            request_id = %correlation_id(req.headers()),
            request = %id,
            method = %method,
            path = %uri,
            target,
            "Dispatching request"
        );

        let response = self.execute(id, plan, req, peer).await;
        metrics::record_request(method.as_str(), response.status().as_u16(), target, start);
        response
    }

    async fn execute(
        &self,
        id: RequestId,
        plan: DispatchPlan,
        req: Request<Body>,
        peer: Option<SocketAddr>,
    ) -> Response<Body> {
        match plan {
            DispatchPlan::Redirect { status, headers } => {
                let mut response = Response::new(Body::empty());
                *response.status_mut() = status;
                *response.headers_mut() = headers;
                response
            }
            DispatchPlan::Function { uri, headers, .. } => {
                let result = self
                    .client
                    .forward(&self.function, req, &uri, ForwardKind::Function, peer)
                    .await;
                self.finish(result, headers, &uri)
            }
            DispatchPlan::BrokenFunction {
                source,
                reason,
                headers,
            } => {
                tracing::error!(source = %source, reason = %reason, "Matched function failed to load");
                let body = format!(
                    "There is an error in the following function:\n    - {source}\nError:\n{reason}\n"
                );
                with_headers(
                    (StatusCode::INTERNAL_SERVER_ERROR, body).into_response(),
                    headers,
                )
            }
            DispatchPlan::Fallback {
                uri,
                status,
                kind,
                headers,
            } => {
                tracing::debug!(path = %uri, kind, "No function for path, passing request to UI");
                let guard = self.overrides.register(id, status);
                let result = self
                    .client
                    .forward(&self.ui, req, &uri, ForwardKind::Ui, peer)
                    .await;
                match result {
                    Ok(backend) => {
                        let mut response = into_client_response(backend);
                        if let Some(status) = guard.consume() {
                            tracing::debug!(status = %status, "Overriding status for response");
                            *response.status_mut() = status;
                        }
                        with_headers(response, headers)
                    }
                    Err(e) => self.finish(Err(e), headers, &uri),
                }
            }
            DispatchPlan::Ui { uri, headers } => {
                let result = self
                    .client
                    .forward(&self.ui, req, &uri, ForwardKind::Ui, peer)
                    .await;
                self.finish(result, headers, &uri)
            }
            DispatchPlan::Internal { reason, headers } => {
                tracing::error!(reason = %reason, "Internal routing error");
                with_headers(
                    (StatusCode::INTERNAL_SERVER_ERROR, "Internal routing error").into_response(),
                    headers,
                )
            }
        }
    }

    fn finish(
        &self,
        result: Result<Response<hyper::body::Incoming>, ProxyError>,
        headers: HeaderMap,
        uri: &str,
    ) -> Response<Body> {
        match result {
            Ok(backend) => with_headers(into_client_response(backend), headers),
            Err(e) => {
                tracing::error!(path = %uri, error = %e, "Backend request failed");
                e.into_response()
            }
        }
    }
}

/// Add rule headers that the response does not already carry.
fn with_headers(mut response: Response<Body>, headers: HeaderMap) -> Response<Body> {
    let existing = response.headers_mut();
    for (name, value) in headers.iter() {
        if !existing.contains_key(name) {
            existing.insert(name.clone(), value.clone());
        }
    }
    response
}

/// Shared handle used as axum state.
pub type SharedDispatcher = Arc<Dispatcher>;
