//! HTTP server setup.
//!
//! # Responsibilities
//! - Build the routing rules, route table provider and backend client from config
//! - Create the Axum router with a single catch-all handler
//! - Wire up middleware (request ID, tracing)
//! - Serve until the shutdown signal fires

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    response::Response,
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::{load_rules, ConfigError, RouterConfig};
use crate::http::dispatch::{Dispatcher, SharedDispatcher};
use crate::http::overrides::StatusOverrides;
use crate::http::proxy::{ProxyClient, Upstream};
use crate::routing::provider::ProviderError;
use crate::routing::{RouteTableProvider, RuleSet, TableCompiler};

/// Error building the server from config.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to prepare function routes: {0}")]
    Routes(#[from] ProviderError),

    #[error("invalid {name} backend address {address:?}: {source}")]
    Backend {
        name: &'static str,
        address: String,
        source: axum::http::uri::InvalidUri,
    },
}

/// HTTP server for the development router.
pub struct HttpServer {
    router: Router,
    dispatcher: SharedDispatcher,
}

impl HttpServer {
    /// Build a server from configuration, loading rules and function routes.
    pub fn new(config: &RouterConfig) -> Result<Self, ServerError> {
        let rules = RuleSet::compile(&load_rules(config)?, config.rules.named_groups_in_headers);
        tracing::info!(rules = rules.len(), "Routing rules loaded");

        let compiler = TableCompiler::from_config(&config.functions);
        let routes = RouteTableProvider::build(compiler, config.functions.reload)?;

        let client = ProxyClient::new(
            Duration::from_secs(config.timeouts.connect_secs),
            Duration::from_secs(config.timeouts.backend_secs),
        );
        let function = upstream("function", &config.backends.function)?;
        let ui = upstream("ui", &config.backends.ui)?;

        let dispatcher = Dispatcher::new(
            rules,
            config.functions.namespace.clone(),
            routes,
            client,
            function,
            ui,
        );
        Ok(Self::from_dispatcher(dispatcher))
    }

    /// Wrap an already assembled dispatcher.
    pub fn from_dispatcher(dispatcher: Dispatcher) -> Self {
        let dispatcher = Arc::new(dispatcher);
        let router = Self::build_router(dispatcher.clone());
        Self { router, dispatcher }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(dispatcher: SharedDispatcher) -> Router {
        Router::new()
            .route("/", any(dispatch_handler))
            .route("/{*path}", any(dispatch_handler))
            .with_state(dispatcher)
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// Pending fallback status overrides.
    pub fn overrides(&self) -> StatusOverrides {
        self.dispatcher.overrides().clone()
    }

    /// The Axum router, for driving the server without a socket.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

fn upstream(name: &'static str, address: &str) -> Result<Upstream, ServerError> {
    Upstream::new(name, address).map_err(|source| ServerError::Backend {
        name,
        address: address.to_string(),
        source,
    })
}

/// Single handler for every method and path.
async fn dispatch_handler(
    State(dispatcher): State<SharedDispatcher>,
    request: Request<Body>,
) -> Response<Body> {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    dispatcher.dispatch(request, peer).await
}
