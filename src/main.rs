//! Local development router.
//!
//! Sits in front of two development servers: a function backend that executes
//! the handlers under `<root>/<namespace>/`, and a UI backend that serves
//! everything else.
//!
//! ```text
//!                   ┌────────────────────────────────────────────────┐
//!                   │                 EDGE DEV ROUTER                │
//!  Client Request   │  ┌─────────┐   ┌──────────┐   ┌────────────┐   │
//!  ─────────────────┼─▶│ rules   │──▶│namespace?│──▶│route table │───┼──▶ Function backend
//!                   │  │(rewrite,│   └────┬─────┘   │  resolve   │   │
//!                   │  │redirect)│        │ no      └─────┬──────┘   │
//!                   │  └─────────┘        ▼               │ miss     │
//!                   │               ┌──────────┐          ▼          │
//!                   │               │ UI proxy │◀── forced 404 ──────┼──▶ UI backend
//!                   │               └──────────┘                     │
//!                   └────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;

use edge_dev_router::config::validation::validate_config;
use edge_dev_router::config::{load_or_default, ConfigError, RouterConfig};
use edge_dev_router::http::HttpServer;
use edge_dev_router::lifecycle::{spawn_signal_handler, wait_for_backend, Shutdown};
use edge_dev_router::observability::{logging, metrics};
use edge_dev_router::routing::{ResolveResult, TableCompiler};

/// How long `serve` keeps probing a backend before giving up on it.
const BACKEND_WAIT: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "edge-dev-router")]
#[command(version, about = "Local router for serverless functions and a UI dev server", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "edge-dev.toml")]
    config: PathBuf,

    /// Override the listening port
    #[arg(short, long)]
    port: Option<u16>,

    /// Override the project root holding the function directory
    #[arg(short, long)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve requests until interrupted
    Serve,
    /// Compile the function tree and print the ordered route table
    Routes,
    /// Show how a path resolves against the function routes
    Resolve {
        /// Request path, e.g. /api/users/42
        path: String,

        /// Request method
        #[arg(short, long, default_value = "GET")]
        method: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load(&cli)?;

    logging::init_logging(&config.observability.log_level);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await?,
        Commands::Routes => print_routes(&config)?,
        Commands::Resolve { path, method } => print_resolution(&config, &path, &method)?,
    }
    Ok(())
}

fn load(cli: &Cli) -> Result<RouterConfig, ConfigError> {
    let mut config = load_or_default(&cli.config)?;

    if let Some(port) = cli.port {
        let host = config
            .listener
            .bind_address
            .rsplit_once(':')
            .map(|(host, _)| host.to_string())
            .unwrap_or_else(|| "127.0.0.1".to_string());
        config.listener.bind_address = format!("{host}:{port}");
    }
    if let Some(root) = &cli.root {
        config.functions.root_dir = root.display().to_string();
    }

    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

async fn serve(config: RouterConfig) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(
        bind_address = %config.listener.bind_address,
        function_backend = %config.backends.function,
        ui_backend = %config.backends.ui,
        namespace = %config.functions.namespace,
        reload = ?config.functions.reload,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let server = HttpServer::new(&config)?;

    for (name, address) in [
        ("function", config.backends.function.clone()),
        ("ui", config.backends.ui.clone()),
    ] {
        tokio::spawn(async move {
            match wait_for_backend(&address, BACKEND_WAIT).await {
                Ok(()) => tracing::info!(backend = name, address = %address, "Backend is up"),
                Err(e) => tracing::warn!(backend = name, error = %e, "Backend is not reachable"),
            }
        });
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    spawn_signal_handler(&shutdown);
    server.run(listener, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

fn print_routes(config: &RouterConfig) -> Result<(), Box<dyn std::error::Error>> {
    let compiled = TableCompiler::from_config(&config.functions).compile()?;

    let routes: Vec<_> = compiled
        .table
        .routes()
        .iter()
        .map(|route| {
            serde_json::json!({
                "source": route.source_path(),
                "pattern": route.matcher().as_str(),
                "handler": if route.handler().is_ready() { "ready" } else { "failed" },
            })
        })
        .collect();
    let errors: Vec<String> = compiled.errors.iter().map(ToString::to_string).collect();

    let output = serde_json::json!({
        "namespace": compiled.table.namespace(),
        "routes": routes,
        "errors": errors,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn print_resolution(
    config: &RouterConfig,
    path: &str,
    method: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let compiled = TableCompiler::from_config(&config.functions)
        .without_handlers()
        .compile()?;
    let result = compiled.table.resolve(path, method);

    let output = match &result {
        ResolveResult::Found { route, params } => serde_json::json!({
            "result": result.kind(),
            "source": route.source_path(),
            "params": params,
        }),
        _ => serde_json::json!({ "result": result.kind() }),
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
