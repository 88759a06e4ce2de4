//! Local development router for serverless functions and a UI dev server.
//!
//! # Modules
//! - `config`: TOML configuration and platform routing rules
//! - `routing`: route table compilation, resolution and the rule engine
//! - `http`: server, dispatcher, backend proxying and upgrade tunnelling
//! - `lifecycle`: shutdown, signals and backend readiness
//! - `observability`: logging and Prometheus metrics

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod routing;

pub use config::schema::RouterConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
