//! Metrics collection and exposition.
//!
//! # Metrics
//! - `edge_router_requests_total` (counter): requests by method, status, target
//! - `edge_router_request_duration_seconds` (histogram): latency by target
//! - `edge_router_route_table_size` (gauge): routes in the last compiled table
//! - `edge_router_route_compile_errors` (gauge): files left out of the last table
//! - `edge_router_status_overrides_inflight` (gauge): pending fallback overrides
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

/// Record one finished request.
pub fn record_request(method: &str, status: u16, target: &'static str, start: Instant) {
    counter!(
        "edge_router_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "target" => target
    )
    .increment(1);
    histogram!("edge_router_request_duration_seconds", "target" => target)
        .record(start.elapsed().as_secs_f64());
}

/// Record the outcome of a route table compilation.
pub fn record_route_table(routes: usize, errors: usize) {
    gauge!("edge_router_route_table_size").set(routes as f64);
    gauge!("edge_router_route_compile_errors").set(errors as f64);
}

/// Record the number of status overrides waiting for a UI response.
pub fn record_overrides_inflight(count: usize) {
    gauge!("edge_router_status_overrides_inflight").set(count as f64);
}
