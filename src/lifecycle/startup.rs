//! Startup helpers.
//!
//! # Responsibilities
//! - Wait for a backend to accept TCP connections before serving traffic
//!
//! # Design Decisions
//! - Readiness means "accepts a TCP connection", no HTTP probe
//! - Polls at a fixed interval until the deadline, then reports the last error

use std::io;
use std::time::{Duration, Instant};

use tokio::net::TcpStream;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Error waiting for a backend.
#[derive(Debug, thiserror::Error)]
#[error("backend {address} not reachable after {waited:?}: {source}")]
pub struct BackendUnavailable {
    pub address: String,
    pub waited: Duration,
    #[source]
    pub source: io::Error,
}

/// Poll `address` until it accepts a connection or `deadline` elapses.
pub async fn wait_for_backend(address: &str, deadline: Duration) -> Result<(), BackendUnavailable> {
    let start = Instant::now();
    loop {
        let remaining = deadline.saturating_sub(start.elapsed());
        let attempt = tokio::time::timeout(remaining.max(POLL_INTERVAL), TcpStream::connect(address)).await;
        let error = match attempt {
            Ok(Ok(_)) => {
                tracing::debug!(address, waited = ?start.elapsed(), "Backend is accepting connections");
                return Ok(());
            }
            Ok(Err(e)) => e,
            Err(_) => io::Error::new(io::ErrorKind::TimedOut, "connect timed out"),
        };

        if start.elapsed() >= deadline {
            return Err(BackendUnavailable {
                address: address.to_string(),
                waited: start.elapsed(),
                source: error,
            });
        }
        tracing::trace!(address, error = %error, "Backend not ready yet");
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}
