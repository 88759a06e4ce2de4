//! Connection-upgrade tunnelling.
//!
//! # Data Flow
//! ```text
//! Client ──upgrade request──→ Router ──same request──→ UI backend
//! Client ←──────101──────── Router ←──────101──────── UI backend
//! Client ←═══ raw bytes ═══→ Router ←═══ raw bytes ═══→ UI backend
//! ```
//!
//! # Design Decisions
//! - Upgrades always go to the UI backend (live-reload sockets) and skip routing
//! - Byte-level copying; frames are never parsed
//! - A non-101 answer from the backend is passed back unchanged

use std::net::SocketAddr;

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use axum::response::IntoResponse;
use hyper_util::rt::TokioIo;

use crate::http::proxy::{ForwardKind, ProxyClient, Upstream};

/// Forward an upgrade request and splice the two upgraded connections together.
pub async fn tunnel(
    client: &ProxyClient,
    upstream: &Upstream,
    mut req: Request<Body>,
    peer: Option<SocketAddr>,
) -> Response<Body> {
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let client_upgrade = hyper::upgrade::on(&mut req);

    let mut backend_response = match client
        .forward(upstream, req, &path_and_query, ForwardKind::Upgrade, peer)
        .await
    {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(path = %path_and_query, error = %e, "Upgrade request to UI backend failed");
            return e.into_response();
        }
    };

    if backend_response.status() != StatusCode::SWITCHING_PROTOCOLS {
        tracing::debug!(status = %backend_response.status(), "UI backend declined upgrade");
        let (parts, body) = backend_response.into_parts();
        return Response::from_parts(parts, Body::new(body));
    }

    let backend_upgrade = hyper::upgrade::on(&mut backend_response);
    let path = path_and_query.clone();
    tokio::spawn(async move {
        match tokio::try_join!(client_upgrade, backend_upgrade) {
            Ok((client_io, backend_io)) => {
                let mut client_io = TokioIo::new(client_io);
                let mut backend_io = TokioIo::new(backend_io);
                match tokio::io::copy_bidirectional(&mut client_io, &mut backend_io).await {
                    Ok((sent, received)) => {
                        tracing::debug!(path = %path, sent, received, "Upgraded connection closed");
                    }
                    Err(e) => tracing::debug!(path = %path, error = %e, "Upgraded connection ended"),
                }
            }
            Err(e) => tracing::warn!(path = %path, error = %e, "Connection upgrade failed"),
        }
    });

    let (parts, _) = backend_response.into_parts();
    Response::from_parts(parts, Body::empty())
}
