//! Status overrides for UI fallback responses.
//!
//! When a function-namespace request has no function, it is answered by the
//! UI backend so the UI's own not-found page is rendered, but the status the
//! client sees must be 404 regardless of what the UI returned. The override is
//! registered just before the fallback call and consumed once its response
//! arrives.
//!
//! # Design Decisions
//! - Keyed by `RequestId`, a freshly allocated handle per request
//! - `register` hands back an `OverrideGuard` that travels with the request;
//!   dropping it without consuming (disconnect, backend error, timeout)
//!   removes the entry, so no entry outlives its request

use std::sync::Arc;

use axum::http::StatusCode;
use dashmap::DashMap;

use crate::http::request::RequestId;
use crate::observability::metrics;

/// Concurrent registry of pending status overrides.
#[derive(Debug, Clone, Default)]
pub struct StatusOverrides {
    inner: Arc<DashMap<RequestId, StatusCode>>,
}

impl StatusOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an override for `id`.
    ///
    /// Registering the same id twice is a dispatcher bug; the later status wins.
    pub fn register(&self, id: RequestId, status: StatusCode) -> OverrideGuard {
        if self.inner.insert(id, status).is_some() {
            tracing::error!(request = %id, "Status override registered twice for one request");
        }
        metrics::record_overrides_inflight(self.inner.len());
        OverrideGuard {
            registry: self.clone(),
            id,
            consumed: false,
        }
    }

    /// Pending status for `id`, without consuming it.
    pub fn get(&self, id: RequestId) -> Option<StatusCode> {
        self.inner.get(&id).map(|entry| *entry)
    }

    /// Number of pending overrides.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    fn take(&self, id: RequestId) -> Option<StatusCode> {
        let status = self.inner.remove(&id).map(|(_, status)| status);
        metrics::record_overrides_inflight(self.inner.len());
        status
    }
}

/// Request-scoped handle on one registered override.
#[derive(Debug)]
pub struct OverrideGuard {
    registry: StatusOverrides,
    id: RequestId,
    consumed: bool,
}

impl OverrideGuard {
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Take the status out of the registry. Consumes the guard.
    pub fn consume(mut self) -> Option<StatusCode> {
        self.consumed = true;
        let status = self.registry.take(self.id);
        if status.is_none() {
            tracing::error!(request = %self.id, "Status override missing when its response arrived");
        }
        status
    }
}

impl Drop for OverrideGuard {
    fn drop(&mut self) {
        if !self.consumed && self.registry.take(self.id).is_some() {
            tracing::warn!(request = %self.id, "Status override discarded before its response arrived");
        }
    }
}
