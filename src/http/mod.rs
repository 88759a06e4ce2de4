//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, tracing)
//!     → dispatch.rs (rules, namespace check, route resolution)
//!     → proxy.rs (function or UI backend) | websocket.rs (upgrade tunnel)
//!     → overrides.rs (forced status on UI fallback)
//!     → Send to client
//! ```

pub mod dispatch;
pub mod overrides;
pub mod proxy;
pub mod request;
pub mod server;
pub mod websocket;

pub use dispatch::{DispatchPlan, Dispatcher};
pub use overrides::{OverrideGuard, StatusOverrides};
pub use proxy::{ProxyClient, ProxyError, Upstream};
pub use request::{RequestId, X_REQUEST_ID};
pub use server::{HttpServer, ServerError};
