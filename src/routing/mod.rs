//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Route Compilation (startup, per request, or on file change):
//!     <root>/<namespace>/**
//!     → table.rs (discover, ignore `_`/`.` entries, sort)
//!     → pattern.rs (source path → anchored matcher)
//!     → RouteTable (immutable)
//!
//! Incoming Request (method, path):
//!     → rules.rs (ordered rule fold: headers, rewrite, redirect)
//!     → resolver.rs (normalize, first match, NotFound vs Invalid)
//! ```
//!
//! # Design Decisions
//! - Tables and rule sets are immutable; concurrent requests share them without locks
//! - Deterministic: same input always matches same route
//! - First match wins (ordered by specificity)

pub mod pattern;
pub mod provider;
pub mod resolver;
pub mod rules;
pub mod table;
pub mod template;

pub use pattern::{CompileError, CompiledPattern};
pub use provider::RouteTableProvider;
pub use resolver::{in_namespace, normalize_path, ResolveResult};
pub use rules::{RoutingResult, RuleOutcome, RuleSet};
pub use table::{FunctionRoute, HandlerRef, RouteTable, TableCompiler};
