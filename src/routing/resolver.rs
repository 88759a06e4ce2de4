//! Function route resolution.
//!
//! # Responsibilities
//! - Normalize request paths (collapse `//`, drop one trailing `/`)
//! - Find the first route whose matcher accepts the path
//! - Turn dynamic segments into query parameters
//! - Tell "wrong casing or extension" apart from "no such function"
//!
//! # Design Decisions
//! - Pure reads over an immutable `RouteTable`
//! - `NotFound` and `Invalid` are separate variants even though both become 404

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::routing::table::{FunctionRoute, RouteTable};

static SLASH_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("/{2,}").expect("slash pattern is valid"));

/// Outcome of resolving a request path against the route table.
#[derive(Debug, Clone)]
pub enum ResolveResult<'a> {
    /// The path is outside the function namespace. The caller misrouted it.
    Error,
    /// A route exists for a differently cased or differently suffixed path.
    NotFound,
    /// No function exists for the path at all.
    Invalid,
    /// Matched route and its captured segments.
    Found {
        route: &'a FunctionRoute,
        params: BTreeMap<String, String>,
    },
}

impl ResolveResult<'_> {
    /// Short name for logs and tests.
    pub fn kind(&self) -> &'static str {
        match self {
            ResolveResult::Error => "error",
            ResolveResult::NotFound => "not_found",
            ResolveResult::Invalid => "invalid",
            ResolveResult::Found { .. } => "found",
        }
    }
}

/// Collapse runs of `/` and strip exactly one trailing `/`.
pub fn normalize_path(path: &str) -> String {
    let collapsed = SLASH_RUNS.replace_all(path, "/");
    match collapsed.strip_suffix('/') {
        Some(stripped) => stripped.to_string(),
        None => collapsed.into_owned(),
    }
}

/// Whether `path` is `/<namespace>` or below it. Case-sensitive.
pub fn in_namespace(path: &str, namespace: &str) -> bool {
    path.strip_prefix('/')
        .and_then(|rest| rest.strip_prefix(namespace))
        .map(|rest| rest.is_empty() || rest.starts_with('/'))
        .unwrap_or(false)
}

impl RouteTable {
    /// Resolve a request path to a function route.
    ///
    /// The method is accepted for logging only; function routes are not method-specific.
    pub fn resolve(&self, path: &str, method: &str) -> ResolveResult<'_> {
        let pathname = normalize_path(path);

        if !in_namespace(&pathname, &self.namespace) {
            tracing::debug!(path = %path, method = %method, "Path is outside the function namespace");
            return ResolveResult::Error;
        }

        for route in &self.routes {
            if let Some(params) = route.matcher().captures(&pathname) {
                tracing::debug!(
                    path = %pathname,
                    method = %method,
                    source = %route.source_path(),
                    "Resolved function route"
                );
                return ResolveResult::Found { route, params };
            }
        }

        if let Some(stripped) = self.strip_extension(&pathname) {
            if self.probe_ignore_case(stripped) || self.probe_ignore_case(&pathname) {
                tracing::debug!(path = %pathname, "Function exists under a different casing or extension");
                return ResolveResult::NotFound;
            }
        }

        tracing::debug!(path = %pathname, method = %method, "No function for path");
        ResolveResult::Invalid
    }

    /// Remove a trailing function extension. The suffix check is case-sensitive.
    fn strip_extension<'p>(&self, path: &'p str) -> Option<&'p str> {
        self.extensions.iter().find_map(|ext| {
            path.strip_suffix(ext.as_str())
                .and_then(|rest| rest.strip_suffix('.'))
        })
    }

    fn probe_ignore_case(&self, path: &str) -> bool {
        self.routes
            .iter()
            .any(|route| route.matcher().is_match_ignore_case(path))
    }
}
