//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the router.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Root configuration for the development router.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RouterConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// The two backend processes requests are dispatched to.
    pub backends: BackendsConfig,

    /// Function source tree settings.
    pub functions: FunctionsConfig,

    /// Declarative routing rules.
    pub rules: RulesConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "127.0.0.1:3000").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:3000".to_string(),
        }
    }
}

/// Backend endpoints, supplied by whatever supervises the dev servers.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendsConfig {
    /// Function/API backend address (host:port).
    pub function: String,

    /// UI backend address (host:port).
    pub ui: String,
}

impl Default for BackendsConfig {
    fn default() -> Self {
        Self {
            function: "127.0.0.1:3001".to_string(),
            ui: "127.0.0.1:3002".to_string(),
        }
    }
}

/// When the function route table is (re)compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReloadMode {
    /// Compile once when the server starts.
    Startup,
    /// Compile on every function-namespace request.
    PerRequest,
    /// Compile once, then recompile on filesystem changes.
    Watch,
}

/// Function source tree configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FunctionsConfig {
    /// Project root. Functions live in `<root_dir>/<namespace>`.
    pub root_dir: String,

    /// Reserved top-level path segment for function routes.
    pub namespace: String,

    /// Source file extensions, without the leading dot.
    pub extensions: Vec<String>,

    /// Route table rebuild policy.
    pub reload: ReloadMode,
}

impl Default for FunctionsConfig {
    fn default() -> Self {
        Self {
            root_dir: ".".to_string(),
            namespace: "api".to_string(),
            extensions: vec!["js".to_string(), "ts".to_string()],
            reload: ReloadMode::PerRequest,
        }
    }
}

/// A single routing rule as written in configuration.
///
/// Field names follow the platform's rule format so the same objects can be
/// read from the TOML file or from the platform JSON file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RuleConfig {
    /// Source regex matched against the current path. Rules without one are skipped.
    #[serde(default)]
    pub src: Option<String>,

    /// HTTP methods the rule is restricted to.
    #[serde(default)]
    pub methods: Option<Vec<String>>,

    /// Response headers to set, with backreference templates as values.
    #[serde(default)]
    pub headers: Option<BTreeMap<String, String>>,

    /// Status code. Redirect codes short-circuit rule evaluation.
    #[serde(default)]
    pub status: Option<u16>,

    /// Rewrite destination template.
    #[serde(default)]
    pub dest: Option<String>,

    /// Keep evaluating later rules after this one applies.
    #[serde(default, rename = "continue")]
    pub continue_on_match: bool,
}

/// Rule source configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RulesConfig {
    /// Platform JSON file (`{ "routes": [...] }`), relative to the project root.
    /// Defaults to `vercel.json`; an empty string disables it.
    pub platform_file: Option<String>,

    /// Substitute `:name` tokens in header templates.
    pub named_groups_in_headers: bool,

    /// Inline rules, evaluated after the platform file's rules.
    pub routes: Vec<RuleConfig>,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            platform_file: Some("vercel.json".to_string()),
            named_groups_in_headers: true,
            routes: Vec::new(),
        }
    }
}

/// Shape of the platform JSON file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlatformFile {
    #[serde(default)]
    pub routes: Vec<RuleConfig>,
}

/// Timeout configuration for backend calls.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Backend connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Time allowed for a backend to produce response headers, in seconds.
    pub backend_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            backend_secs: 30,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
