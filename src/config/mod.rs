//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! edge-dev.toml
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → RouterConfig (validated, immutable)
//!
//! platform file (JSON, optional)
//!     → loader.rs (load_rules)
//!     → ordered Vec<RuleConfig> handed to the rule engine
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, load_or_default, load_rules, ConfigError};
pub use schema::{
    BackendsConfig, FunctionsConfig, ListenerConfig, ObservabilityConfig, ReloadMode,
    RouterConfig, RuleConfig, RulesConfig, TimeoutConfig,
};
