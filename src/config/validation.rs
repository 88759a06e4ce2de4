//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse)
//! - Validate the function namespace and extensions
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: RouterConfig → Result<(), Vec<ValidationError>>
//! - Rule regexes are not checked here; a bad rule is skipped at compile time

use std::net::SocketAddr;

use crate::config::schema::RouterConfig;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("functions.namespace must be a single non-empty path segment, got {0:?}")]
    Namespace(String),

    #[error("functions.extensions must not be empty")]
    NoExtensions,

    #[error("extension {0:?} must be given without a leading dot")]
    Extension(String),

    #[error("{field} is not a valid host:port address: {value:?}")]
    Address { field: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    ZeroTimeout(&'static str),
}

/// Validate a parsed configuration.
pub fn validate_config(config: &RouterConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let ns = &config.functions.namespace;
    if ns.is_empty() || ns.contains('/') {
        errors.push(ValidationError::Namespace(ns.clone()));
    }

    if config.functions.extensions.is_empty() {
        errors.push(ValidationError::NoExtensions);
    }
    for ext in &config.functions.extensions {
        if ext.is_empty() || ext.starts_with('.') {
            errors.push(ValidationError::Extension(ext.clone()));
        }
    }

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::Address {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }
    for (field, value) in [
        ("backends.function", &config.backends.function),
        ("backends.ui", &config.backends.ui),
    ] {
        if !is_authority(value) {
            errors.push(ValidationError::Address {
                field,
                value: value.clone(),
            });
        }
    }

    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::ZeroTimeout("timeouts.connect_secs"));
    }
    if config.timeouts.backend_secs == 0 {
        errors.push(ValidationError::ZeroTimeout("timeouts.backend_secs"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Backends may be given as hostnames ("localhost:3001"), so only the shape is checked.
fn is_authority(value: &str) -> bool {
    match value.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}
