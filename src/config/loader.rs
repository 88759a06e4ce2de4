//! Configuration loading from disk.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::schema::{PlatformFile, RouterConfig, RuleConfig};
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Platform file {path} is not valid: {source}")]
    PlatformFile {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<RouterConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config: RouterConfig = toml::from_str(&content)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Load the configuration file if it exists, otherwise fall back to defaults.
pub fn load_or_default(path: &Path) -> Result<RouterConfig, ConfigError> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::info!(path = %path.display(), "No config file found, using defaults");
        let config = RouterConfig::default();
        validate_config(&config).map_err(ConfigError::Validation)?;
        Ok(config)
    }
}

/// Collect the ordered rule list: platform file rules first, then inline rules.
///
/// A configured platform file that does not exist contributes no rules.
pub fn load_rules(config: &RouterConfig) -> Result<Vec<RuleConfig>, ConfigError> {
    let mut rules = Vec::new();

    let platform_file = config.rules.platform_file.as_deref().filter(|file| !file.is_empty());
    if let Some(file) = platform_file {
        let path = Path::new(&config.functions.root_dir).join(file);
        if path.exists() {
            let content = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
            let platform: PlatformFile = serde_json::from_str(&content)
                .map_err(|source| ConfigError::PlatformFile { path: path.clone(), source })?;
            tracing::debug!(path = %path.display(), count = platform.routes.len(), "Loaded platform rules");
            rules.extend(platform.routes);
        } else {
            tracing::debug!(path = %path.display(), "Platform file not present");
        }
    }

    rules.extend(config.rules.routes.iter().cloned());
    Ok(rules)
}
