//! Configuration loading from disk and environment.
//!
//! Precedence, lowest first: defaults → TOML file → environment.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::GatewayConfig;
use crate::config::validation::{validate_config, ValidationError};
use crate::security::headers::PolicyVariant;

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {key}: {message}")]
    Env { key: String, message: String },

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse a TOML configuration file. Does not validate.
pub fn load_file(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Name of an environment variable under an optional prefix.
pub fn env_key(prefix: Option<&str>, name: &str) -> String {
    match prefix.map(str::trim).filter(|p| !p.is_empty()) {
        Some(prefix) => format!("{}_{}", prefix.to_ascii_uppercase(), name),
        None => name.to_string(),
    }
}

/// Apply `<PREFIX>_BACKEND`, `<PREFIX>_PORT` and `<PREFIX>_HEADER_POLICY`.
///
/// `lookup` is the environment; tests pass a closure over a map.
pub fn apply_env<F>(config: &mut GatewayConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let prefix = config.env_prefix.clone();
    let key = |name: &str| env_key(prefix.as_deref(), name);

    let backend_key = key("BACKEND");
    if let Some(backend) = lookup(&backend_key) {
        tracing::debug!(key = %backend_key, "Backend overridden from environment");
        config.backend = backend;
    }

    let port_key = key("PORT");
    if let Some(port) = lookup(&port_key) {
        config.port = port.trim().parse().map_err(|e| ConfigError::Env {
            key: port_key.clone(),
            message: format!("{e}"),
        })?;
    }

    let policy_key = key("HEADER_POLICY");
    if let Some(policy) = lookup(&policy_key) {
        config.header_policy.variant = policy
            .parse::<PolicyVariant>()
            .map_err(|message| ConfigError::Env {
                key: policy_key.clone(),
                message,
            })?;
    }

    Ok(())
}

/// Load the full configuration: optional file, process environment, validation.
pub fn load_config(
    path: Option<&Path>,
    env_prefix: Option<String>,
) -> Result<GatewayConfig, ConfigError> {
    let mut config = match path {
        Some(path) => load_file(path)?,
        None => GatewayConfig::default(),
    };
    if env_prefix.is_some() {
        config.env_prefix = env_prefix;
    }

    apply_env(&mut config, |key| std::env::var(key).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}
