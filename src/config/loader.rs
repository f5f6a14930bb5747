//! Configuration loading from disk and the environment.

use std::fs;
use std::path::Path;

use crate::config::schema::AppConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {key}: {value}")]
    Env { key: &'static str, value: String },

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load configuration from an optional TOML file, then apply environment
/// overrides and validate.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let config = match path {
        Some(path) => {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        }
        None => AppConfig::default(),
    };

    let config = apply_env_overrides(config, |key| std::env::var(key).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Overlay environment settings on top of file configuration.
///
/// `lookup` resolves a variable name to its value.
pub fn apply_env_overrides<F>(mut config: AppConfig, lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(host) = lookup("REDIS_HOST") {
        config.channel.host = host;
    }
    if let Some(port) = lookup("REDIS_PORT") {
        config.channel.port = port
            .trim()
            .parse()
            .map_err(|_| ConfigError::Env { key: "REDIS_PORT", value: port })?;
    }
    if let Some(db) = lookup("REDIS_DB") {
        config.channel.db = db
            .trim()
            .parse()
            .map_err(|_| ConfigError::Env { key: "REDIS_DB", value: db })?;
    }
    if let Some(username) = lookup("REDIS_USERNAME") {
        config.channel.username = Some(username);
    }
    if let Some(password) = lookup("REDIS_PASSWORD") {
        config.channel.password = Some(password);
    }
    if let Some(url) = lookup("DATABASE_URL") {
        config.database.url = Some(url);
    }
    if let Some(key) = lookup("ADMIN_API_KEY") {
        config.admin.api_key = key;
    }
    if let Some(bind) = lookup("SERVER_BIND") {
        config.listener.bind_address = bind;
    }
    if let Some(level) = lookup("LOG_LEVEL") {
        config.observability.log_level = level;
    }

    Ok(config)
}
