//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::GuardConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Overrides `admin.api_key` so the secret can stay out of the config file.
pub const ADMIN_API_KEY_ENV: &str = "GUARD_ADMIN_API_KEY";

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
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

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<GuardConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parse, apply environment overrides, and validate.
pub fn parse_config(content: &str) -> Result<GuardConfig, ConfigError> {
    let mut config: GuardConfig = toml::from_str(content)?;

    if let Ok(key) = std::env::var(ADMIN_API_KEY_ENV) {
        if !key.is_empty() {
            config.admin.api_key = key;
        }
    }

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_is_reported() {
        let err = parse_config("[rate_limit\nlimit = 1").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_validation_errors_are_joined() {
        let err = parse_config("[rate_limit]\nlimit = 0\nwindow_ms = 0\n").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Validation failed: rate_limit.limit: must be greater than 0, rate_limit.window_ms: must be greater than 0"
        );
    }

    #[test]
    fn test_example_config_is_valid() {
        let config = parse_config(include_str!("../../config/guard.example.toml")).unwrap();
        assert_eq!(config.routes.len(), 2);
        assert_eq!(config.routes[0].headers["apikey"], "replace-me");
    }

    #[test]
    fn test_missing_file() {
        let err = load_config(Path::new("/nonexistent/guard.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
