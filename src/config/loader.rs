//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::FilterChainConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

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

/// Load and validate configuration. Files ending in `.json` are parsed as
/// JSON, everything else as TOML.
pub fn load_config(path: &Path) -> Result<FilterChainConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let is_json = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let config = if is_json {
        parse_json(&content)?
    } else {
        parse_toml(&content)?
    };
    Ok(config)
}

/// Parse and validate a TOML document.
pub fn parse_toml(content: &str) -> Result<FilterChainConfig, ConfigError> {
    let config: FilterChainConfig = toml::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Parse and validate a JSON document.
pub fn parse_json(content: &str) -> Result<FilterChainConfig, ConfigError> {
    let config: FilterChainConfig = serde_json::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_and_toml_agree() {
        let from_toml = parse_toml(
            r#"
            [stream]
            buffer_limit_bytes = 4096

            [[clusters]]
            name = "web"

            [[routes]]
            name = "all"
            cluster = "web"
            "#,
        )
        .unwrap();
        let from_json = parse_json(
            r#"{
                "stream": { "buffer_limit_bytes": 4096 },
                "clusters": [{ "name": "web" }],
                "routes": [{ "name": "all", "cluster": "web" }]
            }"#,
        )
        .unwrap();
        assert_eq!(from_toml, from_json);
    }

    #[test]
    fn test_validation_error_is_reported() {
        let err = parse_toml(
            r#"
            [[routes]]
            name = "all"
            cluster = "missing"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(ref errors) if errors.len() == 1));
        assert!(err.to_string().contains("unknown cluster 'missing'"));
    }

    #[test]
    fn test_missing_file() {
        let err = load_config(Path::new("/nonexistent/filter-chain.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
