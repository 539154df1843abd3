//! Configuration module for Parley
//!
//! Loads provider and routing settings from YAML or JSON, interpolating
//! `${ENV_VAR}` placeholders before parsing, and builds the provider registry
//! and router from them.

mod env;
mod error;
mod schema;
mod secrets;
mod validator;

pub use env::{interpolate_env_vars, interpolate_with};
pub use error::{ConfigError, ConfigResult, ValidationError, ValidationErrorKind};
pub use schema::{ParleyConfig, ProviderConfig, ProviderKind, RoutingConfig, SCHEMA_VERSION};
pub use secrets::{is_sensitive_name, SecretString};
pub use validator::ConfigValidator;

use std::fs;
use std::path::Path;

fn read(path: &Path) -> Result<String, ConfigError> {
    let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError {
        path: path.to_string_lossy().to_string(),
        source: e,
    })?;
    env::interpolate_env_vars(&content)
}

/// Load a configuration from a YAML file
pub fn load_from_yaml<P: AsRef<Path>>(path: P) -> Result<ParleyConfig, ConfigError> {
    let path = path.as_ref();
    let config = parse_yaml(&read(path)?, &path.to_string_lossy())?;
    ConfigValidator::new().validate(&config)?;
    Ok(config)
}

/// Load a configuration from a JSON file
pub fn load_from_json<P: AsRef<Path>>(path: P) -> Result<ParleyConfig, ConfigError> {
    let path = path.as_ref();
    let config = parse_json(&read(path)?, &path.to_string_lossy())?;
    ConfigValidator::new().validate(&config)?;
    Ok(config)
}

/// Load a configuration, picking the format from the file extension
pub fn load<P: AsRef<Path>>(path: P) -> Result<ParleyConfig, ConfigError> {
    let path = path.as_ref();
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => load_from_json(path),
        _ => load_from_yaml(path),
    }
}

fn parse_yaml(content: &str, origin: &str) -> Result<ParleyConfig, ConfigError> {
    serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError {
        path: origin.to_string(),
        line: e.location().map(|l| l.line()),
        column: e.location().map(|l| l.column()),
        message: e.to_string(),
    })
}

fn parse_json(content: &str, origin: &str) -> Result<ParleyConfig, ConfigError> {
    serde_json::from_str(content).map_err(|e| ConfigError::ParseError {
        path: origin.to_string(),
        line: Some(e.line()),
        column: Some(e.column()),
        message: e.to_string(),
    })
}
