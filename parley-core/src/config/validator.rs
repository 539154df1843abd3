//! Configuration validation utilities

use super::env::env_var_pattern;
use super::error::{ValidationError, ValidationErrorKind};
use super::schema::ParleyConfig;
use super::secrets::is_sensitive_name;
use regex::Regex;
use tracing::warn;

/// Configuration validator with additional validation rules
#[derive(Debug, Default)]
pub struct ConfigValidator {
    /// Pattern for leftover `${VAR}` placeholders
    env_var_pattern: Option<Regex>,
}

impl ConfigValidator {
    /// Create a new validator
    pub fn new() -> Self {
        Self {
            env_var_pattern: env_var_pattern().ok(),
        }
    }

    /// Validate a configuration with extended rules
    pub fn validate(&self, config: &ParleyConfig) -> Result<(), ValidationError> {
        config.validate()?;

        self.validate_placeholders(config)?;
        self.validate_enabled(config)?;
        self.check_credentials(config);

        Ok(())
    }

    /// Interpolation runs before parsing, so a surviving placeholder means
    /// the value was built some other way and never resolved
    fn validate_placeholders(&self, config: &ParleyConfig) -> Result<(), ValidationError> {
        for (i, provider) in config.providers.iter().enumerate() {
            let vars = self.extract_env_vars(provider.api_key.expose_secret());
            if let Some(var) = vars.first() {
                return Err(ValidationError::invalid_value(
                    format!("providers[{}].api_key", i),
                    "resolved credential",
                    format!("unresolved ${{{}}}", var),
                ));
            }
        }
        Ok(())
    }

    /// At least one provider must survive `enabled: false`
    fn validate_enabled(&self, config: &ParleyConfig) -> Result<(), ValidationError> {
        if config.enabled_providers().next().is_none() {
            return Err(ValidationError::new(
                "providers",
                ValidationErrorKind::Incompatible {
                    message: "At least one provider must be enabled".to_string(),
                },
            ));
        }
        Ok(())
    }

    /// Keyless providers are legal (local gateways) but worth a warning
    fn check_credentials(&self, config: &ParleyConfig) {
        for provider in config.enabled_providers() {
            if provider.api_key.is_blank() {
                warn!(provider = %provider.id, "provider has no api_key configured");
            }
        }
    }

    /// Check if a field name appears to contain sensitive information
    pub fn is_sensitive_field(&self, field_name: &str) -> bool {
        is_sensitive_name(field_name)
    }

    /// Extract environment variable names from a string
    pub fn extract_env_vars(&self, text: &str) -> Vec<String> {
        match &self.env_var_pattern {
            Some(pattern) => pattern
                .captures_iter(text)
                .map(|cap| cap[1].to_string())
                .collect(),
            None => Vec::new(),
        }
    }
}
