use super::{AppConfig, ConfigError};

/// Semantic validation beyond what serde enforces structurally.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] describing the first problem found.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_base_url("upstream.base_url", &config.upstream.base_url)?;
    if config.upstream.model.trim().is_empty() {
        return Err(ConfigError::Validation(
            "upstream.model must not be empty".to_string(),
        ));
    }
    if config.upstream.timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "upstream.timeout_secs must be greater than zero".to_string(),
        ));
    }

    validate_base_url("retrieval.base_url", &config.retrieval.base_url)?;
    if config.retrieval.timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "retrieval.timeout_secs must be greater than zero".to_string(),
        ));
    }

    if config.persistence.path.trim().is_empty() {
        return Err(ConfigError::Validation(
            "persistence.path must not be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_base_url(field: &str, value: &str) -> Result<(), ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Validation(format!(
            "{field} must not be empty"
        )));
    }
    if !trimmed.starts_with("http://") && !trimmed.starts_with("https://") {
        return Err(ConfigError::Validation(format!(
            "{field} must start with http:// or https:// (got '{trimmed}')"
        )));
    }
    Ok(())
}
