use super::{ClientConfig, ConfigError};

/// Validate the full client config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &ClientConfig) -> Result<(), ConfigError> {
    validate_backend(config)?;
    validate_streaming(config)?;
    validate_auth(config)?;
    validate_log_level(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_backend(config: &ClientConfig) -> Result<(), ConfigError> {
    let backend = &config.backend;
    let base = url::Url::parse(&backend.base_url)
        .map_err(|err| validation_err(format!("backend.base_url is not a valid URL: {err}")))?;
    if !matches!(base.scheme(), "http" | "https") {
        return Err(validation_err(format!(
            "backend.base_url must use http or https, got '{}'",
            base.scheme()
        )));
    }
    if base.cannot_be_a_base() {
        return Err(validation_err("backend.base_url cannot be used as a base URL"));
    }

    for (field, path) in [
        ("backend.chat_stream_path", &backend.chat_stream_path),
        ("backend.public_stream_path", &backend.public_stream_path),
    ] {
        if !path.starts_with('/') {
            return Err(validation_err(format!("{field} must start with '/'")));
        }
    }

    if backend.connect_timeout_secs == 0 {
        return Err(validation_err(
            "backend.connect_timeout_secs must be greater than 0",
        ));
    }
    if let Some(ref proxy) = backend.proxy {
        if url::Url::parse(proxy).is_err() {
            return Err(validation_err("backend.proxy is not a valid URL"));
        }
    }
    Ok(())
}

fn validate_streaming(config: &ClientConfig) -> Result<(), ConfigError> {
    if config.streaming.error_body_limit_bytes == 0 {
        return Err(validation_err(
            "streaming.error_body_limit_bytes must be greater than 0",
        ));
    }
    if config.streaming.error_body_timeout_ms == 0 {
        return Err(validation_err(
            "streaming.error_body_timeout_ms must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_auth(config: &ClientConfig) -> Result<(), ConfigError> {
    if config.auth.token_env.trim().is_empty() {
        return Err(validation_err("auth.token_env cannot be empty"));
    }
    Ok(())
}

fn validate_log_level(config: &ClientConfig) -> Result<(), ConfigError> {
    let valid_levels = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL", "DISABLED"];
    if !valid_levels.contains(&config.features.log_level.to_uppercase().as_str()) {
        return Err(validation_err(format!(
            "log_level must be one of {valid_levels:?}"
        )));
    }
    Ok(())
}
