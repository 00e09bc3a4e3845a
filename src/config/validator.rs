//! Configuration validator
//!
//! This module provides functionality for validating configuration.

use std::collections::HashSet;

use log::warn;

use crate::config::defaults::MAX_BUFFER_SIZE;
use crate::config::error::{ConfigError, Result};
use crate::config::types::AppConfig;
use crate::registry::validate_proxy_name;

/// Validate the configuration
pub fn validate_config(config: &AppConfig) -> Result<()> {
    validate_general_settings(config)?;
    validate_module_settings(config)?;
    validate_proxies(config)?;
    Ok(())
}

fn validate_general_settings(config: &AppConfig) -> Result<()> {
    match config.log_level() {
        "error" | "warn" | "info" | "debug" | "trace" => {}
        level => {
            warn!("Invalid log level: {}. Using default: info", level);
        }
    }

    let buffer_size = config.buffer_size();
    if buffer_size == 0 || buffer_size > MAX_BUFFER_SIZE {
        return Err(ConfigError::InvalidValue(
            "buffer_size".to_string(),
            format!("Buffer size must be between 1 and {} bytes", MAX_BUFFER_SIZE),
        ));
    }

    if config.connect_timeout().is_zero() {
        return Err(ConfigError::InvalidValue(
            "connect_timeout".to_string(),
            "Connect timeout must be greater than 0".to_string(),
        ));
    }

    if config.shutdown_timeout().is_zero() {
        return Err(ConfigError::InvalidValue(
            "shutdown_timeout".to_string(),
            "Shutdown timeout must be greater than 0".to_string(),
        ));
    }

    Ok(())
}

fn validate_module_settings(config: &AppConfig) -> Result<()> {
    if let Some(path) = config.default_module() {
        if !path.is_file() {
            return Err(ConfigError::InvalidValue(
                "default_module".to_string(),
                format!("Module file not found: {}", path.display()),
            ));
        }
    }
    Ok(())
}

fn validate_proxies(config: &AppConfig) -> Result<()> {
    let mut names = HashSet::new();
    let mut ports = HashSet::new();

    for proxy in config.proxies() {
        validate_proxy_name(&proxy.name)
            .map_err(|e| ConfigError::InvalidProxySpec(proxy.to_string(), e.to_string()))?;
        if !names.insert(proxy.name.as_str()) {
            return Err(ConfigError::InvalidCombination(format!(
                "proxy name '{}' is used twice",
                proxy.name
            )));
        }
        if !ports.insert(proxy.local_port) {
            return Err(ConfigError::InvalidCombination(format!(
                "local port {} is used twice",
                proxy.local_port
            )));
        }
    }

    Ok(())
}
