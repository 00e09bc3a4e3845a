//! Configuration sources
//!
//! This module defines the trait and implementations for loading configuration
//! from different sources.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::config::error::{ConfigError, Result};
use crate::config::types::{AppConfig, ConfigValues, ProxySpec, ValueSource};

/// Configuration source trait
pub trait ConfigSource {
    /// Load the options this source sets
    fn load(&self) -> Result<AppConfig>;

    /// Get the source type
    fn source_type(&self) -> ValueSource;
}

/// Default configuration source
pub struct DefaultSource;

impl ConfigSource for DefaultSource {
    fn load(&self) -> Result<AppConfig> {
        debug!("Loading default configuration");
        let mut config = AppConfig::default();
        config.set_default_values();
        Ok(config)
    }

    fn source_type(&self) -> ValueSource {
        ValueSource::Default
    }
}

/// JSON file configuration source
pub struct FileSource {
    pub path: PathBuf,
}

impl FileSource {
    /// Create a new file source
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl ConfigSource for FileSource {
    fn load(&self) -> Result<AppConfig> {
        debug!("Loading configuration from file: {}", self.path.display());

        if !self.path.exists() {
            warn!("Configuration file not found: {}", self.path.display());
            return Ok(AppConfig::default());
        }

        let contents = fs::read_to_string(&self.path)
            .map_err(|e| ConfigError::FileReadError(self.path.clone(), e.to_string()))?;
        let values: ConfigValues = serde_json::from_str(&contents)
            .map_err(|e| ConfigError::ParseError(format!("{}: {}", self.path.display(), e)))?;

        let mut config = AppConfig::from_values(values);
        config.config_file = Some(self.path.clone());
        Ok(config)
    }

    fn source_type(&self) -> ValueSource {
        ValueSource::File
    }
}

/// Environment variable configuration source
///
/// Reads `<prefix>BIND_ADDRESS`, `<prefix>BUFFER_SIZE` and so on; `<prefix>PROXIES`
/// holds comma-separated proxy definitions.
pub struct EnvSource {
    pub prefix: String,
}

impl EnvSource {
    /// Create a new environment source
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
        }
    }

    fn var(&self, name: &str) -> Option<String> {
        let full_name = format!("{}{}", self.prefix, name);
        let value = env::var(&full_name).ok()?;
        debug!("Found environment variable {}={}", full_name, value);
        Some(value)
    }
}

fn parse_value<T: std::str::FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue(name.to_string(), format!("'{}': {}", value, e)))
}

impl ConfigSource for EnvSource {
    fn load(&self) -> Result<AppConfig> {
        debug!("Loading configuration from environment variables with prefix: {}", self.prefix);
        let mut values = ConfigValues::default();

        if let Some(value) = self.var("BIND_ADDRESS") {
            values.bind_address = Some(parse_value("bind_address", &value)?);
        }
        if let Some(value) = self.var("DEFAULT_MODULE") {
            values.default_module = Some(PathBuf::from(value));
        }
        if let Some(value) = self.var("HISTORY_FILE") {
            values.history_file = Some(PathBuf::from(value));
        }
        if let Some(value) = self.var("VARS_FILE") {
            values.vars_file = Some(PathBuf::from(value));
        }
        if let Some(value) = self.var("BUFFER_SIZE") {
            values.buffer_size = Some(parse_value("buffer_size", &value)?);
        }
        if let Some(value) = self.var("CONNECT_TIMEOUT") {
            values.connect_timeout = Some(parse_value("connect_timeout", &value)?);
        }
        if let Some(value) = self.var("SHUTDOWN_TIMEOUT") {
            values.shutdown_timeout = Some(parse_value("shutdown_timeout", &value)?);
        }
        if let Some(value) = self.var("LOG_LEVEL") {
            values.log_level = Some(value);
        }
        if let Some(value) = self.var("PROXIES") {
            let proxies = value
                .split(',')
                .map(str::trim)
                .filter(|spec| !spec.is_empty())
                .map(str::parse::<ProxySpec>)
                .collect::<Result<Vec<_>>>()?;
            values.proxies = Some(proxies);
        }

        Ok(AppConfig::from_values(values))
    }

    fn source_type(&self) -> ValueSource {
        ValueSource::Environment
    }
}

/// Command line configuration source
///
/// Holds the options given on the command line, already parsed by `clap`.
pub struct CliSource {
    pub values: ConfigValues,
}

impl CliSource {
    /// Create a new command line source
    pub fn new(values: ConfigValues) -> Self {
        Self { values }
    }
}

impl ConfigSource for CliSource {
    fn load(&self) -> Result<AppConfig> {
        debug!("Loading configuration from command line arguments");
        Ok(AppConfig::from_values(self.values.clone()))
    }

    fn source_type(&self) -> ValueSource {
        ValueSource::CommandLine
    }
}
