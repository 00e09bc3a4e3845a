//! Configuration builder
//!
//! This module provides a builder pattern for constructing configuration.

use std::path::Path;

use log::debug;

use crate::config::defaults::{DEFAULT_CONFIG_FILE, ENV_PREFIX};
use crate::config::error::Result;
use crate::config::source::{CliSource, ConfigSource, DefaultSource, EnvSource, FileSource};
use crate::config::types::{AppConfig, ConfigValues};
use crate::config::validator::validate_config;

/// Configuration builder
///
/// Sources are applied in the order they were added, later ones winning.
pub struct ConfigBuilder {
    sources: Vec<Box<dyn ConfigSource>>,
    validate: bool,
}

impl ConfigBuilder {
    /// Create a new configuration builder
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            validate: true,
        }
    }

    /// Add default source
    pub fn with_defaults(mut self) -> Self {
        debug!("Adding default configuration source");
        self.sources.push(Box::new(DefaultSource));
        self
    }

    /// Add file source
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        let path = path.as_ref();
        debug!("Adding file configuration source: {}", path.display());
        self.sources.push(Box::new(FileSource::new(path)));
        self
    }

    /// Add environment source
    pub fn with_env(mut self, prefix: &str) -> Self {
        debug!("Adding environment configuration source with prefix: {}", prefix);
        self.sources.push(Box::new(EnvSource::new(prefix)));
        self
    }

    /// Add command line source
    pub fn with_cli(mut self, values: ConfigValues) -> Self {
        debug!("Adding command line configuration source");
        self.sources.push(Box::new(CliSource::new(values)));
        self
    }

    /// Add any other source
    pub fn with_source(mut self, source: Box<dyn ConfigSource>) -> Self {
        self.sources.push(source);
        self
    }

    /// Disable validation
    pub fn without_validation(mut self) -> Self {
        self.validate = false;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<AppConfig> {
        let mut config = AppConfig::default();

        debug!("Building configuration from {} sources", self.sources.len());

        for source in self.sources {
            let source_type = source.source_type();
            debug!("Loading configuration from source: {:?}", source_type);
            let source_config = source.load()?;
            config = config.merge(&source_config, source_type);
        }

        config.set_default_values();

        if self.validate {
            debug!("Validating configuration");
            validate_config(&config)?;
        }

        config.log();
        Ok(config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
            .with_defaults()
            .with_file(DEFAULT_CONFIG_FILE)
            .with_env(ENV_PREFIX)
    }
}

/// Load configuration from every layer
///
/// Priority, lowest first: defaults, the configuration file (`config_file`, or
/// `hotswap-proxy.json` when present), `HOTSWAP_PROXY_*` environment variables,
/// then the command line.
pub fn load_config(config_file: Option<&Path>, cli: ConfigValues) -> Result<AppConfig> {
    let mut builder = ConfigBuilder::new().with_defaults();

    match config_file {
        Some(path) => builder = builder.with_file(path),
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => builder = builder.with_file(DEFAULT_CONFIG_FILE),
        None => debug!("No configuration file, using defaults"),
    }

    builder.with_env(ENV_PREFIX).with_cli(cli).build()
}
