//! Configuration types
//!
//! Every source produces a [`ConfigValues`] with only the options it sets;
//! the builder merges them into one [`AppConfig`] and records where each
//! value came from.

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::command::RouterOptions;
use crate::config::defaults;
use crate::config::error::ConfigError;
use crate::proxy::ProxySettings;

/// Source of a configuration value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueSource {
    /// Default value
    Default,
    /// From configuration file
    File,
    /// From environment variable
    Environment,
    /// From command line argument
    CommandLine,
}

impl fmt::Display for ValueSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueSource::Default => write!(f, "default"),
            ValueSource::File => write!(f, "file"),
            ValueSource::Environment => write!(f, "environment"),
            ValueSource::CommandLine => write!(f, "command line"),
        }
    }
}

/// A proxy to create at startup, written `name:localPort:host:remotePort`
///
/// The host may itself contain colons (IPv6), so the name and ports are split
/// off the ends.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProxySpec {
    /// Proxy name
    pub name: String,
    /// Port to listen on
    pub local_port: u16,
    /// Remote host
    pub remote_host: String,
    /// Remote port
    pub remote_port: u16,
}

impl FromStr for ProxySpec {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let invalid = |msg: &str| ConfigError::InvalidProxySpec(s.to_string(), msg.to_string());

        let (name, rest) = s.split_once(':').ok_or_else(|| invalid("missing fields"))?;
        let (local_port, rest) = rest.split_once(':').ok_or_else(|| invalid("missing fields"))?;
        let (remote_host, remote_port) = rest.rsplit_once(':').ok_or_else(|| invalid("missing remote port"))?;

        let port = |value: &str, what: &str| match value.parse::<u16>() {
            Ok(port) if port != 0 => Ok(port),
            _ => Err(invalid(&format!("{} '{}' is not a port", what, value))),
        };
        if name.is_empty() || remote_host.is_empty() {
            return Err(invalid("empty name or host"));
        }

        Ok(Self {
            name: name.to_string(),
            local_port: port(local_port, "local port")?,
            remote_host: remote_host.trim_start_matches('[').trim_end_matches(']').to_string(),
            remote_port: port(remote_port, "remote port")?,
        })
    }
}

impl TryFrom<String> for ProxySpec {
    type Error = ConfigError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ProxySpec> for String {
    fn from(spec: ProxySpec) -> Self {
        spec.to_string()
    }
}

impl fmt::Display for ProxySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}:{}", self.name, self.local_port, self.remote_host, self.remote_port)
    }
}

/// Configuration values
///
/// All fields are optional; `None` means "not set by this source".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigValues {
    /// Address new proxies listen on
    #[serde(default)]
    pub bind_address: Option<IpAddr>,

    /// Module file loaded into new proxies; built-in passthrough if unset
    #[serde(default)]
    pub default_module: Option<PathBuf>,

    /// Command history file
    #[serde(default)]
    pub history_file: Option<PathBuf>,

    /// Default file of `savevars` / `loadvars`, also loaded at startup
    #[serde(default)]
    pub vars_file: Option<PathBuf>,

    /// Read buffer size per link (in bytes)
    #[serde(default)]
    pub buffer_size: Option<usize>,

    /// Timeout for connecting to the remote, in seconds
    #[serde(default)]
    pub connect_timeout: Option<u64>,

    /// Timeout for stopping a proxy, in seconds
    #[serde(default)]
    pub shutdown_timeout: Option<u64>,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default)]
    pub log_level: Option<String>,

    /// Proxies created at startup
    #[serde(default)]
    pub proxies: Option<Vec<ProxySpec>>,
}

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppConfig {
    /// Configuration values
    pub values: ConfigValues,

    /// Configuration file path
    pub config_file: Option<PathBuf>,

    /// Source tracking for configuration values
    pub sources: HashMap<String, ValueSource>,
}

impl Deref for AppConfig {
    type Target = ConfigValues;

    fn deref(&self) -> &Self::Target {
        &self.values
    }
}

impl AppConfig {
    /// Configuration holding exactly `values`
    pub fn from_values(values: ConfigValues) -> Self {
        Self {
            values,
            config_file: None,
            sources: HashMap::new(),
        }
    }

    /// Fill every unset option with its default
    pub fn set_default_values(&mut self) {
        macro_rules! default_field {
            ($name:ident, $value:expr) => {
                if self.values.$name.is_none() {
                    self.values.$name = Some($value);
                    self.sources.insert(stringify!($name).to_string(), ValueSource::Default);
                }
            };
        }

        default_field!(bind_address, defaults::bind_address());
        default_field!(history_file, defaults::history_file());
        default_field!(buffer_size, defaults::buffer_size());
        default_field!(connect_timeout, defaults::connect_timeout());
        default_field!(shutdown_timeout, defaults::shutdown_timeout());
        default_field!(log_level, defaults::log_level());
        default_field!(proxies, Vec::new());
    }

    /// Source of a configuration value
    pub fn source(&self, name: &str) -> String {
        self.sources
            .get(name)
            .map(|source| source.to_string())
            .unwrap_or_else(|| "unset".to_string())
    }

    /// Bind address of new proxies
    pub fn bind_address(&self) -> IpAddr {
        self.values.bind_address.unwrap_or_else(defaults::bind_address)
    }

    /// Module file loaded into new proxies
    pub fn default_module(&self) -> Option<&Path> {
        self.values.default_module.as_deref()
    }

    /// History file
    pub fn history_file(&self) -> PathBuf {
        self.values.history_file.clone().unwrap_or_else(defaults::history_file)
    }

    /// Variable file
    pub fn vars_file(&self) -> Option<&Path> {
        self.values.vars_file.as_deref()
    }

    /// Read buffer size
    pub fn buffer_size(&self) -> usize {
        self.values.buffer_size.unwrap_or_else(defaults::buffer_size)
    }

    /// Connect timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.values.connect_timeout.unwrap_or_else(defaults::connect_timeout))
    }

    /// Shutdown timeout
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.values.shutdown_timeout.unwrap_or_else(defaults::shutdown_timeout))
    }

    /// Log level
    pub fn log_level(&self) -> &str {
        self.values.log_level.as_deref().unwrap_or(defaults::LOG_LEVEL_STR)
    }

    /// Proxies created at startup
    pub fn proxies(&self) -> &[ProxySpec] {
        self.values.proxies.as_deref().unwrap_or(&[])
    }

    /// Get the configuration file path
    pub fn config_file(&self) -> Option<&Path> {
        self.config_file.as_deref()
    }

    /// Socket settings for new proxies
    pub fn proxy_settings(&self) -> ProxySettings {
        ProxySettings {
            bind_ip: self.bind_address(),
            buffer_size: self.buffer_size(),
            connect_timeout: self.connect_timeout(),
            shutdown_timeout: self.shutdown_timeout(),
        }
    }

    /// Settings of the command router
    pub fn router_options(&self) -> RouterOptions {
        RouterOptions {
            vars_file: self.values.vars_file.clone(),
        }
    }

    /// Merge two configurations; values set in `other` win
    pub fn merge(&self, other: &AppConfig, source: ValueSource) -> Self {
        let mut result = self.clone();

        macro_rules! merge_field {
            ($name:ident) => {
                if other.values.$name.is_some() {
                    result.values.$name = other.values.$name.clone();
                    result.sources.insert(stringify!($name).to_string(), source);
                }
            };
        }

        merge_field!(bind_address);
        merge_field!(default_module);
        merge_field!(history_file);
        merge_field!(vars_file);
        merge_field!(buffer_size);
        merge_field!(connect_timeout);
        merge_field!(shutdown_timeout);
        merge_field!(log_level);
        merge_field!(proxies);

        if let Some(path) = &other.config_file {
            result.config_file = Some(path.clone());
        }

        result
    }

    /// Log the configuration
    pub fn log(&self) {
        debug!("=== Configuration ===");
        debug!("  Bind address: {} (from {})", self.bind_address(), self.source("bind_address"));
        match self.default_module() {
            Some(path) => debug!("  Default module: {} (from {})", path.display(), self.source("default_module")),
            None => debug!("  Default module: built-in passthrough"),
        }
        debug!("  History file: {} (from {})", self.history_file().display(), self.source("history_file"));
        if let Some(path) = self.vars_file() {
            debug!("  Variable file: {} (from {})", path.display(), self.source("vars_file"));
        }
        debug!("  Buffer size: {} bytes (from {})", self.buffer_size(), self.source("buffer_size"));
        debug!("  Connect timeout: {:?} (from {})", self.connect_timeout(), self.source("connect_timeout"));
        debug!("  Shutdown timeout: {:?} (from {})", self.shutdown_timeout(), self.source("shutdown_timeout"));
        debug!("  Log level: {} (from {})", self.log_level(), self.source("log_level"));
        for proxy in self.proxies() {
            debug!("  Startup proxy: {} (from {})", proxy, self.source("proxies"));
        }
        if let Some(file) = self.config_file() {
            debug!("  Configuration file: {}", file.display());
        }
        debug!("=====================");
    }
}
