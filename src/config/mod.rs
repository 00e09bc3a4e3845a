//! Configuration module
//!
//! Application configuration is layered: built-in defaults, a JSON file,
//! `HOTSWAP_PROXY_*` environment variables and the command line, each layer
//! overriding the options it sets. The result is validated once.

mod builder;
pub mod defaults;
mod error;
mod source;
mod types;
mod validator;

pub use builder::{load_config, ConfigBuilder};
pub use defaults::{DEFAULT_CONFIG_FILE, ENV_PREFIX};
pub use error::{ConfigError, Result};
pub use source::{CliSource, ConfigSource, DefaultSource, EnvSource, FileSource};
pub use types::{AppConfig, ConfigValues, ProxySpec, ValueSource};
pub use validator::validate_config;
