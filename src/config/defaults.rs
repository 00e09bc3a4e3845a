//! Default configuration values
//!
//! Single source of truth for defaults, shared by the default source, the
//! accessors of [`AppConfig`](super::AppConfig) and the command line help.

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

/// Environment variable prefix for all configuration options
pub const ENV_PREFIX: &str = "HOTSWAP_PROXY_";

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "hotswap-proxy.json";

/// Default history file
pub const HISTORY_FILE_STR: &str = "history.log";

/// Default log level
pub const LOG_LEVEL_STR: &str = "info";

/// Largest accepted read buffer
pub const MAX_BUFFER_SIZE: usize = 16 * 1024 * 1024;

/// Default bind address of new proxies
pub fn bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

/// Default history file
pub fn history_file() -> PathBuf {
    PathBuf::from(HISTORY_FILE_STR)
}

/// Default log level
pub fn log_level() -> String {
    LOG_LEVEL_STR.to_string()
}

/// Default read buffer size
pub fn buffer_size() -> usize {
    crate::proxy::DEFAULT_BUFFER_SIZE
}

/// Default timeout for connecting to the remote, in seconds
pub fn connect_timeout() -> u64 {
    10
}

/// Default timeout for stopping a proxy, in seconds
pub fn shutdown_timeout() -> u64 {
    5
}
