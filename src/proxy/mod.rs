//! Proxy instances
//!
//! This module implements the relay engine: one listening socket per instance,
//! at most one client link and one server link, and a parser module applied to
//! every chunk in both directions.
//!
//! Each instance is driven by a message-driven actor task, so control
//! requests never contend with relay loops for a lock on the instance itself.

mod instance;
mod link;
mod message;
mod relay;

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use chrono::{DateTime, Local};

use crate::module::{DisplayDef, DumpFormat};

pub use instance::ProxyInstance;
pub use message::{create_channel, ProxyHandle, ProxyMessage, Role};

/// Default read buffer per link
pub const DEFAULT_BUFFER_SIZE: usize = 65535;

/// Socket and timeout settings shared by all instances
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySettings {
    /// Address listening sockets bind to
    pub bind_ip: IpAddr,
    /// Read buffer per link
    pub buffer_size: usize,
    /// Limit for connecting to the remote host
    pub connect_timeout: Duration,
    /// Limit for draining links and stopping an instance
    pub shutdown_timeout: Duration,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            buffer_size: DEFAULT_BUFFER_SIZE,
            connect_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

/// Operator overrides of a module's display settings
///
/// Kept by the instance, so they survive module reloads; `None` leaves the
/// module's own setting in effect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DisplayOverride {
    /// Notification line per chunk
    pub notify: Option<bool>,
    /// Dump format
    pub format: Option<DumpFormat>,
    /// Bytes per hexdump line
    pub bytes_per_line: Option<usize>,
}

impl DisplayOverride {
    pub fn notify(&self, display: &DisplayDef) -> bool {
        self.notify.unwrap_or(display.notify)
    }

    pub fn format(&self, display: &DisplayDef) -> DumpFormat {
        self.format.unwrap_or(display.format)
    }

    pub fn bytes_per_line(&self, display: &DisplayDef) -> usize {
        self.bytes_per_line.unwrap_or(display.bytes_per_line)
    }
}

/// Snapshot of an instance for listings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySummary {
    /// Instance name
    pub name: String,
    /// Listening port
    pub local_port: u16,
    /// Remote host
    pub remote_host: String,
    /// Remote port
    pub remote_port: u16,
    /// Module label, name and version
    pub module: String,
    /// Client peer, if connected
    pub client: Option<SocketAddr>,
    /// Server peer, if connected
    pub server: Option<SocketAddr>,
    /// Chunks relayed so far, both directions
    pub packets: u64,
    /// Creation time
    pub created_at: DateTime<Local>,
}

impl fmt::Display for ProxySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let peer = |p: Option<SocketAddr>| p.map(|a| a.to_string()).unwrap_or_else(|| "-".to_string());
        write!(
            f,
            "{} :{} -> {} [{}] client {} server {} ({} packets, since {})",
            self.name,
            self.local_port,
            crate::common::format_endpoint(&self.remote_host, self.remote_port),
            self.module,
            peer(self.client),
            peer(self.server),
            self.packets,
            self.created_at.format("%H:%M:%S")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_override_falls_back_to_module() {
        let display = DisplayDef {
            notify: false,
            format: DumpFormat::Plain,
            bytes_per_line: 8,
            filter: None,
        };

        let none = DisplayOverride::default();
        assert!(!none.notify(&display));
        assert_eq!(none.format(&display), DumpFormat::Plain);
        assert_eq!(none.bytes_per_line(&display), 8);

        let some = DisplayOverride {
            notify: Some(true),
            format: Some(DumpFormat::Hexdump),
            bytes_per_line: Some(32),
        };
        assert!(some.notify(&display));
        assert_eq!(some.format(&display), DumpFormat::Hexdump);
        assert_eq!(some.bytes_per_line(&display), 32);
    }
}
