//! Hotswap Proxy: interactive TCP interception proxy with live-reloadable parser modules
//!
//! Each proxy instance listens on a local port, relays one client session to a
//! fixed remote endpoint and passes every chunk, in both directions, through a
//! parser module. Modules are JSON files; editing one takes effect at the next
//! operator command without dropping the session.
//!
//! # Main Features
//!
//! - Several named proxies, one of them selected for instance-scoped commands
//! - Parse rules that forward, rewrite or drop chunks, and inject data
//! - Module commands and timers alongside the core command set
//! - A variable store shared by all proxies and surviving module reloads
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use hotswap_proxy::command::{History, Router, RouterOptions};
//! use hotswap_proxy::console::Console;
//! use hotswap_proxy::proxy::ProxySettings;
//! use hotswap_proxy::{ProxyRegistry, Result, VariableStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let (console, rx) = Console::channel();
//!     tokio::spawn(hotswap_proxy::console::run_printer(rx, "> ".to_string()));
//!
//!     let store = Arc::new(VariableStore::new());
//!     let registry = ProxyRegistry::new(store, console, ProxySettings::default(), None);
//!     let mut router = Router::new(registry, History::new(), RouterOptions::default());
//!
//!     router.dispatch("create web example.com 8080 80").await?;
//!     router.dispatch("set greeting hello\\r\\n").await?;
//!     router.dispatch("send server $greeting").await?;
//!     router.shutdown().await;
//!     Ok(())
//! }
//! ```

// Public modules
pub mod command;
pub mod common;
pub mod config;
pub mod console;
pub mod module;
pub mod proxy;
pub mod registry;
pub mod store;

// Re-export commonly used structures and functions for convenience
pub use command::{CommandOutput, Router};
pub use common::{ProxyError, Result};
pub use module::{Module, ModuleError};
pub use proxy::ProxyInstance;
pub use registry::ProxyRegistry;
pub use store::{Value, VariableStore};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
