//! Common module
//!
//! This module contains shared types, errors, and utility functions used throughout the application.

pub mod error;
pub mod expand;
pub mod fs;
pub mod log;
pub mod net;
pub mod text;

// Re-export commonly used types and functions
pub use error::{ProxyError, Result};
pub use expand::{expand_vars, ExpandError};
pub use log::init_logger;
pub use net::{bind_listener, connect_remote, format_endpoint};
pub use text::{decode_escapes, decode_hex, escape_bytes, escape_token, parse_int, TextError};
