//! Error handling module
//!
//! This module defines the error types and result type aliases used in the application.
//! Every variant renders as a single line naming the failing operation and the
//! offending value, which is what the console prints after a failed command.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Hotswap proxy error type
#[derive(Error, Debug)]
pub enum ProxyError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A parser module could not be loaded or reloaded; the previous module stays in effect
    #[error("Module load error for {}: {reason}", path.display())]
    ModuleLoad {
        /// Module source path
        path: PathBuf,
        /// What went wrong
        reason: String,
    },

    /// A proxy with this name already exists
    #[error("Name collision: a proxy named '{0}' already exists")]
    NameCollision(String),

    /// The proposed proxy name breaks the naming rules
    #[error("Invalid proxy name '{name}': {reason}")]
    InvalidName {
        /// Rejected name
        name: String,
        /// Rule that was broken
        reason: String,
    },

    /// The listening socket could not be opened
    #[error("Bind error on port {port}: {reason}")]
    Bind {
        /// Local port
        port: u16,
        /// What went wrong
        reason: String,
    },

    /// An instance-scoped command was issued while no proxy exists
    #[error("No active proxy: create one with 'create <name> <remoteHost> <localPort> <remotePort>'")]
    NoActiveProxy,

    /// No proxy with this name or local port
    #[error("Unknown proxy '{0}'")]
    UnknownProxy(String),

    /// A module raised while processing a chunk or running a command
    #[error("Parse runtime error: {0}")]
    ParseRuntime(String),

    /// A command argument failed schema validation
    #[error("Argument error in '{command}': <{argument}> {reason}")]
    Argument {
        /// Command name
        command: String,
        /// Offending argument name
        argument: String,
        /// Why it was rejected
        reason: String,
    },

    /// First token did not resolve against the command table
    #[error("Unknown command '{0}', try 'help'")]
    UnknownCommand(String),

    /// A `$name` reference could not be resolved
    #[error("Variable expansion error: {0}")]
    VariableExpansion(String),

    /// Variable store error (bad name, missing variable, bad file)
    #[error("Variable error: {0}")]
    Variable(String),

    /// Injection requested on a link that is not connected
    #[error("Not connected: {0}")]
    NotConnected(String),

    /// History lookup or expansion error
    #[error("History error: {0}")]
    History(String),

    /// A script line failed; the script stopped there
    #[error("{} line {line}: {source}", path.display())]
    Script {
        /// Script file
        path: PathBuf,
        /// 1-based line number
        line: usize,
        /// Error of that line
        source: Box<ProxyError>,
    },

    /// Other error
    #[error("Other error: {0}")]
    Other(String),
}

/// Result type alias
///
/// This is a `Result` type alias that uses our custom `ProxyError`.
pub type Result<T> = std::result::Result<T, ProxyError>;
