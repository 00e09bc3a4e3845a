//! Logging utilities
//!
//! The console owns stdout, so log records go to stderr through `env_logger`.

/// Initialize the logging system
///
/// `RUST_LOG` takes precedence over the configured level.
///
/// # Parameters
///
/// * `level` - Log level used when `RUST_LOG` is not set
pub fn init_logger(level: &str) {
    let env = env_logger::Env::default()
        .filter_or("RUST_LOG", level);

    // A second initialisation (tests, embedded use) is not an error worth reporting
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .try_init();
}
