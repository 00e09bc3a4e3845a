//! Hotswap Proxy Command Line Tool
//!
//! Reads operator commands from stdin and prints relay output on stdout.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::{info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};

use hotswap_proxy::command::{History, Router};
use hotswap_proxy::common::{init_logger, Result};
use hotswap_proxy::config::{load_config, ConfigValues, ProxySpec};
use hotswap_proxy::console::{run_printer, Console};
use hotswap_proxy::{ProxyRegistry, VariableStore, APP_NAME, VERSION};

const PROMPT: &str = "> ";

/// Hotswap Proxy: interactive TCP interception proxy with live-reloadable parser modules
#[derive(Parser, Debug)]
#[clap(author, version = VERSION, about, long_about = None)]
struct Args {
    /// Load configuration from a file
    #[clap(short, long)]
    config_file: Option<PathBuf>,

    /// Address new proxies listen on
    #[clap(long)]
    bind_address: Option<IpAddr>,

    /// Module file loaded into new proxies (built-in passthrough by default)
    #[clap(short = 'm', long)]
    default_module: Option<PathBuf>,

    /// Command history file
    #[clap(long)]
    history_file: Option<PathBuf>,

    /// Variable file loaded at startup and used by savevars/loadvars
    #[clap(long)]
    vars_file: Option<PathBuf>,

    /// Read buffer size per connection, in bytes
    #[clap(long)]
    buffer_size: Option<usize>,

    /// Remote connect timeout, in seconds
    #[clap(long)]
    connect_timeout: Option<u64>,

    /// Proxy stop timeout, in seconds
    #[clap(long)]
    shutdown_timeout: Option<u64>,

    /// Log level (error, warn, info, debug, trace)
    #[clap(long)]
    log_level: Option<String>,

    /// Proxy to create at startup, may be repeated
    #[clap(short, long = "proxy", value_name = "NAME:LOCAL_PORT:HOST:REMOTE_PORT")]
    proxies: Vec<ProxySpec>,
}

impl Args {
    fn config_values(&self) -> ConfigValues {
        ConfigValues {
            bind_address: self.bind_address,
            default_module: self.default_module.clone(),
            history_file: self.history_file.clone(),
            vars_file: self.vars_file.clone(),
            buffer_size: self.buffer_size,
            connect_timeout: self.connect_timeout,
            shutdown_timeout: self.shutdown_timeout,
            log_level: self.log_level.clone(),
            proxies: (!self.proxies.is_empty()).then(|| self.proxies.clone()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(args.config_file.as_deref(), args.config_values())?;

    init_logger(config.log_level());
    info!("Starting {} v{}", APP_NAME, VERSION);

    let (console, rx) = Console::channel();
    let printer = tokio::spawn(run_printer(rx, PROMPT.to_string()));

    let store = Arc::new(VariableStore::new());
    if let Some(path) = config.vars_file().filter(|path| path.exists()) {
        match store.load(path) {
            Ok(count) => info!("Loaded {} variables from {}", count, path.display()),
            Err(e) => console.print(format!("Variables not loaded: {}", e)),
        }
    }

    let history_file = config.history_file();
    let history = History::load(&history_file).unwrap_or_else(|e| {
        warn!("History not loaded from {}: {}", history_file.display(), e);
        History::new()
    });

    let registry = ProxyRegistry::new(
        store,
        console.clone(),
        config.proxy_settings(),
        config.default_module().map(Path::to_path_buf),
    );
    let mut router = Router::new(registry, history, config.router_options());

    for spec in config.proxies() {
        let created = router
            .registry_mut()
            .create(&spec.name, spec.local_port, &spec.remote_host, spec.remote_port)
            .map(|instance| instance.module().label());
        match created {
            Ok(module) => console.emit(vec![format!("Proxy {} started with {}", spec, module)], false),
            Err(e) => console.emit(vec![format!("Proxy {} not started: {}", spec, e)], false),
        }
    }
    console.emit(vec![format!("{} v{}, type 'help' for commands", APP_NAME, VERSION)], true);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Failed to read from stdin: {}", e);
                        break;
                    }
                };

                match router.dispatch(&line).await {
                    Ok(output) => {
                        let quit = output.quit;
                        console.emit(output.lines, !quit);
                        if quit {
                            break;
                        }
                    }
                    Err(e) => console.emit(vec![format!("Error: {}", e)], true),
                }
            }

            _ = &mut ctrl_c => {
                console.emit(vec![String::new(), "Interrupted".to_string()], false);
                break;
            }
        }
    }

    if let Err(e) = router.history().save(&history_file) {
        warn!("History not saved to {}: {}", history_file.display(), e);
    }
    router.shutdown().await;

    // The printer finishes once every console sender is gone
    drop(router);
    drop(console);
    let _ = tokio::time::timeout(Duration::from_secs(1), printer).await;

    info!("{} stopped", APP_NAME);
    Ok(())
}
