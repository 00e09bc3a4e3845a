//! Tool to validate parser module files before loading them into a proxy

use std::path::PathBuf;
use std::process::exit;

use clap::Parser;
use hotswap_proxy::command::usage;
use hotswap_proxy::module::{self, Direction};

/// Validate parser module files and describe what they contain
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Module files to check
    #[clap(required = true)]
    files: Vec<PathBuf>,
}

fn main() {
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "warn"),
    );

    let args = Args::parse();
    let mut failed = 0;

    for path in &args.files {
        println!("=== {} ===", path.display());

        let module = match module::load(path) {
            Ok(module) => module,
            Err(e) => {
                println!("  [ERROR] {}", e);
                failed += 1;
                continue;
            }
        };

        println!("Module: {}", module.name());
        if let Some(description) = module.description() {
            println!("Description: {}", description);
        }
        if let Some((_, fingerprint)) = module.source() {
            println!("Fingerprint: {}", fingerprint);
        }

        println!(
            "Parse rules: {} client -> server, {} server -> client",
            module.rules(Direction::ClientToServer).len(),
            module.rules(Direction::ServerToClient).len()
        );

        let locals = module.locals();
        if !locals.is_empty() {
            println!("\nModule-local variables:");
            for (name, value) in &locals {
                println!("  - {} = {} ({})", name, value, value.kind());
            }
        }

        let commands: Vec<_> = module.commands().collect();
        if !commands.is_empty() {
            println!("\nCommands:");
            for (name, def) in commands {
                println!("  - {:<40} {}", usage(name, &def.args), def.help);
            }
        }

        if !module.timers().is_empty() {
            println!("\nTimers:");
            for (index, timer) in module.timers().iter().enumerate() {
                println!("  - #{} every {} ms, {} actions", index, timer.every_ms, timer.actions.len());
            }
        }
        println!();
    }

    if failed > 0 {
        println!("{} of {} module files have errors.", failed, args.files.len());
        exit(1);
    }
    println!("All {} module files are valid.", args.files.len());
}
