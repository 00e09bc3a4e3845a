//! Command router
//!
//! One operator line goes through these steps, in order:
//!
//! 1. empty lines and `#` comments are ignored
//! 2. `!N` history references are replaced
//! 3. the line is recorded in history, even if a later step fails
//! 4. every proxy whose module file changed reloads it
//! 5. `$name` and `$(name)` are replaced from the variable store
//! 6. the first token is looked up among the core commands, then among the
//!    commands of the selected proxy's module
//! 7. arguments are bound against the command's schema, then it runs

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use log::{debug, warn};

use crate::common::{escape_token, expand_vars, ProxyError, Result};
use crate::console::Console;
use crate::module::ExecContext;
use crate::registry::ProxyRegistry;

use super::args::bind_args;
use super::builtin::CoreCommand;
use super::history::History;
use super::CommandOutput;

/// How deep `run` may nest scripts
pub const MAX_SCRIPT_DEPTH: usize = 8;

/// Router settings
#[derive(Debug, Clone, Default)]
pub struct RouterOptions {
    /// Default file of `savevars` and `loadvars`
    pub vars_file: Option<PathBuf>,
}

/// Dispatches operator lines
#[derive(Debug)]
pub struct Router {
    pub(super) registry: ProxyRegistry,
    pub(super) history: History,
    pub(super) options: RouterOptions,
    /// Last reload failure reported per proxy, to avoid repeating it on every line
    pub(super) reload_failures: HashMap<String, String>,
}

impl Router {
    /// Create a router
    pub fn new(registry: ProxyRegistry, history: History, options: RouterOptions) -> Self {
        Self {
            registry,
            history,
            options,
            reload_failures: HashMap::new(),
        }
    }

    /// The proxy registry
    pub fn registry(&self) -> &ProxyRegistry {
        &self.registry
    }

    /// The proxy registry, mutably
    pub fn registry_mut(&mut self) -> &mut ProxyRegistry {
        &mut self.registry
    }

    /// Command history
    pub fn history(&self) -> &History {
        &self.history
    }

    /// Console output goes to
    pub fn console(&self) -> &Console {
        self.registry.console()
    }

    /// Dispatch one operator line
    pub async fn dispatch(&mut self, raw_line: &str) -> Result<CommandOutput> {
        self.dispatch_line(raw_line, true, 0).await
    }

    /// Stop every proxy
    pub async fn shutdown(&mut self) {
        self.registry.kill_all().await;
    }

    pub(super) fn dispatch_line<'a>(
        &'a mut self,
        raw_line: &'a str,
        record: bool,
        depth: usize,
    ) -> BoxFuture<'a, Result<CommandOutput>> {
        async move {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                return Ok(CommandOutput::empty());
            }

            let line = self.history.expand(line)?;
            if record {
                self.history.push(&line);
            }

            self.refresh_modules().await;

            let store = Arc::clone(self.registry.store());
            let expanded = expand_vars(&line, |name| store.get(name).map(|value| escape_token(&value.to_bytes())))
                .map_err(|e| ProxyError::VariableExpansion(e.to_string()))?;
            if expanded != line {
                debug!("Expanded '{}' to '{}'", line, expanded);
            }

            let tokens: Vec<&str> = expanded.split_whitespace().collect();
            let (name, rest) = match tokens.split_first() {
                Some((name, rest)) => (*name, rest),
                None => return Ok(CommandOutput::empty()),
            };

            if let Some(command) = CoreCommand::from_name(name) {
                let args = bind_args(name, &command.args(), rest)?;
                return self.run_builtin(command, args, depth).await;
            }
            self.run_module_command(name, rest)
        }
        .boxed()
    }

    /// Reload changed modules of every proxy, reporting reloads and failures
    async fn refresh_modules(&mut self) {
        let mut lines = Vec::new();

        for instance in self.registry.instances() {
            let name = instance.name();
            match instance.refresh_module().await {
                Ok(Some(module)) => {
                    self.reload_failures.remove(&name);
                    lines.push(format!("[{}] reloaded {}", name, module.label()));
                }
                Ok(None) => {}
                Err(e) => {
                    let reason = e.to_string();
                    if self.reload_failures.get(&name) != Some(&reason) {
                        warn!("[{}] module reload failed: {}", name, reason);
                        lines.push(format!("[{}] keeping {}: {}", name, instance.module().label(), reason));
                        self.reload_failures.insert(name, reason);
                    }
                }
            }
        }

        if !lines.is_empty() {
            self.registry.console().emit(lines, false);
        }
    }

    fn run_module_command(&self, name: &str, tokens: &[&str]) -> Result<CommandOutput> {
        let unknown = || ProxyError::UnknownCommand(name.to_string());
        let instance = self.registry.selected().ok_or_else(unknown)?;
        let module = instance.module();
        let command = module.command(name).ok_or_else(unknown)?;
        let args = bind_args(name, &command.args, tokens)?;

        let injector = instance.injector();
        let proxy_name = instance.name();
        let mut ctx = ExecContext::new(self.registry.store(), injector.as_ref(), &proxy_name);
        let outcome = module.run_command(name, &args, &mut ctx);
        let lines = ctx.take_output();

        match outcome {
            Ok(()) => Ok(CommandOutput::lines(lines)),
            Err(e) => {
                if !lines.is_empty() {
                    self.console().emit(lines, false);
                }
                Err(e.into())
            }
        }
    }
}
