//! Parser modules
//!
//! A parser module is the inspection logic attached to a proxy: parse rules for
//! both directions, display settings, commands and timers, described in a JSON
//! file (see [`definition`]). Modules are immutable once built, except for
//! their module-local variables, which live inside the module value and are
//! therefore reset whenever a new version is built.
//!
//! A proxy holds its module in a [`ModuleSlot`]. Readers clone the `Arc` once
//! per chunk or command, the reload path builds the next version off to the
//! side and swaps it in with a single write.

pub mod definition;
pub mod engine;
pub mod loader;
pub mod pattern;

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use log::{info, warn};
use thiserror::Error;

use crate::command::is_core_command;
use crate::common::ProxyError;
use crate::store::Value;

pub use definition::{CommandDef, DisplayDef, DumpFormat, ModuleDef, Rule, TimerDef};
pub use engine::{Direction, Disposition, ExecContext, Injector};
pub use loader::{is_stale, load, reload, Fingerprint};

/// Errors raised by module loading and execution
#[derive(Error, Debug)]
pub enum ModuleError {
    /// The module file could not be read
    #[error("cannot read {}: {source}", path.display())]
    Read {
        /// Module file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// The file is not well-formed JSON
    #[error("syntax error in {}: {message}", path.display())]
    Syntax {
        /// Module file
        path: PathBuf,
        /// 1-based line
        line: usize,
        /// 1-based column
        column: usize,
        /// Parser message
        message: String,
    },

    /// The JSON does not describe a valid module
    #[error("invalid module {}: {reason}", path.display())]
    Definition {
        /// Module file
        path: PathBuf,
        /// What is wrong
        reason: String,
    },

    /// Evaluation failed
    #[error("{0}")]
    Runtime(String),

    /// An injection was rejected by the proxy
    #[error(transparent)]
    Injection(ProxyError),
}

impl From<ModuleError> for ProxyError {
    fn from(err: ModuleError) -> Self {
        match err {
            ModuleError::Read { path, source } => ProxyError::ModuleLoad {
                path,
                reason: format!("cannot read file: {}", source),
            },
            ModuleError::Syntax { path, message, .. } => ProxyError::ModuleLoad {
                path,
                reason: format!("syntax error: {}", message),
            },
            ModuleError::Definition { path, reason } => ProxyError::ModuleLoad { path, reason },
            ModuleError::Runtime(message) => ProxyError::ParseRuntime(message),
            ModuleError::Injection(inner) => inner,
        }
    }
}

/// A built parser module
#[derive(Debug)]
pub struct Module {
    def: ModuleDef,
    source: Option<(PathBuf, Fingerprint)>,
    version: u64,
    locals: Mutex<BTreeMap<String, Value>>,
}

impl Module {
    pub(crate) fn new(def: ModuleDef, source: Option<(PathBuf, Fingerprint)>, version: u64) -> Self {
        for name in def.commands.keys().filter(|name| is_core_command(name)) {
            warn!(
                "Module '{}' command '{}' is shadowed by the core command of the same name",
                def.name, name
            );
        }
        let locals = Mutex::new(def.locals.clone());
        Self {
            def,
            source,
            version,
            locals,
        }
    }

    /// Module without a backing file
    pub fn from_definition(def: ModuleDef) -> Self {
        Self::new(def, None, 1)
    }

    /// Built-in module that forwards everything and displays every chunk
    pub fn passthrough() -> Self {
        Self::from_definition(ModuleDef {
            name: "passthrough".to_string(),
            description: Some("forwards all traffic unchanged".to_string()),
            locals: BTreeMap::new(),
            display: DisplayDef::default(),
            parse: Default::default(),
            commands: BTreeMap::new(),
            timers: Vec::new(),
        })
    }

    /// Module name
    pub fn name(&self) -> &str {
        &self.def.name
    }

    /// Optional description
    pub fn description(&self) -> Option<&str> {
        self.def.description.as_deref()
    }

    /// File and fingerprint, `None` for built-in modules
    pub fn source(&self) -> Option<(&Path, &Fingerprint)> {
        self.source.as_ref().map(|(path, fingerprint)| (path.as_path(), fingerprint))
    }

    /// File path, `None` for built-in modules
    pub fn path(&self) -> Option<&Path> {
        self.source().map(|(path, _)| path)
    }

    /// Version, 1 for a freshly loaded file
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Display settings
    pub fn display(&self) -> &DisplayDef {
        &self.def.display
    }

    /// Parse rules for a direction
    pub fn rules(&self, direction: Direction) -> &[Rule] {
        match direction {
            Direction::ClientToServer => &self.def.parse.client,
            Direction::ServerToClient => &self.def.parse.server,
        }
    }

    /// Look up a command
    pub fn command(&self, name: &str) -> Option<&CommandDef> {
        self.def.commands.get(name)
    }

    /// Commands not shadowed by a core command, sorted by name
    pub fn commands(&self) -> impl Iterator<Item = (&str, &CommandDef)> {
        self.def
            .commands
            .iter()
            .filter(|(name, _)| !is_core_command(name))
            .map(|(name, command)| (name.as_str(), command))
    }

    /// Timers
    pub fn timers(&self) -> &[TimerDef] {
        &self.def.timers
    }

    /// Current value of a module-local
    pub fn local(&self, name: &str) -> Option<Value> {
        self.lock_locals().get(name).cloned()
    }

    /// Copy of all module-locals
    pub fn locals(&self) -> BTreeMap<String, Value> {
        self.lock_locals().clone()
    }

    /// Short description such as `http-rewrite v3`
    pub fn label(&self) -> String {
        format!("{} v{}", self.def.name, self.version)
    }

    pub(crate) fn lock_locals(&self) -> MutexGuard<'_, BTreeMap<String, Value>> {
        self.locals.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// The module currently published for one proxy
#[derive(Debug)]
pub struct ModuleSlot {
    current: RwLock<Arc<Module>>,
}

impl ModuleSlot {
    /// Create a slot holding `module`
    pub fn new(module: Module) -> Self {
        Self {
            current: RwLock::new(Arc::new(module)),
        }
    }

    /// The published module
    pub fn current(&self) -> Arc<Module> {
        let current = self.current.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&current)
    }

    /// Publish a new module, returning it
    pub fn publish(&self, module: Module) -> Arc<Module> {
        let module = Arc::new(module);
        let mut current = self.current.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *current = Arc::clone(&module);
        module
    }

    /// Reload the published module if its file changed
    ///
    /// # Returns
    ///
    /// `Some(module)` when a new version was published, `None` when the file is
    /// unchanged. On error the previous module stays published.
    pub fn refresh(&self) -> Result<Option<Arc<Module>>, ModuleError> {
        let current = self.current();
        if !is_stale(&current)? {
            return Ok(None);
        }

        let next = reload(&current)?;
        info!("Reloaded module {} from {}", next.label(), next.path().map(|p| p.display().to_string()).unwrap_or_default());
        Ok(Some(self.publish(next)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_refresh_publishes_new_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.json");
        std::fs::write(&path, r#"{"name": "m", "locals": {"count": 1}}"#).unwrap();

        let slot = ModuleSlot::new(load(&path).unwrap());
        let first = slot.current();
        assert!(slot.refresh().unwrap().is_none());

        std::fs::write(&path, r#"{"name": "m", "locals": {"count": 2}}"#).unwrap();
        let second = slot.refresh().unwrap().unwrap();
        assert_eq!(second.version(), 2);
        assert_eq!(slot.current().local("count"), Some(Value::Int(2)));

        // Readers holding the old version keep a consistent view
        assert_eq!(first.version(), 1);
        assert_eq!(first.local("count"), Some(Value::Int(1)));
    }

    #[test]
    fn test_slot_keeps_module_on_broken_edit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.json");
        std::fs::write(&path, r#"{"name": "m"}"#).unwrap();

        let slot = ModuleSlot::new(load(&path).unwrap());
        std::fs::write(&path, r#"{"name": "m", "parse": {"client": [{"then": ["explode"]}]}}"#).unwrap();

        let err: ProxyError = slot.refresh().unwrap_err().into();
        assert!(matches!(err, ProxyError::ModuleLoad { .. }));
        assert_eq!(slot.current().version(), 1);
    }

    #[test]
    fn test_passthrough_is_never_stale() {
        let slot = ModuleSlot::new(Module::passthrough());
        assert!(slot.refresh().unwrap().is_none());
        assert!(slot.current().path().is_none());
    }

    #[test]
    fn test_shadowed_commands_are_hidden() {
        let def: ModuleDef = serde_json::from_str(
            r#"{"name": "m", "commands": {"list": {"actions": []}, "ping": {"actions": []}}}"#,
        )
        .unwrap();
        let module = Module::from_definition(def);
        let names: Vec<&str> = module.commands().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["ping"]);
    }
}
