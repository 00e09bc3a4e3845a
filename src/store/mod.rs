//! Variable store
//!
//! Process-wide key/value state. It is shared by every proxy instance, every
//! loaded module and the command line, and it is the only module state that
//! survives a module reload.
//!
//! All access goes through one `RwLock`; read-modify-write operations such as
//! [`VariableStore::increment`] hold the write lock for the whole update so
//! concurrent timers and relay loops never lose an update.

mod value;

pub use value::Value;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::RwLock;

use log::{debug, info};

use crate::common::{fs, ProxyError, Result};

/// Characters that can never appear in a variable name
const FORBIDDEN_NAME_CHARS: [char; 5] = ['$', '\\', '(', ')', ' '];

/// Shared variable store
#[derive(Debug, Default)]
pub struct VariableStore {
    vars: RwLock<BTreeMap<String, Value>>,
}

/// Check a variable name against the naming rules
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ProxyError::Variable("variable name must not be empty".to_string()));
    }
    if let Some(c) = name.chars().find(|c| FORBIDDEN_NAME_CHARS.contains(c) || c.is_whitespace()) {
        return Err(ProxyError::Variable(format!(
            "bad variable name '{}': must not contain {:?}",
            name, c
        )));
    }
    Ok(())
}

impl VariableStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a copy of a variable
    pub fn get(&self, name: &str) -> Option<Value> {
        self.read().get(name).cloned()
    }

    /// Check whether a variable exists
    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    /// Set a variable, returning the previous value
    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<Option<Value>> {
        validate_name(name)?;
        Ok(self.write().insert(name.to_string(), value.into()))
    }

    /// Remove a variable, returning whether it existed
    pub fn unset(&self, name: &str) -> bool {
        self.write().remove(name).is_some()
    }

    /// Remove every variable
    pub fn clear(&self) {
        self.write().clear();
    }

    /// Add `delta` to an integer variable; a missing variable starts at zero
    pub fn increment(&self, name: &str, delta: i64) -> Result<i64> {
        validate_name(name)?;
        let mut vars = self.write();
        let current = match vars.get(name) {
            None => 0,
            Some(value) => value.as_int().ok_or_else(|| {
                ProxyError::Variable(format!("variable '{}' is not an integer ({})", name, value.kind()))
            })?,
        };
        let next = current.wrapping_add(delta);
        vars.insert(name.to_string(), Value::Int(next));
        Ok(next)
    }

    /// Sorted list of variable names
    pub fn names(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    /// Number of variables
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Consistent copy of the whole mapping
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.read().clone()
    }

    /// Save all variables to a JSON file
    pub fn save(&self, path: &Path) -> Result<usize> {
        let snapshot = self.snapshot();
        let json = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| ProxyError::Variable(format!("cannot serialize variables: {}", e)))?;
        fs::write_file(path, json.as_bytes())?;

        info!("Saved {} variables to {}", snapshot.len(), path.display());
        Ok(snapshot.len())
    }

    /// Load variables from a JSON file
    ///
    /// The whole file is parsed and validated before anything is applied;
    /// variables not mentioned in the file are retained.
    pub fn load(&self, path: &Path) -> Result<usize> {
        let text = fs::read_text(path)?;
        let loaded: BTreeMap<String, Value> = serde_json::from_str(&text).map_err(|e| {
            ProxyError::Variable(format!("cannot parse variable file {}: {}", path.display(), e))
        })?;
        for name in loaded.keys() {
            validate_name(name)?;
        }

        let count = loaded.len();
        self.write().extend(loaded);

        debug!("Loaded {} variables from {}", count, path.display());
        Ok(count)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, Value>> {
        // A panic while holding the lock cannot leave the map half-updated
        self.vars.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, Value>> {
        self.vars.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
