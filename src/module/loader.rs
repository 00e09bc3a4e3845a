//! Module loading and staleness detection
//!
//! A module is always built completely from the file before anyone can see it.
//! Staleness is decided by the SHA-256 digest of the file contents; the
//! modification time is recorded for display only, because edits made within
//! the file system's timestamp granularity would otherwise go unnoticed.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use log::debug;
use serde_json::error::Category;
use sha2::{Digest, Sha256};

use super::definition::ModuleDef;
use super::{Module, ModuleError};

/// Identity of one version of a module file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    digest: [u8; 32],
    modified: Option<SystemTime>,
}

impl Fingerprint {
    /// Fingerprint of file contents
    pub fn of(contents: &[u8], modified: Option<SystemTime>) -> Self {
        Self {
            digest: Sha256::digest(contents).into(),
            modified,
        }
    }

    /// SHA-256 of the contents
    pub fn digest(&self) -> &[u8; 32] {
        &self.digest
    }

    /// Modification time when the file was read, if the platform reports one
    pub fn modified(&self) -> Option<SystemTime> {
        self.modified
    }

    /// Same contents
    pub fn same_contents(&self, other: &Fingerprint) -> bool {
        self.digest == other.digest
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.digest[..6]))
    }
}

fn read_source(path: &Path) -> Result<(Vec<u8>, Fingerprint), ModuleError> {
    let read_error = |source| ModuleError::Read {
        path: path.to_path_buf(),
        source,
    };
    let contents = fs::read(path).map_err(read_error)?;
    let modified = fs::metadata(path).and_then(|m| m.modified()).ok();
    let fingerprint = Fingerprint::of(&contents, modified);
    Ok((contents, fingerprint))
}

fn build(path: &Path, version: u64) -> Result<Module, ModuleError> {
    let (contents, fingerprint) = read_source(path)?;

    let def: ModuleDef = serde_json::from_slice(&contents).map_err(|e| match e.classify() {
        Category::Data => ModuleError::Definition {
            path: path.to_path_buf(),
            reason: e.to_string(),
        },
        _ => ModuleError::Syntax {
            path: path.to_path_buf(),
            line: e.line(),
            column: e.column(),
            message: e.to_string(),
        },
    })?;
    def.validate().map_err(|reason| ModuleError::Definition {
        path: path.to_path_buf(),
        reason,
    })?;

    debug!("Built module '{}' v{} from {} ({})", def.name, version, path.display(), fingerprint);
    Ok(Module::new(def, Some((PathBuf::from(path), fingerprint)), version))
}

/// Load a module from a file, starting at version 1
pub fn load(path: &Path) -> Result<Module, ModuleError> {
    build(path, 1)
}

/// Check whether the file behind a module has changed
///
/// Built-in modules have no file and are never stale. A file that can no
/// longer be read is an error, not "unchanged".
pub fn is_stale(module: &Module) -> Result<bool, ModuleError> {
    let Some((path, fingerprint)) = module.source() else {
        return Ok(false);
    };
    let (_, current) = read_source(path)?;
    Ok(!current.same_contents(fingerprint))
}

/// Build the next version of a module from its file
///
/// The returned module has fresh module-locals and a version one higher than
/// `module`. On error nothing about `module` changes.
pub fn reload(module: &Module) -> Result<Module, ModuleError> {
    match module.source() {
        Some((path, _)) => build(path, module.version() + 1),
        None => Err(ModuleError::Runtime(format!("module '{}' is built in and cannot be reloaded", module.name()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const V1: &str = r#"{"name": "demo", "locals": {"n": 0}}"#;
    const V2: &str = r#"{"name": "demo", "locals": {"n": 5}, "parse": {"client": [{"then": ["drop"]}]}}"#;

    #[test]
    fn test_load_and_reload_versions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demo.json");
        std::fs::write(&path, V1).unwrap();

        let module = load(&path).unwrap();
        assert_eq!(module.version(), 1);
        assert!(!is_stale(&module).unwrap());

        std::fs::write(&path, V2).unwrap();
        assert!(is_stale(&module).unwrap());

        let next = reload(&module).unwrap();
        assert_eq!(next.version(), 2);
        assert!(!is_stale(&next).unwrap());
        assert_eq!(next.local("n"), Some(crate::store::Value::Int(5)));
    }

    #[test]
    fn test_errors_are_classified() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");

        std::fs::write(&path, "{\"name\": ").unwrap();
        assert!(matches!(load(&path), Err(ModuleError::Syntax { .. })));

        std::fs::write(&path, r#"{"name": "x", "timers": [{"every_ms": 0, "actions": []}]}"#).unwrap();
        assert!(matches!(load(&path), Err(ModuleError::Definition { .. })));

        std::fs::write(&path, r#"{"name": 12}"#).unwrap();
        assert!(matches!(load(&path), Err(ModuleError::Definition { .. })));

        assert!(matches!(load(&dir.path().join("missing.json")), Err(ModuleError::Read { .. })));
    }

    #[test]
    fn test_unreadable_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.json");
        std::fs::write(&path, V1).unwrap();

        let module = load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert!(is_stale(&module).is_err());
    }

    #[test]
    fn test_failed_reload_keeps_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demo.json");
        std::fs::write(&path, V1).unwrap();
        let module = load(&path).unwrap();

        std::fs::write(&path, "not json").unwrap();
        assert!(reload(&module).is_err());
        assert_eq!(module.version(), 1);
    }
}
