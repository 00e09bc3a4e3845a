//! File system helpers
//!
//! Thin wrappers that attach the offending path to IO failures.

use std::fs;
use std::path::Path;

use super::error::{ProxyError, Result};

/// Check that a path exists and is a regular file
pub fn check_file_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(ProxyError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("file does not exist: {}", path.display()),
        )));
    }

    if !path.is_file() {
        return Err(ProxyError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("path is not a file: {}", path.display()),
        )));
    }

    Ok(())
}

/// Read a whole file as bytes
pub fn read_file(path: &Path) -> Result<Vec<u8>> {
    check_file_exists(path)?;

    fs::read(path).map_err(|e| with_path(e, path))
}

/// Read a whole file as UTF-8 text
pub fn read_text(path: &Path) -> Result<String> {
    check_file_exists(path)?;

    fs::read_to_string(path).map_err(|e| with_path(e, path))
}

/// Write a file, replacing previous contents
pub fn write_file(path: &Path, contents: &[u8]) -> Result<()> {
    fs::write(path, contents).map_err(|e| with_path(e, path))
}

fn with_path(err: std::io::Error, path: &Path) -> ProxyError {
    ProxyError::Io(std::io::Error::new(err.kind(), format!("{}: {}", path.display(), err)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_check_file_exists() {
        let path = PathBuf::from("Cargo.toml");
        assert!(check_file_exists(&path).is_ok(), "Cargo.toml should exist");

        let path = PathBuf::from("non_existent_file.txt");
        assert!(check_file_exists(&path).is_err());

        let path = PathBuf::from("src");
        assert!(check_file_exists(&path).is_err(), "a directory is not a file");
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");

        write_file(&path, b"\x00\x01abc").unwrap();
        assert_eq!(read_file(&path).unwrap(), b"\x00\x01abc");

        let err = read_text(&dir.path().join("missing.txt")).unwrap_err();
        assert!(err.to_string().contains("missing.txt"));
    }
}
