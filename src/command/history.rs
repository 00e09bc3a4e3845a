//! Command history
//!
//! A sequential log of operator lines, numbered from 1. Lines are recorded
//! after `!N` expansion but before variable expansion, and consecutive
//! duplicates are stored once.

use std::path::Path;

use log::debug;

use crate::common::{fs, ProxyError, Result};

/// Operator command history
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct History {
    entries: Vec<String>,
}

impl History {
    /// Create an empty history
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a history file, one entry per line; a missing file is an empty history
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let text = fs::read_text(path)?;
        let mut history = Self::new();
        for line in text.lines() {
            history.push(line);
        }
        debug!("Loaded {} history entries from {}", history.len(), path.display());
        Ok(history)
    }

    /// Write the history file
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut text = self.entries.join("\n");
        if !text.is_empty() {
            text.push('\n');
        }
        fs::write_file(path, text.as_bytes())
    }

    /// Append a line unless it is empty or repeats the last entry
    pub fn push(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() || self.entries.last().map(String::as_str) == Some(line) {
            return;
        }
        self.entries.push(line.to_string());
    }

    /// Entry by 1-based position
    pub fn get(&self, id: usize) -> Option<&str> {
        id.checked_sub(1).and_then(|idx| self.entries.get(idx)).map(String::as_str)
    }

    /// Remove the entry at a 1-based position
    pub fn remove(&mut self, id: usize) -> Result<String> {
        if id == 0 || id > self.entries.len() {
            return Err(ProxyError::History(format!(
                "no entry {} (history has {} entries)",
                id,
                self.entries.len()
            )));
        }
        Ok(self.entries.remove(id - 1))
    }

    /// Remove every entry
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries with their 1-based positions
    pub fn numbered(&self) -> impl Iterator<Item = (usize, &str)> {
        self.entries.iter().enumerate().map(|(idx, line)| (idx + 1, line.as_str()))
    }

    /// Replace every `!N` token with entry N and `!!` with the last entry
    ///
    /// Only whole whitespace-separated tokens are replaced; spacing is kept.
    pub fn expand(&self, line: &str) -> Result<String> {
        let mut out = String::with_capacity(line.len());
        let mut rest = line;

        while !rest.is_empty() {
            let token_start = rest.len() - rest.trim_start().len();
            out.push_str(&rest[..token_start]);
            rest = &rest[token_start..];

            let token_end = rest.find(char::is_whitespace).unwrap_or(rest.len());
            let token = &rest[..token_end];
            out.push_str(self.expand_token(token)?);
            rest = &rest[token_end..];
        }

        Ok(out)
    }

    fn expand_token<'a>(&'a self, token: &'a str) -> Result<&'a str> {
        if token == "!!" {
            return self
                .entries
                .last()
                .map(String::as_str)
                .ok_or_else(|| ProxyError::History("'!!' used with an empty history".to_string()));
        }
        match token.strip_prefix('!') {
            Some(digits) if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) => {
                let id: usize = digits
                    .parse()
                    .map_err(|_| ProxyError::History(format!("bad history reference '{}'", token)))?;
                self.get(id)
                    .ok_or_else(|| ProxyError::History(format!("'{}': no history entry {}", token, id)))
            }
            _ => Ok(token),
        }
    }
}
