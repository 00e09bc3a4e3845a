//! Byte patterns used by module rules
//!
//! A pattern is written either as `{"hex": "0d0a"}` or as `{"text": "..."}`.
//! Text supports backslash escapes and `$name` references, which are resolved
//! per evaluation. Patterns without references are decoded once at load time.

use std::borrow::Cow;

use serde::Deserialize;

use crate::common::{decode_escapes, decode_hex, escape_bytes, expand_vars};
use crate::common::expand::has_references;
use crate::store::Value;

use super::ModuleError;

/// A compiled byte pattern
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "PatternDef")]
pub enum Pattern {
    /// Fixed bytes
    Literal(Vec<u8>),
    /// Text with variable references, rendered on use
    Template(String),
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum PatternDef {
    Text(String),
    Hex(String),
}

impl TryFrom<PatternDef> for Pattern {
    type Error = String;

    fn try_from(def: PatternDef) -> Result<Self, Self::Error> {
        match def {
            PatternDef::Hex(hex) => decode_hex(&hex).map(Pattern::Literal).map_err(|e| e.to_string()),
            PatternDef::Text(text) if has_references(&text) => {
                // Reject malformed escapes now rather than on the first packet
                let skeleton = expand_vars(&text, |_| Some(String::new())).map_err(|e| e.to_string())?;
                decode_escapes(&skeleton).map_err(|e| e.to_string())?;
                Ok(Pattern::Template(text))
            }
            PatternDef::Text(text) => decode_escapes(&text).map(Pattern::Literal).map_err(|e| e.to_string()),
        }
    }
}

impl Pattern {
    /// Literal pattern from text, for building rules in code
    pub fn text(text: &str) -> Self {
        Pattern::Literal(text.as_bytes().to_vec())
    }

    /// Render the pattern to bytes
    ///
    /// Referenced values are inserted byte for byte: text and bytes unchanged,
    /// integers in decimal.
    pub fn render<F>(&self, mut resolve: F) -> Result<Cow<'_, [u8]>, ModuleError>
    where
        F: FnMut(&str) -> Option<Value>,
    {
        match self {
            Pattern::Literal(bytes) => Ok(Cow::Borrowed(bytes)),
            Pattern::Template(text) => {
                let expanded = expand_vars(text, |name| resolve(name).map(|v| escape_bytes(&v.to_bytes())))
                    .map_err(|e| ModuleError::Runtime(e.to_string()))?;
                let bytes = decode_escapes(&expanded).map_err(|e| ModuleError::Runtime(e.to_string()))?;
                Ok(Cow::Owned(bytes))
            }
        }
    }
}

/// Position of the first occurrence of `needle`
pub fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Replace every non-overlapping occurrence of `from` with `to`
pub fn replace_all(haystack: &[u8], from: &[u8], to: &[u8]) -> Vec<u8> {
    if from.is_empty() {
        return haystack.to_vec();
    }

    let mut out = Vec::with_capacity(haystack.len());
    let mut rest = haystack;
    while let Some(pos) = find(rest, from) {
        out.extend_from_slice(&rest[..pos]);
        out.extend_from_slice(to);
        rest = &rest[pos + from.len()..];
    }
    out.extend_from_slice(rest);
    out
}
