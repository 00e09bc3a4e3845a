//! Command argument schemas
//!
//! Core commands and module commands describe their arguments with the same
//! [`ArgSpec`] list. Tokens are bound and converted before a handler runs, so a
//! rejected line has no side effects.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::common::{decode_hex, parse_int, ProxyError, Result};
use crate::store::Value;

/// Converted arguments by name
pub type ArgValues = BTreeMap<String, Value>;

/// Argument type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgType {
    /// Integer with optional radix prefix
    Int,
    /// TCP port, 1..=65535
    Port,
    /// Single token made of name/host characters
    Word,
    /// Free text, escapes left for the handler
    Text,
    /// Hex bytes
    Hex,
    /// One of a fixed set of words
    Choice,
    /// File system path
    Path,
}

impl ArgType {
    fn word() -> Self {
        ArgType::Word
    }
}

/// Declaration of one command argument
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArgSpec {
    /// Argument name, used in usage lines, errors and as a template variable
    pub name: String,

    /// Value type
    #[serde(rename = "type", default = "ArgType::word")]
    pub kind: ArgType,

    /// May be omitted
    #[serde(default)]
    pub optional: bool,

    /// Consumes all remaining tokens, joined with one space
    #[serde(default)]
    pub rest: bool,

    /// Lower bound for `int`/`port`
    #[serde(default)]
    pub min: Option<i64>,

    /// Upper bound for `int`/`port`
    #[serde(default)]
    pub max: Option<i64>,

    /// Accepted words for `choice`
    #[serde(default)]
    pub choices: Vec<String>,
}

impl ArgSpec {
    /// Required argument
    pub fn required(name: &str, kind: ArgType) -> Self {
        Self {
            name: name.to_string(),
            kind,
            optional: false,
            rest: false,
            min: None,
            max: None,
            choices: Vec::new(),
        }
    }

    /// Mark as optional
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Mark as consuming the rest of the line
    pub fn rest(mut self) -> Self {
        self.rest = true;
        self
    }

    /// Restrict an integer range
    pub fn range(mut self, min: i64, max: i64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    /// Restrict to a set of words
    pub fn choices(mut self, choices: &[&str]) -> Self {
        self.kind = ArgType::Choice;
        self.choices = choices.iter().map(|c| c.to_string()).collect();
        self
    }

    fn placeholder(&self) -> String {
        let inner = if self.kind == ArgType::Choice && !self.choices.is_empty() {
            self.choices.join("|")
        } else {
            self.name.clone()
        };
        let inner = if self.rest { format!("{}...", inner) } else { inner };
        if self.optional {
            format!("[{}]", inner)
        } else {
            format!("<{}>", inner)
        }
    }

    fn convert(&self, command: &str, token: &str) -> Result<Value> {
        let reject = |reason: String| ProxyError::Argument {
            command: command.to_string(),
            argument: self.name.clone(),
            reason,
        };

        match self.kind {
            ArgType::Int | ArgType::Port => {
                let value = parse_int(token).map_err(|e| reject(e.to_string()))?;
                let (min, max) = match self.kind {
                    ArgType::Port => (self.min.unwrap_or(1).max(1), self.max.unwrap_or(65535).min(65535)),
                    _ => (self.min.unwrap_or(i64::MIN), self.max.unwrap_or(i64::MAX)),
                };
                if value < min || value > max {
                    return Err(reject(format!("'{}' is out of range {}..={}", token, min, max)));
                }
                Ok(Value::Int(value))
            }
            ArgType::Word => {
                let valid = token
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':' | '@' | '/'));
                if !valid {
                    return Err(reject(format!("'{}' contains characters not allowed in a word", token)));
                }
                Ok(Value::Text(token.to_string()))
            }
            ArgType::Choice => {
                if !self.choices.iter().any(|c| c == token) {
                    return Err(reject(format!("'{}' is not one of {}", token, self.choices.join(", "))));
                }
                Ok(Value::Text(token.to_string()))
            }
            ArgType::Hex => decode_hex(token).map(Value::Bytes).map_err(|e| reject(e.to_string())),
            ArgType::Text | ArgType::Path => Ok(Value::Text(token.to_string())),
        }
    }
}

/// Check that an argument list is well formed
///
/// Names must be unique, optional arguments may only follow required ones and
/// a `rest` argument may only come last.
pub fn validate_schema(specs: &[ArgSpec]) -> std::result::Result<(), String> {
    let mut seen_optional = false;
    for (idx, spec) in specs.iter().enumerate() {
        if spec.name.is_empty() || spec.name.chars().any(|c| c.is_whitespace() || c == '$') {
            return Err(format!("bad argument name '{}'", spec.name));
        }
        if specs[..idx].iter().any(|other| other.name == spec.name) {
            return Err(format!("duplicate argument name '{}'", spec.name));
        }
        if spec.optional {
            seen_optional = true;
        } else if seen_optional {
            return Err(format!("required argument '{}' follows an optional one", spec.name));
        }
        if spec.rest && idx + 1 != specs.len() {
            return Err(format!("argument '{}' takes the rest of the line but is not last", spec.name));
        }
        if spec.kind == ArgType::Choice && spec.choices.is_empty() {
            return Err(format!("choice argument '{}' has no choices", spec.name));
        }
        if (spec.min.is_some() || spec.max.is_some()) && !matches!(spec.kind, ArgType::Int | ArgType::Port) {
            return Err(format!("argument '{}' has bounds but is not numeric", spec.name));
        }
    }
    Ok(())
}

/// Bind tokens to an argument list
///
/// # Parameters
///
/// * `command` - Command name, used in errors
/// * `specs` - Argument declarations
/// * `tokens` - Tokens after the command name
///
/// # Returns
///
/// Converted values keyed by argument name; omitted optional arguments are absent.
pub fn bind_args(command: &str, specs: &[ArgSpec], tokens: &[&str]) -> Result<ArgValues> {
    let mut values = ArgValues::new();
    let mut idx = 0;

    for spec in specs {
        if idx >= tokens.len() {
            if spec.optional {
                continue;
            }
            return Err(ProxyError::Argument {
                command: command.to_string(),
                argument: spec.name.clone(),
                reason: "is required".to_string(),
            });
        }

        let value = if spec.rest {
            let joined = tokens[idx..].join(" ");
            idx = tokens.len();
            spec.convert(command, &joined)?
        } else {
            idx += 1;
            spec.convert(command, tokens[idx - 1])?
        };
        values.insert(spec.name.clone(), value);
    }

    if let Some(extra) = tokens.get(idx) {
        return Err(ProxyError::Argument {
            command: command.to_string(),
            argument: "...".to_string(),
            reason: format!("unexpected extra argument '{}'", extra),
        });
    }

    Ok(values)
}

/// Usage line such as `create <name> <remoteHost> <localPort> <remotePort>`
pub fn usage(command: &str, specs: &[ArgSpec]) -> String {
    let mut line = command.to_string();
    for spec in specs {
        line.push(' ');
        line.push_str(&spec.placeholder());
    }
    line
}
