//! Module file format
//!
//! A parser module is a JSON document. Example:
//!
//! ```json
//! {
//!   "name": "http-rewrite",
//!   "locals": { "seen": 0 },
//!   "display": { "format": "plain", "filter": { "longer_than": 0 } },
//!   "parse": {
//!     "client": [
//!       { "when": { "starts_with": { "text": "GET " } },
//!         "then": [ { "increment_local": "seen" }, { "replace": { "find": { "text": "HTTP/1.1" }, "with": { "text": "HTTP/1.0" } } } ] }
//!     ],
//!     "server": []
//!   },
//!   "commands": {
//!     "ping": { "help": "Send a ping to the server", "args": [], "actions": [ { "send_to_server": { "text": "PING\\r\\n" } } ] }
//!   },
//!   "timers": [ { "every_ms": 5000, "actions": [ { "increment": "ticks" } ] } ]
//! }
//! ```
//!
//! Unknown fields are rejected. [`ModuleDef::validate`] applies the checks
//! serde cannot express.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::command::args::{validate_schema, ArgSpec};
use crate::store::{self, Value};

use super::pattern::Pattern;

/// Shortest accepted timer interval
pub const MIN_TIMER_INTERVAL_MS: u64 = 10;

/// Top level of a module file
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleDef {
    /// Display name
    pub name: String,

    /// One line description shown by `list` and `check-module`
    #[serde(default)]
    pub description: Option<String>,

    /// Module-local variables and their initial values
    #[serde(default)]
    pub locals: BTreeMap<String, Value>,

    /// Console display of relayed chunks
    #[serde(default)]
    pub display: DisplayDef,

    /// Parse rules per direction
    #[serde(default)]
    pub parse: ParseDef,

    /// Module commands
    #[serde(default)]
    pub commands: BTreeMap<String, CommandDef>,

    /// Periodic actions
    #[serde(default)]
    pub timers: Vec<TimerDef>,
}

/// How payloads are dumped on the console
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DumpFormat {
    /// Offset, hex columns and ASCII gutter
    #[default]
    Hexdump,
    /// Escaped text
    Plain,
    /// Notification line only
    None,
}

/// Display settings
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DisplayDef {
    /// Print a notification line per chunk
    #[serde(default = "default_notify")]
    pub notify: bool,

    /// Dump format
    #[serde(default)]
    pub format: DumpFormat,

    /// Bytes per hexdump line
    #[serde(default = "default_bytes_per_line")]
    pub bytes_per_line: usize,

    /// Only chunks matching this condition are displayed
    #[serde(default)]
    pub filter: Option<Condition>,
}

fn default_notify() -> bool {
    true
}

fn default_bytes_per_line() -> usize {
    16
}

impl Default for DisplayDef {
    fn default() -> Self {
        Self {
            notify: default_notify(),
            format: DumpFormat::default(),
            bytes_per_line: default_bytes_per_line(),
            filter: None,
        }
    }
}

/// Parse rules for both directions
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParseDef {
    /// Rules for data sent by the client
    #[serde(default)]
    pub client: Vec<Rule>,

    /// Rules for data sent by the server
    #[serde(default)]
    pub server: Vec<Rule>,
}

/// A conditional list of actions
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Rule {
    /// Condition, defaults to always
    #[serde(default)]
    pub when: Condition,

    /// Actions run when the condition holds
    pub then: Vec<Action>,
}

/// Predicate over the current payload and variables
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// Always true
    #[default]
    Always,
    /// Payload contains the pattern
    Contains(Pattern),
    /// Payload starts with the pattern
    StartsWith(Pattern),
    /// Payload ends with the pattern
    EndsWith(Pattern),
    /// Payload equals the pattern
    Equals(Pattern),
    /// Payload is longer than N bytes
    LongerThan(usize),
    /// Payload is shorter than N bytes
    ShorterThan(usize),
    /// A variable has the given value
    VarEquals {
        /// Variable name, resolved like a template reference
        name: String,
        /// Expected value, compared by byte form
        value: Value,
    },
    /// All conditions hold
    All(Vec<Condition>),
    /// At least one condition holds
    Any(Vec<Condition>),
    /// Negation
    Not(Box<Condition>),
}

/// Something a rule, command or timer does
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Stop processing and drop the chunk
    Drop,
    /// Stop processing and forward the current payload
    Forward,
    /// Replace every occurrence in the payload
    Replace {
        /// Bytes to look for
        find: Pattern,
        /// Replacement
        with: Pattern,
    },
    /// Replace the whole payload
    SetPayload(Pattern),
    /// Inject bytes towards the client
    SendToClient(Pattern),
    /// Inject bytes towards the server
    SendToServer(Pattern),
    /// Print a line on the console
    Print(String),
    /// Set a store variable
    Set {
        /// Variable name
        var: String,
        /// New value
        value: Pattern,
    },
    /// Remove a store variable
    Unset(String),
    /// Set a module-local variable
    SetLocal {
        /// Local name, must be declared in `locals`
        name: String,
        /// New value
        value: Pattern,
    },
    /// Add one to a store variable, starting from zero
    Increment(String),
    /// Add one to a module-local variable
    IncrementLocal(String),
    /// Conditional actions
    If {
        /// Condition
        when: Condition,
        /// Actions when true
        then: Vec<Action>,
        /// Actions when false
        #[serde(default, rename = "else")]
        otherwise: Vec<Action>,
    },
}

impl Action {
    fn shapes_payload(&self) -> bool {
        matches!(self, Action::Drop | Action::Forward | Action::Replace { .. } | Action::SetPayload(_))
    }
}

/// A module command
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandDef {
    /// Help line
    #[serde(default)]
    pub help: String,

    /// Argument schema; argument values are visible to the actions as variables
    #[serde(default)]
    pub args: Vec<ArgSpec>,

    /// Actions
    pub actions: Vec<Action>,
}

/// A periodic trigger
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimerDef {
    /// Interval in milliseconds
    pub every_ms: u64,

    /// Actions
    pub actions: Vec<Action>,
}

impl ModuleDef {
    /// Check what the type system cannot
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("module name must not be empty".to_string());
        }
        for name in self.locals.keys() {
            store::validate_name(name).map_err(|e| format!("local {}", e))?;
        }

        for (direction, rules) in [("client", &self.parse.client), ("server", &self.parse.server)] {
            for (idx, rule) in rules.iter().enumerate() {
                self.validate_actions(&rule.then, true)
                    .map_err(|e| format!("parse.{}[{}]: {}", direction, idx, e))?;
            }
        }

        for (name, command) in &self.commands {
            if name.is_empty() || name.chars().any(|c| c.is_whitespace() || c == '$' || c == '!') {
                return Err(format!("bad command name '{}'", name));
            }
            validate_schema(&command.args).map_err(|e| format!("command '{}': {}", name, e))?;
            self.validate_actions(&command.actions, false)
                .map_err(|e| format!("command '{}': {}", name, e))?;
        }

        for (idx, timer) in self.timers.iter().enumerate() {
            if timer.every_ms < MIN_TIMER_INTERVAL_MS {
                return Err(format!(
                    "timers[{}]: every_ms {} is below the minimum of {}",
                    idx, timer.every_ms, MIN_TIMER_INTERVAL_MS
                ));
            }
            self.validate_actions(&timer.actions, false)
                .map_err(|e| format!("timers[{}]: {}", idx, e))?;
        }

        Ok(())
    }

    fn validate_actions(&self, actions: &[Action], in_parse: bool) -> Result<(), String> {
        for action in actions {
            if action.shapes_payload() && !in_parse {
                return Err("payload actions (drop, forward, replace, set_payload) are only allowed in parse rules".to_string());
            }
            match action {
                Action::SetLocal { name, .. } | Action::IncrementLocal(name) if !self.locals.contains_key(name) => {
                    return Err(format!("local '{}' is not declared in locals", name));
                }
                Action::Set { var, .. } | Action::Unset(var) | Action::Increment(var) => {
                    store::validate_name(var).map_err(|e| e.to_string())?;
                }
                Action::If { then, otherwise, .. } => {
                    self.validate_actions(then, in_parse)?;
                    self.validate_actions(otherwise, in_parse)?;
                }
                _ => {}
            }
        }
        Ok(())
    }
}
