//! Command layer
//!
//! Operator lines are turned into calls on the registry, the variable store and
//! the selected proxy's module by the [`Router`]. Core commands are fixed;
//! the selected module may add its own, which never shadow a core command.

pub mod args;
mod binary;
mod builtin;
mod history;
mod router;

pub use args::{bind_args, usage, ArgSpec, ArgType, ArgValues};
pub use builtin::{is_core_command, CoreCommand};
pub use history::History;
pub use router::{Router, RouterOptions, MAX_SCRIPT_DEPTH};

/// Result of a dispatched line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Lines to print
    pub lines: Vec<String>,
    /// The operator asked to leave
    pub quit: bool,
}

impl CommandOutput {
    /// No output
    pub fn empty() -> Self {
        Self::default()
    }

    /// A single line
    pub fn line(line: impl Into<String>) -> Self {
        Self {
            lines: vec![line.into()],
            quit: false,
        }
    }

    /// Several lines
    pub fn lines(lines: Vec<String>) -> Self {
        Self { lines, quit: false }
    }
}
