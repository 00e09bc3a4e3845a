//! Module execution
//!
//! Evaluates parse rules for relayed chunks and runs the actions of module
//! commands and timers. Every evaluation happens against an [`ExecContext`]
//! that supplies the shared store, the injection functions of the hosting
//! proxy and a buffer for console output.
//!
//! Names in templates and `var_equals` resolve in this order: built-ins
//! (`len`, `payload`, `direction`, `proxy`, `module`, `version`), command
//! arguments, module-locals, then the store.

use std::collections::BTreeMap;
use std::sync::MutexGuard;

use bytes::Bytes;

use crate::common::{expand_vars, Result};
use crate::store::{Value, VariableStore};

use super::definition::{Action, Condition};
use super::pattern::{self, Pattern};
use super::{Module, ModuleError};

/// Direction a chunk travels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Sent by the client, towards the server
    ClientToServer,
    /// Sent by the server, towards the client
    ServerToClient,
}

impl Direction {
    /// Side that sent the chunk
    pub fn source(&self) -> &'static str {
        match self {
            Direction::ClientToServer => "client",
            Direction::ServerToClient => "server",
        }
    }

    /// Arrow used in notification lines
    pub fn arrow(&self) -> &'static str {
        match self {
            Direction::ClientToServer => "C -> S",
            Direction::ServerToClient => "S -> C",
        }
    }
}

/// What happens to a chunk after parsing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Forward unchanged
    Forward,
    /// Forward this payload instead
    Replace(Bytes),
    /// Forward nothing
    Drop,
}

/// Out-of-band writes into a proxy's links
///
/// Implementations must be callable from any task: relay loops, timers and
/// the command path all inject through the same functions.
#[cfg_attr(test, mockall::automock)]
pub trait Injector: Send + Sync {
    /// Queue bytes for the client link
    fn send_to_client(&self, data: Bytes) -> Result<()>;

    /// Queue bytes for the server link
    fn send_to_server(&self, data: Bytes) -> Result<()>;
}

/// Environment of one module evaluation
pub struct ExecContext<'a> {
    store: &'a VariableStore,
    injector: &'a dyn Injector,
    proxy_name: &'a str,
    output: Vec<String>,
}

impl<'a> ExecContext<'a> {
    /// Create a context
    ///
    /// # Parameters
    ///
    /// * `store` - Shared variable store
    /// * `injector` - Injection functions of the hosting proxy
    /// * `proxy_name` - Name of the hosting proxy, visible as `$proxy`
    pub fn new(store: &'a VariableStore, injector: &'a dyn Injector, proxy_name: &'a str) -> Self {
        Self {
            store,
            injector,
            proxy_name,
            output: Vec::new(),
        }
    }

    /// Take the console lines printed so far
    pub fn take_output(&mut self) -> Vec<String> {
        std::mem::take(&mut self.output)
    }
}

enum Flow {
    Continue,
    Stop,
}

/// State of one evaluation
struct Frame<'m, 'c, 'a> {
    module: &'m Module,
    locals: MutexGuard<'m, BTreeMap<String, Value>>,
    ctx: &'c mut ExecContext<'a>,
    args: Option<&'c BTreeMap<String, Value>>,
    direction: Option<Direction>,
    payload: Vec<u8>,
    changed: bool,
    dropped: bool,
}

impl<'m, 'c, 'a> Frame<'m, 'c, 'a> {
    fn new(
        module: &'m Module,
        ctx: &'c mut ExecContext<'a>,
        args: Option<&'c BTreeMap<String, Value>>,
        direction: Option<Direction>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            module,
            locals: module.lock_locals(),
            ctx,
            args,
            direction,
            payload,
            changed: false,
            dropped: false,
        }
    }

    fn lookup(&self, name: &str) -> Option<Value> {
        let builtin = match name {
            "len" if self.direction.is_some() => Some(Value::Int(self.payload.len() as i64)),
            "payload" if self.direction.is_some() => Some(Value::from_bytes_lossless(self.payload.clone())),
            "direction" => self.direction.map(|d| Value::from(d.source())),
            "proxy" => Some(Value::from(self.ctx.proxy_name)),
            "module" => Some(Value::from(self.module.name())),
            "version" => Some(Value::Int(self.module.version() as i64)),
            _ => None,
        };
        builtin
            .or_else(|| self.args.and_then(|args| args.get(name).cloned()))
            .or_else(|| self.locals.get(name).cloned())
            .or_else(|| self.ctx.store.get(name))
    }

    fn render(&self, pattern: &Pattern) -> std::result::Result<Vec<u8>, ModuleError> {
        pattern.render(|name| self.lookup(name)).map(|bytes| bytes.into_owned())
    }

    fn render_line(&self, template: &str) -> std::result::Result<String, ModuleError> {
        expand_vars(template, |name| self.lookup(name).map(|v| v.to_string()))
            .map_err(|e| ModuleError::Runtime(e.to_string()))
    }

    fn eval(&self, condition: &Condition) -> std::result::Result<bool, ModuleError> {
        let payload = self.payload.as_slice();
        Ok(match condition {
            Condition::Always => true,
            Condition::Contains(p) => pattern::find(payload, &self.render(p)?).is_some(),
            Condition::StartsWith(p) => payload.starts_with(&self.render(p)?),
            Condition::EndsWith(p) => payload.ends_with(&self.render(p)?),
            Condition::Equals(p) => payload == self.render(p)?.as_slice(),
            Condition::LongerThan(n) => payload.len() > *n,
            Condition::ShorterThan(n) => payload.len() < *n,
            Condition::VarEquals { name, value } => self
                .lookup(name)
                .map(|current| current.to_bytes() == value.to_bytes())
                .unwrap_or(false),
            Condition::All(all) => {
                for c in all {
                    if !self.eval(c)? {
                        return Ok(false);
                    }
                }
                true
            }
            Condition::Any(any) => {
                for c in any {
                    if self.eval(c)? {
                        return Ok(true);
                    }
                }
                false
            }
            Condition::Not(inner) => !self.eval(inner)?,
        })
    }

    fn exec(&mut self, actions: &[Action]) -> std::result::Result<Flow, ModuleError> {
        for action in actions {
            match action {
                Action::Drop => {
                    self.dropped = true;
                    return Ok(Flow::Stop);
                }
                Action::Forward => return Ok(Flow::Stop),
                Action::Replace { find, with } => {
                    let from = self.render(find)?;
                    let to = self.render(with)?;
                    let replaced = pattern::replace_all(&self.payload, &from, &to);
                    if replaced != self.payload {
                        self.payload = replaced;
                        self.changed = true;
                    }
                }
                Action::SetPayload(p) => {
                    self.payload = self.render(p)?;
                    self.changed = true;
                }
                Action::SendToClient(p) => {
                    let data = self.render(p)?;
                    self.ctx.injector.send_to_client(Bytes::from(data)).map_err(ModuleError::Injection)?;
                }
                Action::SendToServer(p) => {
                    let data = self.render(p)?;
                    self.ctx.injector.send_to_server(Bytes::from(data)).map_err(ModuleError::Injection)?;
                }
                Action::Print(template) => {
                    let line = self.render_line(template)?;
                    self.ctx.output.push(line);
                }
                Action::Set { var, value } => {
                    let value = Value::from_bytes_lossless(self.render(value)?);
                    self.ctx.store.set(var, value).map_err(|e| ModuleError::Runtime(e.to_string()))?;
                }
                Action::Unset(var) => {
                    self.ctx.store.unset(var);
                }
                Action::SetLocal { name, value } => {
                    let value = Value::from_bytes_lossless(self.render(value)?);
                    self.locals.insert(name.clone(), value);
                }
                Action::Increment(var) => {
                    self.ctx.store.increment(var, 1).map_err(|e| ModuleError::Runtime(e.to_string()))?;
                }
                Action::IncrementLocal(name) => {
                    let current = match self.locals.get(name) {
                        None => 0,
                        Some(value) => value
                            .as_int()
                            .ok_or_else(|| ModuleError::Runtime(format!("local '{}' is not an integer", name)))?,
                    };
                    self.locals.insert(name.clone(), Value::Int(current.wrapping_add(1)));
                }
                Action::If { when, then, otherwise } => {
                    let branch = if self.eval(when)? { then } else { otherwise };
                    if let Flow::Stop = self.exec(branch)? {
                        return Ok(Flow::Stop);
                    }
                }
            }
        }
        Ok(Flow::Continue)
    }

    fn disposition(self) -> Disposition {
        if self.dropped {
            Disposition::Drop
        } else if self.changed {
            Disposition::Replace(Bytes::from(self.payload))
        } else {
            Disposition::Forward
        }
    }
}

impl Module {
    /// Run the parse rules for one chunk
    ///
    /// Rules are tried in order and every matching rule runs; `drop` and
    /// `forward` end processing of the chunk. On error the caller must forward
    /// nothing for this chunk.
    pub fn parse(
        &self,
        direction: Direction,
        chunk: &[u8],
        ctx: &mut ExecContext<'_>,
    ) -> std::result::Result<Disposition, ModuleError> {
        let rules = self.rules(direction);
        if rules.is_empty() {
            return Ok(Disposition::Forward);
        }

        let mut frame = Frame::new(self, ctx, None, Some(direction), chunk.to_vec());
        for rule in rules {
            if !frame.eval(&rule.when)? {
                continue;
            }
            if let Flow::Stop = frame.exec(&rule.then)? {
                break;
            }
        }
        Ok(frame.disposition())
    }

    /// Whether a chunk passes the display filter
    pub fn display_matches(&self, direction: Direction, chunk: &[u8], ctx: &mut ExecContext<'_>) -> bool {
        let Some(filter) = &self.display().filter else {
            return true;
        };
        let frame = Frame::new(self, ctx, None, Some(direction), chunk.to_vec());
        frame.eval(filter).unwrap_or_else(|e| {
            log::debug!("Display filter of '{}' failed: {}", self.name(), e);
            false
        })
    }

    /// Run a module command with already validated arguments
    pub fn run_command(
        &self,
        name: &str,
        args: &BTreeMap<String, Value>,
        ctx: &mut ExecContext<'_>,
    ) -> std::result::Result<(), ModuleError> {
        let command = self
            .command(name)
            .ok_or_else(|| ModuleError::Runtime(format!("module '{}' has no command '{}'", self.name(), name)))?;
        let mut frame = Frame::new(self, ctx, Some(args), None, Vec::new());
        frame.exec(&command.actions)?;
        Ok(())
    }

    /// Run the actions of timer `index`
    pub fn run_timer(&self, index: usize, ctx: &mut ExecContext<'_>) -> std::result::Result<(), ModuleError> {
        let timer = self
            .timers()
            .get(index)
            .ok_or_else(|| ModuleError::Runtime(format!("module '{}' has no timer {}", self.name(), index)))?;
        let mut frame = Frame::new(self, ctx, None, None, Vec::new());
        frame.exec(&timer.actions)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ProxyError;
    use crate::module::definition::ModuleDef;

    fn module(json: &str) -> Module {
        let def: ModuleDef = serde_json::from_str(json).unwrap();
        def.validate().unwrap();
        Module::from_definition(def)
    }

    #[test]
    fn test_passthrough_forwards() {
        let store = VariableStore::new();
        let injector = MockInjector::new();
        let mut ctx = ExecContext::new(&store, &injector, "p1");
        let m = module(r#"{"name": "empty"}"#);
        assert_eq!(m.parse(Direction::ClientToServer, b"abc", &mut ctx).unwrap(), Disposition::Forward);
    }

    #[test]
    fn test_drop_replace_and_counters() {
        let store = VariableStore::new();
        let injector = MockInjector::new();
        let mut ctx = ExecContext::new(&store, &injector, "p1");
        let m = module(
            r#"{"name": "m", "locals": {"seen": 0},
                "parse": {"client": [
                    {"then": [{"increment_local": "seen"}, {"increment": "chunks"}]},
                    {"when": {"contains": {"text": "secret"}}, "then": ["drop"]},
                    {"then": [{"replace": {"find": {"text": "cat"}, "with": {"text": "dog"}}}]}
                ]}}"#,
        );

        assert_eq!(m.parse(Direction::ClientToServer, b"top secret", &mut ctx).unwrap(), Disposition::Drop);
        assert_eq!(
            m.parse(Direction::ClientToServer, b"a cat", &mut ctx).unwrap(),
            Disposition::Replace(Bytes::from_static(b"a dog"))
        );
        assert_eq!(m.parse(Direction::ClientToServer, b"bird", &mut ctx).unwrap(), Disposition::Forward);
        assert_eq!(m.parse(Direction::ServerToClient, b"cat", &mut ctx).unwrap(), Disposition::Forward);

        assert_eq!(m.local("seen"), Some(Value::Int(3)));
        assert_eq!(store.get("chunks"), Some(Value::Int(3)));
    }

    #[test]
    fn test_injection_goes_through_injector() {
        let store = VariableStore::new();
        store.set("user", "alice").unwrap();
        let mut injector = MockInjector::new();
        injector
            .expect_send_to_client()
            .withf(|data| &data[..] == b"hi alice (5)\n")
            .times(1)
            .returning(|_| Ok(()));
        let mut ctx = ExecContext::new(&store, &injector, "p1");
        let m = module(
            r#"{"name": "m", "parse": {"server": [
                {"when": {"starts_with": {"text": "HELLO"}}, "then": [{"send_to_client": {"text": "hi $user ($len)\\n"}}, "drop"]}
            ]}}"#,
        );
        assert_eq!(m.parse(Direction::ServerToClient, b"HELLO", &mut ctx).unwrap(), Disposition::Drop);
    }

    #[test]
    fn test_injection_failure_is_an_error() {
        let store = VariableStore::new();
        let mut injector = MockInjector::new();
        injector
            .expect_send_to_server()
            .returning(|_| Err(ProxyError::NotConnected("no server link".to_string())));
        let mut ctx = ExecContext::new(&store, &injector, "p1");
        let m = module(r#"{"name": "m", "commands": {"ping": {"actions": [{"send_to_server": {"text": "PING"}}]}}}"#);

        let err = m.run_command("ping", &BTreeMap::new(), &mut ctx).unwrap_err();
        assert!(matches!(err, ModuleError::Injection(ProxyError::NotConnected(_))));
    }

    #[test]
    fn test_undefined_reference_is_runtime_error() {
        let store = VariableStore::new();
        let injector = MockInjector::new();
        let mut ctx = ExecContext::new(&store, &injector, "p1");
        let m = module(r#"{"name": "m", "parse": {"client": [{"then": [{"set_payload": {"text": "$missing"}}]}]}}"#);
        assert!(matches!(
            m.parse(Direction::ClientToServer, b"x", &mut ctx),
            Err(ModuleError::Runtime(_))
        ));
    }

    #[test]
    fn test_command_args_and_print() {
        let store = VariableStore::new();
        let injector = MockInjector::new();
        let mut ctx = ExecContext::new(&store, &injector, "p1");
        let m = module(
            r#"{"name": "m", "locals": {"mode": "off"},
                "commands": {"mode": {"args": [{"name": "value", "type": "choice", "choices": ["on", "off"]}],
                    "actions": [{"set_local": {"name": "mode", "value": {"text": "$value"}}},
                                {"if": {"when": {"var_equals": {"name": "mode", "value": "on"}},
                                        "then": [{"print": "$(proxy): mode is on"}],
                                        "else": [{"print": "$(proxy): mode is $mode"}]}}]}}}"#,
        );

        let mut args = BTreeMap::new();
        args.insert("value".to_string(), Value::from("on"));
        m.run_command("mode", &args, &mut ctx).unwrap();
        assert_eq!(ctx.take_output(), vec!["p1: mode is on".to_string()]);
        assert_eq!(m.local("mode"), Some(Value::from("on")));
    }

    #[test]
    fn test_display_filter() {
        let store = VariableStore::new();
        let injector = MockInjector::new();
        let mut ctx = ExecContext::new(&store, &injector, "p1");
        let m = module(r#"{"name": "m", "display": {"filter": {"longer_than": 3}}}"#);
        assert!(!m.display_matches(Direction::ClientToServer, b"abc", &mut ctx));
        assert!(m.display_matches(Direction::ClientToServer, b"abcd", &mut ctx));
    }
}
