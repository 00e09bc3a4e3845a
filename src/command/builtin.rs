//! Core commands
//!
//! The fixed command table and its handlers. Every handler receives arguments
//! already bound against [`CoreCommand::args`].

use std::path::PathBuf;

use bytes::Bytes;
use log::info;

use crate::common::{decode_escapes, escape_token, fs, ProxyError, Result};
use crate::module::DumpFormat;
use crate::store::Value;

use super::args::{usage, ArgSpec, ArgType, ArgValues};
use super::binary::{self, ByteOrder, DataType};
use super::router::{Router, MAX_SCRIPT_DEPTH};
use super::CommandOutput;

/// A built-in command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoreCommand {
    Create,
    Kill,
    Select,
    List,
    Rename,
    Disconnect,
    LoadParser,
    Notify,
    Dump,
    Send,
    SendHex,
    SendFile,
    Set,
    Unset,
    Vars,
    SaveVars,
    LoadVars,
    ClearVars,
    Pack,
    Unpack,
    Convert,
    History,
    Run,
    Help,
    Quit,
}

impl CoreCommand {
    /// Every core command, in help order
    pub const ALL: [CoreCommand; 25] = [
        CoreCommand::Create,
        CoreCommand::Kill,
        CoreCommand::Select,
        CoreCommand::List,
        CoreCommand::Rename,
        CoreCommand::Disconnect,
        CoreCommand::LoadParser,
        CoreCommand::Notify,
        CoreCommand::Dump,
        CoreCommand::Send,
        CoreCommand::SendHex,
        CoreCommand::SendFile,
        CoreCommand::Set,
        CoreCommand::Unset,
        CoreCommand::Vars,
        CoreCommand::SaveVars,
        CoreCommand::LoadVars,
        CoreCommand::ClearVars,
        CoreCommand::Pack,
        CoreCommand::Unpack,
        CoreCommand::Convert,
        CoreCommand::History,
        CoreCommand::Run,
        CoreCommand::Help,
        CoreCommand::Quit,
    ];

    /// Command word
    pub fn name(self) -> &'static str {
        match self {
            CoreCommand::Create => "create",
            CoreCommand::Kill => "kill",
            CoreCommand::Select => "select",
            CoreCommand::List => "list",
            CoreCommand::Rename => "rename",
            CoreCommand::Disconnect => "disconnect",
            CoreCommand::LoadParser => "loadparser",
            CoreCommand::Notify => "notify",
            CoreCommand::Dump => "dump",
            CoreCommand::Send => "send",
            CoreCommand::SendHex => "sendhex",
            CoreCommand::SendFile => "sendfile",
            CoreCommand::Set => "set",
            CoreCommand::Unset => "unset",
            CoreCommand::Vars => "vars",
            CoreCommand::SaveVars => "savevars",
            CoreCommand::LoadVars => "loadvars",
            CoreCommand::ClearVars => "clearvars",
            CoreCommand::Pack => "pack",
            CoreCommand::Unpack => "unpack",
            CoreCommand::Convert => "convert",
            CoreCommand::History => "history",
            CoreCommand::Run => "run",
            CoreCommand::Help => "help",
            CoreCommand::Quit => "quit",
        }
    }

    /// Look a command up by its word
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|command| command.name() == name)
    }

    /// Argument schema
    pub fn args(self) -> Vec<ArgSpec> {
        match self {
            CoreCommand::Create => vec![
                ArgSpec::required("name", ArgType::Word),
                ArgSpec::required("remoteHost", ArgType::Word),
                ArgSpec::required("localPort", ArgType::Port),
                ArgSpec::required("remotePort", ArgType::Port),
            ],
            CoreCommand::Kill | CoreCommand::Disconnect => vec![ArgSpec::required("name", ArgType::Word).optional()],
            CoreCommand::Select => vec![ArgSpec::required("target", ArgType::Word)],
            CoreCommand::Rename => vec![ArgSpec::required("newName", ArgType::Word)],
            CoreCommand::LoadParser => vec![ArgSpec::required("filename", ArgType::Path)],
            CoreCommand::Notify => vec![ArgSpec::required("state", ArgType::Choice).choices(&["yes", "no"]).optional()],
            CoreCommand::Dump => vec![
                ArgSpec::required("format", ArgType::Choice)
                    .choices(&["hexdump", "plain", "none", "module"])
                    .optional(),
                ArgSpec::required("bytesPerLine", ArgType::Int).range(1, 256).optional(),
            ],
            CoreCommand::Send => vec![
                ArgSpec::required("side", ArgType::Choice).choices(&["client", "server"]),
                ArgSpec::required("text", ArgType::Text).rest(),
            ],
            CoreCommand::SendHex => vec![
                ArgSpec::required("side", ArgType::Choice).choices(&["client", "server"]),
                ArgSpec::required("hex", ArgType::Hex).rest(),
            ],
            CoreCommand::SendFile => vec![
                ArgSpec::required("side", ArgType::Choice).choices(&["client", "server"]),
                ArgSpec::required("file", ArgType::Path),
            ],
            CoreCommand::Set => vec![
                ArgSpec::required("name", ArgType::Word),
                ArgSpec::required("value", ArgType::Text).rest(),
            ],
            CoreCommand::Unset => vec![ArgSpec::required("name", ArgType::Word)],
            CoreCommand::Vars => vec![ArgSpec::required("name", ArgType::Word).optional()],
            CoreCommand::SaveVars | CoreCommand::LoadVars => vec![ArgSpec::required("file", ArgType::Path).optional()],
            CoreCommand::Pack => vec![
                ArgSpec::required("dataType", ArgType::Choice).choices(&DataType::NAMES),
                ArgSpec::required("byteOrder", ArgType::Choice).choices(&ByteOrder::NAMES),
                ArgSpec::required("values", ArgType::Text).rest(),
            ],
            CoreCommand::Unpack => vec![
                ArgSpec::required("dataType", ArgType::Choice).choices(&DataType::NAMES),
                ArgSpec::required("byteOrder", ArgType::Choice).choices(&ByteOrder::NAMES),
                ArgSpec::required("hex", ArgType::Hex).rest(),
            ],
            CoreCommand::Convert => vec![
                ArgSpec::required("number", ArgType::Text),
                ArgSpec::required("base", ArgType::Choice)
                    .choices(&["dec", "hex", "oct", "bin"])
                    .optional(),
            ],
            CoreCommand::History => vec![
                ArgSpec::required("action", ArgType::Choice).choices(&["clear"]).optional(),
                ArgSpec::required("id", ArgType::Int).range(1, i64::MAX).optional(),
            ],
            CoreCommand::Run => vec![
                ArgSpec::required("scriptFile", ArgType::Path),
                ArgSpec::required("startLine", ArgType::Int).range(1, i64::MAX).optional(),
            ],
            CoreCommand::Help => vec![ArgSpec::required("command", ArgType::Word).optional()],
            CoreCommand::List | CoreCommand::ClearVars | CoreCommand::Quit => Vec::new(),
        }
    }

    /// One-line help
    pub fn help(self) -> &'static str {
        match self {
            CoreCommand::Create => "Start a proxy on localPort forwarding to remoteHost:remotePort and select it",
            CoreCommand::Kill => "Stop a proxy, the selected one by default",
            CoreCommand::Select => "Select a proxy by name or local port",
            CoreCommand::List => "List proxies; '*' marks the selected one",
            CoreCommand::Rename => "Rename the selected proxy",
            CoreCommand::Disconnect => "Close the current session of a proxy, keeping it listening",
            CoreCommand::LoadParser => "Load a parser module into the selected proxy",
            CoreCommand::Notify => "Turn the per-chunk notification line of the selected proxy on or off, or toggle it",
            CoreCommand::Dump => "Show or override how the selected proxy dumps chunks; 'module' restores the module's setting",
            CoreCommand::Send => "Inject text with escapes (\\r \\n \\t \\xHH) into the session",
            CoreCommand::SendHex => "Inject hex bytes into the session",
            CoreCommand::SendFile => "Inject the contents of a file into the session",
            CoreCommand::Set => "Set a variable; decimal values are stored as integers",
            CoreCommand::Unset => "Remove a variable",
            CoreCommand::Vars => "Show variables",
            CoreCommand::SaveVars => "Write all variables to a JSON file",
            CoreCommand::LoadVars => "Merge variables from a JSON file",
            CoreCommand::ClearVars => "Remove all variables",
            CoreCommand::Pack => "Pack numbers as an array of a C type, e.g. 'pack int little_endian 255 0x10'",
            CoreCommand::Unpack => "Unpack hex data as an array of a C type",
            CoreCommand::Convert => "Show a number in decimal, hex, octal and binary, optionally read in a given base",
            CoreCommand::History => "Show history, clear it, or remove one entry; '!N' repeats entry N",
            CoreCommand::Run => "Run the commands of a script file, optionally from a given line",
            CoreCommand::Help => "Show commands of the core table and of the selected module",
            CoreCommand::Quit => "Stop all proxies and exit",
        }
    }

    /// Usage line
    pub fn usage(self) -> String {
        usage(self.name(), &self.args())
    }
}

/// Whether `name` is a core command word
pub fn is_core_command(name: &str) -> bool {
    CoreCommand::from_name(name).is_some()
}

fn text_arg<'a>(args: &'a ArgValues, name: &str) -> Option<&'a str> {
    match args.get(name) {
        Some(Value::Text(text)) => Some(text),
        _ => None,
    }
}

fn int_arg(args: &ArgValues, name: &str) -> Option<i64> {
    args.get(name).and_then(Value::as_int)
}

fn missing(command: CoreCommand, argument: &str) -> ProxyError {
    ProxyError::Argument {
        command: command.name().to_string(),
        argument: argument.to_string(),
        reason: "is required".to_string(),
    }
}

fn required<T>(command: CoreCommand, argument: &str, value: Option<T>) -> Result<T> {
    value.ok_or_else(|| missing(command, argument))
}

fn port_arg(command: CoreCommand, args: &ArgValues, name: &str) -> Result<u16> {
    let port = required(command, name, int_arg(args, name))?;
    u16::try_from(port).map_err(|_| ProxyError::Argument {
        command: command.name().to_string(),
        argument: name.to_string(),
        reason: format!("'{}' is not a port", port),
    })
}

/// Value as shown by `vars`
fn describe(value: &Value) -> String {
    match value {
        Value::Int(i) => i.to_string(),
        Value::Text(text) => format!("{:?}", text),
        Value::Bytes(bytes) => format!("{{hex: {}}}", hex::encode(bytes)),
    }
}

/// Value stored by `set`: plain decimal integers stay integers, anything else
/// has its escapes decoded
fn parse_set_value(raw: &str) -> Result<Value> {
    if let Ok(int) = raw.parse::<i64>() {
        return Ok(Value::Int(int));
    }
    let bytes = decode_escapes(raw).map_err(|e| ProxyError::Argument {
        command: "set".to_string(),
        argument: "value".to_string(),
        reason: e.to_string(),
    })?;
    Ok(Value::from_bytes_lossless(bytes))
}

fn dump_format(name: &str) -> Option<DumpFormat> {
    match name {
        "hexdump" => Some(DumpFormat::Hexdump),
        "plain" => Some(DumpFormat::Plain),
        "none" => Some(DumpFormat::None),
        _ => None,
    }
}

fn format_name(format: DumpFormat) -> &'static str {
    match format {
        DumpFormat::Hexdump => "hexdump",
        DumpFormat::Plain => "plain",
        DumpFormat::None => "none",
    }
}

fn layout(command: CoreCommand, args: &ArgValues) -> Result<(DataType, ByteOrder)> {
    let data_type = text_arg(args, "dataType").and_then(DataType::from_name);
    let order = text_arg(args, "byteOrder").and_then(ByteOrder::from_name);
    Ok((required(command, "dataType", data_type)?, required(command, "byteOrder", order)?))
}

impl Router {
    /// Execute a core command
    pub(super) async fn run_builtin(&mut self, command: CoreCommand, args: ArgValues, depth: usize) -> Result<CommandOutput> {
        match command {
            CoreCommand::Create => {
                let name = required(command, "name", text_arg(&args, "name"))?;
                let remote_host = required(command, "remoteHost", text_arg(&args, "remoteHost"))?;
                let local_port = port_arg(command, &args, "localPort")?;
                let remote_port = port_arg(command, &args, "remotePort")?;

                let bind_ip = self.registry.bind_ip();
                let instance = self.registry.create(name, local_port, remote_host, remote_port)?;
                info!("Created proxy '{}' on port {}", instance.name(), instance.local_port());
                Ok(CommandOutput::line(format!(
                    "Proxy '{}' listening on {}:{} -> {}:{} with {} (selected)",
                    instance.name(),
                    bind_ip,
                    instance.local_port(),
                    instance.remote_host(),
                    instance.remote_port(),
                    instance.module().label()
                )))
            }

            CoreCommand::Kill => {
                let killed = self.registry.kill(text_arg(&args, "name")).await?;
                self.reload_failures.remove(&killed);
                let mut lines = vec![format!("Killed proxy '{}'", killed)];
                match self.registry.selected() {
                    Some(instance) => lines.push(format!("Selected proxy '{}'", instance.name())),
                    None => lines.push("No proxies remaining".to_string()),
                }
                Ok(CommandOutput::lines(lines))
            }

            CoreCommand::Select => {
                let target = required(command, "target", text_arg(&args, "target"))?;
                let instance = self.registry.select(target)?;
                Ok(CommandOutput::line(format!("Selected proxy '{}'", instance.name())))
            }

            CoreCommand::List => {
                let entries = self.registry.list();
                if entries.is_empty() {
                    return Ok(CommandOutput::line("No proxies"));
                }
                let lines = entries
                    .iter()
                    .map(|entry| format!("{} {}", if entry.selected { "*" } else { " " }, entry.summary))
                    .collect();
                Ok(CommandOutput::lines(lines))
            }

            CoreCommand::Rename => {
                let new_name = required(command, "newName", text_arg(&args, "newName"))?;
                let old_name = self.registry.rename(new_name)?;
                if let Some(reason) = self.reload_failures.remove(&old_name) {
                    self.reload_failures.insert(new_name.to_string(), reason);
                }
                Ok(CommandOutput::line(format!("Renamed proxy '{}' to '{}'", old_name, new_name)))
            }

            CoreCommand::Disconnect => {
                let instance = self.registry.target(text_arg(&args, "name"))?;
                let line = if instance.disconnect().await? {
                    format!("Disconnected session of '{}'", instance.name())
                } else {
                    format!("Proxy '{}' has no client connected", instance.name())
                };
                Ok(CommandOutput::line(line))
            }

            CoreCommand::LoadParser => {
                let path = PathBuf::from(required(command, "filename", text_arg(&args, "filename"))?);
                let instance = self.registry.active()?;
                let module = instance.load_parser(&path).await?;
                let mut lines = vec![format!("Proxy '{}' now uses {}", instance.name(), module.label())];
                let commands: Vec<&str> = module.commands().map(|(name, _)| name).collect();
                if !commands.is_empty() {
                    lines.push(format!("Module commands: {}", commands.join(", ")));
                }
                Ok(CommandOutput::lines(lines))
            }

            CoreCommand::Notify => {
                let instance = self.registry.active()?;
                let module = instance.module();
                let display = instance.update_display(|display| {
                    let on = match text_arg(&args, "state") {
                        Some(state) => state == "yes",
                        None => !display.notify(module.display()),
                    };
                    display.notify = Some(on);
                });
                let state = if display.notify(module.display()) { "on" } else { "off" };
                Ok(CommandOutput::line(format!("Chunk notifications of '{}' are {}", instance.name(), state)))
            }

            CoreCommand::Dump => {
                let instance = self.registry.active()?;
                let module = instance.module();
                let format = text_arg(&args, "format");
                let bytes_per_line = int_arg(&args, "bytesPerLine").map(|n| n as usize);

                let display = if format.is_none() && bytes_per_line.is_none() {
                    instance.display_override()
                } else {
                    instance.update_display(|display| {
                        if let Some(format) = format {
                            display.format = dump_format(format);
                            if format == "module" {
                                display.bytes_per_line = None;
                            }
                        }
                        if bytes_per_line.is_some() {
                            display.bytes_per_line = bytes_per_line;
                        }
                    })
                };

                let source = if display.format.is_some() || display.bytes_per_line.is_some() {
                    "override"
                } else {
                    "module"
                };
                Ok(CommandOutput::line(format!(
                    "Dump format of '{}': {}, {} bytes per line ({})",
                    instance.name(),
                    format_name(display.format(module.display())),
                    display.bytes_per_line(module.display()),
                    source
                )))
            }

            CoreCommand::SendFile => {
                let side = required(command, "side", text_arg(&args, "side"))?;
                let path = PathBuf::from(required(command, "file", text_arg(&args, "file"))?);
                let instance = self.registry.active()?;
                let data = Bytes::from(fs::read_file(&path)?);
                let len = data.len();
                match side {
                    "client" => instance.send_to_client(data)?,
                    _ => instance.send_to_server(data)?,
                }
                Ok(CommandOutput::line(format!(
                    "[{}] sent {} bytes from {} to {}",
                    instance.name(),
                    len,
                    path.display(),
                    side
                )))
            }

            CoreCommand::Send | CoreCommand::SendHex => {
                let side = required(command, "side", text_arg(&args, "side"))?;
                let data = match (command, args.get("text"), args.get("hex")) {
                    (CoreCommand::Send, Some(Value::Text(text)), _) => {
                        decode_escapes(text).map_err(|e| ProxyError::Argument {
                            command: command.name().to_string(),
                            argument: "text".to_string(),
                            reason: e.to_string(),
                        })?
                    }
                    (CoreCommand::SendHex, _, Some(Value::Bytes(bytes))) => bytes.clone(),
                    (CoreCommand::Send, ..) => return Err(missing(command, "text")),
                    _ => return Err(missing(command, "hex")),
                };

                let instance = self.registry.active()?;
                let len = data.len();
                let data = Bytes::from(data);
                match side {
                    "client" => instance.send_to_client(data)?,
                    _ => instance.send_to_server(data)?,
                }
                Ok(CommandOutput::line(format!("[{}] sent {} bytes to {}", instance.name(), len, side)))
            }

            CoreCommand::Set => {
                let name = required(command, "name", text_arg(&args, "name"))?;
                let raw = required(command, "value", text_arg(&args, "value"))?;
                let value = parse_set_value(raw)?;
                let line = format!("{} = {}", name, describe(&value));
                self.registry.store().set(name, value)?;
                Ok(CommandOutput::line(line))
            }

            CoreCommand::Unset => {
                let name = required(command, "name", text_arg(&args, "name"))?;
                if !self.registry.store().unset(name) {
                    return Err(ProxyError::Variable(format!("'{}' is not set", name)));
                }
                Ok(CommandOutput::line(format!("Unset '{}'", name)))
            }

            CoreCommand::Vars => {
                let store = self.registry.store();
                if let Some(name) = text_arg(&args, "name") {
                    let value = store
                        .get(name)
                        .ok_or_else(|| ProxyError::Variable(format!("'{}' is not set", name)))?;
                    return Ok(CommandOutput::line(format!("{} = {} ({})", name, describe(&value), value.kind())));
                }
                let snapshot = store.snapshot();
                if snapshot.is_empty() {
                    return Ok(CommandOutput::line("No variables"));
                }
                let lines = snapshot
                    .iter()
                    .map(|(name, value)| format!("{} = {} ({})", name, describe(value), value.kind()))
                    .collect();
                Ok(CommandOutput::lines(lines))
            }

            CoreCommand::SaveVars => {
                let path = self.vars_path(command, &args)?;
                let count = self.registry.store().save(&path)?;
                Ok(CommandOutput::line(format!("Saved {} variables to {}", count, path.display())))
            }

            CoreCommand::LoadVars => {
                let path = self.vars_path(command, &args)?;
                let count = self.registry.store().load(&path)?;
                Ok(CommandOutput::line(format!("Loaded {} variables from {}", count, path.display())))
            }

            CoreCommand::ClearVars => {
                let count = self.registry.store().len();
                self.registry.store().clear();
                Ok(CommandOutput::line(format!("Removed {} variables", count)))
            }

            CoreCommand::Pack => {
                let (data_type, order) = layout(command, &args)?;
                let values = required(command, "values", text_arg(&args, "values"))?;
                let packed = binary::pack(data_type, order, values)?;
                Ok(CommandOutput::lines(vec![
                    format!("Packed: {}", escape_token(&packed)),
                    format!("Hex: {}", hex::encode_upper(&packed)),
                ]))
            }

            CoreCommand::Unpack => {
                let (data_type, order) = layout(command, &args)?;
                let data = match args.get("hex") {
                    Some(Value::Bytes(bytes)) => bytes,
                    _ => return Err(missing(command, "hex")),
                };
                let values = binary::unpack(data_type, order, data)?;
                Ok(CommandOutput::line(format!("Unpacked: {}", values.join(", "))))
            }

            CoreCommand::Convert => {
                let number = required(command, "number", text_arg(&args, "number"))?;
                let number = binary::parse_number(number, text_arg(&args, "base"))?;
                Ok(CommandOutput::lines(binary::convert(number)))
            }

            CoreCommand::History => match (text_arg(&args, "action"), int_arg(&args, "id")) {
                (Some(_), Some(id)) => {
                    let removed = self.history.remove(id as usize)?;
                    Ok(CommandOutput::line(format!("Removed history entry {}: {}", id, removed)))
                }
                (Some(_), None) => {
                    self.history.clear();
                    Ok(CommandOutput::line("History cleared"))
                }
                _ => Ok(CommandOutput::lines(
                    self.history
                        .numbered()
                        .map(|(id, line)| format!("{:>4}  {}", id, line))
                        .collect(),
                )),
            },

            CoreCommand::Run => {
                let path = PathBuf::from(required(command, "scriptFile", text_arg(&args, "scriptFile"))?);
                let start = int_arg(&args, "startLine").unwrap_or(1) as usize;
                self.run_script(&path, start, depth).await
            }

            CoreCommand::Help => self.help(text_arg(&args, "command")),

            CoreCommand::Quit => Ok(CommandOutput {
                lines: vec!["Bye".to_string()],
                quit: true,
            }),
        }
    }

    fn vars_path(&self, command: CoreCommand, args: &ArgValues) -> Result<PathBuf> {
        match text_arg(args, "file") {
            Some(file) => Ok(PathBuf::from(file)),
            None => required(command, "file", self.options.vars_file.clone()),
        }
    }

    /// Run a script through the dispatch path
    ///
    /// Lines are not recorded in history. Output of each line is printed as it
    /// completes; the first failing line stops the script.
    async fn run_script(&mut self, path: &std::path::Path, start: usize, depth: usize) -> Result<CommandOutput> {
        if depth >= MAX_SCRIPT_DEPTH {
            return Err(ProxyError::Other(format!(
                "script {} not run: nesting deeper than {} levels",
                path.display(),
                MAX_SCRIPT_DEPTH
            )));
        }

        let text = fs::read_text(path)?;
        let mut executed = 0usize;
        for (idx, line) in text.lines().enumerate().skip(start.saturating_sub(1)) {
            let output = self
                .dispatch_line(line, false, depth + 1)
                .await
                .map_err(|e| ProxyError::Script {
                    path: path.to_path_buf(),
                    line: idx + 1,
                    source: Box::new(e),
                })?;
            executed += 1;
            if output.quit {
                return Ok(output);
            }
            if !output.lines.is_empty() {
                self.console().emit(output.lines, false);
            }
        }

        Ok(CommandOutput::line(format!("Script {} done, {} lines run", path.display(), executed)))
    }

    fn help(&self, command: Option<&str>) -> Result<CommandOutput> {
        let module = self.registry.selected().map(|instance| instance.module());

        if let Some(name) = command {
            if let Some(core) = CoreCommand::from_name(name) {
                return Ok(CommandOutput::lines(vec![core.usage(), format!("    {}", core.help())]));
            }
            let def = module
                .as_ref()
                .and_then(|module| module.commands().find(|(n, _)| *n == name).map(|(_, def)| def.clone()))
                .ok_or_else(|| ProxyError::UnknownCommand(name.to_string()))?;
            return Ok(CommandOutput::lines(vec![usage(name, &def.args), format!("    {}", def.help)]));
        }

        let mut lines = vec!["Core commands:".to_string()];
        lines.extend(
            CoreCommand::ALL
                .iter()
                .map(|core| format!("  {:<44} {}", core.usage(), core.help())),
        );
        if let Some(module) = module {
            let commands: Vec<String> = module
                .commands()
                .map(|(name, def)| format!("  {:<44} {}", usage(name, &def.args), def.help))
                .collect();
            if !commands.is_empty() {
                lines.push(format!("Commands of {}:", module.label()));
                lines.extend(commands);
            }
        }
        Ok(CommandOutput::lines(lines))
    }
}
