//! Operator console output
//!
//! Everything destined for the operator, whether command results, relay
//! notifications or module prints, is sent as a [`ConsoleEvent`] over an
//! unbounded channel to a single printer task. Output produced asynchronously
//! (relays, timers) asks for the prompt to be redrawn so it is never left
//! hanging.

use std::io::Write;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use tokio::sync::mpsc;

use crate::common::escape_bytes;
use crate::module::Direction;

/// Process start, the origin of notification timestamps
static STARTED: Lazy<Instant> = Lazy::new(Instant::now);

/// One batch of console output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleEvent {
    /// Lines to print
    pub lines: Vec<String>,
    /// Reprint the prompt afterwards
    pub redraw_prompt: bool,
}

/// Cloneable sender for console output
#[derive(Debug, Clone)]
pub struct Console {
    tx: mpsc::UnboundedSender<ConsoleEvent>,
}

impl Console {
    /// Create a console and the receiver its printer reads from
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ConsoleEvent>) {
        Lazy::force(&STARTED);
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Print asynchronous output
    pub fn print(&self, line: impl Into<String>) {
        self.emit(vec![line.into()], true);
    }

    /// Print several asynchronous lines at once
    pub fn print_lines(&self, lines: Vec<String>) {
        if !lines.is_empty() {
            self.emit(lines, true);
        }
    }

    /// Send an event
    ///
    /// Output is discarded once the printer has gone away.
    pub fn emit(&self, lines: Vec<String>, redraw_prompt: bool) {
        let _ = self.tx.send(ConsoleEvent { lines, redraw_prompt });
    }
}

/// Time since the process started
pub fn elapsed() -> Duration {
    STARTED.elapsed()
}

/// Notification line for one relayed chunk
///
/// `elapsed - name (module) [PKT# n] [C -> S] - N Bytes`
pub fn notify_line(elapsed: Duration, proxy: &str, module: &str, packet: u64, direction: Direction, len: usize) -> String {
    format!(
        "{:.6} - {} ({}) [PKT# {}] [{}] - {} Bytes",
        elapsed.as_secs_f64(),
        proxy,
        module,
        packet,
        direction.arrow(),
        len
    )
}

/// Classic hexdump: offset, hex columns, printable gutter
pub fn hexdump(data: &[u8], bytes_per_line: usize) -> Vec<String> {
    let width = bytes_per_line.max(1);
    data.chunks(width)
        .enumerate()
        .map(|(row, chunk)| {
            let hex: Vec<String> = chunk.iter().map(|b| format!("{:02X}", b)).collect();
            let ascii: String = chunk
                .iter()
                .map(|&b| if (0x20..0x7f).contains(&b) { b as char } else { '.' })
                .collect();
            format!("{:04X}  {:<pad$}  |{}|", row * width, hex.join(" "), ascii, pad = width * 3 - 1)
        })
        .collect()
}

/// Payload as escaped text, split at newlines
pub fn plain(data: &[u8]) -> Vec<String> {
    data.split_inclusive(|&b| b == b'\n')
        .map(|line| {
            let line = line.strip_suffix(b"\n").unwrap_or(line);
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            escape_bytes(line)
        })
        .collect()
}

/// Print console events until every sender is gone
///
/// # Parameters
///
/// * `rx` - Event receiver
/// * `prompt` - Prompt reprinted after events that ask for it
pub async fn run_printer(mut rx: mpsc::UnboundedReceiver<ConsoleEvent>, prompt: String) {
    while let Some(event) = rx.recv().await {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        if event.redraw_prompt {
            // Clear a partially typed line before printing over it
            let _ = write!(out, "\r");
        }
        for line in &event.lines {
            let _ = writeln!(out, "{}", line);
        }
        if event.redraw_prompt {
            let _ = write!(out, "{}", prompt);
        }
        let _ = out.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hexdump_layout() {
        let lines = hexdump(b"GET / HTTP/1.0\r\n\x00", 16);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("0000  47 45 54 20"));
        assert!(lines[0].ends_with("|GET / HTTP/1.0..|"));
        assert!(lines[1].starts_with("0010  00 "));
        assert!(lines[1].ends_with("|.|"));
        assert_eq!(lines[0].find('|'), lines[1].find('|'));
    }

    #[test]
    fn test_plain_escapes() {
        assert_eq!(plain(b"a\r\nb\x01\n"), vec!["a".to_string(), "b\\x01".to_string()]);
        assert_eq!(plain(b""), Vec::<String>::new());
    }

    #[test]
    fn test_notify_line() {
        let line = notify_line(Duration::from_millis(1500), "p1", "demo v2", 7, Direction::ServerToClient, 42);
        assert_eq!(line, "1.500000 - p1 (demo v2) [PKT# 7] [S -> C] - 42 Bytes");
    }

    #[tokio::test]
    async fn test_console_channel() {
        let (console, mut rx) = Console::channel();
        console.print("hello");
        console.print_lines(Vec::new());
        console.emit(vec!["a".into(), "b".into()], false);

        assert_eq!(rx.recv().await.unwrap(), ConsoleEvent { lines: vec!["hello".into()], redraw_prompt: true });
        assert_eq!(rx.recv().await.unwrap().lines, vec!["a".to_string(), "b".to_string()]);
    }
}
