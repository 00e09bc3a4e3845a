//! Relay loops and module timers
//!
//! Each attached link has one reader task. For every chunk it reads, the reader
//! takes the currently published module once, runs the parse rules for that
//! direction and queues the outcome on the peer link. Chunks of one direction
//! are therefore handled strictly in receive order; a parse that never
//! returned would stall only its own direction.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use log::{debug, warn};
use metrics::counter;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::common::ProxyError;
use crate::console;
use crate::module::{Direction, Disposition, DumpFormat, ExecContext, Module, ModuleError};

use super::instance::InstanceShared;
use super::message::{LinkEvent, Role};

fn direction_of(role: Role) -> Direction {
    match role {
        Role::Client => Direction::ClientToServer,
        Role::Server => Direction::ServerToClient,
    }
}

fn target_of(direction: Direction) -> Role {
    match direction {
        Direction::ClientToServer => Role::Server,
        Direction::ServerToClient => Role::Client,
    }
}

/// Spawn the reader task of a link
pub(crate) fn spawn_reader(
    shared: Arc<InstanceShared>,
    role: Role,
    id: u64,
    mut reader: OwnedReadHalf,
    mut stop: watch::Receiver<bool>,
    events: mpsc::UnboundedSender<LinkEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buffer = vec![0u8; shared.settings().buffer_size];
        let mut total_bytes = 0usize;

        loop {
            tokio::select! {
                biased;

                _ = stop.changed() => break,

                result = reader.read(&mut buffer) => match result {
                    Ok(0) => {
                        let _ = events.send(LinkEvent::Closed { role, id, reason: "closed by peer".to_string() });
                        break;
                    }
                    Ok(n) => {
                        total_bytes += n;
                        process_chunk(&shared, direction_of(role), &buffer[..n]);
                    }
                    Err(e) => {
                        let _ = events.send(LinkEvent::Closed { role, id, reason: format!("read failed: {}", e) });
                        break;
                    }
                },
            }
        }

        debug!("{} link #{} reader finished after {} bytes", role, id, total_bytes);
    })
}

/// Run one chunk through the published module and queue the result
pub(crate) fn process_chunk(shared: &InstanceShared, direction: Direction, chunk: &[u8]) {
    let module = shared.module();
    let name = shared.name();
    let packet = shared.next_packet_number();

    counter!("hotswap_proxy_chunks_total", "direction" => direction.source()).increment(1);
    counter!("hotswap_proxy_bytes_total", "direction" => direction.source()).increment(chunk.len() as u64);

    let mut ctx = ExecContext::new(shared.store(), shared, &name);
    let outcome = module.parse(direction, chunk, &mut ctx);
    let prints = ctx.take_output();

    let mut lines = Vec::new();
    let display = module.display();
    let overrides = shared.display();
    let notify = overrides.notify(display);
    let format = overrides.format(display);
    let wants_output = notify || format != DumpFormat::None;
    if wants_output && module.display_matches(direction, chunk, &mut ctx) {
        if notify {
            lines.push(console::notify_line(
                console::elapsed(),
                &name,
                &module.label(),
                packet,
                direction,
                chunk.len(),
            ));
        }
        match format {
            DumpFormat::Hexdump => lines.extend(console::hexdump(chunk, overrides.bytes_per_line(display))),
            DumpFormat::Plain => lines.extend(console::plain(chunk)),
            DumpFormat::None => {}
        }
    }
    lines.extend(prints);

    let forward = match outcome {
        Ok(Disposition::Forward) => Some(Bytes::copy_from_slice(chunk)),
        Ok(Disposition::Replace(payload)) => Some(payload),
        Ok(Disposition::Drop) => {
            counter!("hotswap_proxy_dropped_total", "direction" => direction.source()).increment(1);
            None
        }
        Err(e) => {
            counter!("hotswap_proxy_dropped_total", "direction" => direction.source()).increment(1);
            lines.push(format!("[{}] parse error in {} on PKT# {}: {}", name, module.label(), packet, e));
            None
        }
    };

    if let Some(data) = forward.filter(|data| !data.is_empty()) {
        if let Err(e) = shared.send(target_of(direction), data) {
            debug!("[{}] chunk PKT# {} not forwarded: {}", name, packet, e);
        }
    }

    shared.console().print_lines(lines);
}

/// Spawn the task driving timer `index` of `module`
pub(crate) fn spawn_timer(shared: Arc<InstanceShared>, module: Arc<Module>, index: usize) -> Option<JoinHandle<()>> {
    let every = Duration::from_millis(module.timers().get(index)?.every_ms);

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        let mut failing = false;
        loop {
            ticker.tick().await;

            let name = shared.name();
            let (outcome, mut lines) = {
                let mut ctx = ExecContext::new(shared.store(), shared.as_ref(), &name);
                let outcome = module.run_timer(index, &mut ctx);
                (outcome, ctx.take_output())
            };

            match outcome {
                Ok(()) => failing = false,
                Err(ModuleError::Injection(ProxyError::NotConnected(reason))) => {
                    debug!("[{}] timer {} of {} skipped: {}", name, index, module.label(), reason);
                }
                Err(e) => {
                    // Report the first failure of a streak only
                    if !failing {
                        warn!("[{}] timer {} of {} failed: {}", name, index, module.label(), e);
                        lines.push(format!("[{}] timer {} of {} failed: {}", name, index, module.label(), e));
                    }
                    failing = true;
                }
            }
            shared.console().print_lines(lines);
        }
    }))
}
