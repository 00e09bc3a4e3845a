//! Proxy instance
//!
//! One listening port relaying to one remote endpoint through a parser module.
//! The instance is driven by an actor task that owns the listener, the link
//! tasks and the timer tasks; everything else talks to it through messages or
//! through the shared state, which holds the link table, the module slot and
//! the references to the store and the console.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use bytes::Bytes;
use chrono::{DateTime, Local};
use log::{debug, error, info, warn};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::common::{bind_listener, connect_remote, format_endpoint, Result};
use crate::console::Console;
use crate::module::{self, Injector, Module, ModuleSlot};
use crate::store::VariableStore;

use super::link::{spawn_writer, Endpoint, LinkTable, LinkTasks};
use super::message::{create_channel, LinkEvent, ProxyHandle, ProxyMessage, Role};
use super::relay::{spawn_reader, spawn_timer};
use super::{DisplayOverride, ProxySettings, ProxySummary};

/// State shared between the instance, its actor and its tasks
#[derive(Debug)]
pub(crate) struct InstanceShared {
    name: RwLock<String>,
    local_port: u16,
    remote_host: String,
    remote_port: u16,
    created_at: DateTime<Local>,
    slot: ModuleSlot,
    store: Arc<VariableStore>,
    console: Console,
    links: RwLock<LinkTable>,
    packets: AtomicU64,
    display: RwLock<DisplayOverride>,
    settings: ProxySettings,
}

impl InstanceShared {
    pub fn name(&self) -> String {
        self.name.read().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    pub fn module(&self) -> Arc<Module> {
        self.slot.current()
    }

    pub fn store(&self) -> &VariableStore {
        &self.store
    }

    pub fn console(&self) -> &Console {
        &self.console
    }

    pub fn settings(&self) -> &ProxySettings {
        &self.settings
    }

    pub fn display(&self) -> DisplayOverride {
        *self.display.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn next_packet_number(&self) -> u64 {
        self.packets.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn send(&self, role: Role, data: Bytes) -> Result<()> {
        self.links().send(role, data)
    }

    fn links(&self) -> RwLockReadGuard<'_, LinkTable> {
        self.links.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn links_mut(&self) -> RwLockWriteGuard<'_, LinkTable> {
        self.links.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Injector for InstanceShared {
    fn send_to_client(&self, data: Bytes) -> Result<()> {
        self.send(Role::Client, data)
    }

    fn send_to_server(&self, data: Bytes) -> Result<()> {
        self.send(Role::Server, data)
    }
}

/// A running proxy
///
/// Dropping an instance aborts its tasks; [`ProxyInstance::stop`] shuts it
/// down gracefully.
#[derive(Debug)]
pub struct ProxyInstance {
    shared: Arc<InstanceShared>,
    handle: ProxyHandle,
    actor: Option<JoinHandle<()>>,
}

impl ProxyInstance {
    /// Bind the listening port and start the instance
    ///
    /// # Parameters
    ///
    /// * `name` - Instance name, validated by the caller
    /// * `local_port` - Port to listen on, 0 picks a free port
    /// * `remote_host` - Host to relay to
    /// * `remote_port` - Port to relay to
    /// * `module` - Initial parser module
    /// * `store` - Shared variable store
    /// * `console` - Operator console
    /// * `settings` - Socket and timeout settings
    ///
    /// # Returns
    ///
    /// The running instance, or a bind error
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        name: &str,
        local_port: u16,
        remote_host: &str,
        remote_port: u16,
        module: Module,
        store: Arc<VariableStore>,
        console: Console,
        settings: ProxySettings,
    ) -> Result<Self> {
        let listener = bind_listener(settings.bind_ip, local_port)?;
        let local_port = listener.local_addr().map(|addr| addr.port()).unwrap_or(local_port);

        let shared = Arc::new(InstanceShared {
            name: RwLock::new(name.to_string()),
            local_port,
            remote_host: remote_host.to_string(),
            remote_port,
            created_at: Local::now(),
            slot: ModuleSlot::new(module),
            store,
            console,
            links: RwLock::new(LinkTable::default()),
            packets: AtomicU64::new(0),
            display: RwLock::new(DisplayOverride::default()),
            settings,
        });

        let (handle, rx) = create_channel();
        let actor = Actor::new(Arc::clone(&shared));
        let task = tokio::spawn(actor.run(listener, rx));

        info!(
            "Proxy '{}' listening on {}:{}, relaying to {} with module {}",
            name,
            shared.settings.bind_ip,
            local_port,
            format_endpoint(remote_host, remote_port),
            shared.module().label()
        );

        Ok(Self {
            shared,
            handle,
            actor: Some(task),
        })
    }

    /// Instance name
    pub fn name(&self) -> String {
        self.shared.name()
    }

    /// Local listening port
    pub fn local_port(&self) -> u16 {
        self.shared.local_port
    }

    /// Remote host
    pub fn remote_host(&self) -> &str {
        &self.shared.remote_host
    }

    /// Remote port
    pub fn remote_port(&self) -> u16 {
        self.shared.remote_port
    }

    /// Creation time
    pub fn created_at(&self) -> DateTime<Local> {
        self.shared.created_at
    }

    /// Published module
    pub fn module(&self) -> Arc<Module> {
        self.shared.module()
    }

    /// Shared variable store
    pub fn store(&self) -> &Arc<VariableStore> {
        &self.shared.store
    }

    /// Injection functions of this instance, usable from any task
    pub fn injector(&self) -> Arc<dyn Injector> {
        Arc::clone(&self.shared) as Arc<dyn Injector>
    }

    /// Queue bytes for the client
    pub fn send_to_client(&self, data: Bytes) -> Result<()> {
        self.shared.send(Role::Client, data)
    }

    /// Queue bytes for the server
    pub fn send_to_server(&self, data: Bytes) -> Result<()> {
        self.shared.send(Role::Server, data)
    }

    /// Peer of the current client link
    pub fn client_peer(&self) -> Option<SocketAddr> {
        self.shared.links().client.as_ref().map(|e| e.peer)
    }

    /// Peer of the current server link
    pub fn server_peer(&self) -> Option<SocketAddr> {
        self.shared.links().server.as_ref().map(|e| e.peer)
    }

    /// Close the current session, keeping the listener
    pub async fn disconnect(&self) -> Result<bool> {
        self.handle.disconnect().await
    }

    /// Reload the module if its file changed
    ///
    /// # Returns
    ///
    /// The newly published module, or `None` if nothing changed. A failed
    /// reload leaves the current module in place.
    pub async fn refresh_module(&self) -> Result<Option<Arc<Module>>> {
        match self.shared.slot.refresh()? {
            Some(module) => {
                self.handle.module_published().await?;
                Ok(Some(module))
            }
            None => Ok(None),
        }
    }

    /// Replace the module with one loaded from `path`
    pub async fn load_parser(&self, path: &Path) -> Result<Arc<Module>> {
        let module = module::load(path)?;
        let module = self.shared.slot.publish(module);
        self.handle.module_published().await?;
        info!("Proxy '{}' now uses module {} from {}", self.name(), module.label(), path.display());
        Ok(module)
    }

    /// Change the instance name; uniqueness is the registry's job
    pub fn rename(&self, new_name: &str) {
        let mut name = self.shared.name.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *name = new_name.to_string();
    }

    /// Display overrides in effect
    pub fn display_override(&self) -> DisplayOverride {
        self.shared.display()
    }

    /// Change the display overrides; the module stays as it is
    pub fn update_display(&self, update: impl FnOnce(&mut DisplayOverride)) -> DisplayOverride {
        let mut display = self.shared.display.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        update(&mut display);
        *display
    }

    /// Snapshot for listings
    pub fn summary(&self) -> ProxySummary {
        let links = self.shared.links();
        ProxySummary {
            name: self.name(),
            local_port: self.shared.local_port,
            remote_host: self.shared.remote_host.clone(),
            remote_port: self.shared.remote_port,
            module: self.module().label(),
            client: links.client.as_ref().map(|e| e.peer),
            server: links.server.as_ref().map(|e| e.peer),
            packets: self.shared.packets.load(Ordering::Relaxed),
            created_at: self.shared.created_at,
        }
    }

    /// Stop the instance
    ///
    /// Closes both links, stops timers and closes the listener. Waits at most
    /// the configured shutdown timeout before aborting remaining tasks.
    pub async fn stop(mut self) {
        let name = self.name();
        let timeout = self.shared.settings.shutdown_timeout;
        let confirmed = self.handle.shutdown(timeout).await;

        if let Some(mut task) = self.actor.take() {
            if !confirmed {
                warn!("Proxy '{}' did not stop within {:?}, aborting", name, timeout);
                task.abort();
            }
            let _ = tokio::time::timeout(timeout, &mut task).await;
        }
        info!("Proxy '{}' stopped", name);
    }
}

impl Drop for ProxyInstance {
    fn drop(&mut self) {
        if let Some(task) = self.actor.take() {
            task.abort();
        }
    }
}

/// Timer tasks of the published module version
#[derive(Debug, Default)]
struct TimerTasks(Vec<JoinHandle<()>>);

impl TimerTasks {
    fn abort_all(&mut self) {
        for task in self.0.drain(..) {
            task.abort();
        }
    }
}

impl Drop for TimerTasks {
    fn drop(&mut self) {
        self.abort_all();
    }
}

/// A link whose endpoint is published but whose tasks are not running yet
struct PendingLink {
    role: Role,
    id: u64,
    peer: SocketAddr,
    read_half: OwnedReadHalf,
    write_half: OwnedWriteHalf,
    rx: mpsc::UnboundedReceiver<Bytes>,
}

/// The instance's actor
struct Actor {
    shared: Arc<InstanceShared>,
    events_tx: mpsc::UnboundedSender<LinkEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<LinkEvent>>,
    client: Option<LinkTasks>,
    server: Option<LinkTasks>,
    timers: TimerTasks,
    next_link_id: u64,
}

impl Actor {
    fn new(shared: Arc<InstanceShared>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            shared,
            events_tx,
            events_rx: Some(events_rx),
            client: None,
            server: None,
            timers: TimerTasks::default(),
            next_link_id: 0,
        }
    }

    /// Main event loop: accept clients, serve control messages, react to links
    async fn run(mut self, listener: TcpListener, mut rx: mpsc::Receiver<ProxyMessage>) {
        let Some(mut events_rx) = self.events_rx.take() else {
            return;
        };
        self.restart_timers();

        let mut shutdown_reply = None;
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => self.on_accept(stream, peer).await,
                    Err(e) => error!("[{}] error accepting connection: {}", self.shared.name(), e),
                },

                message = rx.recv() => match message {
                    Some(ProxyMessage::Disconnect { reply }) => {
                        let had_session = self.close_session().await;
                        let _ = reply.send(had_session);
                    }
                    Some(ProxyMessage::ModulePublished) => self.restart_timers(),
                    Some(ProxyMessage::Shutdown { reply }) => {
                        shutdown_reply = Some(reply);
                        break;
                    }
                    None => break,
                },

                Some(event) = events_rx.recv() => self.on_link_event(event).await,
            }
        }

        self.shutdown().await;
        drop(listener);
        if let Some(reply) = shutdown_reply {
            let _ = reply.send(());
        }
        debug!("[{}] actor finished", self.shared.name());
    }

    async fn on_accept(&mut self, stream: TcpStream, peer: SocketAddr) {
        let name = self.shared.name();

        // Last connect wins: the previous client is gone before the new one reads
        if let Some(previous) = self.client.take() {
            let previous_peer = previous.peer;
            self.detach(Role::Client, previous).await;
            self.shared
                .console
                .print(format!("[{}] client {} replaced by {}", name, previous_peer, peer));
        }

        let mut server = None;
        if self.server.is_none() {
            let remote = connect_remote(
                &self.shared.remote_host,
                self.shared.remote_port,
                self.shared.settings.connect_timeout,
            )
            .await
            .and_then(|remote| {
                let remote_peer = remote.peer_addr()?;
                Ok((remote, remote_peer))
            });

            match remote {
                Ok((remote, remote_peer)) => server = Some(self.register(Role::Server, remote, remote_peer)),
                Err(e) => {
                    // Dropping the stream closes the new client
                    self.shared.console.print(format!(
                        "[{}] cannot connect to {}: {}",
                        name,
                        format_endpoint(&self.shared.remote_host, self.shared.remote_port),
                        e
                    ));
                    return;
                }
            }
        }

        // Both endpoints are registered before either reader starts, so early
        // data from one side always finds the other
        let client = self.register(Role::Client, stream, peer);
        if let Some(server) = server {
            self.server = Some(self.spawn_link(server));
        }
        self.client = Some(self.spawn_link(client));

        self.shared.console.print(format!(
            "[{}] client {} connected to {}",
            name,
            peer,
            format_endpoint(&self.shared.remote_host, self.shared.remote_port)
        ));
    }

    /// Publish the endpoint of a new link
    fn register(&mut self, role: Role, stream: TcpStream, peer: SocketAddr) -> PendingLink {
        self.next_link_id += 1;
        let id = self.next_link_id;

        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();

        let endpoint = Some(Endpoint::new(id, peer, tx));
        let mut links = self.shared.links_mut();
        match role {
            Role::Client => links.client = endpoint,
            Role::Server => links.server = endpoint,
        }

        PendingLink {
            role,
            id,
            peer,
            read_half,
            write_half,
            rx,
        }
    }

    /// Start the reader and writer of a registered link
    fn spawn_link(&self, link: PendingLink) -> LinkTasks {
        let PendingLink {
            role,
            id,
            peer,
            read_half,
            write_half,
            rx,
        } = link;
        let (stop_tx, stop_rx) = watch::channel(false);

        let writer = spawn_writer(role, id, write_half, rx, self.events_tx.clone());
        let reader = spawn_reader(Arc::clone(&self.shared), role, id, read_half, stop_rx, self.events_tx.clone());
        debug!("[{}] attached {} link #{} ({})", self.shared.name(), role, id, peer);

        LinkTasks::new(id, peer, stop_tx, reader, writer)
    }

    async fn detach(&mut self, role: Role, tasks: LinkTasks) {
        // Removing the endpoint closes the writer queue once it is drained
        drop(self.shared.links_mut().take_if(role, tasks.id));
        tasks.close(role, self.shared.settings.shutdown_timeout).await;
    }

    async fn close_session(&mut self) -> bool {
        let mut had_session = false;
        if let Some(client) = self.client.take() {
            self.detach(Role::Client, client).await;
            had_session = true;
        }
        if let Some(server) = self.server.take() {
            self.detach(Role::Server, server).await;
            had_session = true;
        }
        had_session
    }

    async fn on_link_event(&mut self, event: LinkEvent) {
        let LinkEvent::Closed { role, id, reason } = event;

        let current = match role {
            Role::Client => self.client.as_ref(),
            Role::Server => self.server.as_ref(),
        };
        let Some(peer) = current.filter(|tasks| tasks.id == id).map(|tasks| tasks.peer) else {
            debug!("[{}] ignoring close of stale {} link #{}", self.shared.name(), role, id);
            return;
        };

        // Either side going away ends the whole session
        self.close_session().await;
        self.shared.console.print(format!(
            "[{}] {} {} disconnected ({}), session closed",
            self.shared.name(),
            role,
            peer,
            reason
        ));
    }

    fn restart_timers(&mut self) {
        self.timers.abort_all();

        let module = self.shared.module();
        for index in 0..module.timers().len() {
            if let Some(task) = spawn_timer(Arc::clone(&self.shared), Arc::clone(&module), index) {
                self.timers.0.push(task);
            }
        }
        if !self.timers.0.is_empty() {
            debug!("[{}] started {} timers for {}", self.shared.name(), self.timers.0.len(), module.label());
        }
    }

    async fn shutdown(&mut self) {
        self.timers.abort_all();
        self.close_session().await;
        info!("[{}] listener on port {} closed", self.shared.name(), self.shared.local_port);
    }
}
