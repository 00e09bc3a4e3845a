//! Helpers shared by the integration tests

#![allow(dead_code)]

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Instant};

use hotswap_proxy::command::{History, Router, RouterOptions};
use hotswap_proxy::console::{Console, ConsoleEvent};
use hotswap_proxy::proxy::ProxySettings;
use hotswap_proxy::{ProxyRegistry, VariableStore};

/// How long a test waits for something to happen on a socket
pub const WAIT: Duration = Duration::from_secs(3);

/// Proxy settings for tests: loopback only, short timeouts
pub fn settings() -> ProxySettings {
    ProxySettings {
        bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
        connect_timeout: Duration::from_secs(2),
        shutdown_timeout: Duration::from_secs(2),
        ..ProxySettings::default()
    }
}

/// A router with an empty registry
///
/// The console receiver is returned so output is kept for inspection.
pub fn router(default_module: Option<PathBuf>, options: RouterOptions) -> (Router, mpsc::UnboundedReceiver<ConsoleEvent>) {
    let (console, rx) = Console::channel();
    let registry = ProxyRegistry::new(Arc::new(VariableStore::new()), console, settings(), default_module);
    (Router::new(registry, History::new(), options), rx)
}

/// Start a server echoing everything back; returns its port
pub async fn echo_server() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                loop {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if stream.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });

    port
}

/// A server that records what it receives
pub struct Upstream {
    /// Listening port
    pub port: u16,
    /// Received chunks, from any connection
    pub received: mpsc::UnboundedReceiver<Vec<u8>>,
    /// One message per accepted connection
    pub accepted: mpsc::UnboundedReceiver<()>,
}

impl Upstream {
    /// Start a recording server
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (data_tx, received) = mpsc::unbounded_channel();
        let (accept_tx, accepted) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let _ = accept_tx.send(());
                let data_tx = data_tx.clone();
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    loop {
                        match stream.read(&mut buf).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => {
                                let _ = data_tx.send(buf[..n].to_vec());
                            }
                        }
                    }
                });
            }
        });

        Self { port, received, accepted }
    }

    /// Collect received bytes until `expected` bytes arrived or the wait ends
    pub async fn read_exact(&mut self, expected: usize) -> Vec<u8> {
        let deadline = Instant::now() + WAIT;
        let mut data = Vec::new();
        while data.len() < expected {
            match timeout(deadline.saturating_duration_since(Instant::now()), self.received.recv()).await {
                Ok(Some(chunk)) => data.extend_from_slice(&chunk),
                _ => break,
            }
        }
        data
    }

    /// Whether nothing arrives within `quiet`
    pub async fn stays_silent(&mut self, quiet: Duration) -> bool {
        timeout(quiet, self.received.recv()).await.is_err()
    }
}

/// Connect a client to a proxy port
pub async fn connect(port: u16) -> TcpStream {
    TcpStream::connect(("127.0.0.1", port)).await.unwrap()
}

/// Read exactly `len` bytes, failing the test on timeout
pub async fn read_n(stream: &mut TcpStream, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    timeout(WAIT, stream.read_exact(&mut buf))
        .await
        .expect("timed out reading from proxy")
        .expect("read failed");
    buf
}

/// Whether the peer closed the stream within the wait
pub async fn is_closed(stream: &mut TcpStream) -> bool {
    let mut buf = [0u8; 64];
    matches!(timeout(WAIT, stream.read(&mut buf)).await, Ok(Ok(0)) | Ok(Err(_)))
}

/// Poll `check` until it holds or the wait ends
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// Wait until the named proxy has a client session
pub async fn wait_for_session(router: &Router, name: &str) {
    let connected = eventually(|| {
        router
            .registry()
            .get(name)
            .map(|instance| instance.client_peer().is_some() && instance.server_peer().is_some())
            .unwrap_or(false)
    })
    .await;
    assert!(connected, "proxy '{}' never got a session", name);
}

/// Drain console events received so far into plain lines
pub fn console_lines(rx: &mut mpsc::UnboundedReceiver<ConsoleEvent>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Ok(event) = rx.try_recv() {
        lines.extend(event.lines);
    }
    lines
}
