//! Links
//!
//! A link is one socket of a session together with its reader task and its
//! writer queue. Everything written to a link, whether relayed or injected,
//! goes through the queue, so bytes leave in the order they were queued.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use log::{debug, warn};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::common::{ProxyError, Result};

use super::message::{LinkEvent, Role};

/// Writable end of an attached link
#[derive(Debug)]
pub(crate) struct Endpoint {
    pub id: u64,
    pub peer: SocketAddr,
    tx: mpsc::UnboundedSender<Bytes>,
}

impl Endpoint {
    pub fn new(id: u64, peer: SocketAddr, tx: mpsc::UnboundedSender<Bytes>) -> Self {
        Self { id, peer, tx }
    }
}

/// The links currently attached to an instance
#[derive(Debug, Default)]
pub(crate) struct LinkTable {
    pub client: Option<Endpoint>,
    pub server: Option<Endpoint>,
}

impl LinkTable {
    pub fn get(&self, role: Role) -> Option<&Endpoint> {
        match role {
            Role::Client => self.client.as_ref(),
            Role::Server => self.server.as_ref(),
        }
    }

    /// Remove the link of `role` if it is still link `id`
    pub fn take_if(&mut self, role: Role, id: u64) -> Option<Endpoint> {
        let slot = match role {
            Role::Client => &mut self.client,
            Role::Server => &mut self.server,
        };
        if slot.as_ref().map(|e| e.id) == Some(id) {
            slot.take()
        } else {
            None
        }
    }

    /// Queue bytes for a link
    pub fn send(&self, role: Role, data: Bytes) -> Result<()> {
        let endpoint = self
            .get(role)
            .ok_or_else(|| ProxyError::NotConnected(format!("no {} connection", role)))?;
        endpoint
            .tx
            .send(data)
            .map_err(|_| ProxyError::NotConnected(format!("{} connection {} is closing", role, endpoint.peer)))
    }
}

/// Tasks serving one link
///
/// Dropping the value aborts whatever is still running.
#[derive(Debug)]
pub(crate) struct LinkTasks {
    pub id: u64,
    pub peer: SocketAddr,
    stop: watch::Sender<bool>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl LinkTasks {
    pub fn new(id: u64, peer: SocketAddr, stop: watch::Sender<bool>, reader: JoinHandle<()>, writer: JoinHandle<()>) -> Self {
        Self {
            id,
            peer,
            stop,
            reader,
            writer,
        }
    }

    /// Stop the reader and let the writer drain, waiting at most `timeout`
    ///
    /// The endpoint must already be removed from the link table so the writer
    /// queue closes once drained.
    pub async fn close(mut self, role: Role, timeout: Duration) {
        let _ = self.stop.send(true);

        let drained = tokio::time::timeout(timeout, async {
            let _ = (&mut self.reader).await;
            let _ = (&mut self.writer).await;
        })
        .await;
        if drained.is_err() {
            warn!("{} link {} did not close within {:?}, aborting", role, self.peer, timeout);
        }
        debug!("Closed {} link #{} ({})", role, self.id, self.peer);
    }
}

impl Drop for LinkTasks {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

/// Spawn the writer task of a link
///
/// The task writes queued chunks in order, then shuts the socket's write side
/// down once every sender is gone. A write failure is reported as
/// [`LinkEvent::Closed`].
pub(crate) fn spawn_writer(
    role: Role,
    id: u64,
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
    events: mpsc::UnboundedSender<LinkEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(data) = rx.recv().await {
            if let Err(e) = writer.write_all(&data).await {
                let _ = events.send(LinkEvent::Closed {
                    role,
                    id,
                    reason: format!("write failed: {}", e),
                });
                return;
            }
        }
        let _ = writer.shutdown().await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_without_link_is_not_connected() {
        let table = LinkTable::default();
        let err = table.send(Role::Server, Bytes::from_static(b"x")).unwrap_err();
        assert!(matches!(err, ProxyError::NotConnected(_)));
    }

    #[test]
    fn test_take_if_ignores_stale_ids() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut table = LinkTable {
            client: Some(Endpoint::new(7, "127.0.0.1:1000".parse().unwrap(), tx)),
            server: None,
        };
        assert!(table.take_if(Role::Client, 6).is_none());
        assert!(table.client.is_some());
        assert!(table.take_if(Role::Client, 7).is_some());
        assert!(table.client.is_none());
    }

    #[tokio::test]
    async fn test_queue_preserves_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let table = LinkTable {
            client: Some(Endpoint::new(1, "127.0.0.1:1000".parse().unwrap(), tx)),
            server: None,
        };
        for chunk in [&b"one"[..], b"two", b"three"] {
            table.send(Role::Client, Bytes::copy_from_slice(chunk)).unwrap();
        }
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"one"));
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"two"));
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"three"));
    }
}
