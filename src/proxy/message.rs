//! Proxy message types
//!
//! This module defines the messages exchanged with a proxy instance's actor
//! task. Control requests come from the command path through a [`ProxyHandle`];
//! link events come from the instance's own reader and writer tasks.

use std::fmt;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::common::{ProxyError, Result};

/// Which side of the session a link faces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Accepted from the listening socket
    Client,
    /// Opened towards the remote host
    Server,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Client => f.write_str("client"),
            Role::Server => f.write_str("server"),
        }
    }
}

/// Control requests for the instance actor
#[derive(Debug)]
pub enum ProxyMessage {
    /// Close both links, reply with whether anything was connected
    Disconnect {
        /// Reply channel
        reply: oneshot::Sender<bool>,
    },
    /// A new module version was published; restart its timers
    ModulePublished,
    /// Close everything and stop accepting
    Shutdown {
        /// Signalled once links are closed and timers stopped
        reply: oneshot::Sender<()>,
    },
}

/// Notifications from link tasks
#[derive(Debug)]
pub(crate) enum LinkEvent {
    /// A reader saw EOF or an error, or a writer failed
    Closed {
        /// Link side
        role: Role,
        /// Link id, stale ids are ignored
        id: u64,
        /// Human readable cause
        reason: String,
    },
}

/// Proxy control handle
///
/// Cloneable sender for [`ProxyMessage`]s; every request fails cleanly once
/// the actor has stopped.
#[derive(Debug, Clone)]
pub struct ProxyHandle {
    sender: mpsc::Sender<ProxyMessage>,
}

impl ProxyHandle {
    /// Create a new proxy handle
    pub fn new(sender: mpsc::Sender<ProxyMessage>) -> Self {
        Self { sender }
    }

    /// Send a message to the proxy actor
    ///
    /// # Parameters
    ///
    /// * `message` - Message to send
    ///
    /// # Returns
    ///
    /// Returns a result indicating success or failure
    pub async fn send(&self, message: ProxyMessage) -> Result<()> {
        self.sender
            .send(message)
            .await
            .map_err(|_| ProxyError::Other("proxy instance is no longer running".to_string()))
    }

    /// Ask the actor to restart timers for the published module
    pub async fn module_published(&self) -> Result<()> {
        self.send(ProxyMessage::ModulePublished).await
    }

    /// Close the current session
    ///
    /// # Returns
    ///
    /// Whether a client or server link was open
    pub async fn disconnect(&self) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(ProxyMessage::Disconnect { reply }).await?;
        rx.await
            .map_err(|_| ProxyError::Other("proxy instance stopped before replying".to_string()))
    }

    /// Shut the actor down and wait for it, at most `timeout`
    ///
    /// # Returns
    ///
    /// `true` if the actor confirmed the shutdown in time
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        let (reply, rx) = oneshot::channel();
        if self.send(ProxyMessage::Shutdown { reply }).await.is_err() {
            return true;
        }
        matches!(tokio::time::timeout(timeout, rx).await, Ok(Ok(())))
    }
}

/// Create a new proxy message channel
///
/// # Returns
///
/// Returns a tuple containing the handle and the actor's receiver
pub fn create_channel() -> (ProxyHandle, mpsc::Receiver<ProxyMessage>) {
    let (tx, rx) = mpsc::channel(100);
    (ProxyHandle::new(tx), rx)
}
