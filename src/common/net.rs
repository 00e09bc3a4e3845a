//! Network utility functions
//!
//! This module provides the socket setup shared by every proxy instance.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use log::debug;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::time::timeout;

use super::error::{ProxyError, Result};

/// Listen backlog; an instance only ever serves one client at a time
const LISTEN_BACKLOG: u32 = 8;

/// Bind a listening socket with `SO_REUSEADDR`
///
/// Failures are reported as [`ProxyError::Bind`] so the registry can refuse to
/// create the instance.
///
/// # Arguments
///
/// * `bind_ip` - Address to listen on
/// * `port` - Local port
pub fn bind_listener(bind_ip: IpAddr, port: u16) -> Result<TcpListener> {
    let addr = SocketAddr::new(bind_ip, port);
    let bind_err = |e: std::io::Error| ProxyError::Bind { port, reason: e.to_string() };

    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4(),
        SocketAddr::V6(_) => TcpSocket::new_v6(),
    }
    .map_err(bind_err)?;

    socket.set_reuseaddr(true).map_err(bind_err)?;
    socket.bind(addr).map_err(bind_err)?;
    let listener = socket.listen(LISTEN_BACKLOG).map_err(bind_err)?;

    debug!("Listening socket bound on {}", addr);
    Ok(listener)
}

/// Connect to the remote side of a proxy
///
/// # Arguments
///
/// * `host` - Remote host name or address
/// * `port` - Remote port
/// * `connect_timeout` - Upper bound for resolution plus handshake
pub async fn connect_remote(host: &str, port: u16, connect_timeout: Duration) -> Result<TcpStream> {
    match timeout(connect_timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(stream)) => {
            // Interactive traffic: small chunks should leave immediately
            let _ = stream.set_nodelay(true);
            Ok(stream)
        }
        Ok(Err(e)) => Err(ProxyError::Io(e)),
        Err(_) => Err(ProxyError::Io(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            format!("connection to {}:{} timed out", host, port),
        ))),
    }
}

/// Format a `host:port` pair, bracketing IPv6 literals
pub fn format_endpoint(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[tokio::test]
    async fn test_bind_listener_reports_port_in_use() {
        let first = bind_listener(IpAddr::V4(Ipv4Addr::LOCALHOST), 0).expect("bind ephemeral");
        let port = first.local_addr().unwrap().port();

        // SO_REUSEADDR does not allow two active listeners on the same port
        match bind_listener(IpAddr::V4(Ipv4Addr::LOCALHOST), port) {
            Err(ProxyError::Bind { port: p, .. }) => assert_eq!(p, port),
            other => panic!("expected bind error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_connect_remote_refused() {
        let listener = bind_listener(IpAddr::V4(Ipv4Addr::LOCALHOST), 0).unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = connect_remote("127.0.0.1", port, Duration::from_secs(2)).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_format_endpoint() {
        assert_eq!(format_endpoint("127.0.0.1", 80), "127.0.0.1:80");
        assert_eq!(format_endpoint("::1", 80), "[::1]:80");
    }
}
