//! Transparent TCP relay with optional PROXY protocol injection.
//!
//! Every accepted connection gets its own task: dial the upstream, optionally
//! send a PROXY v1 header announcing the configured client, then copy bytes in
//! both directions. The session ends as soon as either direction finishes, by
//! EOF or error; the other direction is dropped and both sockets close.

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::proxy_protocol::ProxyHeader;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{copy, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, error, info, warn};

/// Relay listener bound to its address.
pub struct ProxyRelay {
    listener: TcpListener,
    config: Arc<RelayConfig>,
}

impl ProxyRelay {
    /// Bind the listen address. Failure here is fatal for relay mode.
    pub async fn bind(config: RelayConfig) -> Result<Self, RelayError> {
        let listener = TcpListener::bind(&config.listen_addr)
            .await
            .map_err(|e| RelayError::Bind(config.listen_addr.clone(), e))?;

        Ok(Self {
            listener,
            config: Arc::new(config),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections forever. Accept errors are logged and skipped.
    pub async fn serve(self) {
        info!(
            "Relaying {} -> {} (proxy protocol: {})",
            self.listener
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| self.config.listen_addr.clone()),
            self.config.upstream,
            self.config.proxy_protocol
        );

        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let read_deadline = self.config.read_deadline.map(|d| Instant::now() + d);
                    let config = Arc::clone(&self.config);
                    tokio::spawn(async move {
                        relay_session(stream, peer, read_deadline, &config).await;
                    });
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }
    }
}

/// Header sent upstream for a client connected from `peer` to the relay's
/// `listen_port`.
pub fn session_header(config: &RelayConfig, peer: SocketAddr, listen_port: u16) -> ProxyHeader {
    ProxyHeader::spoofed(config.client_ip, peer.port(), &config.server, listen_port)
}

async fn relay_session(
    mut client: TcpStream,
    peer: SocketAddr,
    read_deadline: Option<Instant>,
    config: &RelayConfig,
) {
    debug!("Accepted connection from {}", peer);

    let dial = timeout(config.dial_timeout, TcpStream::connect(&config.upstream));
    let mut upstream = match dial.await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            reject(&mut client, peer, format!("ups error: {e}")).await;
            return;
        }
        Err(_) => {
            let message = format!(
                "ups error: connect to {} timed out after {:?}",
                config.upstream, config.dial_timeout
            );
            reject(&mut client, peer, message).await;
            return;
        }
    };

    if config.proxy_protocol {
        let listen_port = match client.local_addr() {
            Ok(addr) => addr.port(),
            Err(e) => {
                reject(&mut client, peer, format!("proxy protocol error: {e}")).await;
                return;
            }
        };
        let header = session_header(config, peer, listen_port);
        debug!("Sending {:?} upstream for {}", header.to_string(), peer);

        if let Err(e) = upstream.write_all(header.to_string().as_bytes()).await {
            reject(&mut client, peer, format!("proxy protocol error: {e}")).await;
            return;
        }
    }

    let (mut client_read, mut client_write) = client.split();
    let (mut upstream_read, mut upstream_write) = upstream.split();

    let client_to_upstream = async {
        let transfer = copy(&mut client_read, &mut upstream_write);
        match read_deadline {
            Some(deadline) => timeout_at(deadline, transfer)
                .await
                .unwrap_or_else(|_| Err(io::ErrorKind::TimedOut.into())),
            None => transfer.await,
        }
    };
    let upstream_to_client = copy(&mut upstream_read, &mut client_write);

    tokio::select! {
        result = client_to_upstream => log_finished(peer, "client -> upstream", result),
        result = upstream_to_client => log_finished(peer, "upstream -> client", result),
    }
}

async fn reject(client: &mut TcpStream, peer: SocketAddr, message: String) {
    warn!("Closing connection from {}: {}", peer, message);
    // The client may already be gone.
    let _ = client.write_all(message.as_bytes()).await;
}

fn log_finished(peer: SocketAddr, direction: &str, result: io::Result<u64>) {
    match result {
        Ok(bytes) => debug!("{} {} done after {} bytes", peer, direction, bytes),
        Err(e) => debug!("{} {} ended: {}", peer, direction, e),
    }
}
