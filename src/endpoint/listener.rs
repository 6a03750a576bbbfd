//! TCP listener handing out unauthenticated server endpoints.

use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tracing::info;

use super::{SecureEndpoint, Timeouts};
use crate::config::EndpointConfig;
use crate::mtls::{Role, TrustContext};
use crate::{Error, Result};

/// Listening socket bound to a server trust context.
pub struct SecureListener {
    listener: TcpListener,
    context: TrustContext,
    timeouts: Timeouts,
}

impl SecureListener {
    /// Bind `config.host:config.port` with `SO_REUSEADDR` and start
    /// listening with `config.backlog`.  Port 0 picks a free port.
    ///
    /// # Errors
    ///
    /// - `Error::Config` if `context` is not a server context or the host
    ///   does not resolve
    /// - `Error::Transport` if the socket cannot be bound
    pub async fn bind(config: &EndpointConfig, context: TrustContext) -> Result<Self> {
        if context.role() != Role::Server {
            return Err(Error::Config(
                "bind requires a server trust context".to_string(),
            ));
        }

        let addr = config.socket_addr().await?;
        let bind_err = |e: std::io::Error| Error::Transport(format!("Cannot bind {addr}: {e}"));

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(bind_err)?;
        socket.set_reuseaddr(true).map_err(bind_err)?;
        socket.bind(addr).map_err(bind_err)?;
        let listener = socket.listen(config.backlog).map_err(bind_err)?;

        info!(
            addr = %listener.local_addr().unwrap_or(addr),
            backlog = config.backlog,
            pinned = context.is_pinned(),
            "listening"
        );

        Ok(Self {
            listener,
            context,
            timeouts: config.timeouts(),
        })
    }

    /// Wait for the next TCP connection.  The endpoint is `Unestablished`;
    /// the caller runs the handshake.
    ///
    /// # Errors
    ///
    /// `Error::Transport` if accepting fails.
    pub async fn accept(&self) -> Result<SecureEndpoint<TcpStream>> {
        let (stream, peer) = self
            .listener
            .accept()
            .await
            .map_err(|e| Error::Transport(format!("Accept failed: {e}")))?;
        info!(peer = %peer, "connection accepted");

        Ok(SecureEndpoint::new(stream, self.context.clone(), self.timeouts).with_peer_addr(peer))
    }

    /// Address actually bound.
    ///
    /// # Errors
    ///
    /// `Error::Io` if the socket address cannot be read.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}
