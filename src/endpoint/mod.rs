//! Secure endpoint: a byte stream that only carries data after mutual
//! authentication.
//!
//! A [`SecureEndpoint`] starts `Unestablished` around a raw transport.
//! [`SecureEndpoint::handshake`] runs TLS with the endpoint's
//! [`TrustContext`]; on success the peer certificate is parsed into a
//! [`PeerIdentity`] and the endpoint becomes `Authenticated`.  Every failure
//! path releases the transport.
//!
//! The endpoint is generic over the raw transport so that tests can drive
//! both sides through an in-memory duplex.

mod listener;
mod state;

use std::io;
use std::mem;
use std::net::SocketAddr;
use std::time::Duration;

use rustls::{AlertDescription, CipherSuite, ProtocolVersion};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsStream;
use tracing::{debug, info, warn};

pub use listener::SecureListener;
pub use state::ConnectionState;

use crate::config::EndpointConfig;
use crate::mtls::{PeerIdentity, Role, TrustContext};
use crate::{Error, Result};

/// Upper bound on the close_notify exchange during `close()`.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Time bounds applied by an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Whole TLS handshake
    pub handshake: Duration,
    /// A single `receive`
    pub receive: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            handshake: Duration::from_secs(10),
            receive: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
enum Transport<IO> {
    Raw(IO),
    Tls(Box<TlsStream<IO>>),
    Released,
}

/// One side of a mutually authenticated connection.
#[derive(Debug)]
pub struct SecureEndpoint<IO = TcpStream> {
    transport: Transport<IO>,
    context: TrustContext,
    timeouts: Timeouts,
    state: ConnectionState,
    peer: Option<PeerIdentity>,
    peer_addr: Option<SocketAddr>,
}

impl SecureEndpoint<TcpStream> {
    /// Open a TCP connection to `config.host:config.port` for a client
    /// context.  The endpoint is returned `Unestablished`.
    ///
    /// # Errors
    ///
    /// - `Error::Config` if `context` is not a client context
    /// - `Error::Transport` if the TCP connection cannot be made
    pub async fn connect(config: &EndpointConfig, context: TrustContext) -> Result<Self> {
        if context.role() != Role::Client {
            return Err(Error::Config(
                "connect requires a client trust context".to_string(),
            ));
        }

        let stream = TcpStream::connect((config.host.as_str(), config.port))
            .await
            .map_err(|e| {
                Error::Transport(format!(
                    "Cannot connect to {}:{}: {e}",
                    config.host, config.port
                ))
            })?;
        let peer_addr = stream.peer_addr().ok();
        debug!(peer = ?peer_addr, "tcp connection established");

        let mut endpoint = Self::new(stream, context, config.timeouts());
        endpoint.peer_addr = peer_addr;
        Ok(endpoint)
    }
}

impl<IO> SecureEndpoint<IO>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap a raw byte stream.
    pub fn new(io: IO, context: TrustContext, timeouts: Timeouts) -> Self {
        Self {
            transport: Transport::Raw(io),
            context,
            timeouts,
            state: ConnectionState::Unestablished,
            peer: None,
            peer_addr: None,
        }
    }

    /// Record the remote address for logging.
    #[must_use]
    pub fn with_peer_addr(mut self, addr: SocketAddr) -> Self {
        self.peer_addr = Some(addr);
        self
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Remote address, when the transport has one.
    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Role of the underlying trust context.
    #[must_use]
    pub fn role(&self) -> Role {
        self.context.role()
    }

    /// Run the TLS handshake.
    ///
    /// # Errors
    ///
    /// - `Error::State` unless the endpoint is `Unestablished`
    /// - `Error::HandshakeFailed` if the peer was rejected, presented no
    ///   certificate, or the handshake timed out (state `HandshakeFailed`)
    /// - `Error::Transport` on socket failure (state `Error`)
    pub async fn handshake(&mut self) -> Result<()> {
        self.require("handshake", ConnectionState::Unestablished)?;
        let Transport::Raw(io) = mem::replace(&mut self.transport, Transport::Released) else {
            return Err(self.state_error("handshake"));
        };
        self.transition(ConnectionState::Handshaking);

        let outcome = timeout(self.timeouts.handshake, self.context.establish(io)).await;
        let stream = match outcome {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) if is_tls_error(&e) => {
                return Err(self.handshake_failed(format!("TLS handshake rejected: {e}")));
            }
            Ok(Err(e)) => {
                self.transition(ConnectionState::Error);
                warn!(peer = ?self.peer_addr, error = %e, "transport failed during handshake");
                return Err(Error::Transport(format!("Handshake I/O failed: {e}")));
            }
            Err(_) => {
                return Err(self.handshake_failed(format!(
                    "TLS handshake timed out after {:?}",
                    self.timeouts.handshake
                )));
            }
        };

        let leaf = stream
            .get_ref()
            .1
            .peer_certificates()
            .and_then(|certs| certs.first())
            .map(|cert| cert.clone().into_owned());
        let Some(leaf) = leaf else {
            return Err(self.handshake_failed("Peer presented no certificate".to_string()));
        };
        let identity = match PeerIdentity::from_der(leaf) {
            Ok(identity) => identity,
            Err(e) => return Err(self.handshake_failed(e.to_string())),
        };

        let (_, conn) = stream.get_ref();
        info!(
            peer = ?self.peer_addr,
            role = %self.context.role(),
            common_name = ?identity.common_name,
            protocol = ?conn.protocol_version(),
            cipher_suite = ?conn.negotiated_cipher_suite().map(|s| s.suite()),
            "peer authenticated"
        );

        self.peer = Some(identity);
        self.transport = Transport::Tls(Box::new(stream));
        self.transition(ConnectionState::Authenticated);
        Ok(())
    }

    /// Identity of the authenticated peer.
    ///
    /// # Errors
    ///
    /// `Error::State` unless the endpoint is `Authenticated`.
    pub fn peer_identity(&self) -> Result<&PeerIdentity> {
        self.require("read peer identity", ConnectionState::Authenticated)?;
        self.peer
            .as_ref()
            .ok_or_else(|| self.state_error("read peer identity"))
    }

    /// Write all of `data` and flush.
    ///
    /// # Errors
    ///
    /// `Error::State` unless `Authenticated`; `Error::HandshakeFailed` if
    /// the peer has rejected our certificate, `Error::Transport` on other
    /// I/O failure (state becomes `Error` in both cases).
    pub async fn send(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.tls_stream("send")?;
        let result = match stream.write_all(data).await {
            Ok(()) => stream.flush().await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {
                debug!(peer = ?self.peer_addr, bytes = data.len(), "sent");
                Ok(())
            }
            Err(e) => Err(self.io_failed("send", &e)),
        }
    }

    /// One read of at most `max` bytes.  Returns an empty buffer only when
    /// the peer closed the connection in an orderly way.
    ///
    /// Under TLS 1.3 a client finishes its handshake before the server has
    /// checked the client certificate, so a rejection by the server first
    /// shows up here as a certificate alert.
    ///
    /// # Errors
    ///
    /// - `Error::Config` if `max` is zero (state unchanged)
    /// - `Error::State` unless `Authenticated`
    /// - `Error::HandshakeFailed` on a certificate alert from the peer,
    ///   `Error::Transport` on other I/O failure and `Error::Timeout` when
    ///   nothing arrives within the receive timeout (state `Error`)
    pub async fn receive(&mut self, max: usize) -> Result<Vec<u8>> {
        if max == 0 {
            return Err(Error::Config(
                "receive needs room for at least one byte".to_string(),
            ));
        }
        let limit = self.timeouts.receive;
        let stream = self.tls_stream("receive")?;
        let mut buf = vec![0u8; max];

        let outcome = timeout(limit, stream.read(&mut buf)).await;
        match outcome {
            Ok(Ok(n)) => {
                buf.truncate(n);
                debug!(peer = ?self.peer_addr, bytes = n, "received");
                Ok(buf)
            }
            Ok(Err(e)) => Err(self.io_failed("receive", &e)),
            Err(_) => {
                self.release();
                self.transition(ConnectionState::Error);
                warn!(peer = ?self.peer_addr, timeout = ?limit, "receive timed out");
                Err(Error::Timeout(format!("No data received within {limit:?}")))
            }
        }
    }

    /// Send close_notify when possible, shut the transport down and move to
    /// `Closed`.  Valid in every state; closing twice is a no-op.
    pub async fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        if self.state.is_terminal() {
            debug!(peer = ?self.peer_addr, state = %self.state, "closing failed endpoint");
        }

        let shutdown = match mem::replace(&mut self.transport, Transport::Released) {
            Transport::Tls(mut stream) => timeout(CLOSE_GRACE, stream.shutdown()).await,
            Transport::Raw(mut io) => timeout(CLOSE_GRACE, io.shutdown()).await,
            Transport::Released => Ok(Ok(())),
        };
        match shutdown {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(peer = ?self.peer_addr, error = %e, "shutdown error ignored"),
            Err(_) => debug!(peer = ?self.peer_addr, "shutdown grace period elapsed"),
        }

        self.peer = None;
        self.transition(ConnectionState::Closed);
    }

    /// Negotiated TLS version, once authenticated.
    #[must_use]
    pub fn protocol_version(&self) -> Option<ProtocolVersion> {
        match &self.transport {
            Transport::Tls(stream) => stream.get_ref().1.protocol_version(),
            _ => None,
        }
    }

    /// Negotiated cipher suite, once authenticated.
    #[must_use]
    pub fn cipher_suite(&self) -> Option<CipherSuite> {
        match &self.transport {
            Transport::Tls(stream) => stream
                .get_ref()
                .1
                .negotiated_cipher_suite()
                .map(|s| s.suite()),
            _ => None,
        }
    }

    // ── internals ────────────────────────────────────────────────────────────

    fn transition(&mut self, next: ConnectionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {} -> {next}",
            self.state
        );
        debug!(
            peer = ?self.peer_addr,
            role = %self.context.role(),
            from = %self.state,
            to = %next,
            "connection state changed"
        );
        self.state = next;
    }

    fn require(&self, operation: &'static str, expected: ConnectionState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(self.state_error(operation))
        }
    }

    fn state_error(&self, operation: &'static str) -> Error {
        Error::State {
            operation,
            state: self.state,
        }
    }

    fn tls_stream(&mut self, operation: &'static str) -> Result<&mut TlsStream<IO>> {
        self.require(operation, ConnectionState::Authenticated)?;
        let state = self.state;
        match &mut self.transport {
            Transport::Tls(stream) => Ok(stream),
            _ => Err(Error::State { operation, state }),
        }
    }

    fn release(&mut self) {
        self.transport = Transport::Released;
        self.peer = None;
    }

    fn handshake_failed(&mut self, reason: String) -> Error {
        self.release();
        self.transition(ConnectionState::HandshakeFailed);
        warn!(peer = ?self.peer_addr, role = %self.context.role(), reason = %reason, "handshake failed");
        Error::HandshakeFailed(reason)
    }

    fn io_failed(&mut self, operation: &str, err: &io::Error) -> Error {
        self.release();
        self.transition(ConnectionState::Error);
        if let Some(alert) = certificate_alert(err) {
            warn!(peer = ?self.peer_addr, operation, ?alert, "peer rejected our certificate");
            return Error::HandshakeFailed(format!("Peer rejected our certificate: {alert:?}"));
        }
        warn!(peer = ?self.peer_addr, operation, error = %err, "transport failed");
        Error::Transport(format!("{operation} failed: {err}"))
    }
}

/// `rustls` reports protocol and verification failures as `InvalidData`
/// wrapping a `rustls::Error`.
fn is_tls_error(err: &io::Error) -> bool {
    err.get_ref()
        .is_some_and(|inner| inner.is::<rustls::Error>())
}

/// The alert a peer sends when it refuses the certificate we presented.
fn certificate_alert(err: &io::Error) -> Option<AlertDescription> {
    match err.get_ref()?.downcast_ref::<rustls::Error>()? {
        rustls::Error::AlertReceived(
            alert @ (AlertDescription::BadCertificate
            | AlertDescription::UnsupportedCertificate
            | AlertDescription::CertificateRevoked
            | AlertDescription::CertificateExpired
            | AlertDescription::CertificateUnknown
            | AlertDescription::CertificateRequired
            | AlertDescription::UnknownCA
            | AlertDescription::AccessDenied),
        ) => Some(*alert),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{DuplexStream, duplex};

    use super::*;
    use crate::mtls::{TrustContextBuilder, TrustModel};
    use crate::test_support::self_signed;

    struct Contexts {
        _dir: tempfile::TempDir,
        server: TrustContext,
        client: TrustContext,
    }

    fn pinned_contexts() -> Contexts {
        let dir = tempfile::tempdir().unwrap();
        let (server_cert, server_key) = self_signed("test").write(dir.path(), "server");
        let (client_cert, client_key) = self_signed("test").write(dir.path(), "client");

        let server = TrustContextBuilder::new(
            Role::Server,
            &server_cert,
            &server_key,
            TrustModel::PinnedPeer(client_cert.clone()),
        )
        .build()
        .unwrap();
        let client = TrustContextBuilder::new(
            Role::Client,
            &client_cert,
            &client_key,
            TrustModel::PinnedPeer(server_cert),
        )
        .build()
        .unwrap();

        Contexts {
            _dir: dir,
            server,
            client,
        }
    }

    fn endpoints(
        ctx: &Contexts,
        timeouts: Timeouts,
    ) -> (SecureEndpoint<DuplexStream>, SecureEndpoint<DuplexStream>) {
        let (a, b) = duplex(16 * 1024);
        (
            SecureEndpoint::new(a, ctx.server.clone(), timeouts),
            SecureEndpoint::new(b, ctx.client.clone(), timeouts),
        )
    }

    #[tokio::test]
    async fn handshake_authenticates_both_sides() {
        let ctx = pinned_contexts();
        let (mut server, mut client) = endpoints(&ctx, Timeouts::default());

        let (s, c) = tokio::join!(server.handshake(), client.handshake());
        s.unwrap();
        c.unwrap();

        assert_eq!(server.state(), ConnectionState::Authenticated);
        assert_eq!(client.state(), ConnectionState::Authenticated);
        assert_eq!(server.peer_identity().unwrap().common_name.as_deref(), Some("test"));
        assert_eq!(server.protocol_version(), Some(ProtocolVersion::TLSv1_3));
        assert!(client.cipher_suite().is_some());
    }

    #[tokio::test]
    async fn send_and_receive_after_handshake() {
        let ctx = pinned_contexts();
        let (mut server, mut client) = endpoints(&ctx, Timeouts::default());
        let (s, c) = tokio::join!(server.handshake(), client.handshake());
        s.unwrap();
        c.unwrap();

        client.send(b"hello").await.unwrap();
        assert_eq!(server.receive(1024).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn receive_returns_at_most_max_bytes() {
        let ctx = pinned_contexts();
        let (mut server, mut client) = endpoints(&ctx, Timeouts::default());
        let (s, c) = tokio::join!(server.handshake(), client.handshake());
        s.unwrap();
        c.unwrap();

        client.send(b"abcdef").await.unwrap();
        assert_eq!(server.receive(4).await.unwrap(), b"abcd");
        assert_eq!(server.receive(4).await.unwrap(), b"ef");
    }

    #[tokio::test]
    async fn receive_with_zero_capacity_is_rejected() {
        let ctx = pinned_contexts();
        let (mut server, mut client) = endpoints(&ctx, Timeouts::default());
        let (s, c) = tokio::join!(server.handshake(), client.handshake());
        s.unwrap();
        c.unwrap();

        assert!(matches!(server.receive(0).await, Err(Error::Config(_))));
        assert_eq!(server.state(), ConnectionState::Authenticated);
    }

    #[test]
    fn certificate_alerts_are_recognised() {
        let rejected = io::Error::new(
            io::ErrorKind::InvalidData,
            rustls::Error::AlertReceived(AlertDescription::UnknownCA),
        );
        assert_eq!(certificate_alert(&rejected), Some(AlertDescription::UnknownCA));

        let other = io::Error::new(
            io::ErrorKind::InvalidData,
            rustls::Error::AlertReceived(AlertDescription::DecodeError),
        );
        assert_eq!(certificate_alert(&other), None);
        assert_eq!(certificate_alert(&io::Error::from(io::ErrorKind::BrokenPipe)), None);
    }

    #[tokio::test]
    async fn io_before_handshake_is_state_error() {
        let ctx = pinned_contexts();
        let (mut server, _client) = endpoints(&ctx, Timeouts::default());

        assert!(matches!(server.send(b"x").await, Err(Error::State { .. })));
        assert!(matches!(server.receive(16).await, Err(Error::State { .. })));
        assert!(matches!(server.peer_identity(), Err(Error::State { .. })));
        assert_eq!(server.state(), ConnectionState::Unestablished);
    }

    #[tokio::test]
    async fn handshake_twice_is_state_error() {
        let ctx = pinned_contexts();
        let (mut server, mut client) = endpoints(&ctx, Timeouts::default());
        let (s, c) = tokio::join!(server.handshake(), client.handshake());
        s.unwrap();
        c.unwrap();

        let err = server.handshake().await.unwrap_err();
        assert!(matches!(
            err,
            Error::State {
                operation: "handshake",
                state: ConnectionState::Authenticated
            }
        ));
    }

    #[tokio::test]
    async fn silent_peer_times_out_handshake() {
        let ctx = pinned_contexts();
        let timeouts = Timeouts {
            handshake: Duration::from_millis(100),
            ..Timeouts::default()
        };
        let (mut server, _client) = endpoints(&ctx, timeouts);

        let err = server.handshake().await.unwrap_err();
        assert!(matches!(err, Error::HandshakeFailed(_)));
        assert_eq!(server.state(), ConnectionState::HandshakeFailed);
    }

    #[tokio::test]
    async fn silent_peer_times_out_receive() {
        let ctx = pinned_contexts();
        let timeouts = Timeouts {
            receive: Duration::from_millis(100),
            ..Timeouts::default()
        };
        let (mut server, mut client) = endpoints(&ctx, timeouts);
        let (s, c) = tokio::join!(server.handshake(), client.handshake());
        s.unwrap();
        c.unwrap();

        let err = server.receive(16).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert_eq!(server.state(), ConnectionState::Error);
    }

    #[tokio::test]
    async fn connect_rejects_server_context() {
        let ctx = pinned_contexts();
        let err = SecureEndpoint::connect(&EndpointConfig::default(), ctx.server.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
