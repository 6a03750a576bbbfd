//! TLS context construction for one role under one trust model.
//!
//! A [`TrustContext`] is built once, before any network activity, and then
//! shared by every connection of that role.  It owns:
//!
//! - the local identity (certificate chain + private key)
//! - the trust anchors the peer is verified against
//! - a `rustls` server or client config with peer verification mandatory
//!
//! Only TLS 1.3 is offered.  ALPN is not negotiated.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use rustls::pki_types::ServerName;
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, ServerConfig};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::{TlsAcceptor, TlsConnector, TlsStream};
use tracing::debug;

use crate::mtls::store::{RootStore, load_certs, load_private_key};
use crate::mtls::verifier::{PinnedCertVerifier, crypto_provider};
use crate::{Error, Result};

/// Verification name used by clients unless overridden.
pub const DEFAULT_SERVER_NAME: &str = "127.0.0.1";

// ─────────────────────────────────────────────────────────────────────────────
// Role and trust model
// ─────────────────────────────────────────────────────────────────────────────

/// Side of the handshake a context is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Accepts connections; requires a client certificate.
    Server,
    /// Initiates connections; always verifies the server certificate.
    Client,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server => f.write_str("server"),
            Self::Client => f.write_str("client"),
        }
    }
}

/// How the peer certificate is trusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustModel {
    /// The counterpart's own certificate is the sole anchor; only that exact
    /// certificate is accepted.
    PinnedPeer(PathBuf),
    /// The peer must chain to one of these CA certificates.
    RootCa(Vec<PathBuf>),
}

// ─────────────────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────────────────

/// Assembles a [`TrustContext`].
#[derive(Debug, Clone)]
pub struct TrustContextBuilder {
    role: Role,
    cert_path: PathBuf,
    key_path: PathBuf,
    model: TrustModel,
    server_name: String,
}

impl TrustContextBuilder {
    /// Start a context for `role` presenting the identity at
    /// `cert_path`/`key_path` and trusting peers per `model`.
    pub fn new(
        role: Role,
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
        model: TrustModel,
    ) -> Self {
        Self {
            role,
            cert_path: cert_path.into(),
            key_path: key_path.into(),
            model,
            server_name: DEFAULT_SERVER_NAME.to_owned(),
        }
    }

    /// Name the client expects the server certificate to be valid for
    /// (root-CA model) and sends as SNI.  Ignored for the server role.
    #[must_use]
    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }

    /// Load every file and build the `rustls` config.
    ///
    /// # Errors
    ///
    /// - `Error::CertLoad` if an anchor file cannot be loaded
    /// - `Error::Config` if the own certificate or key cannot be loaded, the
    ///   pair does not match, or the server name is invalid
    pub fn build(self) -> Result<TrustContext> {
        let anchors = match &self.model {
            TrustModel::PinnedPeer(path) => RootStore::load(&[path])?,
            TrustModel::RootCa(paths) => {
                if paths.is_empty() {
                    return Err(Error::Config(
                        "Root CA trust model needs at least one root certificate".to_string(),
                    ));
                }
                RootStore::load(paths)?
            }
        };

        let chain = load_certs(&self.cert_path).map_err(|e| {
            Error::Config(format!(
                "Cannot load own certificate '{}': {e}",
                self.cert_path.display()
            ))
        })?;
        let key = load_private_key(&self.key_path)?;
        let pinned = matches!(self.model, TrustModel::PinnedPeer(_));

        let role_config = match self.role {
            Role::Server => {
                RoleConfig::Server(Arc::new(server_config(&anchors, pinned, chain, key)?))
            }
            Role::Client => {
                let server_name = ServerName::try_from(self.server_name.clone()).map_err(|e| {
                    Error::Config(format!("Invalid server name '{}': {e}", self.server_name))
                })?;
                RoleConfig::Client {
                    config: Arc::new(client_config(&anchors, pinned, chain, key)?),
                    server_name,
                }
            }
        };

        debug!(
            role = %self.role,
            cert = %self.cert_path.display(),
            anchors = anchors.len(),
            pinned,
            "trust context built"
        );

        Ok(TrustContext {
            role_config,
            anchors,
            pinned,
        })
    }
}

fn server_config(
    anchors: &RootStore,
    pinned: bool,
    chain: Vec<rustls::pki_types::CertificateDer<'static>>,
    key: rustls::pki_types::PrivateKeyDer<'static>,
) -> Result<ServerConfig> {
    let provider = crypto_provider();

    let verifier: Arc<dyn rustls::server::danger::ClientCertVerifier> = if pinned {
        Arc::new(pinned_verifier(anchors)?)
    } else {
        WebPkiClientVerifier::builder_with_provider(
            Arc::new(anchors.root_cert_store()),
            Arc::clone(&provider),
        )
        .build()
        .map_err(|e| Error::Config(format!("Failed to build client verifier: {e}")))?
    };

    ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|e| Error::Config(format!("Unsupported protocol versions: {e}")))?
        .with_client_cert_verifier(verifier)
        .with_single_cert(chain, key)
        .map_err(|e| Error::Config(format!("TLS config error (cert/key mismatch?): {e}")))
}

fn client_config(
    anchors: &RootStore,
    pinned: bool,
    chain: Vec<rustls::pki_types::CertificateDer<'static>>,
    key: rustls::pki_types::PrivateKeyDer<'static>,
) -> Result<ClientConfig> {
    let builder = ClientConfig::builder_with_provider(crypto_provider())
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|e| Error::Config(format!("Unsupported protocol versions: {e}")))?;

    let builder = if pinned {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(pinned_verifier(anchors)?))
    } else {
        builder.with_root_certificates(anchors.root_cert_store())
    };

    builder
        .with_client_auth_cert(chain, key)
        .map_err(|e| Error::Config(format!("TLS config error (cert/key mismatch?): {e}")))
}

/// The pinned model trusts the first certificate of the peer file.
fn pinned_verifier(anchors: &RootStore) -> Result<PinnedCertVerifier> {
    anchors
        .iter()
        .next()
        .cloned()
        .map(PinnedCertVerifier::new)
        .ok_or_else(|| Error::CertLoad("Pinned peer file holds no certificate".to_string()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Context
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum RoleConfig {
    Server(Arc<ServerConfig>),
    Client {
        config: Arc<ClientConfig>,
        server_name: ServerName<'static>,
    },
}

/// Immutable TLS configuration for one role.  Cheap to clone.
#[derive(Debug, Clone)]
pub struct TrustContext {
    role_config: RoleConfig,
    anchors: RootStore,
    pinned: bool,
}

impl TrustContext {
    /// Role this context was built for.
    #[must_use]
    pub fn role(&self) -> Role {
        match self.role_config {
            RoleConfig::Server(_) => Role::Server,
            RoleConfig::Client { .. } => Role::Client,
        }
    }

    /// Anchors the peer is verified against.
    #[must_use]
    pub fn anchors(&self) -> &RootStore {
        &self.anchors
    }

    /// Pinned-peer rather than root-CA trust.
    #[must_use]
    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    /// Run the TLS handshake for this role over `io`.
    ///
    /// Errors raised by `rustls` arrive as `io::ErrorKind::InvalidData`
    /// wrapping a `rustls::Error`; anything else is a transport failure.
    pub async fn establish<IO>(&self, io: IO) -> io::Result<TlsStream<IO>>
    where
        IO: AsyncRead + AsyncWrite + Unpin,
    {
        match &self.role_config {
            RoleConfig::Server(config) => TlsAcceptor::from(Arc::clone(config))
                .accept(io)
                .await
                .map(TlsStream::Server),
            RoleConfig::Client {
                config,
                server_name,
            } => TlsConnector::from(Arc::clone(config))
                .connect(server_name.clone(), io)
                .await
                .map(TlsStream::Client),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::test_support::{Authority, self_signed};

    struct Pair {
        _dir: tempfile::TempDir,
        server: (PathBuf, PathBuf),
        client: (PathBuf, PathBuf),
    }

    fn pinned_pair() -> Pair {
        let dir = tempfile::tempdir().unwrap();
        let server = self_signed("test").write(dir.path(), "server");
        let client = self_signed("test").write(dir.path(), "client");
        Pair {
            _dir: dir,
            server,
            client,
        }
    }

    fn pinned(role: Role, own: &(PathBuf, PathBuf), peer: &Path) -> Result<TrustContext> {
        TrustContextBuilder::new(
            role,
            &own.0,
            &own.1,
            TrustModel::PinnedPeer(peer.to_path_buf()),
        )
        .build()
    }

    #[test]
    fn builds_pinned_contexts_for_both_roles() {
        let p = pinned_pair();
        let server = pinned(Role::Server, &p.server, &p.client.0).unwrap();
        let client = pinned(Role::Client, &p.client, &p.server.0).unwrap();

        assert_eq!(server.role(), Role::Server);
        assert_eq!(client.role(), Role::Client);
        assert!(server.is_pinned());
        assert_eq!(server.anchors().len(), 1);
    }

    #[test]
    fn builds_root_ca_context() {
        let dir = tempfile::tempdir().unwrap();
        let root = Authority::new("Root CA");
        let root_path = root.write_cert(dir.path(), "rootCA.cert");
        let (cert, key) = root.issue("server").write(dir.path(), "server");

        let ctx = TrustContextBuilder::new(Role::Server, cert, key, TrustModel::RootCa(vec![root_path]))
            .build()
            .unwrap();
        assert!(!ctx.is_pinned());
        assert!(ctx.anchors().contains(&root.der));
    }

    #[test]
    fn root_ca_without_roots_is_config_error() {
        let p = pinned_pair();
        let err = TrustContextBuilder::new(Role::Client, &p.client.0, &p.client.1, TrustModel::RootCa(vec![]))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn missing_peer_cert_is_cert_load_error() {
        let p = pinned_pair();
        let err = pinned(Role::Server, &p.server, Path::new("/nonexistent/peer.pem")).unwrap_err();
        assert!(matches!(err, Error::CertLoad(_)));
    }

    #[test]
    fn missing_own_key_is_config_error() {
        let p = pinned_pair();
        let own = (p.server.0.clone(), PathBuf::from("/nonexistent/server.key"));
        let err = pinned(Role::Server, &own, &p.client.0).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn mismatched_cert_and_key_is_config_error() {
        let p = pinned_pair();
        // server certificate with the client's key
        let own = (p.server.0.clone(), p.client.1.clone());
        let err = pinned(Role::Server, &own, &p.client.0).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn invalid_server_name_is_config_error() {
        let p = pinned_pair();
        let err = TrustContextBuilder::new(
            Role::Client,
            &p.client.0,
            &p.client.1,
            TrustModel::PinnedPeer(p.server.0.clone()),
        )
        .server_name("not a valid name!")
        .build()
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn establish_completes_pinned_handshake_over_duplex() {
        let p = pinned_pair();
        let server = pinned(Role::Server, &p.server, &p.client.0).unwrap();
        let client = pinned(Role::Client, &p.client, &p.server.0).unwrap();
        let (a, b) = tokio::io::duplex(16 * 1024);

        let (s, c) = tokio::join!(server.establish(a), client.establish(b));
        let s = s.unwrap();
        assert!(c.is_ok());

        let (_, conn) = s.get_ref();
        assert_eq!(conn.peer_certificates().map(<[_]>::len), Some(1));
        assert_eq!(conn.protocol_version(), Some(rustls::ProtocolVersion::TLSv1_3));
    }
}
