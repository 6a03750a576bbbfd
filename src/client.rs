//! Client role: one connection, one echo exchange.

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::info;

use crate::config::{Config, EndpointConfig};
use crate::endpoint::SecureEndpoint;
use crate::mtls::{PeerPolicy, Role, TrustContext};
use crate::{Result, session};

/// mTLS echo client
pub struct Client {
    endpoint: EndpointConfig,
    context: TrustContext,
    policy: PeerPolicy,
}

impl Client {
    /// Build the trust context and policy.  No connection is made yet.
    ///
    /// # Errors
    ///
    /// `Error::Config` or `Error::CertLoad` from context construction.
    pub fn new(config: Config) -> Result<Self> {
        let context = config.context_builder(Role::Client)?.build()?;
        let policy = config.peer_policy(&context);
        Ok(Self {
            endpoint: config.endpoint,
            context,
            policy,
        })
    }

    /// Connect, authenticate the server, send `message` and return the
    /// verified echo.  The connection is closed before returning.
    ///
    /// # Errors
    ///
    /// `Transport` if the server is unreachable, `HandshakeFailed`,
    /// `ChainVerificationFailed` or `IdentityMismatch` if the server is not
    /// trusted, `Protocol` if the echo is wrong.
    pub async fn send(&self, message: &[u8]) -> Result<Vec<u8>> {
        let mut endpoint = SecureEndpoint::connect(&self.endpoint, self.context.clone()).await?;
        let result = exchange(&mut endpoint, &self.policy, message).await;
        endpoint.close().await;
        result
    }
}

/// Handshake, check `policy`, run one echo exchange.  Does not close.
///
/// # Errors
///
/// Same as [`Client::send`].
pub async fn exchange<IO>(
    endpoint: &mut SecureEndpoint<IO>,
    policy: &PeerPolicy,
    message: &[u8],
) -> Result<Vec<u8>>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    endpoint.handshake().await?;
    let identity = endpoint.peer_identity()?;
    policy.enforce(identity)?;
    info!(server = %identity.display_name, "server trusted");

    session::initiate(endpoint, message).await
}
