//! Server role: accept loop with one task per connection.
//!
//! Each connection runs handshake → policy → echo → close.  The endpoint is
//! closed on every path, including failures.  Connections share nothing but
//! the immutable trust context and policy.

use std::future::Future;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::signal;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, warn};

use crate::config::{Config, EndpointConfig};
use crate::endpoint::{SecureEndpoint, SecureListener};
use crate::mtls::{PeerPolicy, Role, TrustContext};
use crate::{Result, session};

/// mTLS echo server
pub struct Server {
    endpoint: EndpointConfig,
    context: TrustContext,
    policy: Arc<PeerPolicy>,
}

impl Server {
    /// Build the trust context and policy.  Fails before any socket is
    /// opened if certificates or keys are unusable.
    ///
    /// # Errors
    ///
    /// `Error::Config` or `Error::CertLoad` from context construction.
    pub fn new(config: Config) -> Result<Self> {
        let context = config.context_builder(Role::Server)?.build()?;
        let policy = config.peer_policy(&context);
        Ok(Self {
            endpoint: config.endpoint,
            context,
            policy: Arc::new(policy),
        })
    }

    /// Bind the configured address.
    ///
    /// # Errors
    ///
    /// See [`SecureListener::bind`].
    pub async fn bind(&self) -> Result<SecureListener> {
        SecureListener::bind(&self.endpoint, self.context.clone()).await
    }

    /// Serve until Ctrl-C or SIGTERM.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound.
    pub async fn run(&self) -> Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Bind and serve until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let listener = self.bind().await?;
        self.serve(listener, shutdown).await;
        Ok(())
    }

    /// Accept connections on `listener` until `shutdown` resolves, then wait
    /// for in-flight connections to finish.
    pub async fn serve<F>(&self, listener: SecureListener, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut tasks: JoinSet<Result<Vec<u8>>> = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!(in_flight = tasks.len(), "shutdown requested, no longer accepting");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok(endpoint) => {
                        let policy = Arc::clone(&self.policy);
                        tasks.spawn(async move { handle_connection(endpoint, &policy).await });
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => log_outcome(joined),
            }
        }

        while let Some(joined) = tasks.join_next().await {
            log_outcome(joined);
        }
        info!("server stopped");
    }

    /// Handle exactly one connection and return the message it carried.
    ///
    /// # Errors
    ///
    /// Any error of the connection; the endpoint is closed regardless.
    pub async fn serve_one(&self, listener: &SecureListener) -> Result<Vec<u8>> {
        let endpoint = listener.accept().await?;
        handle_connection(endpoint, &self.policy).await
    }
}

/// Handshake, check `policy`, echo one message, close.
///
/// # Errors
///
/// `HandshakeFailed`, `ChainVerificationFailed`, `IdentityMismatch` or any
/// session error.  The endpoint is closed before returning.
pub async fn handle_connection<IO>(
    mut endpoint: SecureEndpoint<IO>,
    policy: &PeerPolicy,
) -> Result<Vec<u8>>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    let result = exchange(&mut endpoint, policy).await;
    endpoint.close().await;
    result
}

async fn exchange<IO>(endpoint: &mut SecureEndpoint<IO>, policy: &PeerPolicy) -> Result<Vec<u8>>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    endpoint.handshake().await?;
    policy.enforce(endpoint.peer_identity()?)?;
    session::respond(endpoint).await
}

fn log_outcome(joined: std::result::Result<Result<Vec<u8>>, JoinError>) {
    match joined {
        Ok(Ok(message)) => debug!(bytes = message.len(), "connection completed"),
        Ok(Err(e)) if e.is_trust_failure() => warn!(error = %e, "peer rejected"),
        Ok(Err(e)) => warn!(error = %e, "connection failed"),
        Err(e) => warn!(error = %e, "connection task panicked or was cancelled"),
    }
}

/// Resolves on Ctrl-C or SIGTERM.  If a handler cannot be installed that
/// signal is simply never observed.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "cannot install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
