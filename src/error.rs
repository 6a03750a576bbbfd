//! Error types for mTLS trust

use std::io;

use thiserror::Error;

use crate::endpoint::ConnectionState;

/// Result type alias for mTLS trust
pub type Result<T> = std::result::Result<T, Error>;

/// mTLS trust errors
#[derive(Error, Debug)]
pub enum Error {
    /// Certificate file missing, unreadable or not a well-formed PEM certificate
    #[error("Certificate load error: {0}")]
    CertLoad(String),

    /// Invalid identity cert/key pairing or invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Peer certificate missing or rejected during the TLS handshake
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// Explicit post-handshake chain check did not validate
    #[error("Chain verification failed: {0}")]
    ChainVerificationFailed(String),

    /// Peer identity did not satisfy the application policy
    #[error("Identity mismatch: expected commonName {expected:?}, peer presented {presented:?}")]
    IdentityMismatch {
        /// Expected commonName
        expected: String,
        /// commonName found in the peer certificate, if any
        presented: Option<String>,
    },

    /// Operation not valid in the current connection state
    #[error("Invalid state: cannot {operation} while {state}")]
    State {
        /// Attempted operation
        operation: &'static str,
        /// State the connection was in
        state: ConnectionState,
    },

    /// Socket I/O failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Operation timed out
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Session protocol violation
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Whether the peer was rejected by trust policy (handshake or application level)
    /// rather than by a transport or local configuration problem.
    #[must_use]
    pub fn is_trust_failure(&self) -> bool {
        matches!(
            self,
            Self::HandshakeFailed(_) | Self::ChainVerificationFailed(_) | Self::IdentityMismatch { .. }
        )
    }
}
