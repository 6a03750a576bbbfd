//! Application-level peer trust policy.
//!
//! Runs after the TLS handshake has succeeded.  The handshake proves the
//! peer holds a key for a certificate the TLS layer accepted; the policy
//! decides whether that certificate is the peer the application expects.
//!
//! # Evaluation order
//!
//! 1. If a chain check is configured and [`ChainVerifier::verify`] returns
//!    `false` → [`PolicyDecision::UntrustedChain`].
//! 2. If an expected commonName is configured and the peer's subject
//!    `commonName` differs or is absent → [`PolicyDecision::IdentityMismatch`].
//! 3. Otherwise → [`PolicyDecision::Trusted`].
//!
//! An empty policy trusts every authenticated peer.

use tracing::{debug, warn};

use crate::mtls::identity::PeerIdentity;
use crate::mtls::store::RootStore;
use crate::mtls::verifier::ChainVerifier;
use crate::{Error, Result};

/// Outcome of evaluating a peer against the policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    /// The peer meets every configured requirement.
    Trusted,
    /// The peer certificate does not chain to the policy's roots.
    UntrustedChain,
    /// The peer's commonName is not the expected one.
    IdentityMismatch {
        /// Expected commonName.
        expected: String,
        /// commonName the peer presented, if any.
        presented: Option<String>,
    },
}

/// Post-handshake requirements on the peer identity.
#[derive(Debug, Clone, Default)]
pub struct PeerPolicy {
    expected_common_name: Option<String>,
    chain_roots: Option<RootStore>,
}

impl PeerPolicy {
    /// A policy that trusts every authenticated peer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Require the peer subject's commonName to equal `cn`.
    #[must_use]
    pub fn with_expected_common_name(mut self, cn: impl Into<String>) -> Self {
        self.expected_common_name = Some(cn.into());
        self
    }

    /// Re-verify the peer certificate against `roots` after the handshake.
    #[must_use]
    pub fn with_chain_check(mut self, roots: RootStore) -> Self {
        self.chain_roots = Some(roots);
        self
    }

    /// Evaluate `identity`.  Never fails; a rejection is a decision.
    #[must_use]
    pub fn evaluate(&self, identity: &PeerIdentity) -> PolicyDecision {
        if let Some(ref roots) = self.chain_roots {
            if !ChainVerifier::verify(roots, identity.der()) {
                return PolicyDecision::UntrustedChain;
            }
        }

        if let Some(ref expected) = self.expected_common_name {
            let presented = identity.subject_attribute("commonName");
            if presented != Some(expected.as_str()) {
                return PolicyDecision::IdentityMismatch {
                    expected: expected.clone(),
                    presented: presented.map(str::to_owned),
                };
            }
        }

        PolicyDecision::Trusted
    }

    /// Evaluate `identity` and turn a rejection into an error.
    ///
    /// # Errors
    ///
    /// `Error::ChainVerificationFailed` or `Error::IdentityMismatch`.
    pub fn enforce(&self, identity: &PeerIdentity) -> Result<()> {
        match self.evaluate(identity) {
            PolicyDecision::Trusted => {
                debug!(peer = %identity.display_name, "peer trusted by policy");
                Ok(())
            }
            PolicyDecision::UntrustedChain => {
                warn!(peer = %identity.display_name, issuer = %identity.issuer, "peer certificate failed root chain check");
                Err(Error::ChainVerificationFailed(format!(
                    "certificate of '{}' (issuer '{}') does not chain to a trusted root",
                    identity.display_name, identity.issuer
                )))
            }
            PolicyDecision::IdentityMismatch { expected, presented } => {
                warn!(expected = %expected, presented = ?presented, "peer identity mismatch");
                Err(Error::IdentityMismatch { expected, presented })
            }
        }
    }
}
