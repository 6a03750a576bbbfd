//! Mutual TLS trust.
//!
//! Both sides of a connection present an X.509 certificate and each verifies
//! the other's before any application byte is exchanged.
//!
//! # Architecture
//!
//! ```text
//! PEM files
//!   → RootStore          (anchors)          [store]
//!   → TrustContext       (rustls config)    [context]
//!   → TLS handshake      (peer verified by WebPKI or the pinned verifier)
//!   → PeerIdentity       (subject, issuer, SAN, validity)   [identity]
//!   → PeerPolicy         (expected commonName, explicit chain check) [policy]
//! ```
//!
//! # Modules
//!
//! - [`store`]: trust anchors and PEM loading (`RootStore`)
//! - [`verifier`]: chain verification (`ChainVerifier`) and pinning (`PinnedCertVerifier`)
//! - [`context`]: per-role `rustls` configuration (`TrustContextBuilder`, `TrustContext`)
//! - [`identity`]: X.509 field extraction (`PeerIdentity`)
//! - [`policy`]: post-handshake decision (`PeerPolicy`, `PolicyDecision`)
//!
//! # Trust models
//!
//! ```yaml
//! trust:
//!   model: pinned            # each side pins the other's self-signed cert
//!   peer_cert: client.pem
//! ---
//! trust:
//!   model: root_ca           # peer must chain to one of these roots
//!   root_certs: [rootCA.cert]
//! ```

pub mod context;
pub mod identity;
pub mod policy;
pub mod store;
pub mod verifier;

pub use context::{DEFAULT_SERVER_NAME, Role, TrustContext, TrustContextBuilder, TrustModel};
pub use identity::{PeerIdentity, SubjectAttribute};
pub use policy::{PeerPolicy, PolicyDecision};
pub use store::{RootStore, load_certs, load_private_key};
pub use verifier::{ChainVerifier, PinnedCertVerifier};
