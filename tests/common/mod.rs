//! Shared fixtures for integration tests.
//!
//! Certificates come from the same `rcgen` fixtures the unit tests use and
//! are written into a temporary directory, mirroring the PEM files an
//! operator would produce with openssl.

#![allow(dead_code, unused_imports)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use mtls_trust::config::{
    Config, EndpointConfig, IdentityConfig, PolicyConfig, TrustConfig, TrustModelKind,
};

// ── certificates ──────────────────────────────────────────────────────────────

#[path = "../../src/test_support.rs"]
mod fixtures;

pub use fixtures::{Authority, Identity, self_signed};

// ── configuration ─────────────────────────────────────────────────────────────

/// Endpoint on an ephemeral loopback port with short timeouts.
pub fn loopback_endpoint() -> EndpointConfig {
    EndpointConfig {
        port: 0,
        handshake_timeout: Duration::from_secs(5),
        receive_timeout: Duration::from_secs(5),
        ..EndpointConfig::default()
    }
}

/// Config presenting `own` and pinning `peer_cert`.
pub fn pinned_config(own: &(PathBuf, PathBuf), peer_cert: &Path) -> Config {
    Config {
        endpoint: loopback_endpoint(),
        identity: IdentityConfig {
            cert: own.0.clone(),
            key: own.1.clone(),
        },
        trust: TrustConfig {
            model: TrustModelKind::Pinned,
            peer_cert: Some(peer_cert.to_path_buf()),
            root_certs: Vec::new(),
        },
        policy: PolicyConfig::default(),
    }
}

/// Config presenting `own` and trusting peers that chain to `root`.
pub fn root_ca_config(own: &(PathBuf, PathBuf), root: &Path) -> Config {
    Config {
        endpoint: loopback_endpoint(),
        identity: IdentityConfig {
            cert: own.0.clone(),
            key: own.1.clone(),
        },
        trust: TrustConfig {
            model: TrustModelKind::RootCa,
            peer_cert: None,
            root_certs: vec![root.to_path_buf()],
        },
        policy: PolicyConfig::default(),
    }
}
