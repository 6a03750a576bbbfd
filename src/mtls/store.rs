//! Trust anchors and PEM loading.
//!
//! Provides:
//! - [`RootStore`]: the set of certificates trusted as verification anchors
//! - [`load_certs`] / [`load_private_key`]: PEM file loading for identities
//!
//! # File format
//!
//! All certificate and key files are expected in **PEM format**, as written
//! by `openssl req -x509` and friends.  DER is not supported.
//!
//! # Anchors
//!
//! The store makes no distinction between root and intermediate
//! certificates: every certificate added becomes a direct trust anchor.
//! Callers supply the anchor directly relevant to the leaf being checked;
//! no chain is built through intermediates.

use std::fs;
use std::path::Path;

use rustls::RootCertStore;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tracing::debug;
use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;

use crate::{Error, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Root store
// ─────────────────────────────────────────────────────────────────────────────

/// A set of trusted anchor certificates.
///
/// Anchors are never presented as an identity; they only terminate
/// verification.  Adding the same certificate twice is a no-op.
#[derive(Debug, Clone)]
pub struct RootStore {
    certs: Vec<CertificateDer<'static>>,
    anchors: RootCertStore,
}

impl Default for RootStore {
    fn default() -> Self {
        Self::empty()
    }
}

impl RootStore {
    /// An empty store.  Verifies nothing.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            certs: Vec::new(),
            anchors: RootCertStore::empty(),
        }
    }

    /// Load every certificate found in the given PEM files.
    ///
    /// # Errors
    ///
    /// Returns `Error::CertLoad` if a file is missing, unreadable, holds no
    /// certificate, or holds a block that is not a well-formed X.509
    /// certificate.
    pub fn load<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut store = Self::empty();
        for path in paths {
            for cert in load_certs(path.as_ref())? {
                store.add(cert)?;
            }
        }
        debug!(anchors = store.len(), "root store loaded");
        Ok(store)
    }

    /// Build a store from in-memory PEM data.
    ///
    /// `origin` only labels error messages.
    ///
    /// # Errors
    ///
    /// Same conditions as [`RootStore::load`].
    pub fn from_pem(pem: &[u8], origin: &str) -> Result<Self> {
        let mut store = Self::empty();
        for cert in parse_certs(pem, origin)? {
            store.add(cert)?;
        }
        Ok(store)
    }

    /// Add a trust anchor.
    ///
    /// # Errors
    ///
    /// Returns `Error::CertLoad` if the certificate cannot be used as an
    /// anchor (unparseable subject or public key).
    pub fn add(&mut self, cert: CertificateDer<'static>) -> Result<()> {
        if self.contains(&cert) {
            return Ok(());
        }
        self.anchors
            .add(cert.clone())
            .map_err(|e| Error::CertLoad(format!("Certificate cannot serve as trust anchor: {e}")))?;
        self.certs.push(cert);
        Ok(())
    }

    /// Whether `cert` is byte-for-byte one of the anchors.
    #[must_use]
    pub fn contains(&self, cert: &CertificateDer<'_>) -> bool {
        self.certs.iter().any(|c| c.as_ref() == cert.as_ref())
    }

    /// Number of anchors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.certs.len()
    }

    /// Returns `true` when the store holds no anchors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }

    /// Iterate the anchor certificates in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &CertificateDer<'static>> {
        self.certs.iter()
    }

    /// The anchors in the form the rustls verifiers consume.
    #[must_use]
    pub fn root_cert_store(&self) -> RootCertStore {
        self.anchors.clone()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Public: PEM loading
// ─────────────────────────────────────────────────────────────────────────────

/// Load all certificates from a PEM file.
///
/// Every block is checked to parse as X.509, so a truncated or corrupted
/// file fails here rather than during a handshake.
///
/// # Errors
///
/// Returns `Error::CertLoad` if the file cannot be read, contains no
/// certificate block, or contains a malformed certificate.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let pem_data = read_file(path)?;
    parse_certs(&pem_data, &path.display().to_string())
}

/// Load the first private key from a PEM file.
///
/// Supports PKCS#8 (`PRIVATE KEY`), PKCS#1 (`RSA PRIVATE KEY`) and SEC1
/// (`EC PRIVATE KEY`).
///
/// # Errors
///
/// Returns `Error::Config` if the file cannot be read or contains no
/// supported private key.  A key problem is an identity problem, not a
/// trust-anchor problem.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let pem_data = fs::read(path)
        .map_err(|e| Error::Config(format!("Cannot read key '{}': {e}", path.display())))?;
    PrivateKeyDer::from_pem_slice(&pem_data).map_err(|e| {
        Error::Config(format!(
            "No usable private key in '{}': {e}",
            path.display()
        ))
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Private helpers
// ─────────────────────────────────────────────────────────────────────────────

fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| Error::CertLoad(format!("Cannot read '{}': {e}", path.display())))
}

fn parse_certs(pem_data: &[u8], origin: &str) -> Result<Vec<CertificateDer<'static>>> {
    let certs: Vec<CertificateDer<'static>> = CertificateDer::pem_slice_iter(pem_data)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::CertLoad(format!("Failed to parse certs from '{origin}': {e}")))?;

    if certs.is_empty() {
        return Err(Error::CertLoad(format!(
            "No certificates found in '{origin}'"
        )));
    }

    for cert in &certs {
        X509Certificate::from_der(cert.as_ref()).map_err(|e| {
            Error::CertLoad(format!("Malformed certificate in '{origin}': {e}"))
        })?;
    }

    Ok(certs)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
