//! Certificate trust decisions.
//!
//! Two trust models are supported:
//!
//! - **CA chain**: [`ChainVerifier`] asks the rustls WebPKI verifier whether
//!   a candidate chains to an anchor in a [`RootStore`].  The outcome is a
//!   plain `bool`: a certificate signed by the wrong root is an expected
//!   result, not a fault.  WebPKI refuses CA certificates as end entities,
//!   so a CA-flagged candidate is instead checked for a direct signature
//!   by one of the anchors.
//! - **Pinned peer**: [`PinnedCertVerifier`] accepts exactly one
//!   certificate, byte for byte, while it is inside its validity window.
//!   It plugs into rustls on both sides of the handshake.
//!
//! Handshake signature checks are delegated to the aws-lc-rs provider in
//! every case; only the certificate acceptance decision is ours.

use std::sync::Arc;

use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, WebPkiSupportedAlgorithms};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::server::WebPkiClientVerifier;
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::{CertificateError, DigitallySignedStruct, DistinguishedName, SignatureScheme};
use tracing::debug;
use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;
use x509_parser::time::ASN1Time;

use crate::mtls::store::{RootStore, load_certs};
use crate::Result;

/// Name presented to the server-auth verification path.  Chain checks do not
/// verify host names, so a mismatch on this name is ignored.
const CHAIN_CHECK_NAME: &str = "chain-check.invalid";

// ─────────────────────────────────────────────────────────────────────────────
// Chain verifier
// ─────────────────────────────────────────────────────────────────────────────

/// Verifies that a certificate chains to a trusted anchor.
pub struct ChainVerifier;

impl ChainVerifier {
    /// Returns `true` only if `candidate` validates against `roots` now.
    ///
    /// - empty store → `false`
    /// - `candidate` is itself an anchor → `true` while inside its validity window
    /// - `candidate` is a CA certificate → `true` if an anchor signed it directly
    /// - otherwise the signature chain and validity window are checked by WebPKI
    ///
    /// Every validation failure is logged at debug level and folded into
    /// `false`.
    #[must_use]
    pub fn verify(roots: &RootStore, candidate: &CertificateDer<'_>) -> bool {
        Self::verify_at(roots, candidate, UnixTime::now())
    }

    /// [`ChainVerifier::verify`] at an explicit point in time.
    #[must_use]
    pub fn verify_at(roots: &RootStore, candidate: &CertificateDer<'_>, now: UnixTime) -> bool {
        if roots.is_empty() {
            debug!("chain check against empty root store");
            return false;
        }

        if roots.contains(candidate) {
            return match check_validity_window(candidate, now) {
                Ok(()) => true,
                Err(e) => {
                    debug!(error = %e, "anchor certificate outside validity window");
                    false
                }
            };
        }

        let checked = if is_ca_certificate(candidate) {
            anchor_signature_check(roots, candidate, now)
        } else {
            webpki_chain_check(roots, candidate, now)
        };
        match checked {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "certificate did not chain to a trusted root");
                false
            }
        }
    }

    /// Load a root and a candidate from PEM files and verify the first
    /// certificate of `cert_path` against the root(s) of `root_path`.
    ///
    /// # Errors
    ///
    /// Returns `Error::CertLoad` if either file cannot be loaded.  The
    /// verification outcome itself is the `bool`.
    pub fn verify_files(
        root_path: &std::path::Path,
        cert_path: &std::path::Path,
    ) -> Result<bool> {
        let roots = RootStore::load(&[root_path])?;
        let candidates = load_certs(cert_path)?;
        Ok(candidates
            .first()
            .is_some_and(|leaf| Self::verify(&roots, leaf)))
    }
}

/// Client-auth path first; certificates restricted to server auth get a
/// second chance on the server-auth path.
fn webpki_chain_check(
    roots: &RootStore,
    candidate: &CertificateDer<'_>,
    now: UnixTime,
) -> std::result::Result<(), rustls::Error> {
    let provider = crypto_provider();
    let anchors = Arc::new(roots.root_cert_store());

    let client_path =
        WebPkiClientVerifier::builder_with_provider(Arc::clone(&anchors), Arc::clone(&provider))
            .build()
            .map_err(|e| rustls::Error::General(e.to_string()))?;

    match client_path.verify_client_cert(candidate, &[], now) {
        Ok(_) => Ok(()),
        Err(err) if is_purpose_error(&err) => server_path_check(anchors, provider, candidate, now),
        Err(err) => Err(err),
    }
}

fn server_path_check(
    anchors: Arc<rustls::RootCertStore>,
    provider: Arc<CryptoProvider>,
    candidate: &CertificateDer<'_>,
    now: UnixTime,
) -> std::result::Result<(), rustls::Error> {
    let server_path = WebPkiServerVerifier::builder_with_provider(anchors, provider)
        .build()
        .map_err(|e| rustls::Error::General(e.to_string()))?;
    let name = ServerName::try_from(CHAIN_CHECK_NAME)
        .map_err(|e| rustls::Error::General(e.to_string()))?;

    // WebPKI checks the name only after the chain has validated.
    match server_path.verify_server_cert(candidate, &[], &name, &[], now) {
        Ok(_) => Ok(()),
        Err(err) if is_name_error(&err) => Ok(()),
        Err(err) => Err(err),
    }
}

fn is_ca_certificate(cert: &CertificateDer<'_>) -> bool {
    X509Certificate::from_der(cert.as_ref())
        .ok()
        .is_some_and(|(_, parsed)| {
            parsed
                .basic_constraints()
                .ok()
                .flatten()
                .is_some_and(|ext| ext.value.ca)
        })
}

/// The candidate's issuer must name an anchor whose key verifies the
/// candidate's signature.
fn anchor_signature_check(
    roots: &RootStore,
    candidate: &CertificateDer<'_>,
    now: UnixTime,
) -> std::result::Result<(), rustls::Error> {
    let (_, parsed) = X509Certificate::from_der(candidate.as_ref())
        .map_err(|_| rustls::Error::InvalidCertificate(CertificateError::BadEncoding))?;

    let signed = roots.iter().any(|anchor| {
        X509Certificate::from_der(anchor.as_ref()).is_ok_and(|(_, root)| {
            root.subject().as_raw() == parsed.issuer().as_raw()
                && parsed.verify_signature(Some(root.public_key())).is_ok()
        })
    });
    if !signed {
        return Err(rustls::Error::InvalidCertificate(CertificateError::UnknownIssuer));
    }
    check_validity_window(candidate, now)
}

fn is_purpose_error(err: &rustls::Error) -> bool {
    matches!(
        err,
        rustls::Error::InvalidCertificate(
            CertificateError::InvalidPurpose | CertificateError::InvalidPurposeContext { .. }
        )
    )
}

fn is_name_error(err: &rustls::Error) -> bool {
    matches!(
        err,
        rustls::Error::InvalidCertificate(
            CertificateError::NotValidForName | CertificateError::NotValidForNameContext { .. }
        )
    )
}

/// The crypto provider shared by every verifier and config in this crate.
pub(crate) fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::aws_lc_rs::default_provider())
}

/// Check `not_before <= now <= not_after` for a DER certificate.
fn check_validity_window(
    cert: &CertificateDer<'_>,
    now: UnixTime,
) -> std::result::Result<(), rustls::Error> {
    let (_, parsed) = X509Certificate::from_der(cert.as_ref())
        .map_err(|_| rustls::Error::InvalidCertificate(CertificateError::BadEncoding))?;

    let secs = i64::try_from(now.as_secs()).unwrap_or(i64::MAX);
    let at = ASN1Time::from_timestamp(secs)
        .map_err(|e| rustls::Error::General(format!("time conversion: {e}")))?;

    let validity = parsed.validity();
    if at < validity.not_before {
        return Err(rustls::Error::InvalidCertificate(CertificateError::NotValidYet));
    }
    if at > validity.not_after {
        return Err(rustls::Error::InvalidCertificate(CertificateError::Expired));
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Pinned peer verifier
// ─────────────────────────────────────────────────────────────────────────────

/// Accepts exactly one peer certificate.
///
/// Suitable for self-signed development certificates exchanged out of band:
/// each side pins the other's certificate as its sole anchor.  Chain
/// building is bypassed entirely, so CA-flagged self-signed certificates
/// are accepted as end entities.
#[derive(Debug)]
pub struct PinnedCertVerifier {
    pinned: CertificateDer<'static>,
    algorithms: WebPkiSupportedAlgorithms,
    hints: Vec<DistinguishedName>,
}

impl PinnedCertVerifier {
    /// Pin `pinned` as the only acceptable peer certificate.
    #[must_use]
    pub fn new(pinned: CertificateDer<'static>) -> Self {
        let hints = X509Certificate::from_der(pinned.as_ref())
            .map(|(_, cert)| vec![DistinguishedName::from(cert.subject().as_raw().to_vec())])
            .unwrap_or_default();

        Self {
            pinned,
            algorithms: crypto_provider().signature_verification_algorithms,
            hints,
        }
    }

    /// Accept `end_entity` only if it is the pinned certificate and valid at `now`.
    ///
    /// # Errors
    ///
    /// `ApplicationVerificationFailure` for any other certificate,
    /// `Expired` / `NotValidYet` outside the validity window.
    pub fn verify_peer(
        &self,
        end_entity: &CertificateDer<'_>,
        now: UnixTime,
    ) -> std::result::Result<(), rustls::Error> {
        if end_entity.as_ref() != self.pinned.as_ref() {
            debug!("peer certificate does not match pinned certificate");
            return Err(rustls::Error::InvalidCertificate(
                CertificateError::ApplicationVerificationFailure,
            ));
        }
        check_validity_window(end_entity, now)
    }
}

impl ServerCertVerifier for PinnedCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        self.verify_peer(end_entity, now)?;
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

impl ClientCertVerifier for PinnedCertVerifier {
    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &self.hints
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> std::result::Result<ClientCertVerified, rustls::Error> {
        self.verify_peer(end_entity, now)?;
        Ok(ClientCertVerified::assertion())
    }

    fn client_auth_mandatory(&self) -> bool {
        true
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
