//! Peer identity extraction.
//!
//! Parses the X.509 DER certificate a peer presented during the handshake
//! and extracts the fields the application layer inspects: the ordered
//! subject attributes, commonName, issuer, SAN entries and validity window.
//!
//! Attributes are looked up **by name**.  Tools differ in the order they
//! write subject attributes, so positional access is never offered.

use std::net::IpAddr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rustls::pki_types::CertificateDer;
use time::OffsetDateTime;
use x509_parser::certificate::X509Certificate;
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::FromDer;
use x509_parser::x509::X509Name;

use crate::{Error, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Peer identity
// ─────────────────────────────────────────────────────────────────────────────

/// One `(name, value)` pair of a distinguished name.
///
/// Well-known attributes use their long names (`commonName`,
/// `organizationName`, …); anything else keeps its dotted OID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectAttribute {
    /// Attribute long name or dotted OID.
    pub name: String,
    /// Attribute value as text.
    pub value: String,
}

/// Identity of an authenticated peer.
///
/// Read-only; produced by the endpoint after a successful handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerIdentity {
    /// Subject attributes in certificate order.
    pub subject: Vec<SubjectAttribute>,

    /// Certificate Common Name (CN).
    pub common_name: Option<String>,

    /// Issuer distinguished name, RFC 4514 style.
    pub issuer: String,

    /// Subject Alternative Name: DNS entries.
    pub san_dns_names: Vec<String>,

    /// Subject Alternative Name: IP address entries.
    pub san_ip_addresses: Vec<IpAddr>,

    /// Start of the validity window.
    pub not_before: OffsetDateTime,

    /// End of the validity window.
    pub not_after: OffsetDateTime,

    /// Pre-computed human-readable label for logs.
    pub display_name: String,

    der: CertificateDer<'static>,
}

impl PeerIdentity {
    /// Parse a DER-encoded certificate and extract its identity fields.
    ///
    /// # Errors
    ///
    /// Returns `Error::HandshakeFailed` if the certificate cannot be parsed:
    /// a peer whose certificate is malformed is not authenticated.
    pub fn from_der(der: CertificateDer<'static>) -> Result<Self> {
        let (_, cert) = X509Certificate::from_der(der.as_ref()).map_err(|e| {
            Error::HandshakeFailed(format!("Failed to parse peer certificate: {e}"))
        })?;

        let subject = extract_attributes(cert.subject());
        let common_name = extract_cn(&cert);
        let (san_dns_names, san_ip_addresses) = extract_sans(&cert);
        let display_name = common_name
            .clone()
            .unwrap_or_else(|| cert.subject().to_string());

        let validity = cert.validity();
        let not_before = validity.not_before.to_datetime();
        let not_after = validity.not_after.to_datetime();
        let issuer = cert.issuer().to_string();

        Ok(Self {
            subject,
            common_name,
            issuer,
            san_dns_names,
            san_ip_addresses,
            not_before,
            not_after,
            display_name,
            der,
        })
    }

    /// Look up a subject attribute by long name (`"commonName"`) or short
    /// name (`"CN"`).  Returns the first match.
    #[must_use]
    pub fn subject_attribute(&self, name: &str) -> Option<&str> {
        let long = long_name_for(name).unwrap_or(name);
        self.subject
            .iter()
            .find(|attr| attr.name == long)
            .map(|attr| attr.value.as_str())
    }

    /// The certificate as presented on the wire.
    #[must_use]
    pub fn der(&self) -> &CertificateDer<'static> {
        &self.der
    }

    /// The certificate re-encoded as PEM.
    #[must_use]
    pub fn to_pem(&self) -> String {
        let encoded = STANDARD.encode(self.der.as_ref());
        let mut pem = String::from("-----BEGIN CERTIFICATE-----\n");
        for line in encoded.as_bytes().chunks(64) {
            pem.push_str(&String::from_utf8_lossy(line));
            pem.push('\n');
        }
        pem.push_str("-----END CERTIFICATE-----\n");
        pem
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Extraction helpers
// ─────────────────────────────────────────────────────────────────────────────

/// `(short name, long name, dotted OID)` of well-known subject attributes.
const ATTRIBUTE_NAMES: &[(&str, &str, &str)] = &[
    ("C", "countryName", "2.5.4.6"),
    ("ST", "stateOrProvinceName", "2.5.4.8"),
    ("L", "localityName", "2.5.4.7"),
    ("O", "organizationName", "2.5.4.10"),
    ("OU", "organizationalUnitName", "2.5.4.11"),
    ("CN", "commonName", "2.5.4.3"),
];

fn long_name_for(short: &str) -> Option<&'static str> {
    ATTRIBUTE_NAMES
        .iter()
        .find(|(s, _, _)| *s == short)
        .map(|(_, long, _)| *long)
}

/// Walk the DN in order, naming each attribute.
fn extract_attributes(name: &X509Name<'_>) -> Vec<SubjectAttribute> {
    name.iter_attributes()
        .map(|attr| {
            let oid = attr.attr_type().to_id_string();
            let name = match ATTRIBUTE_NAMES.iter().find(|(_, _, dotted)| *dotted == oid) {
                Some((_, long, _)) => (*long).to_owned(),
                None => oid,
            };
            let value = attr.as_str().unwrap_or("<binary>").to_owned();
            SubjectAttribute { name, value }
        })
        .collect()
}

/// Extract the CN attribute from the subject DN.
fn extract_cn(cert: &X509Certificate<'_>) -> Option<String> {
    cert.subject()
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .map(str::to_owned)
}

/// Extract SAN DNS and SAN IP entries from the certificate extensions.
fn extract_sans(cert: &X509Certificate<'_>) -> (Vec<String>, Vec<IpAddr>) {
    let mut dns_names = Vec::new();
    let mut ips = Vec::new();

    if let Ok(Some(san_ext)) = cert.subject_alternative_name() {
        for name in &san_ext.value.general_names {
            match name {
                GeneralName::DNSName(dns) => dns_names.push((*dns).to_owned()),
                GeneralName::IPAddress(raw) => {
                    if let Some(ip) = ip_from_bytes(raw) {
                        ips.push(ip);
                    }
                }
                _ => {}
            }
        }
    }

    (dns_names, ips)
}

fn ip_from_bytes(raw: &[u8]) -> Option<IpAddr> {
    match raw.len() {
        4 => <[u8; 4]>::try_from(raw).ok().map(IpAddr::from),
        16 => <[u8; 16]>::try_from(raw).ok().map(IpAddr::from),
        _ => None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
