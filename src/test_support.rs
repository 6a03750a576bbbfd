//! Certificate fixtures for unit tests.
//!
//! Production code never issues certificates; tests need real ones, so they
//! are generated here with `rcgen`.

use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa,
    Issuer, KeyPair, SanType, date_time_ymd,
};
use rustls::pki_types::CertificateDer;

/// A certificate plus its private key, in PEM and DER form.
pub struct Identity {
    pub cert_pem: String,
    pub key_pem: String,
    pub der: CertificateDer<'static>,
}

impl Identity {
    /// Write `<stem>.pem` and `<stem>.key` under `dir`.
    pub fn write(&self, dir: &Path, stem: &str) -> (PathBuf, PathBuf) {
        let cert = dir.join(format!("{stem}.pem"));
        let key = dir.join(format!("{stem}.key"));
        fs::write(&cert, &self.cert_pem).unwrap();
        fs::write(&key, &self.key_pem).unwrap();
        (cert, key)
    }
}

/// A CA able to issue leaf certificates.
pub struct Authority {
    pub cert_pem: String,
    pub der: CertificateDer<'static>,
    issuer: Issuer<'static, KeyPair>,
}

impl Authority {
    pub fn new(cn: &str) -> Self {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::default();
        params.distinguished_name = dn(cn);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let cert = params.self_signed(&key).unwrap();
        Self {
            cert_pem: cert.pem(),
            der: cert.der().clone(),
            issuer: Issuer::new(params, key),
        }
    }

    /// Issue a leaf valid for `127.0.0.1`.
    pub fn issue(&self, cn: &str) -> Identity {
        self.issue_with(leaf_params(cn))
    }

    /// Issue a certificate carrying `CA:TRUE`, signed by this authority.
    pub fn issue_ca(&self, cn: &str) -> Identity {
        let mut params = leaf_params(cn);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        self.issue_with(params)
    }

    /// Issue a leaf restricted to the server-auth extended key usage.
    pub fn issue_server_only(&self, cn: &str) -> Identity {
        let mut params = leaf_params(cn);
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        self.issue_with(params)
    }

    /// Issue a leaf whose validity window ended long ago.
    pub fn issue_expired(&self, cn: &str) -> Identity {
        let mut params = leaf_params(cn);
        params.not_before = date_time_ymd(2000, 1, 1);
        params.not_after = date_time_ymd(2001, 1, 1);
        self.issue_with(params)
    }

    pub fn write_cert(&self, dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, &self.cert_pem).unwrap();
        path
    }

    fn issue_with(&self, params: CertificateParams) -> Identity {
        let key = KeyPair::generate().unwrap();
        let cert = params.signed_by(&key, &self.issuer).unwrap();
        Identity {
            cert_pem: cert.pem(),
            key_pem: key.serialize_pem(),
            der: cert.der().clone(),
        }
    }
}

/// A self-signed identity valid for `127.0.0.1`.
pub fn self_signed(cn: &str) -> Identity {
    let key = KeyPair::generate().unwrap();
    let cert = leaf_params(cn).self_signed(&key).unwrap();
    Identity {
        cert_pem: cert.pem(),
        key_pem: key.serialize_pem(),
        der: cert.der().clone(),
    }
}

/// A self-signed identity whose validity window ended long ago.
pub fn self_signed_expired(cn: &str) -> Identity {
    let key = KeyPair::generate().unwrap();
    let mut params = leaf_params(cn);
    params.not_before = date_time_ymd(2000, 1, 1);
    params.not_after = date_time_ymd(2001, 1, 1);
    let cert = params.self_signed(&key).unwrap();
    Identity {
        cert_pem: cert.pem(),
        key_pem: key.serialize_pem(),
        der: cert.der().clone(),
    }
}

fn leaf_params(cn: &str) -> CertificateParams {
    let mut params = CertificateParams::default();
    params.distinguished_name = dn(cn);
    params.subject_alt_names = vec![SanType::IpAddress(IpAddr::V4(Ipv4Addr::LOCALHOST))];
    params
}

/// Subject in the order the openssl prompts produce: C, ST, CN.
fn dn(cn: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CountryName, "US");
    dn.push(DnType::StateOrProvinceName, "California");
    dn.push(DnType::CommonName, cn);
    dn
}
