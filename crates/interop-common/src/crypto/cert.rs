//! Certificate generation and inspection
//!
//! Peers are identified by the addresses in their client certificate: the
//! DNS Subject Alternative Names, or the Subject Common Name when there are
//! none. Generation is for tests and local setups.

use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose,
};
use rustls::pki_types::CertificateDer;
use std::time::Duration;
use x509_parser::extensions::GeneralName;

use crate::crypto::tls::cert_fingerprint;
use crate::error::{InteropError, Result};

/// Information about a generated certificate
#[derive(Debug, Clone)]
pub struct CertificateInfo {
    /// PEM-encoded certificate
    pub cert_pem: String,
    /// PEM-encoded private key
    pub key_pem: String,
    /// Certificate fingerprint (SHA-256)
    pub fingerprint: String,
}

const VALIDITY_DAYS: u64 = 365;

fn base_params(common_name: &str, san_dns: &[String]) -> Result<CertificateParams> {
    let mut params = CertificateParams::new(san_dns.to_vec())
        .map_err(|e| InteropError::internal("invalid subject alternative name").with_source(e))?;

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    params.distinguished_name = dn;

    let now = time::OffsetDateTime::now_utc();
    params.not_before = now - Duration::from_secs(60);
    params.not_after = now + Duration::from_secs(VALIDITY_DAYS * 24 * 60 * 60);
    Ok(params)
}

fn info_of(cert: &Certificate, key: &KeyPair) -> CertificateInfo {
    CertificateInfo {
        cert_pem: cert.pem(),
        key_pem: key.serialize_pem(),
        fingerprint: cert_fingerprint(cert.der()),
    }
}

/// A certificate authority that issues peer certificates
pub struct CertificateAuthority {
    cert: Certificate,
    key: KeyPair,
    info: CertificateInfo,
}

impl CertificateAuthority {
    /// Generate a self-signed CA
    pub fn generate(common_name: &str) -> Result<Self> {
        let mut params = base_params(common_name, &[])?;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];

        let key = KeyPair::generate()
            .map_err(|e| InteropError::internal("failed to generate key pair").with_source(e))?;
        let cert = params
            .self_signed(&key)
            .map_err(|e| InteropError::internal("failed to generate certificate").with_source(e))?;
        let info = info_of(&cert, &key);
        Ok(Self { cert, key, info })
    }

    pub fn info(&self) -> &CertificateInfo {
        &self.info
    }

    /// Issue a leaf certificate usable for both client and server auth
    pub fn issue(&self, common_name: &str, san_dns: &[String]) -> Result<CertificateInfo> {
        let mut params = base_params(common_name, san_dns)?;
        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ClientAuth,
            ExtendedKeyUsagePurpose::ServerAuth,
        ];

        let key = KeyPair::generate()
            .map_err(|e| InteropError::internal("failed to generate key pair").with_source(e))?;
        let cert = params
            .signed_by(&key, &self.cert, &self.key)
            .map_err(|e| InteropError::internal("failed to sign certificate").with_source(e))?;
        Ok(info_of(&cert, &key))
    }
}

/// Addresses a peer certificate vouches for.
///
/// DNS SANs verbatim, or the Subject CN if the certificate has none.
pub fn peer_addresses(cert: &CertificateDer<'_>) -> Result<Vec<String>> {
    let (_, parsed) = x509_parser::parse_x509_certificate(cert.as_ref())
        .map_err(|e| InteropError::unauthenticated("invalid client certificate").with_source(e))?;

    let mut addresses = Vec::new();
    if let Ok(Some(san)) = parsed.subject_alternative_name() {
        for name in &san.value.general_names {
            if let GeneralName::DNSName(dns) = name {
                addresses.push((*dns).to_string());
            }
        }
    }
    if addresses.is_empty() {
        if let Some(cn) = parsed
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
        {
            addresses.push(cn.to_string());
        }
    }
    Ok(addresses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::tls::load_certs_from_pem;

    #[test]
    fn test_issue_leaf() {
        let ca = CertificateAuthority::generate("Interop Test CA").unwrap();
        assert!(ca.info().cert_pem.contains("BEGIN CERTIFICATE"));

        let leaf = ca.issue("ns.example.com", &["ns.example.com".to_string()]).unwrap();
        assert!(leaf.key_pem.contains("PRIVATE KEY"));
        assert_ne!(leaf.fingerprint, ca.info().fingerprint);
    }

    #[test]
    fn test_peer_addresses_prefer_sans() {
        let ca = CertificateAuthority::generate("Interop Test CA").unwrap();
        let leaf = ca
            .issue(
                "ignored.example.com",
                &["0102030405060708".to_string(), "*.ns.example.com".to_string()],
            )
            .unwrap();
        let der = load_certs_from_pem(leaf.cert_pem.as_bytes()).unwrap().remove(0);
        assert_eq!(
            peer_addresses(&der).unwrap(),
            vec!["0102030405060708".to_string(), "*.ns.example.com".to_string()]
        );
    }

    #[test]
    fn test_peer_addresses_fall_back_to_cn() {
        let ca = CertificateAuthority::generate("Interop Test CA").unwrap();
        let leaf = ca.issue("as.example.com", &[]).unwrap();
        let der = load_certs_from_pem(leaf.cert_pem.as_bytes()).unwrap().remove(0);
        assert_eq!(peer_addresses(&der).unwrap(), vec!["as.example.com".to_string()]);
    }
}
