//! TLS configuration utilities
//!
//! Server configuration for the Backend Interfaces listener and the PEM
//! loaders shared by the client router and the authenticators. All configs
//! are built on the ring crypto provider.

use std::sync::Arc;

use rustls::{
    crypto::CryptoProvider,
    pki_types::{CertificateDer, PrivateKeyDer},
    server::{danger::ClientCertVerifier, WebPkiClientVerifier},
    RootCertStore, ServerConfig,
};
use sha2::{Digest, Sha256};

use crate::error::{InteropError, Result};

/// Crypto provider used for all TLS configurations
pub fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Create the TLS configuration of the inbound listener.
///
/// With `client_roots`, clients may present a certificate that chains to one
/// of the roots. Clients without a certificate are still accepted so that
/// bearer tokens can authenticate them; per-sender verification happens
/// after the handshake.
pub fn create_server_config(
    cert_pem: &[u8],
    key_pem: &[u8],
    client_roots: Option<Arc<RootCertStore>>,
) -> Result<ServerConfig> {
    let certs = load_certs_from_pem(cert_pem)?;
    let key = load_key_from_pem(key_pem)?;
    let provider = crypto_provider();

    let builder = ServerConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| InteropError::internal("unsupported TLS protocol versions").with_source(e))?;

    let builder = match client_roots {
        Some(roots) if !roots.is_empty() => {
            let verifier = WebPkiClientVerifier::builder_with_provider(roots, provider)
                .allow_unauthenticated()
                .build()
                .map_err(|e| {
                    InteropError::internal("failed to create client verifier").with_source(e)
                })?;
            builder.with_client_cert_verifier(verifier)
        }
        _ => builder.with_no_client_auth(),
    };

    let mut config = builder
        .with_single_cert(certs, key)
        .map_err(|e| InteropError::internal("failed to create server config").with_source(e))?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(config)
}

/// Client certificate verifier trusting exactly `roots`
pub fn create_client_verifier(roots: RootCertStore) -> Result<Arc<dyn ClientCertVerifier>> {
    WebPkiClientVerifier::builder_with_provider(Arc::new(roots), crypto_provider())
        .build()
        .map_err(|e| InteropError::internal("failed to create client verifier").with_source(e))
}

/// SHA-256 fingerprint of a DER certificate, lowercase hex
pub fn cert_fingerprint(cert: &CertificateDer<'_>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(cert.as_ref());
    hex::encode(hasher.finalize())
}

/// Load certificates from PEM data
pub fn load_certs_from_pem(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = std::io::BufReader::new(pem);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| InteropError::internal("failed to parse certificate PEM").with_source(e))?;

    if certs.is_empty() {
        return Err(InteropError::internal("no certificates found"));
    }

    Ok(certs)
}

/// Load private key from PEM data
pub fn load_key_from_pem(pem: &[u8]) -> Result<PrivateKeyDer<'static>> {
    let mut reader = std::io::BufReader::new(pem);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| InteropError::internal("failed to parse key PEM").with_source(e))?
        .ok_or_else(|| InteropError::internal("no private key found"))
}

/// Load root certificates from PEM data
pub fn load_root_certs_from_pem(pem: &[u8]) -> Result<RootCertStore> {
    let mut root_store = RootCertStore::empty();
    for cert in load_certs_from_pem(pem)? {
        root_store
            .add(cert)
            .map_err(|e| InteropError::internal("failed to add root certificate").with_source(e))?;
    }
    Ok(root_store)
}
