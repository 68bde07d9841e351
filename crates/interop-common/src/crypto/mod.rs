//! Cryptographic utilities
//!
//! This module provides:
//! - TLS configuration for the inbound listener
//! - PEM loading for certificates, keys and trust roots
//! - Certificate generation for tests and local setups
//! - Peer address extraction from client certificates

pub mod cert;
pub mod tls;

pub use cert::{peer_addresses, CertificateAuthority, CertificateInfo};
pub use tls::{
    create_client_verifier, create_server_config, load_certs_from_pem, load_key_from_pem,
    load_root_certs_from_pem,
};
