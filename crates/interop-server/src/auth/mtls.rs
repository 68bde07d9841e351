//! Client certificate authentication
//!
//! Each sender ID has its own set of trusted CAs. A chain is only accepted
//! for the sender that claims it: a certificate issued by the CA of NetID
//! `000013` does not authenticate NetID `000042`. The union of all CAs is
//! used for the TLS handshake itself.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use rustls::pki_types::{CertificateDer, UnixTime};
use rustls::server::danger::ClientCertVerifier;
use rustls::RootCertStore;
use tracing::info;

use interop_common::crypto::{create_client_verifier, load_certs_from_pem, peer_addresses};
use interop_common::protocol::Role;
use interop_common::{CallContext, Fetcher, InteropError, MessageHeader, NetId, Result};

use super::{ApplicationIdentity, Authenticated, Authenticator, NetworkIdentity, PeerInfo};

struct SenderRoots {
    certs: Vec<CertificateDer<'static>>,
    verifier: Arc<dyn ClientCertVerifier>,
}

/// Trusted client CAs per sender ID
#[derive(Default)]
pub struct SenderTrust {
    senders: HashMap<String, SenderRoots>,
}

fn sender_key(sender_id: &str) -> String {
    sender_id.trim().to_ascii_lowercase()
}

impl SenderTrust {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trust the CAs in `pem` for `sender_id`
    pub fn add(&mut self, sender_id: &str, pem: &[u8]) -> Result<()> {
        let certs = load_certs_from_pem(pem)?;
        let mut roots = RootCertStore::empty();
        for cert in &certs {
            roots.add(cert.clone()).map_err(|e| {
                InteropError::internal(format!("invalid client CA for {}", sender_id)).with_source(e)
            })?;
        }
        let verifier = create_client_verifier(roots)?;
        self.senders
            .insert(sender_key(sender_id), SenderRoots { certs, verifier });
        Ok(())
    }

    /// Load the `sender-client-cas` map through the fetcher
    pub fn load(cas: &BTreeMap<String, String>, fetcher: &dyn Fetcher) -> Result<Self> {
        let mut trust = Self::new();
        for (sender_id, path) in cas {
            let pem = fetcher.read_all(path)?;
            trust.add(sender_id, &pem)?;
            info!(sender_id = %sender_id, path = %path, "Loaded client CAs");
        }
        Ok(trust)
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    /// All trusted CAs, for the TLS handshake
    pub fn pool(&self) -> RootCertStore {
        let mut pool = RootCertStore::empty();
        for roots in self.senders.values() {
            // certificates were validated by `add`
            let _ = pool.add_parsable_certificates(roots.certs.iter().cloned());
        }
        pool
    }

    /// Verify `chain` (leaf first) against the CAs of `sender_id`.
    ///
    /// `Ok(false)` when the sender has no CAs configured.
    pub fn verify(&self, sender_id: &str, chain: &[CertificateDer<'static>]) -> Result<bool> {
        let Some(roots) = self.senders.get(&sender_key(sender_id)) else {
            return Ok(false);
        };
        let Some((leaf, intermediates)) = chain.split_first() else {
            return Ok(false);
        };
        roots
            .verifier
            .verify_client_cert(leaf, intermediates, UnixTime::now())
            .map_err(|e| {
                InteropError::unauthenticated(format!(
                    "client certificate not trusted for {}",
                    sender_id
                ))
                .with_source(e)
            })?;
        Ok(true)
    }
}

impl std::fmt::Debug for SenderTrust {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut senders: Vec<&String> = self.senders.keys().collect();
        senders.sort();
        f.debug_struct("SenderTrust").field("senders", &senders).finish()
    }
}

/// Authenticates peers by client certificate
#[derive(Debug)]
pub struct MtlsAuthenticator {
    trust: Arc<SenderTrust>,
}

impl MtlsAuthenticator {
    pub fn new(trust: Arc<SenderTrust>) -> Self {
        Self { trust }
    }
}

#[async_trait]
impl Authenticator for MtlsAuthenticator {
    fn name(&self) -> &'static str {
        "mtls"
    }

    async fn authenticate(
        &self,
        _ctx: &CallContext,
        peer: &PeerInfo,
        header: &MessageHeader,
        role: Role,
    ) -> Result<Option<Authenticated>> {
        if peer.client_certs.is_empty() {
            return Ok(None);
        }
        if !self.trust.verify(&header.sender_id, &peer.client_certs)? {
            return Ok(None);
        }
        let addresses = peer_addresses(&peer.client_certs[0])?;

        let auth = match role {
            Role::Network => {
                let net_id: NetId = header.sender_id.parse().map_err(|_| {
                    InteropError::unknown_sender(format!("invalid NetID {}", header.sender_id))
                })?;
                Authenticated::Network(NetworkIdentity { net_id, addresses })
            }
            Role::Application => Authenticated::Application(ApplicationIdentity {
                as_id: header.sender_id.clone(),
                addresses,
            }),
        };
        Ok(Some(auth))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use interop_common::crypto::CertificateAuthority;
    use interop_common::{MessageType, ProtocolVersion};

    fn peer_with(pem: &str) -> PeerInfo {
        PeerInfo {
            client_certs: load_certs_from_pem(pem.as_bytes()).unwrap(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_per_sender_trust() {
        let ca_13 = CertificateAuthority::generate("NetID 000013 CA").unwrap();
        let ca_42 = CertificateAuthority::generate("NetID 000042 CA").unwrap();

        let mut trust = SenderTrust::new();
        trust.add("000013", ca_13.info().cert_pem.as_bytes()).unwrap();
        trust.add("000042", ca_42.info().cert_pem.as_bytes()).unwrap();
        assert_eq!(trust.pool().len(), 2);
        let auth = MtlsAuthenticator::new(Arc::new(trust));

        let leaf = ca_13
            .issue("ns.example.com", &["ns.example.com".into(), "*.ns.example.com".into()])
            .unwrap();
        let peer = peer_with(&leaf.cert_pem);
        let ctx = CallContext::background();

        let header = MessageHeader::new(ProtocolVersion::V1_1, MessageType::JoinReq, "000013", "70B3D57ED0000000");
        let identity = auth
            .authenticate(&ctx, &peer, &header, Role::Network)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            identity,
            Authenticated::Network(NetworkIdentity {
                net_id: NetId([0x00, 0x00, 0x13]),
                addresses: vec!["ns.example.com".into(), "*.ns.example.com".into()],
            })
        );

        // Right chain, wrong sender
        let header = MessageHeader::new(ProtocolVersion::V1_1, MessageType::JoinReq, "000042", "70B3D57ED0000000");
        assert!(auth.authenticate(&ctx, &peer, &header, Role::Network).await.is_err());

        // Sender without CAs
        let header = MessageHeader::new(ProtocolVersion::V1_1, MessageType::JoinReq, "000099", "70B3D57ED0000000");
        assert!(auth
            .authenticate(&ctx, &peer, &header, Role::Network)
            .await
            .unwrap()
            .is_none());

        // No certificate at all
        assert!(auth
            .authenticate(&ctx, &PeerInfo::default(), &header, Role::Network)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_application_identity_uses_common_name() {
        let ca = CertificateAuthority::generate("AS CA").unwrap();
        let mut trust = SenderTrust::new();
        trust.add("AS.example.com", ca.info().cert_pem.as_bytes()).unwrap();
        let auth = MtlsAuthenticator::new(Arc::new(trust));

        let leaf = ca.issue("as.example.com", &[]).unwrap();
        let header = MessageHeader::new(ProtocolVersion::V1_0, MessageType::AppSKeyReq, "as.example.com", "70B3D57ED0000000");
        let identity = auth
            .authenticate(&CallContext::background(), &peer_with(&leaf.cert_pem), &header, Role::Application)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(identity.role(), Role::Application);
        assert_eq!(identity.addresses(), ["as.example.com".to_string()]);
    }
}
