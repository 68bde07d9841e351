//! Peer authentication
//!
//! Authenticators are tried in order. The first one that positively
//! identifies the peer wins; "no match" moves on to the next one. The result
//! is a network-role or application-role identity carrying the addresses
//! the peer may use in payloads.

pub mod jwks;
pub mod mtls;
pub mod proxy;
pub mod token;

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use rustls::pki_types::CertificateDer;
use tracing::debug;

use interop_common::protocol::Role;
use interop_common::{CallContext, InteropError, MessageHeader, NetId, Result};

pub use jwks::JwksCache;
pub use mtls::{MtlsAuthenticator, SenderTrust};
pub use proxy::{IpNetwork, TrustedProxies};
pub use token::{TokenAuthenticator, TokenVerifier};

/// Transport-level facts about the peer
#[derive(Debug, Clone, Default)]
pub struct PeerInfo {
    pub remote_addr: Option<SocketAddr>,
    /// Presented or forwarded client certificate chain, leaf first
    pub client_certs: Vec<CertificateDer<'static>>,
    /// Value of the `Authorization` header
    pub authorization: Option<String>,
}

impl PeerInfo {
    /// Whether the peer presented any credentials at all
    pub fn has_credentials(&self) -> bool {
        !self.client_certs.is_empty() || self.authorization.is_some()
    }

    pub fn bearer_token(&self) -> Option<&str> {
        let value = self.authorization.as_deref()?;
        value
            .strip_prefix("Bearer ")
            .or_else(|| value.strip_prefix("bearer "))
            .map(str::trim)
    }
}

/// An authenticated Network Server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkIdentity {
    pub net_id: NetId,
    pub addresses: Vec<String>,
}

/// An authenticated Application Server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationIdentity {
    pub as_id: String,
    pub addresses: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authenticated {
    Network(NetworkIdentity),
    Application(ApplicationIdentity),
}

impl Authenticated {
    pub fn role(&self) -> Role {
        match self {
            Authenticated::Network(_) => Role::Network,
            Authenticated::Application(_) => Role::Application,
        }
    }

    pub fn addresses(&self) -> &[String] {
        match self {
            Authenticated::Network(id) => &id.addresses,
            Authenticated::Application(id) => &id.addresses,
        }
    }

    /// Whether `address` is covered by one of the authenticated patterns
    pub fn allows_address(&self, address: &str) -> bool {
        self.addresses().iter().any(|p| address_matches(p, address))
    }
}

/// Exact match or `*.suffix` wildcard, case-insensitive
pub fn address_matches(pattern: &str, address: &str) -> bool {
    let pattern = pattern.to_ascii_lowercase();
    let address = address.to_ascii_lowercase();
    match pattern.strip_prefix("*.") {
        Some(suffix) => address
            .strip_suffix(suffix)
            .and_then(|rest| rest.strip_suffix('.'))
            .map_or(false, |label| !label.is_empty()),
        None => pattern == address,
    }
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Ok(None)` when this authenticator does not apply to the peer
    async fn authenticate(
        &self,
        ctx: &CallContext,
        peer: &PeerInfo,
        header: &MessageHeader,
        role: Role,
    ) -> Result<Option<Authenticated>>;
}

/// Ordered set of authenticators
#[derive(Clone, Default)]
pub struct AuthChain {
    authenticators: Vec<Arc<dyn Authenticator>>,
}

impl AuthChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticators.push(authenticator);
        self
    }

    pub fn len(&self) -> usize {
        self.authenticators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.authenticators.is_empty()
    }

    /// Identify the peer; every failure is an unknown sender
    pub async fn authenticate(
        &self,
        ctx: &CallContext,
        peer: &PeerInfo,
        header: &MessageHeader,
        role: Role,
    ) -> Result<Authenticated> {
        for authenticator in &self.authenticators {
            match authenticator.authenticate(ctx, peer, header, role).await {
                Ok(Some(auth)) => {
                    debug!(
                        correlation_id = %ctx.correlation_id(),
                        authenticator = authenticator.name(),
                        sender_id = %header.sender_id,
                        "Authenticated peer"
                    );
                    return Ok(auth);
                }
                Ok(None) => {}
                Err(err) => {
                    debug!(
                        correlation_id = %ctx.correlation_id(),
                        authenticator = authenticator.name(),
                        sender_id = %header.sender_id,
                        error = %err,
                        "Authentication failed"
                    );
                }
            }
        }
        Err(InteropError::unknown_sender(format!(
            "sender {} not authenticated",
            header.sender_id
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use interop_common::{ErrorKind, MessageType, ProtocolVersion};

    #[test]
    fn test_address_patterns() {
        assert!(address_matches("ns.example.com", "NS.example.com"));
        assert!(!address_matches("ns.example.com", "ns2.example.com"));
        assert!(address_matches("*.example.com", "ns.example.com"));
        assert!(address_matches("*.example.com", "eu1.ns.example.com"));
        assert!(!address_matches("*.example.com", "example.com"));
        assert!(!address_matches("*.example.com", "ns.example.org"));
        assert!(!address_matches("*.example.com", "nsexample.com"));
    }

    #[test]
    fn test_bearer_token() {
        let peer = PeerInfo {
            authorization: Some("Bearer abc.def.ghi".into()),
            ..Default::default()
        };
        assert_eq!(peer.bearer_token(), Some("abc.def.ghi"));
        assert!(peer.has_credentials());

        let basic = PeerInfo {
            authorization: Some("Basic dXNlcjpwYXNz".into()),
            ..Default::default()
        };
        assert_eq!(basic.bearer_token(), None);
        assert!(!PeerInfo::default().has_credentials());
    }

    struct Fixed(Result<Option<Authenticated>>);

    #[async_trait]
    impl Authenticator for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn authenticate(
            &self,
            _: &CallContext,
            _: &PeerInfo,
            _: &MessageHeader,
            _: Role,
        ) -> Result<Option<Authenticated>> {
            match &self.0 {
                Ok(auth) => Ok(auth.clone()),
                Err(e) => Err(InteropError::new(e.kind(), e.message())),
            }
        }
    }

    #[tokio::test]
    async fn test_chain_order() {
        let header = MessageHeader::new(ProtocolVersion::V1_1, MessageType::JoinReq, "000013", "70B3D57ED0000000");
        let identity = Authenticated::Network(NetworkIdentity {
            net_id: NetId([0x00, 0x00, 0x13]),
            addresses: vec!["ns.example.com".into()],
        });
        let ctx = CallContext::background();

        let chain = AuthChain::new()
            .with(Arc::new(Fixed(Err(InteropError::unauthenticated("bad chain")))))
            .with(Arc::new(Fixed(Ok(None))))
            .with(Arc::new(Fixed(Ok(Some(identity.clone())))));
        let auth = chain
            .authenticate(&ctx, &PeerInfo::default(), &header, Role::Network)
            .await
            .unwrap();
        assert_eq!(auth, identity);

        let chain = AuthChain::new().with(Arc::new(Fixed(Ok(None))));
        let err = chain
            .authenticate(&ctx, &PeerInfo::default(), &header, Role::Network)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownSender);
    }
}
