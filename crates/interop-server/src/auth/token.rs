//! Bearer token authentication
//!
//! Only Backend Interfaces 1.1 Network Servers use tokens. A token is
//! accepted when its issuer is configured, its signature verifies against
//! the issuer's published keys, the standard claims hold (expiry, audience,
//! issuer) and it carries the cluster role. Cluster tokens authenticate as
//! NetID `000000`; the subject is the only allowed address.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::jwk::{AlgorithmParameters, EllipticCurve, Jwk, KeyAlgorithm};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tracing::debug;

use interop_common::protocol::Role;
use interop_common::{
    CallContext, ErrorKind, InteropError, MessageHeader, NetId, ProtocolVersion, Result,
};

use super::jwks::JwksCache;
use super::{Authenticated, Authenticator, NetworkIdentity, PeerInfo};
use crate::config::TokenIssuerConfig;

/// Role marking a token as issued to a federated Network Server cluster
pub const CLUSTER_ROLE: &str = "cluster";

/// NetID that cluster tokens authenticate as
pub const CLUSTER_NET_ID: NetId = NetId([0x00, 0x00, 0x00]);

#[derive(Debug, Deserialize)]
struct UnverifiedClaims {
    iss: String,
}

#[derive(Debug, Deserialize)]
struct TokenClaims {
    sub: String,
    #[serde(default)]
    roles: Vec<String>,
}

/// Issuer read from the token without checking the signature
fn unverified_issuer(token: &str) -> Result<String> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| InteropError::unauthenticated("token is not a JWS"))?;
    let payload = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| InteropError::unauthenticated("invalid token payload").with_source(e))?;
    let claims: UnverifiedClaims = serde_json::from_slice(&payload)
        .map_err(|e| InteropError::unauthenticated("invalid token claims").with_source(e))?;
    Ok(claims.iss)
}

/// Algorithms a published key may verify: its declared `alg`, else the
/// asymmetric algorithms of its key type
fn key_algorithms(jwk: &Jwk) -> Result<Vec<Algorithm>> {
    if let Some(alg) = &jwk.common.key_algorithm {
        let alg = match alg {
            KeyAlgorithm::RS256 => Algorithm::RS256,
            KeyAlgorithm::RS384 => Algorithm::RS384,
            KeyAlgorithm::RS512 => Algorithm::RS512,
            KeyAlgorithm::PS256 => Algorithm::PS256,
            KeyAlgorithm::PS384 => Algorithm::PS384,
            KeyAlgorithm::PS512 => Algorithm::PS512,
            KeyAlgorithm::ES256 => Algorithm::ES256,
            KeyAlgorithm::ES384 => Algorithm::ES384,
            KeyAlgorithm::EdDSA => Algorithm::EdDSA,
            other => {
                return Err(InteropError::unauthenticated(format!(
                    "unsupported issuer key algorithm {:?}",
                    other
                )))
            }
        };
        return Ok(vec![alg]);
    }
    match &jwk.algorithm {
        AlgorithmParameters::RSA(_) => Ok(vec![
            Algorithm::RS256,
            Algorithm::RS384,
            Algorithm::RS512,
            Algorithm::PS256,
            Algorithm::PS384,
            Algorithm::PS512,
        ]),
        AlgorithmParameters::EllipticCurve(params) => match params.curve {
            EllipticCurve::P256 => Ok(vec![Algorithm::ES256]),
            EllipticCurve::P384 => Ok(vec![Algorithm::ES384]),
            _ => Err(InteropError::unauthenticated("unsupported issuer key curve")),
        },
        AlgorithmParameters::OctetKeyPair(_) => Ok(vec![Algorithm::EdDSA]),
        AlgorithmParameters::OctetKey(_) => Err(InteropError::unauthenticated(
            "symmetric issuer keys are not accepted",
        )),
    }
}

/// Verification settings of one issuer
#[derive(Debug, Clone)]
pub struct TokenVerifier {
    pub issuer: String,
    pub audience: String,
    pub cache_ttl: Duration,
}

impl TokenVerifier {
    pub fn from_config(config: &TokenIssuerConfig, public_tls_address: &str) -> Self {
        Self {
            issuer: config.url.clone(),
            audience: config
                .audience_override
                .clone()
                .unwrap_or_else(|| public_tls_address.to_string()),
            cache_ttl: config.cache_ttl(),
        }
    }
}

#[derive(Debug)]
pub struct TokenAuthenticator {
    verifiers: HashMap<String, TokenVerifier>,
    keys: Arc<JwksCache>,
}

impl TokenAuthenticator {
    pub fn new(verifiers: Vec<TokenVerifier>, keys: Arc<JwksCache>) -> Self {
        Self {
            verifiers: verifiers
                .into_iter()
                .map(|v| (v.issuer.clone(), v))
                .collect(),
            keys,
        }
    }

    /// Authenticator for the configured issuers
    pub fn from_config(
        issuers: &[TokenIssuerConfig],
        public_tls_address: &str,
        http: reqwest::Client,
    ) -> Self {
        let verifiers = issuers
            .iter()
            .map(|issuer| TokenVerifier::from_config(issuer, public_tls_address))
            .collect();
        Self::new(verifiers, Arc::new(JwksCache::new(http)))
    }

    async fn verify(&self, ctx: &CallContext, verifier: &TokenVerifier, token: &str) -> Result<TokenClaims> {
        let header = decode_header(token)
            .map_err(|e| InteropError::unauthenticated("invalid token header").with_source(e))?;
        let kid = header
            .kid
            .as_deref()
            .ok_or_else(|| InteropError::unauthenticated("token without key ID"))?;

        let mut keys = self
            .keys
            .get(ctx, &verifier.issuer, verifier.cache_ttl, false)
            .await?;
        if keys.find(kid).is_none() {
            keys = self
                .keys
                .get(ctx, &verifier.issuer, verifier.cache_ttl, true)
                .await?;
        }
        let jwk = keys.find(kid).ok_or_else(|| {
            InteropError::unauthenticated(format!("unknown key {} of {}", kid, verifier.issuer))
        })?;
        let key = DecodingKey::from_jwk(jwk)
            .map_err(|e| InteropError::unauthenticated("unusable issuer key").with_source(e))?;

        let algorithms = key_algorithms(jwk)?;
        if !algorithms.contains(&header.alg) {
            return Err(InteropError::unauthenticated(format!(
                "token algorithm {:?} does not match key {}",
                header.alg, kid
            )));
        }
        let mut validation = Validation::new(header.alg);
        validation.algorithms = algorithms;
        validation.set_audience(&[&verifier.audience]);
        validation.set_issuer(&[&verifier.issuer]);
        validation.set_required_spec_claims(&["exp", "aud", "iss", "sub"]);

        let data = decode::<TokenClaims>(token, &key, &validation)
            .map_err(|e| InteropError::unauthenticated("token verification failed").with_source(e))?;
        Ok(data.claims)
    }
}

#[async_trait]
impl Authenticator for TokenAuthenticator {
    fn name(&self) -> &'static str {
        "token"
    }

    async fn authenticate(
        &self,
        ctx: &CallContext,
        peer: &PeerInfo,
        header: &MessageHeader,
        role: Role,
    ) -> Result<Option<Authenticated>> {
        if header.protocol_version != ProtocolVersion::V1_1 || role != Role::Network {
            return Ok(None);
        }
        let Some(token) = peer.bearer_token() else {
            return Ok(None);
        };
        let issuer = unverified_issuer(token)?;
        let Some(verifier) = self.verifiers.get(&issuer) else {
            debug!(issuer = %issuer, "Token of unknown issuer");
            return Ok(None);
        };

        let claims = self.verify(ctx, verifier, token).await?;
        if !claims.roles.iter().any(|r| r == CLUSTER_ROLE) {
            return Err(InteropError::new(
                ErrorKind::CallerNotAuthorized,
                "caller not authenticated as cluster",
            ));
        }
        Ok(Some(Authenticated::Network(NetworkIdentity {
            net_id: CLUSTER_NET_ID,
            addresses: vec![claims.sub],
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use interop_common::MessageType;
    use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const AUDIENCE: &str = "interop.example.com:8886";

    struct Issuer {
        server: MockServer,
        signing_key: EncodingKey,
    }

    async fn issuer() -> Issuer {
        let key_pair = rcgen::KeyPair::generate().unwrap();
        let raw = key_pair.public_key_raw();
        let jwk = json!({
            "kty": "EC",
            "crv": "P-256",
            "kid": "k1",
            "alg": "ES256",
            "x": URL_SAFE_NO_PAD.encode(&raw[1..33]),
            "y": URL_SAFE_NO_PAD.encode(&raw[33..65]),
        });

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jwks_uri": format!("{}/keys", server.uri()),
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/keys"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"keys": [jwk]})))
            .mount(&server)
            .await;

        let signing_key = EncodingKey::from_ec_pem(key_pair.serialize_pem().as_bytes()).unwrap();
        Issuer { server, signing_key }
    }

    impl Issuer {
        fn token(&self, roles: &[&str], audience: &str) -> String {
            let mut header = Header::new(Algorithm::ES256);
            header.kid = Some("k1".into());
            let claims = json!({
                "iss": self.server.uri(),
                "sub": "ns.example.com",
                "aud": audience,
                "exp": chrono::Utc::now().timestamp() + 300,
                "roles": roles,
            });
            encode(&header, &claims, &self.signing_key).unwrap()
        }

        fn authenticator(&self) -> TokenAuthenticator {
            let config = TokenIssuerConfig {
                url: self.server.uri(),
                audience_override: None,
                public_key_cache_ttl: Some(60),
            };
            TokenAuthenticator::from_config(&[config], AUDIENCE, reqwest::Client::new())
        }
    }

    fn join_header(version: ProtocolVersion) -> MessageHeader {
        MessageHeader::new(version, MessageType::JoinReq, "000000", "70B3D57ED0000000")
    }

    fn bearer(token: String) -> PeerInfo {
        PeerInfo {
            authorization: Some(format!("Bearer {}", token)),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_cluster_token() {
        let issuer = issuer().await;
        let auth = issuer.authenticator();
        let ctx = CallContext::background();

        let identity = auth
            .authenticate(&ctx, &bearer(issuer.token(&["cluster"], AUDIENCE)), &join_header(ProtocolVersion::V1_1), Role::Network)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            identity,
            Authenticated::Network(NetworkIdentity {
                net_id: CLUSTER_NET_ID,
                addresses: vec!["ns.example.com".into()],
            })
        );
    }

    #[tokio::test]
    async fn test_rejected_tokens() {
        let issuer = issuer().await;
        let auth = issuer.authenticator();
        let ctx = CallContext::background();
        let header = join_header(ProtocolVersion::V1_1);

        let err = auth
            .authenticate(&ctx, &bearer(issuer.token(&["tenant"], AUDIENCE)), &header, Role::Network)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CallerNotAuthorized);

        let err = auth
            .authenticate(&ctx, &bearer(issuer.token(&["cluster"], "other.example.com")), &header, Role::Network)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthenticated);

        let err = auth
            .authenticate(&ctx, &bearer("not-a-token".into()), &header, Role::Network)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthenticated);
    }

    #[tokio::test]
    async fn test_token_algorithm_pinned_to_key() {
        let issuer = issuer().await;
        let auth = issuer.authenticator();
        let ctx = CallContext::background();

        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some("k1".into());
        let claims = json!({
            "iss": issuer.server.uri(),
            "sub": "ns.example.com",
            "aud": AUDIENCE,
            "exp": chrono::Utc::now().timestamp() + 300,
            "roles": ["cluster"],
        });
        let forged = encode(&header, &claims, &EncodingKey::from_secret(b"shared")).unwrap();
        let err = auth
            .authenticate(&ctx, &bearer(forged), &join_header(ProtocolVersion::V1_1), Role::Network)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthenticated);
    }

    #[test]
    fn test_key_algorithms() {
        let jwk = |value: serde_json::Value| -> Jwk { serde_json::from_value(value).unwrap() };

        let ec = jwk(json!({
            "kty": "EC",
            "crv": "P-256",
            "x": "f83OJ3D2xF1Bg8vub9tLe1gHMzV76e8Tus9uPHvRVEU",
            "y": "x_FEzRu9m36HLN_tue659LNpXW6pCyStikYjKIWI5a0"
        }));
        assert_eq!(key_algorithms(&ec).unwrap(), vec![Algorithm::ES256]);

        let rsa = jwk(json!({"kty": "RSA", "alg": "RS256", "n": "sXch", "e": "AQAB"}));
        assert_eq!(key_algorithms(&rsa).unwrap(), vec![Algorithm::RS256]);

        let oct = jwk(json!({"kty": "oct", "k": "c2VjcmV0"}));
        assert!(key_algorithms(&oct).is_err());

        let hs = jwk(json!({"kty": "oct", "alg": "HS256", "k": "c2VjcmV0"}));
        assert!(key_algorithms(&hs).is_err());
    }

    #[tokio::test]
    async fn test_not_applicable() {
        let issuer = issuer().await;
        let auth = issuer.authenticator();
        let ctx = CallContext::background();
        let token = issuer.token(&["cluster"], AUDIENCE);

        // 1.0 has no token authentication
        assert!(auth
            .authenticate(&ctx, &bearer(token.clone()), &join_header(ProtocolVersion::V1_0), Role::Network)
            .await
            .unwrap()
            .is_none());
        // Application Servers use certificates
        assert!(auth
            .authenticate(&ctx, &bearer(token), &join_header(ProtocolVersion::V1_1), Role::Application)
            .await
            .unwrap()
            .is_none());
        // No token
        assert!(auth
            .authenticate(&ctx, &PeerInfo::default(), &join_header(ProtocolVersion::V1_1), Role::Network)
            .await
            .unwrap()
            .is_none());

        // Unknown issuer
        let other = TokenAuthenticator::new(vec![], Arc::new(JwksCache::new(reqwest::Client::new())));
        assert!(other
            .authenticate(&ctx, &bearer(issuer.token(&["cluster"], AUDIENCE)), &join_header(ProtocolVersion::V1_1), Role::Network)
            .await
            .unwrap()
            .is_none());
    }
}
