//! Key sets of token issuers
//!
//! Keys are found through the issuer's OpenID discovery document and cached
//! per issuer. Lookups are read-mostly; a refresh holds a per-issuer gate so
//! that concurrent requests wait for one fetch instead of starting their own.
//! When a refresh fails, keys still within their TTL keep being served.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use jsonwebtoken::jwk::JwkSet;
use parking_lot::RwLock;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use interop_common::{metrics, CallContext, InteropError, Result};

/// Forced refreshes are not repeated more often than this
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

const DISCOVERY_PATH: &str = ".well-known/openid-configuration";

#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    jwks_uri: String,
}

#[derive(Debug, Clone)]
struct CachedKeySet {
    keys: Arc<JwkSet>,
    fetched_at: Instant,
}

#[derive(Debug)]
pub struct JwksCache {
    http: reqwest::Client,
    entries: RwLock<HashMap<String, CachedKeySet>>,
    gates: DashMap<String, Arc<Mutex<()>>>,
}

fn fetch_error(issuer: &str, err: reqwest::Error) -> InteropError {
    if err.is_timeout() {
        InteropError::deadline_exceeded().with_source(err)
    } else {
        InteropError::transport(format!("failed to fetch keys of {}", issuer)).with_source(err)
    }
}

impl JwksCache {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            entries: RwLock::new(HashMap::new()),
            gates: DashMap::new(),
        }
    }

    fn cached(&self, issuer: &str) -> Option<CachedKeySet> {
        self.entries.read().get(issuer).cloned()
    }

    /// Key set of `issuer`.
    ///
    /// With `refresh`, cached keys are refetched unless they were fetched
    /// very recently; used when a token names a key the cache lacks.
    pub async fn get(
        &self,
        ctx: &CallContext,
        issuer: &str,
        ttl: Duration,
        refresh: bool,
    ) -> Result<Arc<JwkSet>> {
        let usable = |entry: &CachedKeySet| {
            let age = entry.fetched_at.elapsed();
            if refresh {
                age < MIN_REFRESH_INTERVAL.min(ttl)
            } else {
                age < ttl
            }
        };

        if let Some(entry) = self.cached(issuer).filter(|e| usable(e)) {
            return Ok(entry.keys);
        }

        let gate = Arc::clone(self.gates.entry(issuer.to_string()).or_default().value());
        let _guard = ctx.run(async { Ok(gate.lock().await) }).await?;

        // Another request may have refreshed while we waited
        if let Some(entry) = self.cached(issuer).filter(|e| usable(e)) {
            return Ok(entry.keys);
        }

        match ctx.run(self.fetch(issuer)).await {
            Ok(keys) => {
                metrics::record_jwks_fetch("success");
                let keys = Arc::new(keys);
                self.entries.write().insert(
                    issuer.to_string(),
                    CachedKeySet {
                        keys: Arc::clone(&keys),
                        fetched_at: Instant::now(),
                    },
                );
                debug!(issuer = %issuer, count = keys.keys.len(), "Fetched token issuer keys");
                Ok(keys)
            }
            Err(err) => {
                metrics::record_jwks_fetch("error");
                match self.cached(issuer) {
                    Some(stale) if stale.fetched_at.elapsed() < ttl => {
                        warn!(issuer = %issuer, error = %err, "Key refresh failed, using cached keys");
                        Ok(stale.keys)
                    }
                    _ => Err(err),
                }
            }
        }
    }

    async fn fetch(&self, issuer: &str) -> Result<JwkSet> {
        let discovery_url = url::Url::parse(&format!(
            "{}/{}",
            issuer.trim_end_matches('/'),
            DISCOVERY_PATH
        ))
        .map_err(|e| InteropError::internal(format!("invalid issuer URL {}", issuer)).with_source(e))?;

        let discovery: DiscoveryDocument = self
            .http
            .get(discovery_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| fetch_error(issuer, e))?
            .json()
            .await
            .map_err(|e| fetch_error(issuer, e))?;

        let jwks_url = url::Url::parse(&discovery.jwks_uri).map_err(|e| {
            InteropError::internal(format!("invalid jwks_uri of {}", issuer)).with_source(e)
        })?;
        if jwks_url.scheme() != "https" && jwks_url.scheme() != "http" {
            return Err(InteropError::internal(format!(
                "unsupported jwks_uri scheme of {}",
                issuer
            )));
        }

        self.http
            .get(jwks_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| fetch_error(issuer, e))?
            .json()
            .await
            .map_err(|e| fetch_error(issuer, e))
    }
}
