//! Trusted reverse proxies
//!
//! A TLS-terminating proxy in front of the plain HTTP listener forwards the
//! client certificate chain in `X-Forwarded-Client-Cert`, URL-encoded PEM.
//! The header is only honoured when the connection comes from a trusted
//! network.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use axum::http::HeaderMap;
use rustls::pki_types::CertificateDer;
use tracing::{debug, warn};

use interop_common::crypto::load_certs_from_pem;
use interop_common::{InteropError, Result};

pub const FORWARDED_CLIENT_CERT_HEADER: &str = "x-forwarded-client-cert";

/// CIDR block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpNetwork {
    addr: IpAddr,
    prefix: u8,
}

impl IpNetwork {
    pub fn new(addr: IpAddr, prefix: u8) -> Result<Self> {
        let max = match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        if prefix > max {
            return Err(InteropError::malformed(format!(
                "prefix length {} exceeds {}",
                prefix, max
            )));
        }
        Ok(Self { addr, prefix })
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        let ip = match ip {
            IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(ip),
            v4 => v4,
        };
        match (self.addr, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = u32::MAX.checked_shl(32 - u32::from(self.prefix)).unwrap_or(0);
                u32::from(net) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = u128::MAX.checked_shl(128 - u32::from(self.prefix)).unwrap_or(0);
                u128::from(net) & mask == u128::from(ip) & mask
            }
            _ => false,
        }
    }
}

impl FromStr for IpNetwork {
    type Err = InteropError;

    fn from_str(s: &str) -> Result<Self> {
        let (addr, prefix) = match s.split_once('/') {
            Some((addr, prefix)) => {
                let prefix = prefix
                    .parse::<u8>()
                    .map_err(|_| InteropError::malformed(format!("invalid prefix length in {}", s)))?;
                (addr, Some(prefix))
            }
            None => (s, None),
        };
        let addr: IpAddr = addr
            .parse()
            .map_err(|_| InteropError::malformed(format!("invalid address in {}", s)))?;
        let prefix = prefix.unwrap_or(match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        });
        Self::new(addr, prefix)
    }
}

impl fmt::Display for IpNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

/// Networks allowed to forward client certificates
#[derive(Debug, Clone, Default)]
pub struct TrustedProxies {
    networks: Vec<IpNetwork>,
}

impl TrustedProxies {
    pub fn new(networks: Vec<IpNetwork>) -> Self {
        Self { networks }
    }

    pub fn is_trusted(&self, addr: &SocketAddr) -> bool {
        self.networks.iter().any(|n| n.contains(addr.ip()))
    }

    /// Client certificate chain forwarded by a trusted proxy.
    ///
    /// Returns an empty chain when the remote is not trusted or nothing was
    /// forwarded.
    pub fn forwarded_client_certs(
        &self,
        remote: Option<SocketAddr>,
        headers: &HeaderMap,
    ) -> Result<Vec<CertificateDer<'static>>> {
        let Some(value) = headers.get(FORWARDED_CLIENT_CERT_HEADER) else {
            return Ok(Vec::new());
        };
        match remote {
            Some(addr) if self.is_trusted(&addr) => {}
            _ => {
                warn!(remote = ?remote, "Ignoring forwarded client certificate from untrusted peer");
                return Ok(Vec::new());
            }
        }

        let value = value
            .to_str()
            .map_err(|_| InteropError::malformed("invalid forwarded client certificate header"))?;
        // Envoy style `Cert="..."` or the bare encoded PEM
        let encoded = value
            .split(';')
            .find_map(|part| part.trim().strip_prefix("Cert="))
            .map(|cert| cert.trim_matches('"'))
            .unwrap_or(value);
        let pem = urlencoding::decode(encoded)
            .map_err(|e| InteropError::malformed("invalid forwarded client certificate").with_source(e))?;
        let certs = load_certs_from_pem(pem.as_bytes())?;
        debug!(count = certs.len(), "Using forwarded client certificate chain");
        Ok(certs)
    }
}
