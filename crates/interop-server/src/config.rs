//! Interop server configuration

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use interop_client::config::{FederationEntry, InteropClientConfig, JoinServerEntry};

use crate::auth::proxy::IpNetwork;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ServerConfig {
    /// Plain HTTP listener, usually behind a TLS-terminating proxy
    #[serde(default)]
    pub listen: Option<SocketAddr>,

    /// TLS listener
    #[serde(default)]
    pub listen_tls: Option<SocketAddr>,

    /// Address for metrics HTTP endpoint
    #[serde(default = "default_metrics_addr")]
    pub metrics_listen: SocketAddr,

    /// Base directory of all files referenced by the configuration
    #[serde(default = "default_config_directory")]
    pub config_directory: String,

    /// HTTP path of the Backend Interfaces endpoint
    #[serde(default = "default_path")]
    pub path: String,

    #[serde(default)]
    pub tls: Option<TlsConfig>,

    /// Client CA bundle per sender ID (NetID, AS-ID or JoinEUI)
    #[serde(default)]
    pub sender_client_cas: BTreeMap<String, String>,

    /// Maximum request body size in bytes
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,

    /// Request handling timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,

    /// CIDR blocks allowed to forward client certificates
    #[serde(default)]
    pub trusted_proxies: Vec<String>,

    /// Address under which this server is reachable over TLS; audience of
    /// bearer tokens
    #[serde(default)]
    pub public_tls_address: Option<String>,

    #[serde(default)]
    pub token_issuers: Vec<TokenIssuerConfig>,

    /// Upstream Join Servers
    #[serde(default)]
    pub join_servers: Vec<JoinServerEntry>,

    #[serde(default)]
    pub join_server_federations: Vec<FederationEntry>,
}

fn default_metrics_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9090))
}

fn default_config_directory() -> String {
    ".".to_string()
}

fn default_path() -> String {
    "/".to_string()
}

fn default_max_body_size() -> usize {
    interop_common::protocol::MAX_MESSAGE_SIZE
}

fn default_request_timeout() -> u64 {
    10
}

/// TLS certificate of the listener
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TlsConfig {
    /// Path to certificate PEM file
    pub certificate: String,

    /// Path to private key PEM file
    pub key: String,
}

/// Issuer of bearer tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TokenIssuerConfig {
    pub url: String,

    /// Expected audience; defaults to the public TLS address
    #[serde(default)]
    pub audience_override: Option<String>,

    /// Key set cache TTL in seconds
    #[serde(default)]
    pub public_key_cache_ttl: Option<u64>,
}

/// Default key set cache TTL
pub const DEFAULT_PUBLIC_KEY_CACHE_TTL: Duration = Duration::from_secs(600);

impl TokenIssuerConfig {
    pub fn cache_ttl(&self) -> Duration {
        self.public_key_cache_ttl
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_PUBLIC_KEY_CACHE_TTL)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: Some(SocketAddr::from(([0, 0, 0, 0], 1885))),
            listen_tls: None,
            metrics_listen: default_metrics_addr(),
            config_directory: default_config_directory(),
            path: default_path(),
            tls: None,
            sender_client_cas: BTreeMap::new(),
            max_body_size: default_max_body_size(),
            request_timeout: default_request_timeout(),
            trusted_proxies: Vec::new(),
            public_tls_address: None,
            token_issuers: Vec::new(),
            join_servers: Vec::new(),
            join_server_federations: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a YAML file with `INTEROP__*` overrides
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::warn!(
                "Configuration file not found at {:?}, using defaults",
                path
            );
            let config = Self::default();
            config.validate()?;
            return Ok(config);
        }

        let builder = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Yaml))
            .add_source(
                config::Environment::with_prefix("INTEROP")
                    .separator("__")
                    .try_parsing(true),
            );

        let config: ServerConfig = builder
            .build()
            .with_context(|| format!("failed to read {}", path.display()))?
            .try_deserialize()
            .with_context(|| format!("invalid configuration in {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that do not need the referenced files
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.listen.is_none() && self.listen_tls.is_none() {
            bail!("one of listen or listen-tls is required");
        }
        if self.listen_tls.is_some() && self.tls.is_none() {
            bail!("listen-tls requires tls");
        }
        if !self.path.starts_with('/') {
            bail!("path must start with /");
        }
        if self.max_body_size == 0 {
            bail!("max-body-size must be positive");
        }
        if !self.token_issuers.is_empty()
            && self.public_tls_address.as_deref().map_or(true, str::is_empty)
        {
            bail!("token-issuers require public-tls-address");
        }
        self.trusted_proxy_networks()?;
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn trusted_proxy_networks(&self) -> anyhow::Result<Vec<IpNetwork>> {
        self.trusted_proxies
            .iter()
            .map(|cidr| {
                cidr.parse()
                    .with_context(|| format!("invalid trusted proxy {}", cidr))
            })
            .collect()
    }

    /// Join Server section for the client router
    pub fn interop_client(&self) -> InteropClientConfig {
        InteropClientConfig {
            join_servers: self.join_servers.clone(),
            join_server_federations: self.join_server_federations.clone(),
        }
    }

    /// Generate a sample configuration file
    pub fn generate_sample_config() -> String {
        r#"# Backend Interfaces interop server

# Plain HTTP listener (use behind a TLS-terminating proxy)
listen: "0.0.0.0:1885"

# TLS listener
# listen-tls: "0.0.0.0:8886"

# Address for metrics HTTP endpoint
metrics-listen: "0.0.0.0:9090"

# Base directory of every file referenced below
config-directory: "/etc/interop"

# HTTP path of the Backend Interfaces endpoint
path: "/"

# tls:
#   certificate: "tls/server.crt"
#   key: "tls/server.key"

# Client CAs trusted per sender ID (NetID, AS-ID or JoinEUI)
sender-client-cas:
  "000013": "ca/netid-000013.pem"
  "as.example.com": "ca/as.pem"

max-body-size: 32768
request-timeout: 10

# Proxies allowed to forward client certificates in X-Forwarded-Client-Cert
trusted-proxies:
  - "10.0.0.0/8"

# public-tls-address: "interop.example.com:8886"
# token-issuers:
#   - url: "https://iam.example.com"
#     public-key-cache-ttl: 600

# Upstream Join Servers
join-servers:
  - file: "js/example.yml"
    join-euis:
      - prefix: "70B3D57ED0000000"
        length: 36

join-server-federations: []
"#
        .to_string()
    }
}
