//! Join Server configuration
//!
//! The top-level configuration lists Join Server documents and the JoinEUI
//! prefixes they serve. Each document describes one Join Server endpoint and
//! is parsed strictly: unknown keys are rejected.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use interop_common::{Eui64, Eui64Prefix, Fetcher, ProtocolVersion};

/// Join Server section of the interop configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct InteropClientConfig {
    /// Single Join Servers
    #[serde(default)]
    pub join_servers: Vec<JoinServerEntry>,

    /// Groups of Join Servers that are raced
    #[serde(default)]
    pub join_server_federations: Vec<FederationEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct JoinServerEntry {
    /// Path of the Join Server document
    pub file: String,
    pub join_euis: Vec<Eui64Prefix>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FederationEntry {
    pub name: String,
    /// Paths of the Join Server documents of the members
    pub files: Vec<String>,
    pub join_euis: Vec<Eui64Prefix>,
}

/// Backend Interfaces version as written in Join Server documents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolSetting {
    #[serde(rename = "BI1.0")]
    Bi1_0,
    #[serde(rename = "BI1.1")]
    Bi1_1,
}

impl From<ProtocolSetting> for ProtocolVersion {
    fn from(p: ProtocolSetting) -> Self {
        match p {
            ProtocolSetting::Bi1_0 => ProtocolVersion::V1_0,
            ProtocolSetting::Bi1_1 => ProtocolVersion::V1_1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct TlsDocument {
    pub root_ca: Option<String>,
    pub certificate: Option<String>,
    pub key: Option<String>,
}

/// RPC paths of a Join Server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Paths {
    #[serde(default = "default_join_path")]
    pub join: String,
    #[serde(default = "default_rejoin_path")]
    pub rejoin: String,
    #[serde(default = "default_app_s_key_path")]
    pub app_s_key: String,
    #[serde(default = "default_home_ns_path")]
    pub home_ns: String,
}

fn default_join_path() -> String {
    "join".to_string()
}

fn default_rejoin_path() -> String {
    "rejoin".to_string()
}

fn default_app_s_key_path() -> String {
    "appskey".to_string()
}

fn default_home_ns_path() -> String {
    "homens".to_string()
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            join: default_join_path(),
            rejoin: default_rejoin_path(),
            app_s_key: default_app_s_key_path(),
            home_ns: default_home_ns_path(),
        }
    }
}

/// Join Server document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct JoinServerDocument {
    /// DNS suffix; the host is derived from the JoinEUI
    pub dns: Option<String>,
    /// Fixed host name
    pub fqdn: Option<String>,
    pub port: Option<u16>,
    pub scheme: Option<String>,
    pub api_version: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub basic_auth: Option<BasicAuth>,
    pub bearer_token: Option<String>,
    pub tls: Option<TlsDocument>,
    pub paths: Option<Paths>,
    pub protocol: ProtocolSetting,
}

/// How the host of a Join Server is found
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostResolution {
    Fqdn(String),
    /// Per-EUI name under a DNS suffix
    Dns(String),
}

impl HostResolution {
    pub fn host(&self, join_eui: &Eui64) -> String {
        match self {
            HostResolution::Fqdn(fqdn) => fqdn.clone(),
            HostResolution::Dns(suffix) => {
                format!("{}.{}", reversed_nibbles(join_eui), suffix.trim_start_matches('.'))
            }
        }
    }
}

/// `70B3D57ED0000000` becomes `0.0.0.0.0.0.0.d.e.7.5.d.3.b.0.7`
pub fn reversed_nibbles(eui: &Eui64) -> String {
    let hex = eui.to_string().to_lowercase();
    let nibbles: Vec<String> = hex.chars().rev().map(|c| c.to_string()).collect();
    nibbles.join(".")
}

/// Outbound authentication of a Join Server endpoint
#[derive(Debug, Clone, PartialEq)]
pub enum EndpointAuth {
    None,
    Basic(BasicAuth),
    Bearer(String),
}

/// TLS material read through the fetcher
#[derive(Debug, Clone, Default)]
pub struct TlsMaterial {
    pub root_ca: Option<Vec<u8>>,
    /// Client certificate followed by its key, PEM
    pub identity: Option<Vec<u8>>,
}

/// Fully resolved settings of one Join Server
#[derive(Debug, Clone)]
pub struct JoinServerSettings {
    /// Document path, used as the endpoint name
    pub name: String,
    pub protocol: ProtocolVersion,
    pub host: HostResolution,
    pub scheme: String,
    pub port: u16,
    pub api_version: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub auth: EndpointAuth,
    pub tls: TlsMaterial,
    pub paths: Paths,
}

impl JoinServerSettings {
    /// Read and resolve a Join Server document
    ///
    /// TLS files named by the document are relative to the document's directory.
    pub fn load(fetcher: &dyn Fetcher, file: &str) -> anyhow::Result<Self> {
        let data = fetcher
            .read_all(file)
            .with_context(|| format!("failed to read Join Server document {}", file))?;
        let document: JoinServerDocument = serde_yaml::from_slice(&data)
            .with_context(|| format!("invalid Join Server document {}", file))?;
        let base = Path::new(file)
            .parent()
            .and_then(|dir| dir.to_str())
            .unwrap_or_default();
        let document_fetcher = fetcher.open_at(base);
        Self::from_document(document_fetcher.as_ref(), file, document)
    }

    /// Resolve a parsed document; `fetcher` is rooted where the document's
    /// relative paths start
    pub fn from_document(
        fetcher: &dyn Fetcher,
        name: &str,
        document: JoinServerDocument,
    ) -> anyhow::Result<Self> {
        let host = match (document.dns, document.fqdn) {
            (Some(dns), None) => HostResolution::Dns(dns),
            (None, Some(fqdn)) => HostResolution::Fqdn(fqdn),
            (Some(_), Some(_)) => bail!("{}: dns and fqdn are mutually exclusive", name),
            (None, None) => bail!("{}: one of dns or fqdn is required", name),
        };

        let auth = match (document.basic_auth, document.bearer_token) {
            (Some(basic), None) => EndpointAuth::Basic(basic),
            (None, Some(token)) => EndpointAuth::Bearer(token),
            (None, None) => EndpointAuth::None,
            (Some(_), Some(_)) => bail!("{}: basic-auth and bearer-token are mutually exclusive", name),
        };

        let mut tls = TlsMaterial::default();
        if let Some(doc) = document.tls {
            if let Some(root_ca) = doc.root_ca {
                tls.root_ca = Some(
                    fetcher
                        .read_all(&root_ca)
                        .with_context(|| format!("{}: failed to read root CA", name))?,
                );
            }
            match (doc.certificate, doc.key) {
                (Some(cert), Some(key)) => {
                    let mut identity = fetcher
                        .read_all(&cert)
                        .with_context(|| format!("{}: failed to read certificate", name))?;
                    identity.push(b'\n');
                    identity.extend(
                        fetcher
                            .read_all(&key)
                            .with_context(|| format!("{}: failed to read key", name))?,
                    );
                    tls.identity = Some(identity);
                }
                (None, None) => {}
                _ => bail!("{}: tls certificate and key must be set together", name),
            }
        }

        let scheme = document.scheme.unwrap_or_else(|| "https".to_string());
        if scheme != "https" && scheme != "http" {
            bail!("{}: unsupported scheme {}", name, scheme);
        }

        Ok(Self {
            name: name.to_string(),
            protocol: document.protocol.into(),
            host,
            scheme,
            port: document.port.unwrap_or(443),
            api_version: document.api_version.filter(|v| !v.is_empty()),
            headers: document.headers,
            auth,
            tls,
            paths: document.paths.unwrap_or_default(),
        })
    }

    /// `scheme://host:port[/api-version]/<path>/<eui>`
    pub fn url(&self, host_eui: &Eui64, path: &str, eui: &Eui64) -> String {
        let mut segments: Vec<&str> = Vec::new();
        if let Some(version) = &self.api_version {
            segments.push(version.trim_matches('/'));
        }
        segments.push(path.trim_matches('/'));
        let eui = eui.to_string();
        segments.push(&eui);
        let segments: Vec<&str> = segments.into_iter().filter(|s| !s.is_empty()).collect();
        format!(
            "{}://{}:{}/{}",
            self.scheme,
            self.host.host(host_eui),
            self.port,
            segments.join("/")
        )
    }
}
