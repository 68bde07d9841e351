//! Server assembly
//!
//! Builds the dispatcher and listeners from a [`ServerConfig`] and runs them
//! until shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_rustls::TlsAcceptor;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use interop_client::ClientRouter;
use interop_common::crypto::create_server_config;
use interop_common::{Fetcher, FsFetcher};

use crate::auth::{AuthChain, MtlsAuthenticator, SenderTrust, TokenAuthenticator, TrustedProxies};
use crate::config::ServerConfig;
use crate::dispatcher::{Dispatcher, DispatcherSettings};
use crate::forward::ForwardingJoinServer;
use crate::metrics::start_metrics_server;
use crate::server::{build_router, drain, wait_for_shutdown, Listener, ShutdownSignal, DRAIN_TIMEOUT};

/// Timeout of token issuer key fetches
const JWKS_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything loaded from the configuration and the files it references
pub struct App {
    pub dispatcher: Arc<Dispatcher>,
    pub trust: Arc<SenderTrust>,
    pub proxies: TrustedProxies,
    pub tls: Option<TlsAcceptor>,
}

impl App {
    /// Load all referenced files and build the dispatcher
    pub fn build(config: &ServerConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let fetcher = FsFetcher::new(&config.config_directory);

        let router = ClientRouter::load(&config.interop_client(), &fetcher)
            .context("failed to load Join Servers")?;
        info!(routes = router.table().len(), "Loaded Join Server routes");

        let trust = Arc::new(
            SenderTrust::load(&config.sender_client_cas, &fetcher)
                .context("failed to load sender client CAs")?,
        );

        let mut auth = AuthChain::new().with(Arc::new(MtlsAuthenticator::new(Arc::clone(&trust))));
        if let Some(address) = config.public_tls_address.as_deref() {
            if !config.token_issuers.is_empty() {
                let http = reqwest::Client::builder()
                    .timeout(JWKS_FETCH_TIMEOUT)
                    .build()
                    .context("failed to create HTTP client")?;
                auth = auth.with(Arc::new(TokenAuthenticator::from_config(
                    &config.token_issuers,
                    address,
                    http,
                )));
                info!(issuers = config.token_issuers.len(), "Token authentication enabled");
            }
        }
        if trust.is_empty() && config.token_issuers.is_empty() {
            warn!("No sender client CAs or token issuers configured; every request will be rejected");
        }

        let dispatcher = Dispatcher::builder(DispatcherSettings {
            max_body_size: config.max_body_size,
            request_timeout: config.request_timeout(),
        })
        .authenticators(auth)
        .join_server(Arc::new(ForwardingJoinServer::new(router)))
        .build();

        let tls = match &config.tls {
            Some(tls) => {
                let cert = fetcher.read_all(&tls.certificate)?;
                let key = fetcher.read_all(&tls.key)?;
                let server_config = create_server_config(&cert, &key, Some(Arc::new(trust.pool())))
                    .context("failed to create TLS configuration")?;
                Some(TlsAcceptor::from(Arc::new(server_config)))
            }
            None => None,
        };

        Ok(Self {
            dispatcher: Arc::new(dispatcher),
            trust,
            proxies: TrustedProxies::new(config.trusted_proxy_networks()?),
            tls,
        })
    }
}

/// Run the server until Ctrl+C or SIGTERM
pub async fn run_server(config: ServerConfig) -> anyhow::Result<()> {
    let app = App::build(&config)?;
    let router = build_router(Arc::clone(&app.dispatcher), &config.path, app.proxies.clone());

    let (shutdown_tx, shutdown) = ShutdownSignal::channel();
    let tracker = TaskTracker::new();
    let mut listeners = Vec::new();

    if let Some(addr) = config.listen {
        let listener = Listener::bind("http", addr, None).await?;
        listeners.push(tokio::spawn(listener.run(router.clone(), shutdown.clone(), tracker.clone())));
    }
    if let (Some(addr), Some(acceptor)) = (config.listen_tls, app.tls.clone()) {
        let listener = Listener::bind("https", addr, Some(acceptor)).await?;
        listeners.push(tokio::spawn(listener.run(router.clone(), shutdown.clone(), tracker.clone())));
    }

    let metrics_addr = config.metrics_listen;
    let metrics_shutdown = shutdown.clone();
    let metrics = tokio::spawn(async move {
        if let Err(e) = start_metrics_server(metrics_addr, metrics_shutdown).await {
            error!("Metrics server error: {}", e);
        }
    });

    info!(
        "Interop server started (path {}, {} sender CAs)",
        config.path,
        app.trust.len()
    );

    wait_for_shutdown().await;
    info!("Initiating graceful shutdown...");
    let _ = shutdown_tx.send(true);

    for listener in listeners {
        let _ = listener.await;
    }
    let _ = metrics.await;
    drain(tracker, DRAIN_TIMEOUT).await;

    info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use interop_common::crypto::CertificateAuthority;

    #[test]
    fn test_build_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        let ca = CertificateAuthority::generate("Sender CA").unwrap();
        let server_ca = CertificateAuthority::generate("Server CA").unwrap();
        let server_cert = server_ca.issue("interop.example.com", &["interop.example.com".into()]).unwrap();

        std::fs::write(dir.path().join("ca.pem"), &ca.info().cert_pem).unwrap();
        std::fs::write(dir.path().join("server.crt"), &server_cert.cert_pem).unwrap();
        std::fs::write(dir.path().join("server.key"), &server_cert.key_pem).unwrap();
        std::fs::write(
            dir.path().join("js.yml"),
            "fqdn: js.example.com\nprotocol: BI1.1\n",
        )
        .unwrap();

        let yaml = format!(
            r#"
listen-tls: "127.0.0.1:0"
config-directory: "{}"
tls:
  certificate: "server.crt"
  key: "server.key"
sender-client-cas:
  "000013": "ca.pem"
join-servers:
  - file: "js.yml"
    join-euis:
      - prefix: "70B3D57ED0000000"
        length: 36
"#,
            dir.path().display()
        );
        let config: ServerConfig = config::Config::builder()
            .add_source(config::File::from_str(&yaml, config::FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        let app = App::build(&config).unwrap();
        assert!(app.tls.is_some());
        assert_eq!(app.trust.len(), 1);
    }

    #[test]
    fn test_build_fails_on_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            config_directory: dir.path().display().to_string(),
            sender_client_cas: [("000013".to_string(), "missing.pem".to_string())].into(),
            ..ServerConfig::default()
        };
        assert!(App::build(&config).is_err());
    }
}
