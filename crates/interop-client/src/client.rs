//! HTTP exchange with a single Join Server
//!
//! One `reqwest::Client` per endpoint carries its TLS material. Requests are
//! bounded by the endpoint timeout and by the call context deadline,
//! whichever comes first.

use std::fmt;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use tracing::{debug, warn};

use interop_common::{
    metrics, CallContext, ErrorKind, Eui64, InteropError, Message, MessageCodec, ProtocolVersion,
    Result,
};

use crate::config::{EndpointAuth, JoinServerSettings};

/// Default timeout of outbound requests
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Header carrying the correlation ID
pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

/// RPCs offered by a Join Server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rpc {
    Join,
    Rejoin,
    AppSKey,
    HomeNs,
}

/// Map a transport error
pub(crate) fn reqwest_error(err: reqwest::Error) -> InteropError {
    if err.is_timeout() {
        InteropError::deadline_exceeded().with_source(err)
    } else {
        InteropError::transport("request to Join Server failed").with_source(err)
    }
}

/// Error for a non-success HTTP status without a parseable answer
pub(crate) fn status_error(status: StatusCode) -> InteropError {
    let kind = match status.as_u16() {
        400 => ErrorKind::MalformedMessage,
        401 => ErrorKind::Unauthenticated,
        403 => ErrorKind::CallerNotAuthorized,
        404 => ErrorKind::UnknownReceiver,
        408 | 504 => ErrorKind::DeadlineExceeded,
        500..=599 => ErrorKind::TransportFailure,
        _ => ErrorKind::Internal,
    };
    InteropError::new(kind, format!("Join Server returned HTTP {}", status))
}

/// A configured Join Server
pub struct Endpoint {
    settings: JoinServerSettings,
    http: reqwest::Client,
}

impl Endpoint {
    pub fn new(settings: JoinServerSettings) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(DEFAULT_TIMEOUT);

        if let Some(root_ca) = &settings.tls.root_ca {
            let cert = reqwest::Certificate::from_pem(root_ca).map_err(|e| {
                InteropError::internal(format!("{}: invalid root CA", settings.name)).with_source(e)
            })?;
            builder = builder.add_root_certificate(cert);
        }
        if let Some(identity) = &settings.tls.identity {
            let identity = reqwest::Identity::from_pem(identity).map_err(|e| {
                InteropError::internal(format!("{}: invalid client certificate", settings.name))
                    .with_source(e)
            })?;
            builder = builder.identity(identity);
        }

        let http = builder.build().map_err(|e| {
            InteropError::internal(format!("{}: failed to build HTTP client", settings.name))
                .with_source(e)
        })?;

        Ok(Self { settings, http })
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    pub fn protocol(&self) -> ProtocolVersion {
        self.settings.protocol
    }

    pub fn settings(&self) -> &JoinServerSettings {
        &self.settings
    }

    fn path(&self, rpc: Rpc) -> &str {
        let paths = &self.settings.paths;
        match rpc {
            Rpc::Join => &paths.join,
            Rpc::Rejoin => &paths.rejoin,
            Rpc::AppSKey => &paths.app_s_key,
            Rpc::HomeNs => &paths.home_ns,
        }
    }

    /// POST a request and decode the answer.
    ///
    /// `join_eui` selects the host, `path_eui` ends the URL.
    pub async fn exchange(
        &self,
        ctx: &CallContext,
        codec: &MessageCodec,
        rpc: Rpc,
        join_eui: &Eui64,
        path_eui: &Eui64,
        request: &Message,
    ) -> Result<Message> {
        let message_type = request.header().message_type.clone();
        let result = self
            .do_exchange(ctx, codec, rpc, join_eui, path_eui, request)
            .await;
        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.kind().as_str(),
        };
        metrics::record_outbound(&message_type, outcome);
        result
    }

    async fn do_exchange(
        &self,
        ctx: &CallContext,
        codec: &MessageCodec,
        rpc: Rpc,
        join_eui: &Eui64,
        path_eui: &Eui64,
        request: &Message,
    ) -> Result<Message> {
        let url = self.settings.url(join_eui, self.path(rpc), path_eui);
        let body = codec.encode(request)?;
        debug!(
            correlation_id = %ctx.correlation_id(),
            endpoint = %self.settings.name,
            url = %url,
            message_type = %request.header().message_type,
            "Sending request to Join Server"
        );

        let mut builder = self
            .http
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .header(REQUEST_ID_HEADER, ctx.correlation_id())
            .body(body);
        for (name, value) in &self.settings.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match &self.settings.auth {
            EndpointAuth::None => builder,
            EndpointAuth::Basic(basic) => builder.basic_auth(&basic.username, Some(&basic.password)),
            EndpointAuth::Bearer(token) => builder.bearer_auth(token),
        };
        if let Some(remaining) = ctx.remaining() {
            builder = builder.timeout(remaining.min(DEFAULT_TIMEOUT));
        }

        let response = ctx
            .run(async { builder.send().await.map_err(reqwest_error) })
            .await?;
        let status = response.status();
        let data = ctx
            .run(async { response.bytes().await.map_err(reqwest_error) })
            .await?;

        match codec.parse(&data) {
            Ok(answer) => Ok(answer),
            Err(err) if !status.is_success() => {
                warn!(
                    correlation_id = %ctx.correlation_id(),
                    endpoint = %self.settings.name,
                    status = %status,
                    "Join Server returned an error without a valid answer"
                );
                Err(status_error(status).with_source(err))
            }
            Err(err) => Err(err),
        }
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.settings.name)
            .field("protocol", &self.settings.protocol)
            .finish()
    }
}
