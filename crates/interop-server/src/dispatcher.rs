//! Inbound request dispatcher
//!
//! A request goes through these steps:
//!
//! 1. size gate
//! 2. header parse and validation against the version allowance table
//! 3. authentication in the role of the message type
//! 4. full body parse
//! 5. SenderNSID binding to the authenticated addresses (1.1)
//! 6. dispatch to the registered handler
//! 7. answer marshal
//!
//! Everything after the answer header is known ends in a well-formed answer
//! with HTTP 200. Bodies that cannot be framed as an answer get HTTP 400, and
//! requests without any credentials HTTP 401, both without a body.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use bytes::Bytes;
use futures::FutureExt;
use tracing::{debug, error, warn};

use interop_common::protocol::{error_to_result, AnswerResult, ResultCode, MAX_MESSAGE_SIZE};
use interop_common::{
    metrics, CallContext, ErrorKind, InteropError, Message, MessageCodec, MessageHeader,
    ProtocolVersion, Result,
};

use crate::auth::{AuthChain, Authenticated, PeerInfo};
use crate::handler::{IdentityServer, JoinServer};
use crate::logging::{InteropRequestLog, InteropRequestLogBuilder};

#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    pub max_body_size: usize,
    pub request_timeout: Duration,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            max_body_size: MAX_MESSAGE_SIZE,
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// A request as received by a listener
#[derive(Debug, Clone, Default)]
pub struct InboundRequest {
    /// Value of `X-Request-ID`
    pub request_id: Option<String>,
    pub peer: PeerInfo,
    pub body: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundResponse {
    pub status: StatusCode,
    /// JSON answer; absent for bare HTTP errors
    pub body: Option<Vec<u8>>,
    pub correlation_id: String,
}

enum Reply {
    Status(StatusCode),
    Answer(Vec<u8>),
}

const MAX_REQUEST_ID_LENGTH: usize = 128;

pub struct Dispatcher {
    settings: DispatcherSettings,
    codec: MessageCodec,
    auth: AuthChain,
    join_server: Option<Arc<dyn JoinServer>>,
    identity_server: Option<Arc<dyn IdentityServer>>,
}

/// Handlers are registered once, before the dispatcher serves requests
pub struct DispatcherBuilder {
    settings: DispatcherSettings,
    auth: AuthChain,
    join_server: Option<Arc<dyn JoinServer>>,
    identity_server: Option<Arc<dyn IdentityServer>>,
}

impl DispatcherBuilder {
    pub fn authenticators(mut self, auth: AuthChain) -> Self {
        self.auth = auth;
        self
    }

    pub fn join_server(mut self, join_server: Arc<dyn JoinServer>) -> Self {
        self.join_server = Some(join_server);
        self
    }

    pub fn identity_server(mut self, identity_server: Arc<dyn IdentityServer>) -> Self {
        self.identity_server = Some(identity_server);
        self
    }

    pub fn build(self) -> Dispatcher {
        Dispatcher {
            codec: MessageCodec::new().with_max_size(self.settings.max_body_size),
            settings: self.settings,
            auth: self.auth,
            join_server: self.join_server,
            identity_server: self.identity_server,
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl Dispatcher {
    pub fn builder(settings: DispatcherSettings) -> DispatcherBuilder {
        DispatcherBuilder {
            settings,
            auth: AuthChain::new(),
            join_server: None,
            identity_server: None,
        }
    }

    pub fn settings(&self) -> &DispatcherSettings {
        &self.settings
    }

    /// Handle one request
    pub async fn handle(&self, request: InboundRequest) -> InboundResponse {
        let correlation_id = request
            .request_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty() && id.len() <= MAX_REQUEST_ID_LENGTH)
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let ctx = CallContext::new(correlation_id.clone()).with_timeout(self.settings.request_timeout);

        let mut log = InteropRequestLog::builder(correlation_id.clone());
        if let Some(addr) = request.peer.remote_addr {
            log.remote_addr(addr);
        }

        let reply = self.process(&ctx, &request, &mut log).await;
        let (status, body) = match reply {
            Reply::Status(status) => (status, None),
            Reply::Answer(body) => (StatusCode::OK, Some(body)),
        };

        let result_label = match (&body, log.recorded_result_code()) {
            (Some(_), Some(code)) => code.to_string(),
            _ => status.as_str().to_string(),
        };
        metrics::record_inbound(
            log.message_type().unwrap_or("unknown"),
            &result_label,
            log.elapsed_secs(),
        );
        log.finish(status.as_u16());

        InboundResponse {
            status,
            body,
            correlation_id,
        }
    }

    async fn process(
        &self,
        ctx: &CallContext,
        request: &InboundRequest,
        log: &mut InteropRequestLogBuilder,
    ) -> Reply {
        if request.body.len() > self.settings.max_body_size {
            log.error(InteropError::message_too_large(
                request.body.len(),
                self.settings.max_body_size,
            ));
            return Reply::Status(StatusCode::BAD_REQUEST);
        }

        let header = match self.codec.parse_header(&request.body) {
            Ok(header) => header,
            Err(err) => {
                log.error(&err);
                return Reply::Status(StatusCode::BAD_REQUEST);
            }
        };
        log.header(&header);

        // Unknown types and answers sent as requests cannot be answered
        let answer_header = match header.answer_header() {
            Ok(answer_header) => answer_header,
            Err(err) => {
                log.error(&err);
                return Reply::Status(StatusCode::BAD_REQUEST);
            }
        };
        let Some(message_type) = header.message_type() else {
            return Reply::Status(StatusCode::BAD_REQUEST);
        };

        if !header.protocol_version.supports(message_type) {
            let err = InteropError::new(
                ErrorKind::InvalidProtocolVersion,
                format!("{} not supported in {}", message_type, header.protocol_version),
            );
            return self.error_reply(answer_header, &err, log);
        }

        if !request.peer.has_credentials() {
            log.error("no client certificate or authorization");
            return Reply::Status(StatusCode::UNAUTHORIZED);
        }

        let auth = match self
            .auth
            .authenticate(ctx, &request.peer, &header, message_type.sender_role())
            .await
        {
            Ok(auth) => auth,
            Err(err) => return self.error_reply(answer_header, &err, log),
        };

        let message = match self.codec.parse_body(&header, &request.body) {
            Ok(message) => message,
            Err(err) => return self.error_reply(answer_header, &err, log),
        };

        if let Err(err) = check_ns_id_binding(&header, &auth) {
            return self.error_reply(answer_header, &err, log);
        }

        if message_type.is_reserved() {
            debug!(
                correlation_id = %ctx.correlation_id(),
                message_type = %message_type,
                "Reserved message type"
            );
            let result = AnswerResult::new(ResultCode::Other, format!("{} not supported", message_type));
            return self.result_reply(answer_header, result, log);
        }

        let outcome = AssertUnwindSafe(self.dispatch(ctx, &auth, message))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                let reason = panic_message(panic.as_ref());
                error!(
                    correlation_id = %ctx.correlation_id(),
                    message_type = %message_type,
                    panic = %reason,
                    "Handler panicked"
                );
                Err(InteropError::internal("handler panicked"))
            });

        match outcome {
            Ok(mut answer) => {
                *answer.header_mut() = answer_header.clone();
                if let Some(result) = answer.result() {
                    log.result_code(result.result_code.as_str());
                }
                match self.codec.encode(&answer) {
                    Ok(body) => Reply::Answer(body),
                    Err(err) => {
                        warn!(
                            correlation_id = %ctx.correlation_id(),
                            error = %err,
                            "Failed to encode answer"
                        );
                        self.error_reply(answer_header, &InteropError::internal("failed to encode answer"), log)
                    }
                }
            }
            Err(err) => self.error_reply(answer_header, &err, log),
        }
    }

    async fn dispatch(&self, ctx: &CallContext, auth: &Authenticated, message: Message) -> Result<Message> {
        match message {
            Message::JoinReq(req) => Ok(Message::JoinAns(self.join_server()?.join(ctx, auth, req).await?)),
            Message::RejoinReq(req) => Ok(Message::RejoinAns(
                self.join_server()?.rejoin(ctx, auth, req).await?,
            )),
            Message::AppSKeyReq(req) => Ok(Message::AppSKeyAns(
                self.join_server()?.app_s_key(ctx, auth, req).await?,
            )),
            Message::HomeNsReq(req) => {
                let ans = match &self.identity_server {
                    Some(identity_server) => identity_server.home_ns(ctx, auth, req).await?,
                    None => self.join_server()?.home_ns(ctx, auth, req).await?,
                };
                Ok(Message::HomeNsAns(ans))
            }
            other => Err(InteropError::malformed(format!(
                "{} is not a request",
                other.header().message_type
            ))),
        }
    }

    fn join_server(&self) -> Result<&Arc<dyn JoinServer>> {
        self.join_server
            .as_ref()
            .ok_or_else(|| InteropError::new(ErrorKind::UnknownReceiver, "no Join Server registered"))
    }

    fn error_reply(
        &self,
        answer_header: MessageHeader,
        err: &InteropError,
        log: &mut InteropRequestLogBuilder,
    ) -> Reply {
        log.error(err);
        let code = error_to_result(err.kind(), answer_header.protocol_version);
        self.result_reply(answer_header, AnswerResult::new(code, err.description()), log)
    }

    fn result_reply(
        &self,
        answer_header: MessageHeader,
        result: AnswerResult,
        log: &mut InteropRequestLogBuilder,
    ) -> Reply {
        log.result_code(result.result_code.as_str());
        match Message::error_answer(answer_header, result).and_then(|m| self.codec.encode(&m)) {
            Ok(body) => Reply::Answer(body),
            Err(err) => {
                log.error(&err);
                Reply::Status(StatusCode::BAD_REQUEST)
            }
        }
    }
}

/// On 1.1 a SenderNSID must be one of the authenticated addresses
fn check_ns_id_binding(header: &MessageHeader, auth: &Authenticated) -> Result<()> {
    if header.protocol_version != ProtocolVersion::V1_1 {
        return Ok(());
    }
    let Some(ns_id) = header.sender_ns_id else {
        return Ok(());
    };
    let ns_id = ns_id.to_string();
    if auth.allows_address(&ns_id) {
        Ok(())
    } else {
        Err(InteropError::unknown_sender(format!(
            "SenderNSID {} not allowed for {}",
            ns_id, header.sender_id
        )))
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("settings", &self.settings)
            .field("authenticators", &self.auth.len())
            .field("join_server", &self.join_server.is_some())
            .field("identity_server", &self.identity_server.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{ApplicationIdentity, Authenticator, NetworkIdentity};
    use async_trait::async_trait;
    use interop_common::protocol::{AppSKeyAns, AppSKeyReq, HomeNsAns, HomeNsReq, JoinAns, JoinReq, Role};
    use interop_common::types::KeyEnvelope;
    use interop_common::{Buffer, NetId};
    use serde_json::{json, Value};

    /// Accepts `Bearer ok` as NetID 000013 or as-ID `as.example.com`
    struct StaticAuth;

    #[async_trait]
    impl Authenticator for StaticAuth {
        fn name(&self) -> &'static str {
            "static"
        }

        async fn authenticate(
            &self,
            _: &CallContext,
            peer: &PeerInfo,
            _: &MessageHeader,
            role: Role,
        ) -> Result<Option<Authenticated>> {
            if peer.bearer_token() != Some("ok") {
                return Ok(None);
            }
            Ok(Some(match role {
                Role::Network => Authenticated::Network(NetworkIdentity {
                    net_id: NetId([0x00, 0x00, 0x13]),
                    addresses: vec!["0102030405060708".into()],
                }),
                Role::Application => Authenticated::Application(ApplicationIdentity {
                    as_id: "as.example.com".into(),
                    addresses: vec!["as.example.com".into()],
                }),
            }))
        }
    }

    struct TestJoinServer;

    #[async_trait]
    impl JoinServer for TestJoinServer {
        async fn join(&self, _: &CallContext, _: &Authenticated, req: JoinReq) -> Result<JoinAns> {
            if req.dev_eui.to_string() == "0000000000000BAD" {
                return Err(InteropError::new(ErrorKind::MicFailed, "invalid MIC").with_cause("MIC mismatch"));
            }
            if req.dev_eui.to_string() == "00000000000000FF" {
                panic!("device table corrupted");
            }
            let mut ans = JoinAns::new(req.header.answer_header()?, AnswerResult::success());
            ans.phy_payload = Buffer(vec![0x20, 0x01, 0x02]);
            ans.lifetime = Some(0);
            ans.app_s_key = Some(KeyEnvelope::Plain { key: [0x11; 16] });
            Ok(ans)
        }

        async fn rejoin(&self, ctx: &CallContext, auth: &Authenticated, req: JoinReq) -> Result<JoinAns> {
            self.join(ctx, auth, req).await
        }

        async fn app_s_key(&self, _: &CallContext, _: &Authenticated, req: AppSKeyReq) -> Result<AppSKeyAns> {
            let mut ans = AppSKeyAns::new(req.header.answer_header()?, AnswerResult::success());
            ans.dev_eui = Some(req.dev_eui);
            ans.app_s_key = Some(KeyEnvelope::Wrapped {
                kek_label: "as:010042".into(),
                encrypted_key: vec![0x2A; 24],
            });
            ans.session_key_id = req.session_key_id;
            Ok(ans)
        }

        async fn home_ns(&self, _: &CallContext, _: &Authenticated, req: HomeNsReq) -> Result<HomeNsAns> {
            let mut ans = HomeNsAns::new(req.header.answer_header()?, AnswerResult::success());
            ans.h_net_id = Some(NetId([0x00, 0x00, 0x13]));
            Ok(ans)
        }
    }

    struct TestIdentityServer;

    #[async_trait]
    impl IdentityServer for TestIdentityServer {
        async fn home_ns(&self, _: &CallContext, _: &Authenticated, req: HomeNsReq) -> Result<HomeNsAns> {
            let mut ans = HomeNsAns::new(req.header.answer_header()?, AnswerResult::success());
            ans.h_net_id = Some(NetId([0x00, 0x00, 0x42]));
            Ok(ans)
        }
    }

    fn dispatcher() -> Dispatcher {
        Dispatcher::builder(DispatcherSettings::default())
            .authenticators(AuthChain::new().with(Arc::new(StaticAuth)))
            .join_server(Arc::new(TestJoinServer))
            .build()
    }

    fn request(body: Value) -> InboundRequest {
        InboundRequest {
            request_id: Some("req-1".into()),
            peer: PeerInfo {
                authorization: Some("Bearer ok".into()),
                ..Default::default()
            },
            body: Bytes::from(serde_json::to_vec(&body).unwrap()),
        }
    }

    fn join_req(version: &str, dev_eui: &str) -> Value {
        let mut body = json!({
            "ProtocolVersion": version,
            "TransactionID": 42,
            "MessageType": "JoinReq",
            "SenderID": "000013",
            "ReceiverID": "70B3D57ED0000000",
            "SenderToken": "AABB",
            "MACVersion": "1.0.3",
            "PHYPayload": "00000000D07ED5B3700100000000000000A1B2C3D4E5F6",
            "DevEUI": dev_eui,
            "DevAddr": "26011234",
            "DLSettings": "00",
            "RxDelay": 1
        });
        if version == "1.1" {
            body["SenderNSID"] = json!("0102030405060708");
        }
        body
    }

    fn answer(response: &InboundResponse) -> Value {
        assert_eq!(response.status, StatusCode::OK);
        serde_json::from_slice(response.body.as_ref().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_join_success() {
        let response = dispatcher().handle(request(join_req("1.1", "0000000000000001"))).await;
        assert_eq!(response.correlation_id, "req-1");
        let ans = answer(&response);
        assert_eq!(ans["MessageType"], "JoinAns");
        assert_eq!(ans["TransactionID"], 42);
        assert_eq!(ans["SenderID"], "70B3D57ED0000000");
        assert_eq!(ans["ReceiverID"], "000013");
        assert_eq!(ans["ReceiverNSID"], "0102030405060708");
        assert_eq!(ans["ReceiverToken"], "AABB");
        assert_eq!(ans["Result"]["ResultCode"], "Success");
        assert_eq!(ans["PHYPayload"], "200102");
        assert_eq!(ans["Lifetime"], 0);
    }

    #[tokio::test]
    async fn test_handler_error_becomes_answer() {
        let response = dispatcher().handle(request(join_req("1.0", "0000000000000BAD"))).await;
        let ans = answer(&response);
        assert_eq!(ans["MessageType"], "JoinAns");
        assert_eq!(ans["Result"]["ResultCode"], "MICFailed");
        assert_eq!(ans["Result"]["Description"], "MIC mismatch");
        assert!(ans.get("PHYPayload").is_none());
    }

    #[tokio::test]
    async fn test_panic_becomes_other() {
        let response = dispatcher().handle(request(join_req("1.1", "00000000000000FF"))).await;
        let ans = answer(&response);
        assert_eq!(ans["Result"]["ResultCode"], "Other");
    }

    #[tokio::test]
    async fn test_missing_ns_id_v1_1() {
        let mut body = join_req("1.1", "0000000000000001");
        body.as_object_mut().unwrap().remove("SenderNSID");
        let ans = answer(&dispatcher().handle(request(body)).await);
        assert_eq!(ans["Result"]["ResultCode"], "MalformedMessage");
        assert_eq!(ans["Result"]["Description"], "missing SenderNSID");
    }

    #[tokio::test]
    async fn test_ns_id_on_v1_0() {
        let mut body = join_req("1.0", "0000000000000001");
        body["SenderNSID"] = json!("0102030405060708");
        let ans = answer(&dispatcher().handle(request(body)).await);
        assert_eq!(ans["Result"]["ResultCode"], "MalformedRequest");
    }

    #[tokio::test]
    async fn test_ns_id_binding() {
        let mut body = join_req("1.1", "0000000000000001");
        body["SenderNSID"] = json!("0807060504030201");
        let ans = answer(&dispatcher().handle(request(body)).await);
        assert_eq!(ans["Result"]["ResultCode"], "UnknownSender");
    }

    #[tokio::test]
    async fn test_rejoin_on_v1_0() {
        let mut body = join_req("1.0", "0000000000000001");
        body["MessageType"] = json!("RejoinReq");
        let ans = answer(&dispatcher().handle(request(body)).await);
        assert_eq!(ans["MessageType"], "RejoinAns");
        assert_eq!(ans["Result"]["ResultCode"], "InvalidProtocolVersion");
    }

    #[tokio::test]
    async fn test_unauthenticated() {
        let mut req = request(join_req("1.1", "0000000000000001"));
        req.peer.authorization = Some("Bearer wrong".into());
        let ans = answer(&dispatcher().handle(req).await);
        assert_eq!(ans["Result"]["ResultCode"], "UnknownSender");

        let mut req = request(join_req("1.1", "0000000000000001"));
        req.peer.authorization = None;
        let response = dispatcher().handle(req).await;
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
        assert!(response.body.is_none());
    }

    #[tokio::test]
    async fn test_unframeable_requests() {
        let d = dispatcher();
        for body in [
            json!({"ProtocolVersion": "1.1", "MessageType": "JoinAns", "SenderID": "a", "ReceiverID": "b"}),
            json!({"ProtocolVersion": "1.1", "MessageType": "BogusReq", "SenderID": "a", "ReceiverID": "b"}),
            json!({"ProtocolVersion": "2.0", "MessageType": "JoinReq", "SenderID": "a", "ReceiverID": "b"}),
            json!([1, 2, 3]),
        ] {
            let response = d.handle(request(body)).await;
            assert_eq!(response.status, StatusCode::BAD_REQUEST);
            assert!(response.body.is_none());
        }

        let mut req = request(json!({}));
        req.body = Bytes::from(vec![b' '; MAX_MESSAGE_SIZE + 1]);
        assert_eq!(d.handle(req).await.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_reserved_type_answers_other() {
        let body = json!({
            "ProtocolVersion": "1.1",
            "TransactionID": 5,
            "MessageType": "PRStartReq",
            "SenderID": "000013",
            "ReceiverID": "000042",
            "PHYPayload": "40"
        });
        let ans = answer(&dispatcher().handle(request(body)).await);
        assert_eq!(ans["MessageType"], "PRStartAns");
        assert_eq!(ans["TransactionID"], 5);
        assert_eq!(ans["Result"]["ResultCode"], "Other");
    }

    #[tokio::test]
    async fn test_app_s_key() {
        let body = json!({
            "ProtocolVersion": "1.0",
            "TransactionID": 3,
            "MessageType": "AppSKeyReq",
            "SenderID": "as.example.com",
            "ReceiverID": "70B3D57ED0000000",
            "DevEUI": "0000000000000001",
            "SessionKeyID": "0102"
        });
        let ans = answer(&dispatcher().handle(request(body)).await);
        assert_eq!(ans["MessageType"], "AppSKeyAns");
        assert_eq!(ans["ReceiverID"], "as.example.com");
        assert_eq!(ans["AppSKey"]["KEKLabel"], "as:010042");
        assert_eq!(ans["SessionKeyID"], "0102");
    }

    #[tokio::test]
    async fn test_home_ns_precedence() {
        let body = json!({
            "ProtocolVersion": "1.1",
            "MessageType": "HomeNSReq",
            "SenderID": "000013",
            "SenderNSID": "0102030405060708",
            "ReceiverID": "70B3D57ED0000000",
            "DevEUI": "0000000000000001"
        });

        let ans = answer(&dispatcher().handle(request(body.clone())).await);
        assert_eq!(ans["HNetID"], "000013");

        let with_is = Dispatcher::builder(DispatcherSettings::default())
            .authenticators(AuthChain::new().with(Arc::new(StaticAuth)))
            .join_server(Arc::new(TestJoinServer))
            .identity_server(Arc::new(TestIdentityServer))
            .build();
        let ans = answer(&with_is.handle(request(body.clone())).await);
        assert_eq!(ans["MessageType"], "HomeNSAns");
        assert_eq!(ans["HNetID"], "000042");

        let without_js = Dispatcher::builder(DispatcherSettings::default())
            .authenticators(AuthChain::new().with(Arc::new(StaticAuth)))
            .build();
        let ans = answer(&without_js.handle(request(body)).await);
        assert_eq!(ans["Result"]["ResultCode"], "UnknownReceiver");
    }

    #[tokio::test]
    async fn test_correlation_id_minted() {
        let mut req = request(join_req("1.1", "0000000000000001"));
        req.request_id = None;
        let response = dispatcher().handle(req).await;
        assert_eq!(response.correlation_id.len(), 36);
    }
}
