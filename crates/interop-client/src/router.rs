//! JoinEUI routing and the client RPCs
//!
//! The routing table maps JoinEUI prefixes to routes. It is sorted once at
//! load by prefix length, longest first, then by prefix value, so the first
//! match is the most specific one. Two prefixes of the same length that
//! overlap are a configuration error.

use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, info};

use interop_common::protocol::{AppSKeyReq, HomeNsReq, JoinReq, MessageHeader};
use interop_common::{
    CallContext, ErrorKind, Eui64, Eui64Prefix, Fetcher, InteropError, Message, MessageCodec,
    MessageType, NetId, ProtocolVersion, Result,
};

use crate::client::{Endpoint, Rpc};
use crate::config::{InteropClientConfig, JoinServerSettings};
use crate::race::race;
use crate::rpc::{
    AppSKeyRequest, AppSKeyResponse, HomeNsRequest, HomeNsResponse, JoinRequest, JoinResponse,
};

/// Join Servers serving a set of JoinEUI prefixes
#[derive(Debug)]
pub struct JoinServerRoute {
    pub name: String,
    pub endpoints: Vec<Arc<Endpoint>>,
}

/// Longest-prefix JoinEUI table
#[derive(Debug, Default)]
pub struct RoutingTable {
    entries: Vec<(Eui64Prefix, Arc<JoinServerRoute>)>,
}

impl RoutingTable {
    pub fn new(mut entries: Vec<(Eui64Prefix, Arc<JoinServerRoute>)>) -> Result<Self> {
        entries.sort_by(|(a, _), (b, _)| {
            b.length()
                .cmp(&a.length())
                .then_with(|| b.masked_value().cmp(&a.masked_value()))
        });
        for pair in entries.windows(2) {
            let (a, route_a) = &pair[0];
            let (b, route_b) = &pair[1];
            if a.length() == b.length() && a.overlaps(b) {
                return Err(InteropError::malformed(format!(
                    "JoinEUI prefix {} of {} overlaps with {} of {}",
                    a, route_a.name, b, route_b.name
                )));
            }
        }
        Ok(Self { entries })
    }

    /// Load all configured Join Servers
    pub fn load(config: &InteropClientConfig, fetcher: &dyn Fetcher) -> anyhow::Result<Self> {
        let mut entries = Vec::new();

        for js in &config.join_servers {
            let settings = JoinServerSettings::load(fetcher, &js.file)?;
            let endpoint = Endpoint::new(settings)
                .with_context(|| format!("failed to set up Join Server {}", js.file))?;
            let route = Arc::new(JoinServerRoute {
                name: js.file.clone(),
                endpoints: vec![Arc::new(endpoint)],
            });
            for prefix in &js.join_euis {
                entries.push((*prefix, Arc::clone(&route)));
            }
            info!(file = %js.file, prefixes = js.join_euis.len(), "Loaded Join Server");
        }

        for federation in &config.join_server_federations {
            let mut endpoints = Vec::with_capacity(federation.files.len());
            for file in &federation.files {
                let settings = JoinServerSettings::load(fetcher, file)?;
                let endpoint = Endpoint::new(settings).with_context(|| {
                    format!("failed to set up Join Server {} of {}", file, federation.name)
                })?;
                endpoints.push(Arc::new(endpoint));
            }
            let route = Arc::new(JoinServerRoute {
                name: federation.name.clone(),
                endpoints,
            });
            for prefix in &federation.join_euis {
                entries.push((*prefix, Arc::clone(&route)));
            }
            info!(
                name = %federation.name,
                members = federation.files.len(),
                "Loaded Join Server federation"
            );
        }

        Ok(Self::new(entries)?)
    }

    /// Route of the most specific prefix matching the JoinEUI
    pub fn select(&self, join_eui: &Eui64) -> Result<&Arc<JoinServerRoute>> {
        self.entries
            .iter()
            .find(|(prefix, _)| prefix.matches(join_eui))
            .map(|(_, route)| route)
            .ok_or_else(|| InteropError::not_registered(join_eui))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Outbound Backend Interfaces client
#[derive(Debug, Clone)]
pub struct ClientRouter {
    table: Arc<RoutingTable>,
    codec: MessageCodec,
}

fn unexpected_answer(answer: &Message, expected: MessageType) -> InteropError {
    InteropError::malformed(format!(
        "expected {}, got {}",
        expected,
        answer.header().message_type
    ))
}

fn check_result(answer: &Message) -> Result<()> {
    match answer.result() {
        Some(result) => interop_common::protocol::result_to_error(&result.result_code, &result.description),
        None => Err(InteropError::malformed("answer without Result")),
    }
}

impl ClientRouter {
    pub fn new(table: RoutingTable) -> Self {
        Self {
            table: Arc::new(table),
            codec: MessageCodec::new(),
        }
    }

    pub fn load(config: &InteropClientConfig, fetcher: &dyn Fetcher) -> anyhow::Result<Self> {
        Ok(Self::new(RoutingTable::load(config, fetcher)?))
    }

    pub fn table(&self) -> &RoutingTable {
        &self.table
    }

    /// Route for a JoinEUI
    pub fn select(&self, join_eui: &Eui64) -> Result<&Arc<JoinServerRoute>> {
        self.table.select(join_eui)
    }

    /// Join on behalf of a Network Server
    pub async fn do_join(
        &self,
        ctx: &CallContext,
        net_id: NetId,
        ns_id: Option<Eui64>,
        request: &JoinRequest,
    ) -> Result<JoinResponse> {
        self.join_like(ctx, net_id, ns_id, request, MessageType::JoinReq).await
    }

    /// Rejoin; only Join Servers speaking 1.1 support it
    pub async fn do_rejoin(
        &self,
        ctx: &CallContext,
        net_id: NetId,
        ns_id: Option<Eui64>,
        request: &JoinRequest,
    ) -> Result<JoinResponse> {
        self.join_like(ctx, net_id, ns_id, request, MessageType::RejoinReq).await
    }

    async fn join_like(
        &self,
        ctx: &CallContext,
        net_id: NetId,
        ns_id: Option<Eui64>,
        request: &JoinRequest,
        message_type: MessageType,
    ) -> Result<JoinResponse> {
        let route = self.table.select(&request.join_eui)?;
        debug!(
            correlation_id = %ctx.correlation_id(),
            route = %route.name,
            join_eui = %request.join_eui,
            dev_eui = %request.dev_eui,
            "Routing {}", message_type
        );
        let codec = self.codec.clone();
        let request = request.clone();
        let outcome = race(ctx, &route.endpoints, move |ctx, endpoint| {
            let codec = codec.clone();
            let request = request.clone();
            async move {
                join_endpoint(&ctx, &codec, &endpoint, net_id, ns_id, &request, message_type).await
            }
        })
        .await;
        Ok(outcome?)
    }

    /// Fetch the application session key on behalf of an Application Server
    pub async fn do_app_s_key(
        &self,
        ctx: &CallContext,
        as_id: &str,
        request: &AppSKeyRequest,
    ) -> Result<AppSKeyResponse> {
        let route = self.table.select(&request.join_eui)?;
        let codec = self.codec.clone();
        let request = request.clone();
        let as_id = as_id.to_string();
        let outcome = race(ctx, &route.endpoints, move |ctx, endpoint| {
            let codec = codec.clone();
            let request = request.clone();
            let as_id = as_id.clone();
            async move {
                let header = MessageHeader {
                    transaction_id: request.transaction_id,
                    ..MessageHeader::new(
                        endpoint.protocol(),
                        MessageType::AppSKeyReq,
                        as_id,
                        request.join_eui.to_string(),
                    )
                };
                let message = Message::AppSKeyReq(AppSKeyReq {
                    header,
                    dev_eui: request.dev_eui,
                    session_key_id: request.session_key_id.clone(),
                });
                let answer = endpoint
                    .exchange(&ctx, &codec, Rpc::AppSKey, &request.join_eui, &request.dev_eui, &message)
                    .await?;
                check_result(&answer)?;
                match answer {
                    Message::AppSKeyAns(ans) => AppSKeyResponse::from_answer(ans, &request),
                    other => Err(unexpected_answer(&other, MessageType::AppSKeyAns)),
                }
            }
        })
        .await;
        Ok(outcome?)
    }

    /// Look up the home network of a device
    pub async fn do_home_ns(
        &self,
        ctx: &CallContext,
        net_id: NetId,
        ns_id: Option<Eui64>,
        request: &HomeNsRequest,
    ) -> Result<HomeNsResponse> {
        let route = self.table.select(&request.join_eui)?;
        let codec = self.codec.clone();
        let request = request.clone();
        let outcome = race(ctx, &route.endpoints, move |ctx, endpoint| {
            let codec = codec.clone();
            let request = request.clone();
            async move {
                let header = network_header(
                    &endpoint,
                    MessageType::HomeNsReq,
                    net_id,
                    ns_id,
                    &request.join_eui,
                    request.transaction_id,
                )?;
                let message = Message::HomeNsReq(HomeNsReq {
                    header,
                    dev_eui: request.dev_eui,
                });
                let answer = endpoint
                    .exchange(&ctx, &codec, Rpc::HomeNs, &request.join_eui, &request.join_eui, &message)
                    .await?;
                check_result(&answer)?;
                match answer {
                    Message::HomeNsAns(ans) => HomeNsResponse::from_answer(ans),
                    other => Err(unexpected_answer(&other, MessageType::HomeNsAns)),
                }
            }
        })
        .await;
        Ok(outcome?)
    }
}

/// Header of a request from a Network Server
fn network_header(
    endpoint: &Endpoint,
    message_type: MessageType,
    net_id: NetId,
    ns_id: Option<Eui64>,
    join_eui: &Eui64,
    transaction_id: u32,
) -> Result<MessageHeader> {
    let protocol = endpoint.protocol();
    if !protocol.supports(message_type) {
        return Err(InteropError::new(
            ErrorKind::InvalidProtocolVersion,
            format!("{} does not support {}", endpoint.name(), message_type),
        ));
    }
    let mut header = MessageHeader::new(protocol, message_type, net_id.to_string(), join_eui.to_string());
    header.transaction_id = transaction_id;
    if protocol == ProtocolVersion::V1_1 {
        let ns_id = ns_id.ok_or_else(|| {
            InteropError::malformed(format!("{} requires a SenderNSID", message_type))
        })?;
        header.sender_ns_id = Some(ns_id);
    }
    Ok(header)
}

async fn join_endpoint(
    ctx: &CallContext,
    codec: &MessageCodec,
    endpoint: &Endpoint,
    net_id: NetId,
    ns_id: Option<Eui64>,
    request: &JoinRequest,
    message_type: MessageType,
) -> Result<JoinResponse> {
    let header = network_header(
        endpoint,
        message_type,
        net_id,
        ns_id,
        &request.join_eui,
        request.transaction_id,
    )?;
    let body = JoinReq {
        header,
        mac_version: request.mac_version,
        phy_payload: request.phy_payload.clone(),
        dev_eui: request.dev_eui,
        dev_addr: request.dev_addr,
        dl_settings: request.dl_settings.clone(),
        rx_delay: request.rx_delay,
        cf_list: request.cf_list.clone(),
    };
    let (message, rpc, expected) = match message_type {
        MessageType::RejoinReq => (Message::RejoinReq(body), Rpc::Rejoin, MessageType::RejoinAns),
        _ => (Message::JoinReq(body), Rpc::Join, MessageType::JoinAns),
    };

    let answer = endpoint
        .exchange(ctx, codec, rpc, &request.join_eui, &request.join_eui, &message)
        .await?;
    check_result(&answer)?;
    match answer {
        Message::JoinAns(ans) if expected == MessageType::JoinAns => {
            JoinResponse::from_answer(ans, request.mac_version, endpoint.protocol())
        }
        Message::RejoinAns(ans) if expected == MessageType::RejoinAns => {
            JoinResponse::from_answer(ans, request.mac_version, endpoint.protocol())
        }
        other => Err(unexpected_answer(&other, expected)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FederationEntry, JoinServerEntry};
    use interop_common::types::{KeyEnvelope, RxDelay};
    use interop_common::{Buffer, DevAddr, MacVersion, MemFetcher};
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn eui(s: &str) -> Eui64 {
        s.parse().unwrap()
    }

    fn prefix(s: &str, length: u8) -> Eui64Prefix {
        Eui64Prefix::new(eui(s), length).unwrap()
    }

    fn js_document(server: &MockServer, protocol: &str) -> String {
        let addr = server.address();
        format!(
            "fqdn: {}\nport: {}\nscheme: http\nprotocol: {}\nheaders:\n  X-Operator: test\n",
            addr.ip(),
            addr.port(),
            protocol
        )
    }

    fn single_js(server: &MockServer, protocol: &str, join_eui_prefix: Eui64Prefix) -> ClientRouter {
        let fetcher = MemFetcher::new().with_file("js.yml", js_document(server, protocol));
        let config = InteropClientConfig {
            join_servers: vec![JoinServerEntry {
                file: "js.yml".into(),
                join_euis: vec![join_eui_prefix],
            }],
            join_server_federations: vec![],
        };
        ClientRouter::load(&config, &fetcher).unwrap()
    }

    fn join_request() -> JoinRequest {
        JoinRequest {
            transaction_id: 11,
            join_eui: eui("70B3D57ED0000000"),
            dev_eui: eui("0000000000000001"),
            dev_addr: DevAddr([0x26, 0x01, 0x12, 0x34]),
            mac_version: MacVersion::V1_1,
            phy_payload: Buffer(vec![0x00; 23]),
            dl_settings: Buffer(vec![0x00]),
            rx_delay: RxDelay::new(5).unwrap(),
            cf_list: Buffer::default(),
        }
    }

    fn join_ans(result: &str) -> serde_json::Value {
        json!({
            "ProtocolVersion": "1.1",
            "TransactionID": 11,
            "MessageType": "JoinAns",
            "SenderID": "70B3D57ED0000000",
            "ReceiverID": "000013",
            "ReceiverNSID": "0102030405060708",
            "PHYPayload": "20AABBCC",
            "Result": {"ResultCode": result},
            "Lifetime": 3600,
            "FNwkSIntKey": {"AESKey": "000102030405060708090A0B0C0D0E0F"},
            "SNwkSIntKey": {"AESKey": "000102030405060708090A0B0C0D0E0F"},
            "NwkSEncKey": {"AESKey": "000102030405060708090A0B0C0D0E0F"},
            "AppSKey": {"KEKLabel": "as:010042", "AESKey": "2A195CC93CA54AD82CFB36C83D91450F"}
        })
    }

    #[test]
    fn test_prefix_order_and_overlap() {
        let route = |name: &str| {
            Arc::new(JoinServerRoute {
                name: name.to_string(),
                endpoints: vec![],
            })
        };
        let table = RoutingTable::new(vec![
            (prefix("0000000000000000", 0), route("default")),
            (prefix("70B3D57ED0000000", 36), route("specific")),
            (prefix("70B3D50000000000", 24), route("vendor")),
        ])
        .unwrap();
        assert_eq!(table.select(&eui("70B3D57ED0000001")).unwrap().name, "specific");
        assert_eq!(table.select(&eui("70B3D57ED1000001")).unwrap().name, "vendor");
        assert_eq!(table.select(&eui("0101010101010101")).unwrap().name, "default");

        let overlap = RoutingTable::new(vec![
            (prefix("70B3D57ED0000000", 36), route("a")),
            (prefix("70B3D57ED0000FFF", 36), route("b")),
        ]);
        assert!(overlap.is_err());

        let empty = RoutingTable::default();
        let err = empty.select(&eui("70B3D57ED0000000")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotRegistered);
    }

    #[tokio::test]
    async fn test_app_s_key_v1_0() {
        let session_key_id = vec![
            0x01, 0x6B, 0xFA, 0x7B, 0xAD, 0x47, 0x56, 0x34, 0x6A, 0x67, 0x49, 0x81, 0xE7, 0x5C, 0xDB, 0xDC,
        ];
        let wrapped_key = vec![
            0x2A, 0x19, 0x5C, 0xC9, 0x3C, 0xA5, 0x4A, 0xD8, 0x2C, 0xFB, 0x36, 0xC8, 0x3D, 0x91, 0x45, 0x0F,
            0x3D, 0x2D, 0x52, 0x35, 0x56, 0xF1, 0x3E, 0x69,
        ];

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/appskey/0102030405060708"))
            .and(header("content-type", "application/json"))
            .and(header("x-operator", "test"))
            .and(body_partial_json(json!({
                "ProtocolVersion": "1.0",
                "MessageType": "AppSKeyReq",
                "SenderID": "test-as",
                "ReceiverID": "70B3D57ED0000000",
                "DevEUI": "0102030405060708",
                "SessionKeyID": "016BFA7BAD4756346A674981E75CDBDC"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ProtocolVersion": "1.0",
                "TransactionID": 0,
                "MessageType": "AppSKeyAns",
                "SenderID": "70B3D57ED0000000",
                "ReceiverID": "test-as",
                "Result": {"ResultCode": "Success"},
                "DevEUI": "0102030405060708",
                "AppSKey": {"KEKLabel": "as:010042", "AESKey": "2A195CC93CA54AD82CFB36C83D91450F3D2D523556F13E69"},
                "SessionKeyID": "016BFA7BAD4756346A674981E75CDBDC"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let router = single_js(&server, "BI1.0", prefix("70B3D57ED0000000", 64));
        let res = router
            .do_app_s_key(
                &CallContext::background(),
                "test-as",
                &AppSKeyRequest {
                    transaction_id: 0,
                    join_eui: eui("70B3D57ED0000000"),
                    dev_eui: eui("0102030405060708"),
                    session_key_id: Buffer(session_key_id.clone()),
                },
            )
            .await
            .unwrap();
        match res.app_s_key {
            KeyEnvelope::Wrapped { kek_label, encrypted_key } => {
                assert_eq!(kek_label, "as:010042");
                assert_eq!(encrypted_key, wrapped_key);
            }
            other => panic!("expected wrapped AppSKey, got {:?}", other),
        }
        assert_eq!(res.session_key_id, Buffer(session_key_id));
    }

    #[tokio::test]
    async fn test_app_s_key_unknown_join_eui() {
        let server = MockServer::start().await;
        let router = single_js(&server, "BI1.0", prefix("EC656E0000000000", 56));
        let err = router
            .do_app_s_key(
                &CallContext::background(),
                "test-as",
                &AppSKeyRequest {
                    transaction_id: 0,
                    join_eui: eui("70B3D57ED0000000"),
                    dev_eui: eui("0102030405060708"),
                    session_key_id: Buffer(vec![0x01]),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotRegistered);
    }

    #[tokio::test]
    async fn test_join_mic_failed_v1_0() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/join/70B3D57ED0000000"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ProtocolVersion": "1.0",
                "TransactionID": 11,
                "MessageType": "JoinAns",
                "SenderID": "70B3D57ED0000000",
                "ReceiverID": "000013",
                "Result": {"ResultCode": "MICFailed", "Description": "invalid MIC"}
            })))
            .mount(&server)
            .await;

        let router = single_js(&server, "BI1.0", prefix("70B3D57ED0000000", 36));
        let err = router
            .do_join(&CallContext::background(), NetId([0x00, 0x00, 0x13]), None, &join_request())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MicFailed);
        assert_eq!(err.description(), "invalid MIC");
    }

    #[tokio::test]
    async fn test_join_v1_1_synthesizes_session_key_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/join/70B3D57ED0000000"))
            .and(body_partial_json(json!({
                "ProtocolVersion": "1.1",
                "SenderID": "000013",
                "SenderNSID": "0102030405060708",
                "TransactionID": 11
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(join_ans("Success")))
            .mount(&server)
            .await;

        let router = single_js(&server, "BI1.1", prefix("70B3D57ED0000000", 36));
        let res = router
            .do_join(
                &CallContext::background(),
                NetId([0x00, 0x00, 0x13]),
                Some(eui("0102030405060708")),
                &join_request(),
            )
            .await
            .unwrap();
        assert_eq!(res.lifetime, Some(3600));
        assert_eq!(res.phy_payload, Buffer(vec![0x20, 0xAA, 0xBB, 0xCC]));
        assert!(interop_common::protocol::session_key::is_generated_session_key_id(
            res.session_keys.session_key_id.as_slice()
        ));
        assert!(matches!(res.session_keys.app_s_key, Some(KeyEnvelope::Wrapped { .. })));
    }

    #[tokio::test]
    async fn test_join_v1_1_legacy_mac_version() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/join/70B3D57ED0000000"))
            .and(body_partial_json(json!({
                "ProtocolVersion": "1.1",
                "MessageType": "JoinReq",
                "SenderID": "42FFFF",
                "SenderNSID": "0102030405060708",
                "MACVersion": "1.0.3",
                "DLSettings": "00"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ProtocolVersion": "1.1",
                "TransactionID": 11,
                "MessageType": "JoinAns",
                "SenderID": "70B3D57ED0000000",
                "ReceiverID": "42FFFF",
                "ReceiverNSID": "0102030405060708",
                "PHYPayload": "20AABBCC",
                "Result": {"ResultCode": "Success"},
                "NwkSKey": {"AESKey": "00112233445566778899AABBCCDDEEFF"},
                "AppSKey": {"KEKLabel": "as:010042", "AESKey": "2A195CC93CA54AD82CFB36C83D91450F3D2D523556F13E69"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let router = single_js(&server, "BI1.1", prefix("70B3D57ED0000000", 36));
        let mut request = join_request();
        request.mac_version = MacVersion::V1_0_3;
        let res = router
            .do_join(
                &CallContext::background(),
                NetId([0x42, 0xFF, 0xFF]),
                Some(eui("0102030405060708")),
                &request,
            )
            .await
            .unwrap();

        let prefix = interop_common::protocol::session_key::GENERATED_SESSION_KEY_ID_PREFIX;
        let session_key_id = res.session_keys.session_key_id.as_slice();
        assert!(session_key_id.starts_with(prefix));
        assert_eq!(session_key_id.len(), prefix.len() + 16);
        assert_eq!(
            res.session_keys.f_nwk_s_int_key,
            Some(KeyEnvelope::Plain {
                key: [
                    0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF,
                ],
            })
        );
    }

    #[tokio::test]
    async fn test_unknown_join_eui() {
        let server = MockServer::start().await;
        let router = single_js(&server, "BI1.1", prefix("70B3D57ED0000000", 36));
        let mut request = join_request();
        request.join_eui = eui("0101010101010101");
        let err = router
            .do_join(&CallContext::background(), NetId([0x00, 0x00, 0x13]), Some(eui("0102030405060708")), &request)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotRegistered);
        assert!(server.received_requests().await.unwrap_or_default().is_empty());
    }

    #[tokio::test]
    async fn test_rejoin_needs_v1_1() {
        let server = MockServer::start().await;
        let router = single_js(&server, "BI1.0", prefix("70B3D57ED0000000", 36));
        let err = router
            .do_rejoin(&CallContext::background(), NetId([0x00, 0x00, 0x13]), None, &join_request())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidProtocolVersion);
    }

    #[tokio::test]
    async fn test_http_status_without_answer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .mount(&server)
            .await;
        let router = single_js(&server, "BI1.1", prefix("70B3D57ED0000000", 36));
        let err = router
            .do_home_ns(
                &CallContext::background(),
                NetId([0x00, 0x00, 0x13]),
                Some(eui("0102030405060708")),
                &HomeNsRequest {
                    transaction_id: 1,
                    join_eui: eui("70B3D57ED0000000"),
                    dev_eui: eui("0000000000000001"),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CallerNotAuthorized);
    }

    #[tokio::test]
    async fn test_deadline_exceeded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;
        let router = single_js(&server, "BI1.1", prefix("70B3D57ED0000000", 36));
        let ctx = CallContext::background().with_timeout(Duration::from_millis(100));
        let err = router
            .do_join(&ctx, NetId([0x00, 0x00, 0x13]), Some(eui("0102030405060708")), &join_request())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeadlineExceeded);
    }

    async fn federation(fast: (&str, u64), slow: (&str, u64)) -> (ClientRouter, MockServer, MockServer) {
        let a = MockServer::start().await;
        let b = MockServer::start().await;
        for (server, (result, delay)) in [(&a, fast), (&b, slow)] {
            Mock::given(method("POST"))
                .and(path("/join/70B3D57ED0000000"))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_json(join_ans(result))
                        .set_delay(Duration::from_millis(delay)),
                )
                .mount(server)
                .await;
        }
        let fetcher = MemFetcher::new()
            .with_file("a.yml", js_document(&a, "BI1.1"))
            .with_file("b.yml", js_document(&b, "BI1.1"));
        let config = InteropClientConfig {
            join_servers: vec![],
            join_server_federations: vec![FederationEntry {
                name: "federation".into(),
                files: vec!["a.yml".into(), "b.yml".into()],
                join_euis: vec![prefix("70B3D57ED0000000", 36)],
            }],
        };
        (ClientRouter::load(&config, &fetcher).unwrap(), a, b)
    }

    #[tokio::test]
    async fn test_race_success_before_unknown() {
        let (router, _a, _b) = federation(("Success", 10), ("UnknownDevEUI", 300)).await;
        let res = router
            .do_join(&CallContext::background(), NetId([0x00, 0x00, 0x13]), Some(eui("0102030405060708")), &join_request())
            .await
            .unwrap();
        assert_eq!(res.lifetime, Some(3600));
    }

    #[tokio::test]
    async fn test_race_unknown_before_success() {
        let (router, _a, _b) = federation(("UnknownDevEUI", 10), ("Success", 200)).await;
        let res = router
            .do_join(&CallContext::background(), NetId([0x00, 0x00, 0x13]), Some(eui("0102030405060708")), &join_request())
            .await
            .unwrap();
        assert_eq!(res.phy_payload, Buffer(vec![0x20, 0xAA, 0xBB, 0xCC]));
    }

    #[tokio::test]
    async fn test_race_all_unknown() {
        let (router, _a, _b) = federation(("UnknownDevEUI", 10), ("UnknownDevEUI", 30)).await;
        let err = router
            .do_join(&CallContext::background(), NetId([0x00, 0x00, 0x13]), Some(eui("0102030405060708")), &join_request())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownDevEui);
    }
}
