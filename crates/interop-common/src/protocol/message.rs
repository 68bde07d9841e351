//! Protocol message definitions
//!
//! Every message is a flat JSON object: the common header fields and the
//! type-specific fields live side by side. The header is embedded in each
//! body struct with `#[serde(flatten)]`.

use serde::{Deserialize, Serialize};

use crate::error::{InteropError, Result};
use crate::protocol::result::ResultCode;
use crate::protocol::{MessageType, ProtocolVersion, MAX_TOKEN_LENGTH};
use crate::types::{
    Buffer, DevAddr, Eui64, KeyEnvelope, MacVersion, NetId, RxDelay, VendorExtension,
};

/// Header shared by all messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageHeader {
    #[serde(rename = "ProtocolVersion")]
    pub protocol_version: ProtocolVersion,

    #[serde(rename = "TransactionID", default)]
    pub transaction_id: u32,

    /// Kept verbatim so unknown types survive header parsing
    #[serde(rename = "MessageType")]
    pub message_type: String,

    #[serde(rename = "SenderID")]
    pub sender_id: String,

    #[serde(rename = "ReceiverID")]
    pub receiver_id: String,

    #[serde(rename = "SenderNSID", default, skip_serializing_if = "Option::is_none")]
    pub sender_ns_id: Option<Eui64>,

    #[serde(rename = "ReceiverNSID", default, skip_serializing_if = "Option::is_none")]
    pub receiver_ns_id: Option<Eui64>,

    #[serde(rename = "SenderToken", default, skip_serializing_if = "Buffer::is_empty")]
    pub sender_token: Buffer,

    #[serde(rename = "ReceiverToken", default, skip_serializing_if = "Buffer::is_empty")]
    pub receiver_token: Buffer,

    #[serde(rename = "VSExtension", default, skip_serializing_if = "Option::is_none")]
    pub vs_extension: Option<VendorExtension>,
}

impl MessageHeader {
    pub fn new(
        protocol_version: ProtocolVersion,
        message_type: MessageType,
        sender_id: impl Into<String>,
        receiver_id: impl Into<String>,
    ) -> Self {
        Self {
            protocol_version,
            transaction_id: 0,
            message_type: message_type.as_str().to_string(),
            sender_id: sender_id.into(),
            receiver_id: receiver_id.into(),
            sender_ns_id: None,
            receiver_ns_id: None,
            sender_token: Buffer::default(),
            receiver_token: Buffer::default(),
            vs_extension: None,
        }
    }

    /// The known message type, if any
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::parse(&self.message_type)
    }

    /// Build the header of the answer to this request.
    ///
    /// IDs and NSIDs are swapped, tokens are mirrored and the transaction ID
    /// is echoed. Fails for unknown types and for answer types.
    pub fn answer_header(&self) -> Result<MessageHeader> {
        let request = self.message_type().ok_or_else(|| {
            InteropError::malformed(format!("unknown message type {}", self.message_type))
        })?;
        let answer = request.answer().ok_or_else(|| {
            InteropError::malformed(format!("{} is not a request", self.message_type))
        })?;
        Ok(MessageHeader {
            protocol_version: self.protocol_version,
            transaction_id: self.transaction_id,
            message_type: answer.as_str().to_string(),
            sender_id: self.receiver_id.clone(),
            receiver_id: self.sender_id.clone(),
            sender_ns_id: self.receiver_ns_id,
            receiver_ns_id: self.sender_ns_id,
            sender_token: self.receiver_token.clone(),
            receiver_token: self.sender_token.clone(),
            vs_extension: None,
        })
    }

    /// Token lengths; run on every parsed header
    pub(crate) fn check_tokens(&self) -> Result<()> {
        for (name, token) in [
            ("SenderToken", &self.sender_token),
            ("ReceiverToken", &self.receiver_token),
        ] {
            if token.len() > MAX_TOKEN_LENGTH {
                return Err(InteropError::malformed(format!(
                    "{} too long: {} bytes (max: {})",
                    name,
                    token.len(),
                    MAX_TOKEN_LENGTH
                )));
            }
        }
        Ok(())
    }

    /// NSID presence rules for network-role requests.
    ///
    /// On 1.1 the SenderNSID is mandatory; on 1.0 NSIDs do not exist.
    pub fn check_ns_ids(&self) -> Result<()> {
        let Some(message_type) = self.message_type() else {
            return Ok(());
        };
        match self.protocol_version {
            ProtocolVersion::V1_0 => {
                if self.sender_ns_id.is_some() || self.receiver_ns_id.is_some() {
                    return Err(InteropError::malformed("NSID not allowed in protocol 1.0")
                        .with_cause("NSID not allowed in protocol 1.0"));
                }
            }
            ProtocolVersion::V1_1 => {
                if message_type.requires_ns_id() && self.sender_ns_id.is_none() {
                    return Err(InteropError::malformed("missing SenderNSID")
                        .with_cause("missing SenderNSID"));
                }
            }
        }
        Ok(())
    }

    pub fn sender_net_id(&self) -> Result<NetId> {
        self.sender_id.parse()
    }

    pub fn receiver_net_id(&self) -> Result<NetId> {
        self.receiver_id.parse()
    }

    pub fn sender_eui(&self) -> Result<Eui64> {
        self.sender_id.parse()
    }

    /// ReceiverID as an EUI; the JoinEUI on requests to a Join Server
    pub fn receiver_eui(&self) -> Result<Eui64> {
        self.receiver_id.parse()
    }
}

/// `Result` object of an answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerResult {
    #[serde(rename = "ResultCode")]
    pub result_code: ResultCode,

    #[serde(rename = "Description", default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl AnswerResult {
    pub fn success() -> Self {
        Self {
            result_code: ResultCode::Success,
            description: String::new(),
        }
    }

    pub fn new(result_code: ResultCode, description: impl Into<String>) -> Self {
        Self {
            result_code,
            description: description.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.result_code == ResultCode::Success
    }
}

impl Default for AnswerResult {
    fn default() -> Self {
        Self::success()
    }
}

/// JoinReq and RejoinReq
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinReq {
    #[serde(flatten)]
    pub header: MessageHeader,

    #[serde(rename = "MACVersion")]
    pub mac_version: MacVersion,

    #[serde(rename = "PHYPayload")]
    pub phy_payload: Buffer,

    #[serde(rename = "DevEUI")]
    pub dev_eui: Eui64,

    #[serde(rename = "DevAddr")]
    pub dev_addr: DevAddr,

    #[serde(rename = "DLSettings")]
    pub dl_settings: Buffer,

    #[serde(rename = "RxDelay")]
    pub rx_delay: RxDelay,

    #[serde(rename = "CFList", default, skip_serializing_if = "Buffer::is_empty")]
    pub cf_list: Buffer,
}

/// JoinAns and RejoinAns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinAns {
    #[serde(flatten)]
    pub header: MessageHeader,

    #[serde(rename = "PHYPayload", default, skip_serializing_if = "Buffer::is_empty")]
    pub phy_payload: Buffer,

    #[serde(rename = "Result")]
    pub result: AnswerResult,

    #[serde(rename = "Lifetime", default, skip_serializing_if = "Option::is_none")]
    pub lifetime: Option<u32>,

    #[serde(rename = "SNwkSIntKey", default, skip_serializing_if = "Option::is_none")]
    pub s_nwk_s_int_key: Option<KeyEnvelope>,

    #[serde(rename = "FNwkSIntKey", default, skip_serializing_if = "Option::is_none")]
    pub f_nwk_s_int_key: Option<KeyEnvelope>,

    #[serde(rename = "NwkSEncKey", default, skip_serializing_if = "Option::is_none")]
    pub nwk_s_enc_key: Option<KeyEnvelope>,

    /// LoRaWAN 1.0.x name of FNwkSIntKey
    #[serde(rename = "NwkSKey", default, skip_serializing_if = "Option::is_none")]
    pub nwk_s_key: Option<KeyEnvelope>,

    #[serde(rename = "AppSKey", default, skip_serializing_if = "Option::is_none")]
    pub app_s_key: Option<KeyEnvelope>,

    #[serde(rename = "SessionKeyID", default, skip_serializing_if = "Buffer::is_empty")]
    pub session_key_id: Buffer,
}

impl JoinAns {
    pub fn new(header: MessageHeader, result: AnswerResult) -> Self {
        Self {
            header,
            phy_payload: Buffer::default(),
            result,
            lifetime: None,
            s_nwk_s_int_key: None,
            f_nwk_s_int_key: None,
            nwk_s_enc_key: None,
            nwk_s_key: None,
            app_s_key: None,
            session_key_id: Buffer::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppSKeyReq {
    #[serde(flatten)]
    pub header: MessageHeader,

    #[serde(rename = "DevEUI")]
    pub dev_eui: Eui64,

    #[serde(rename = "SessionKeyID")]
    pub session_key_id: Buffer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppSKeyAns {
    #[serde(flatten)]
    pub header: MessageHeader,

    #[serde(rename = "Result")]
    pub result: AnswerResult,

    #[serde(rename = "DevEUI", default, skip_serializing_if = "Option::is_none")]
    pub dev_eui: Option<Eui64>,

    #[serde(rename = "AppSKey", default, skip_serializing_if = "Option::is_none")]
    pub app_s_key: Option<KeyEnvelope>,

    #[serde(rename = "SessionKeyID", default, skip_serializing_if = "Buffer::is_empty")]
    pub session_key_id: Buffer,
}

impl AppSKeyAns {
    pub fn new(header: MessageHeader, result: AnswerResult) -> Self {
        Self {
            header,
            result,
            dev_eui: None,
            app_s_key: None,
            session_key_id: Buffer::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HomeNsReq {
    #[serde(flatten)]
    pub header: MessageHeader,

    #[serde(rename = "DevEUI")]
    pub dev_eui: Eui64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HomeNsAns {
    #[serde(flatten)]
    pub header: MessageHeader,

    #[serde(rename = "Result")]
    pub result: AnswerResult,

    /// Home Network Server ID (1.1 only)
    #[serde(rename = "HNSID", default, skip_serializing_if = "Option::is_none")]
    pub h_ns_id: Option<Eui64>,

    #[serde(rename = "HNetID", default, skip_serializing_if = "Option::is_none")]
    pub h_net_id: Option<NetId>,
}

impl HomeNsAns {
    pub fn new(header: MessageHeader, result: AnswerResult) -> Self {
        Self {
            header,
            result,
            h_ns_id: None,
            h_net_id: None,
        }
    }
}

/// A message of a type without a typed body
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    pub header: MessageHeader,
    /// The original JSON object
    pub body: Vec<u8>,
}

impl RawMessage {
    /// An answer carrying only a header and a `Result`
    pub fn answer(header: MessageHeader, result: AnswerResult) -> Result<Self> {
        #[derive(Serialize)]
        struct ResultOnly<'a> {
            #[serde(flatten)]
            header: &'a MessageHeader,
            #[serde(rename = "Result")]
            result: &'a AnswerResult,
        }
        let body = serde_json::to_vec(&ResultOnly {
            header: &header,
            result: &result,
        })?;
        Ok(Self { header, body })
    }
}

/// All protocol messages
///
/// Rejoin messages share the Join bodies. Reserved and unknown types are
/// carried as [`RawMessage`].
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    JoinReq(JoinReq),
    JoinAns(JoinAns),
    RejoinReq(JoinReq),
    RejoinAns(JoinAns),
    AppSKeyReq(AppSKeyReq),
    AppSKeyAns(AppSKeyAns),
    HomeNsReq(HomeNsReq),
    HomeNsAns(HomeNsAns),
    Raw(RawMessage),
}

impl Message {
    pub fn header(&self) -> &MessageHeader {
        match self {
            Message::JoinReq(m) | Message::RejoinReq(m) => &m.header,
            Message::JoinAns(m) | Message::RejoinAns(m) => &m.header,
            Message::AppSKeyReq(m) => &m.header,
            Message::AppSKeyAns(m) => &m.header,
            Message::HomeNsReq(m) => &m.header,
            Message::HomeNsAns(m) => &m.header,
            Message::Raw(m) => &m.header,
        }
    }

    pub fn header_mut(&mut self) -> &mut MessageHeader {
        match self {
            Message::JoinReq(m) | Message::RejoinReq(m) => &mut m.header,
            Message::JoinAns(m) | Message::RejoinAns(m) => &mut m.header,
            Message::AppSKeyReq(m) => &mut m.header,
            Message::AppSKeyAns(m) => &mut m.header,
            Message::HomeNsReq(m) => &mut m.header,
            Message::HomeNsAns(m) => &mut m.header,
            Message::Raw(m) => &mut m.header,
        }
    }

    /// Result of an answer; `None` for requests and raw messages
    pub fn result(&self) -> Option<&AnswerResult> {
        match self {
            Message::JoinAns(m) | Message::RejoinAns(m) => Some(&m.result),
            Message::AppSKeyAns(m) => Some(&m.result),
            Message::HomeNsAns(m) => Some(&m.result),
            _ => None,
        }
    }

    /// A well-formed answer carrying only a result, for the given answer header
    pub fn error_answer(header: MessageHeader, result: AnswerResult) -> Result<Message> {
        let message = match header.message_type() {
            Some(MessageType::JoinAns) => Message::JoinAns(JoinAns::new(header, result)),
            Some(MessageType::RejoinAns) => Message::RejoinAns(JoinAns::new(header, result)),
            Some(MessageType::AppSKeyAns) => Message::AppSKeyAns(AppSKeyAns::new(header, result)),
            Some(MessageType::HomeNsAns) => Message::HomeNsAns(HomeNsAns::new(header, result)),
            Some(t) if !t.is_request() => Message::Raw(RawMessage::answer(header, result)?),
            _ => {
                return Err(InteropError::internal(format!(
                    "{} is not an answer type",
                    header.message_type
                )))
            }
        };
        Ok(message)
    }
}
