//! Backend Interfaces wire protocol
//!
//! ## Protocol Design
//!
//! 1. **JSON over HTTP POST**: every message is a single JSON object
//! 2. **Versioned**: the header carries `ProtocolVersion` ("1.0" or "1.1")
//! 3. **Paired**: every request type has exactly one answer type, whose header
//!    is the request header with sender and receiver swapped
//! 4. **Extensible**: reserved message types parse into a raw variant
//!
//! ## Message Format
//!
//! ```text
//! {
//!   "ProtocolVersion": "1.1",
//!   "TransactionID": 42,
//!   "MessageType": "JoinReq",
//!   "SenderID": "000013",
//!   "ReceiverID": "70B3D57ED0000000",
//!   "SenderNSID": "0102030405060708",
//!   ...type-specific fields...
//! }
//! ```

pub mod codec;
pub mod message;
pub mod result;
pub mod session_key;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use codec::MessageCodec;
pub use message::{
    AnswerResult, AppSKeyAns, AppSKeyReq, HomeNsAns, HomeNsReq, JoinAns, JoinReq, Message,
    MessageHeader, RawMessage,
};
pub use result::{error_to_result, result_to_error, ResultCode};

/// Default maximum message size (32 KiB)
pub const MAX_MESSAGE_SIZE: usize = 32 * 1024;

/// Maximum length of SenderToken/ReceiverToken in bytes
pub const MAX_TOKEN_LENGTH: usize = 32;

/// Backend Interfaces protocol version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProtocolVersion {
    #[serde(rename = "1.0")]
    V1_0,
    #[serde(rename = "1.1")]
    V1_1,
}

impl ProtocolVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolVersion::V1_0 => "1.0",
            ProtocolVersion::V1_1 => "1.1",
        }
    }

    /// Whether the message type exists in this version
    pub fn supports(&self, message_type: MessageType) -> bool {
        match message_type {
            MessageType::RejoinReq | MessageType::RejoinAns => *self == ProtocolVersion::V1_1,
            _ => true,
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role of the peer that sends a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Network Server (SenderID is a NetID)
    Network,
    /// Application Server (SenderID is an AS-ID)
    Application,
}

/// Message types known to the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    JoinReq,
    JoinAns,
    RejoinReq,
    RejoinAns,
    AppSKeyReq,
    AppSKeyAns,
    HomeNsReq,
    HomeNsAns,
    PrStartReq,
    PrStartAns,
    PrStopReq,
    PrStopAns,
    HrStartReq,
    HrStartAns,
    HrStopReq,
    HrStopAns,
    ProfileReq,
    ProfileAns,
    XmitDataReq,
    XmitDataAns,
}

impl MessageType {
    const ALL: [MessageType; 20] = [
        MessageType::JoinReq,
        MessageType::JoinAns,
        MessageType::RejoinReq,
        MessageType::RejoinAns,
        MessageType::AppSKeyReq,
        MessageType::AppSKeyAns,
        MessageType::HomeNsReq,
        MessageType::HomeNsAns,
        MessageType::PrStartReq,
        MessageType::PrStartAns,
        MessageType::PrStopReq,
        MessageType::PrStopAns,
        MessageType::HrStartReq,
        MessageType::HrStartAns,
        MessageType::HrStopReq,
        MessageType::HrStopAns,
        MessageType::ProfileReq,
        MessageType::ProfileAns,
        MessageType::XmitDataReq,
        MessageType::XmitDataAns,
    ];

    /// Look up a wire message type; unknown strings give `None`
    pub fn parse(s: &str) -> Option<MessageType> {
        Self::ALL.iter().copied().find(|t| t.as_str() == s)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::JoinReq => "JoinReq",
            MessageType::JoinAns => "JoinAns",
            MessageType::RejoinReq => "RejoinReq",
            MessageType::RejoinAns => "RejoinAns",
            MessageType::AppSKeyReq => "AppSKeyReq",
            MessageType::AppSKeyAns => "AppSKeyAns",
            MessageType::HomeNsReq => "HomeNSReq",
            MessageType::HomeNsAns => "HomeNSAns",
            MessageType::PrStartReq => "PRStartReq",
            MessageType::PrStartAns => "PRStartAns",
            MessageType::PrStopReq => "PRStopReq",
            MessageType::PrStopAns => "PRStopAns",
            MessageType::HrStartReq => "HRStartReq",
            MessageType::HrStartAns => "HRStartAns",
            MessageType::HrStopReq => "HRStopReq",
            MessageType::HrStopAns => "HRStopAns",
            MessageType::ProfileReq => "ProfileReq",
            MessageType::ProfileAns => "ProfileAns",
            MessageType::XmitDataReq => "XmitDataReq",
            MessageType::XmitDataAns => "XmitDataAns",
        }
    }

    /// The answer type paired with a request type
    pub fn answer(&self) -> Option<MessageType> {
        let ans = match self {
            MessageType::JoinReq => MessageType::JoinAns,
            MessageType::RejoinReq => MessageType::RejoinAns,
            MessageType::AppSKeyReq => MessageType::AppSKeyAns,
            MessageType::HomeNsReq => MessageType::HomeNsAns,
            MessageType::PrStartReq => MessageType::PrStartAns,
            MessageType::PrStopReq => MessageType::PrStopAns,
            MessageType::HrStartReq => MessageType::HrStartAns,
            MessageType::HrStopReq => MessageType::HrStopAns,
            MessageType::ProfileReq => MessageType::ProfileAns,
            MessageType::XmitDataReq => MessageType::XmitDataAns,
            _ => return None,
        };
        Some(ans)
    }

    pub fn is_request(&self) -> bool {
        self.answer().is_some()
    }

    /// Roaming and transmission types are parsed but not handled here
    pub fn is_reserved(&self) -> bool {
        !matches!(
            self,
            MessageType::JoinReq
                | MessageType::JoinAns
                | MessageType::RejoinReq
                | MessageType::RejoinAns
                | MessageType::AppSKeyReq
                | MessageType::AppSKeyAns
                | MessageType::HomeNsReq
                | MessageType::HomeNsAns
        )
    }

    /// Role the sender of this request must authenticate as
    pub fn sender_role(&self) -> Role {
        match self {
            MessageType::AppSKeyReq | MessageType::AppSKeyAns => Role::Application,
            _ => Role::Network,
        }
    }

    /// Whether a v1.1 request of this type must carry a SenderNSID
    pub fn requires_ns_id(&self) -> bool {
        matches!(
            self,
            MessageType::JoinReq | MessageType::RejoinReq | MessageType::HomeNsReq
        )
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_pairs() {
        for t in MessageType::ALL {
            assert_eq!(MessageType::parse(t.as_str()), Some(t));
            if let Some(ans) = t.answer() {
                assert!(!ans.is_request());
                assert_eq!(ans.is_reserved(), t.is_reserved());
            }
        }
        assert_eq!(MessageType::parse("HomeNSReq"), Some(MessageType::HomeNsReq));
        assert_eq!(MessageType::parse("FooReq"), None);
        assert_eq!(MessageType::JoinAns.answer(), None);
    }

    #[test]
    fn test_version_allowance() {
        assert!(!ProtocolVersion::V1_0.supports(MessageType::RejoinReq));
        assert!(ProtocolVersion::V1_1.supports(MessageType::RejoinReq));
        assert!(ProtocolVersion::V1_0.supports(MessageType::AppSKeyReq));
        assert_eq!(MessageType::AppSKeyReq.sender_role(), Role::Application);
        assert!(!MessageType::AppSKeyReq.requires_ns_id());
    }
}
