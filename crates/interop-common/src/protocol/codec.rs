//! Message codec for Backend Interfaces JSON messages
//!
//! Parsing is two-phase: [`MessageCodec::parse_header`] reads only the common
//! header so the dispatcher can validate and authenticate before committing
//! to a body type, then [`MessageCodec::parse_body`] picks the typed body by
//! message type.
//!
//! Bytes are first read into a `serde_json::Value`; duplicate top-level keys
//! therefore resolve to the last occurrence.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{InteropError, Result};
use crate::protocol::message::{Message, MessageHeader, RawMessage};
use crate::protocol::{MessageType, MAX_MESSAGE_SIZE};

/// Codec for encoding and decoding protocol messages
#[derive(Debug, Clone)]
pub struct MessageCodec {
    /// Maximum allowed message size
    max_size: usize,
}

impl MessageCodec {
    /// Create a new codec with default settings
    pub fn new() -> Self {
        Self {
            max_size: MAX_MESSAGE_SIZE,
        }
    }

    /// Create a codec with custom max message size
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    fn check_size(&self, size: usize) -> Result<()> {
        if size > self.max_size {
            return Err(InteropError::message_too_large(size, self.max_size));
        }
        Ok(())
    }

    fn parse_object(&self, data: &[u8]) -> Result<Value> {
        self.check_size(data.len())?;
        let value: Value = serde_json::from_slice(data)?;
        if !value.is_object() {
            return Err(InteropError::malformed("message is not a JSON object"));
        }
        Ok(value)
    }

    /// Parse the common header; unknown message types are kept verbatim
    pub fn parse_header(&self, data: &[u8]) -> Result<MessageHeader> {
        let header: MessageHeader = from_value(self.parse_object(data)?)?;
        header.check_tokens()?;
        Ok(header)
    }

    /// Parse the full message for an already parsed header
    pub fn parse_body(&self, header: &MessageHeader, data: &[u8]) -> Result<Message> {
        let value = self.parse_object(data)?;
        let message = match header.message_type() {
            Some(MessageType::JoinReq) => Message::JoinReq(from_value(value)?),
            Some(MessageType::JoinAns) => Message::JoinAns(from_value(value)?),
            Some(MessageType::RejoinReq) => Message::RejoinReq(from_value(value)?),
            Some(MessageType::RejoinAns) => Message::RejoinAns(from_value(value)?),
            Some(MessageType::AppSKeyReq) => Message::AppSKeyReq(from_value(value)?),
            Some(MessageType::AppSKeyAns) => Message::AppSKeyAns(from_value(value)?),
            Some(MessageType::HomeNsReq) => Message::HomeNsReq(from_value(value)?),
            Some(MessageType::HomeNsAns) => Message::HomeNsAns(from_value(value)?),
            _ => Message::Raw(RawMessage {
                header: header.clone(),
                body: data.to_vec(),
            }),
        };
        if message.header().message_type().is_some_and(|t| t.is_request()) {
            message.header().check_ns_ids()?;
        }
        Ok(message)
    }

    /// Parse header and body in one go
    pub fn parse(&self, data: &[u8]) -> Result<Message> {
        let header = self.parse_header(data)?;
        self.parse_body(&header, data)
    }

    /// Encode a message to canonical JSON
    pub fn encode(&self, msg: &Message) -> Result<Vec<u8>> {
        let data = match msg {
            Message::JoinReq(m) | Message::RejoinReq(m) => serde_json::to_vec(m)?,
            Message::JoinAns(m) | Message::RejoinAns(m) => serde_json::to_vec(m)?,
            Message::AppSKeyReq(m) => serde_json::to_vec(m)?,
            Message::AppSKeyAns(m) => serde_json::to_vec(m)?,
            Message::HomeNsReq(m) => serde_json::to_vec(m)?,
            Message::HomeNsAns(m) => serde_json::to_vec(m)?,
            Message::Raw(m) => encode_raw(m)?,
        };
        self.check_size(data.len())?;
        Ok(data)
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn from_value<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| InteropError::malformed(format!("invalid message: {}", e)).with_source(e))
}

/// Raw bodies are re-emitted with the header fields of the message overlaid
fn encode_raw(msg: &RawMessage) -> Result<Vec<u8>> {
    let mut object = match serde_json::from_slice::<Value>(&msg.body) {
        Ok(Value::Object(map)) => map,
        _ => serde_json::Map::new(),
    };
    if let Value::Object(header) = serde_json::to_value(&msg.header)? {
        for key in [
            "SenderNSID",
            "ReceiverNSID",
            "SenderToken",
            "ReceiverToken",
            "VSExtension",
        ] {
            object.remove(key);
        }
        object.extend(header);
    }
    Ok(serde_json::to_vec(&Value::Object(object))?)
}
