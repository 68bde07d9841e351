//! Mapping between internal error kinds and protocol result codes

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ErrorKind, InteropError, Result};
use crate::protocol::ProtocolVersion;

/// `Result.ResultCode` values of both protocol versions
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResultCode {
    Success,
    NoAction,
    MicFailed,
    FrameReplayed,
    JoinReqFailed,
    NoRoamingAgreement,
    DevRoamingDisallowed,
    RoamingActDisallowed,
    ActivationDisallowed,
    UnknownDevEui,
    UnknownDevAddr,
    UnknownSender,
    /// 1.0 spelling
    UnkownReceiver,
    UnknownReceiver,
    Deferred,
    XmitFailed,
    InvalidFPort,
    InvalidProtocolVersion,
    StaleDeviceProfile,
    /// 1.0 name of MalformedMessage
    MalformedRequest,
    MalformedMessage,
    FrameSizeError,
    Other,
    /// A code we do not know, kept verbatim
    Unrecognized(String),
}

impl ResultCode {
    pub fn as_str(&self) -> &str {
        match self {
            ResultCode::Success => "Success",
            ResultCode::NoAction => "NoAction",
            ResultCode::MicFailed => "MICFailed",
            ResultCode::FrameReplayed => "FrameReplayed",
            ResultCode::JoinReqFailed => "JoinReqFailed",
            ResultCode::NoRoamingAgreement => "NoRoamingAgreement",
            ResultCode::DevRoamingDisallowed => "DevRoamingDisallowed",
            ResultCode::RoamingActDisallowed => "RoamingActDisallowed",
            ResultCode::ActivationDisallowed => "ActivationDisallowed",
            ResultCode::UnknownDevEui => "UnknownDevEUI",
            ResultCode::UnknownDevAddr => "UnknownDevAddr",
            ResultCode::UnknownSender => "UnknownSender",
            ResultCode::UnkownReceiver => "UnkownReceiver",
            ResultCode::UnknownReceiver => "UnknownReceiver",
            ResultCode::Deferred => "Deferred",
            ResultCode::XmitFailed => "XmitFailed",
            ResultCode::InvalidFPort => "InvalidFPort",
            ResultCode::InvalidProtocolVersion => "InvalidProtocolVersion",
            ResultCode::StaleDeviceProfile => "StaleDeviceProfile",
            ResultCode::MalformedRequest => "MalformedRequest",
            ResultCode::MalformedMessage => "MalformedMessage",
            ResultCode::FrameSizeError => "FrameSizeError",
            ResultCode::Other => "Other",
            ResultCode::Unrecognized(s) => s,
        }
    }

    fn from_wire(s: &str) -> ResultCode {
        match s {
            "Success" => ResultCode::Success,
            "NoAction" => ResultCode::NoAction,
            "MICFailed" => ResultCode::MicFailed,
            "FrameReplayed" => ResultCode::FrameReplayed,
            "JoinReqFailed" => ResultCode::JoinReqFailed,
            "NoRoamingAgreement" => ResultCode::NoRoamingAgreement,
            "DevRoamingDisallowed" => ResultCode::DevRoamingDisallowed,
            "RoamingActDisallowed" => ResultCode::RoamingActDisallowed,
            "ActivationDisallowed" => ResultCode::ActivationDisallowed,
            "UnknownDevEUI" => ResultCode::UnknownDevEui,
            "UnknownDevAddr" => ResultCode::UnknownDevAddr,
            "UnknownSender" => ResultCode::UnknownSender,
            "UnkownReceiver" => ResultCode::UnkownReceiver,
            "UnknownReceiver" => ResultCode::UnknownReceiver,
            "Deferred" => ResultCode::Deferred,
            "XmitFailed" => ResultCode::XmitFailed,
            "InvalidFPort" => ResultCode::InvalidFPort,
            "InvalidProtocolVersion" => ResultCode::InvalidProtocolVersion,
            "StaleDeviceProfile" => ResultCode::StaleDeviceProfile,
            "MalformedRequest" => ResultCode::MalformedRequest,
            "MalformedMessage" => ResultCode::MalformedMessage,
            "FrameSizeError" => ResultCode::FrameSizeError,
            "Other" => ResultCode::Other,
            other => ResultCode::Unrecognized(other.to_string()),
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ResultCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ResultCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(ResultCode::from_wire(&s))
    }
}

/// Result code to put on the wire for an error kind
///
/// Kinds without a protocol counterpart, and codes the version does not
/// define, become `Other`.
pub fn error_to_result(kind: ErrorKind, version: ProtocolVersion) -> ResultCode {
    let v1_0 = version == ProtocolVersion::V1_0;
    match kind {
        ErrorKind::MalformedMessage if v1_0 => ResultCode::MalformedRequest,
        ErrorKind::MalformedMessage => ResultCode::MalformedMessage,
        ErrorKind::UnknownSender => ResultCode::UnknownSender,
        ErrorKind::UnknownReceiver if v1_0 => ResultCode::UnkownReceiver,
        ErrorKind::UnknownReceiver => ResultCode::UnknownReceiver,
        ErrorKind::UnknownDevEui => ResultCode::UnknownDevEui,
        ErrorKind::UnknownDevAddr => ResultCode::UnknownDevAddr,
        ErrorKind::MicFailed => ResultCode::MicFailed,
        ErrorKind::FrameReplayed => ResultCode::FrameReplayed,
        ErrorKind::FrameSize => ResultCode::FrameSizeError,
        ErrorKind::InvalidFPort => ResultCode::InvalidFPort,
        ErrorKind::InvalidProtocolVersion => ResultCode::InvalidProtocolVersion,
        ErrorKind::StaleProfile => ResultCode::StaleDeviceProfile,
        ErrorKind::JoinFailed => ResultCode::JoinReqFailed,
        ErrorKind::NoRoamingAgreement => ResultCode::NoRoamingAgreement,
        ErrorKind::DevRoamingDisallowed => ResultCode::DevRoamingDisallowed,
        ErrorKind::RoamingActDisallowed => ResultCode::RoamingActDisallowed,
        ErrorKind::ActivationDisallowed => ResultCode::ActivationDisallowed,
        ErrorKind::Deferred => ResultCode::Deferred,
        ErrorKind::XmitFailed => ResultCode::XmitFailed,
        ErrorKind::NoAction if !v1_0 => ResultCode::NoAction,
        _ => ResultCode::Other,
    }
}

/// Error for a result received from a peer; `Success` is `Ok`
pub fn result_to_error(code: &ResultCode, description: &str) -> Result<()> {
    let kind = match code {
        ResultCode::Success => return Ok(()),
        ResultCode::NoAction => ErrorKind::NoAction,
        ResultCode::MicFailed => ErrorKind::MicFailed,
        ResultCode::FrameReplayed => ErrorKind::FrameReplayed,
        ResultCode::JoinReqFailed => ErrorKind::JoinFailed,
        ResultCode::NoRoamingAgreement => ErrorKind::NoRoamingAgreement,
        ResultCode::DevRoamingDisallowed => ErrorKind::DevRoamingDisallowed,
        ResultCode::RoamingActDisallowed => ErrorKind::RoamingActDisallowed,
        ResultCode::ActivationDisallowed => ErrorKind::ActivationDisallowed,
        ResultCode::UnknownDevEui => ErrorKind::UnknownDevEui,
        ResultCode::UnknownDevAddr => ErrorKind::UnknownDevAddr,
        ResultCode::UnknownSender => ErrorKind::UnknownSender,
        ResultCode::UnkownReceiver | ResultCode::UnknownReceiver => ErrorKind::UnknownReceiver,
        ResultCode::Deferred => ErrorKind::Deferred,
        ResultCode::XmitFailed => ErrorKind::XmitFailed,
        ResultCode::InvalidFPort => ErrorKind::InvalidFPort,
        ResultCode::InvalidProtocolVersion => ErrorKind::InvalidProtocolVersion,
        ResultCode::StaleDeviceProfile => ErrorKind::StaleProfile,
        ResultCode::MalformedRequest | ResultCode::MalformedMessage => ErrorKind::MalformedMessage,
        ResultCode::FrameSizeError => ErrorKind::FrameSize,
        ResultCode::Other | ResultCode::Unrecognized(_) => ErrorKind::UnexpectedResult,
    };
    let mut err = InteropError::new(kind, format!("peer answered {}", code)).with_raw_result(code.as_str());
    if !description.is_empty() {
        err = err.with_cause(description);
    }
    Err(err)
}
