//! Error types for the interop subsystem
//!
//! We use `thiserror` for structured error types that can be matched on,
//! and `anyhow` for error propagation in application code (configuration
//! loading and the binary).
//!
//! Every failure carries an [`ErrorKind`] from a closed set. Kinds that have a
//! protocol counterpart are translated to result codes by
//! [`crate::protocol::result`]; the remaining kinds are local to the caller.

use std::fmt;

use thiserror::Error;

/// Closed set of internal error kinds
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // === Protocol results ===
    #[error("malformed message")]
    MalformedMessage,

    #[error("unknown sender")]
    UnknownSender,

    #[error("unknown receiver")]
    UnknownReceiver,

    #[error("unknown DevEUI")]
    UnknownDevEui,

    #[error("unknown DevAddr")]
    UnknownDevAddr,

    #[error("MIC failed")]
    MicFailed,

    #[error("frame replayed")]
    FrameReplayed,

    #[error("frame size error")]
    FrameSize,

    #[error("invalid FPort")]
    InvalidFPort,

    #[error("invalid protocol version")]
    InvalidProtocolVersion,

    #[error("stale device profile")]
    StaleProfile,

    #[error("join request failed")]
    JoinFailed,

    #[error("no roaming agreement")]
    NoRoamingAgreement,

    #[error("device roaming disallowed")]
    DevRoamingDisallowed,

    #[error("roaming activation disallowed")]
    RoamingActDisallowed,

    #[error("activation disallowed")]
    ActivationDisallowed,

    #[error("deferred")]
    Deferred,

    #[error("transmission failed")]
    XmitFailed,

    #[error("no action")]
    NoAction,

    #[error("unexpected result")]
    UnexpectedResult,

    // === Local failures ===
    #[error("not registered")]
    NotRegistered,

    #[error("canceled")]
    Canceled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("transport failure")]
    TransportFailure,

    #[error("caller not authorized")]
    CallerNotAuthorized,

    #[error("unauthenticated")]
    Unauthenticated,

    #[error("internal error")]
    Internal,
}

impl ErrorKind {
    /// Stable kebab-case name, used in logs and metric labels
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::MalformedMessage => "malformed-message",
            ErrorKind::UnknownSender => "unknown-sender",
            ErrorKind::UnknownReceiver => "unknown-receiver",
            ErrorKind::UnknownDevEui => "unknown-dev-eui",
            ErrorKind::UnknownDevAddr => "unknown-dev-addr",
            ErrorKind::MicFailed => "mic-failed",
            ErrorKind::FrameReplayed => "frame-replayed",
            ErrorKind::FrameSize => "frame-size",
            ErrorKind::InvalidFPort => "invalid-fport",
            ErrorKind::InvalidProtocolVersion => "invalid-protocol-version",
            ErrorKind::StaleProfile => "stale-profile",
            ErrorKind::JoinFailed => "join-failed",
            ErrorKind::NoRoamingAgreement => "no-roaming-agreement",
            ErrorKind::DevRoamingDisallowed => "dev-roaming-disallowed",
            ErrorKind::RoamingActDisallowed => "roaming-act-disallowed",
            ErrorKind::ActivationDisallowed => "activation-disallowed",
            ErrorKind::Deferred => "deferred",
            ErrorKind::XmitFailed => "xmit-failed",
            ErrorKind::NoAction => "no-action",
            ErrorKind::UnexpectedResult => "unexpected-result",
            ErrorKind::NotRegistered => "not-registered",
            ErrorKind::Canceled => "canceled",
            ErrorKind::DeadlineExceeded => "deadline-exceeded",
            ErrorKind::TransportFailure => "transport-failure",
            ErrorKind::CallerNotAuthorized => "caller-not-authorized",
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::Internal => "internal",
        }
    }

    /// Errors meaning the peer does not know the device at all
    pub fn is_unknown_device(&self) -> bool {
        matches!(self, ErrorKind::UnknownDevEui | ErrorKind::UnknownDevAddr)
    }

    /// Errors meaning the peer knows the device and refused the request.
    ///
    /// An authoritative error ends a Join Server race immediately.
    pub fn is_authoritative(&self) -> bool {
        matches!(
            self,
            ErrorKind::MicFailed
                | ErrorKind::FrameReplayed
                | ErrorKind::JoinFailed
                | ErrorKind::NoRoamingAgreement
                | ErrorKind::DevRoamingDisallowed
                | ErrorKind::RoamingActDisallowed
                | ErrorKind::ActivationDisallowed
                | ErrorKind::InvalidFPort
                | ErrorKind::InvalidProtocolVersion
                | ErrorKind::StaleProfile
                | ErrorKind::FrameSize
                | ErrorKind::NoAction
        )
    }
}

/// Central error type for interop operations
///
/// `cause` is the public description that may travel on the wire in
/// `Result.Description`. `source` is the internal chain kept for logs only.
#[derive(Error, Debug)]
#[error("{kind}: {message}")]
pub struct InteropError {
    kind: ErrorKind,
    message: String,
    cause: Option<String>,
    raw_result: Option<String>,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl InteropError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
            raw_result: None,
            source: None,
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedMessage, message)
    }

    pub fn unknown_sender(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnknownSender, message)
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthenticated, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransportFailure, message)
    }

    pub fn canceled() -> Self {
        Self::new(ErrorKind::Canceled, "operation canceled")
    }

    pub fn deadline_exceeded() -> Self {
        Self::new(ErrorKind::DeadlineExceeded, "deadline exceeded")
    }

    pub fn not_registered(join_eui: impl fmt::Display) -> Self {
        Self::new(
            ErrorKind::NotRegistered,
            format!("no Join Server registered for JoinEUI {}", join_eui),
        )
    }

    pub fn message_too_large(size: usize, max: usize) -> Self {
        Self::malformed(format!("message too large: {} bytes (max: {})", size, max))
    }

    /// Attach a public cause; it becomes the wire description
    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// Attach an internal source error, kept for logs only
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Preserve the raw result code string received from a peer
    pub fn with_raw_result(mut self, raw: impl Into<String>) -> Self {
        self.raw_result = Some(raw.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn cause(&self) -> Option<&str> {
        self.cause.as_deref()
    }

    pub fn raw_result(&self) -> Option<&str> {
        self.raw_result.as_deref()
    }

    /// Description to put in `Result.Description`: the cause, or empty
    pub fn description(&self) -> &str {
        self.cause.as_deref().unwrap_or("")
    }
}

/// Result type alias using InteropError
pub type Result<T> = std::result::Result<T, InteropError>;

impl From<serde_json::Error> for InteropError {
    fn from(err: serde_json::Error) -> Self {
        InteropError::malformed("invalid JSON").with_source(err)
    }
}

impl From<std::io::Error> for InteropError {
    fn from(err: std::io::Error) -> Self {
        InteropError::internal("I/O error").with_source(err)
    }
}

impl From<rustls::Error> for InteropError {
    fn from(err: rustls::Error) -> Self {
        InteropError::internal("TLS error").with_source(err)
    }
}
