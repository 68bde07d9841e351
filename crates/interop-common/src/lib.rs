//! # interop-common
//!
//! Shared components for the LoRaWAN Backend Interfaces interop subsystem.
//!
//! This crate contains:
//! - Scalar identifier types (EUI-64, NetID, DevAddr, buffers, OUI)
//! - Protocol message definitions, the JSON codec and the result-code mapper
//! - The internal error taxonomy
//! - TLS/certificate utilities and the read-only file fetcher
//! - The call context used for deadlines and cancellation
//!
//! ## Architecture
//!
//! The common crate is shared by the outbound client router and the inbound
//! dispatcher. Both directions speak the same wire format, so every encoding
//! rule lives here exactly once.

pub mod context;
pub mod crypto;
pub mod error;
pub mod fetch;
pub mod metrics;
pub mod protocol;
pub mod types;

// Re-export commonly used items at crate root
pub use context::CallContext;
pub use error::{ErrorKind, InteropError, Result};
pub use fetch::{Fetcher, FsFetcher, MemFetcher};
pub use protocol::{Message, MessageCodec, MessageHeader, MessageType, ProtocolVersion};
pub use types::{Buffer, DevAddr, Eui64, Eui64Prefix, MacVersion, NetId, Oui};
