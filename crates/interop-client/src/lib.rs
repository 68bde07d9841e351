//! # interop-client
//!
//! Outbound side of the Backend Interfaces interop subsystem.
//!
//! A Network Server or Application Server hands a join, rejoin, AppSKey or
//! HomeNS request to the [`ClientRouter`]. The router picks the Join Server
//! route by JoinEUI prefix, speaks the protocol version configured for each
//! Join Server and, for federations, races all members.

pub mod client;
pub mod config;
pub mod race;
pub mod router;
pub mod rpc;

pub use client::{Endpoint, Rpc};
pub use config::{InteropClientConfig, JoinServerSettings};
pub use race::{race, RaceFailure};
pub use router::{ClientRouter, JoinServerRoute, RoutingTable};
pub use rpc::{
    AppSKeyRequest, AppSKeyResponse, HomeNsRequest, HomeNsResponse, JoinRequest, JoinResponse,
    SessionKeys,
};
