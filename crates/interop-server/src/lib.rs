//! # interop-server
//!
//! Inbound side of the Backend Interfaces interop subsystem.
//!
//! Requests arrive on plain or TLS listeners, are authenticated by client
//! certificate or bearer token, and are dispatched to the Join Server and
//! Identity Server roles. The binary registers a Join Server that relays to
//! upstream Join Servers through the client router.

pub mod app;
pub mod auth;
pub mod config;
pub mod dispatcher;
pub mod forward;
pub mod handler;
pub mod logging;
pub mod metrics;
pub mod server;

pub use app::{run_server, App};
pub use config::ServerConfig;
pub use dispatcher::{Dispatcher, DispatcherBuilder, DispatcherSettings, InboundRequest, InboundResponse};
pub use forward::ForwardingJoinServer;
pub use handler::{IdentityServer, JoinServer};
