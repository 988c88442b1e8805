//! Socket protocol.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            Command Dispatcher            │  modify / delete / update / info
//! ├─────────────────────────────────────────┤
//! │             Authenticator                │  token + path + replay window
//! ├─────────────────────────────────────────┤
//! │          Fixed-size header codec         │  1176 bytes, little-endian
//! ├─────────────────────────────────────────┤
//! │            UDS Transport                 │  Unix socket
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Module Overview
//!
//! - [`error`]: Transport error types ([`ProtocolError`], [`ProtocolResult`])
//! - [`wire`]: Request header layout ([`RequestHeader`], [`Command`])
//! - [`response`]: Response text ([`Response`], [`FileInfo`])
//! - [`auth`]: Request authentication ([`Authenticator`])
//! - [`dispatch`]: Operation execution ([`Dispatcher`])
//! - [`socket_manager`]: Listening socket lifecycle ([`SocketManager`])
//! - [`connection_handler`]: One request per connection
//! - [`client`]: Client side ([`ServiceClient`])

pub mod auth;
pub mod client;
pub mod connection_handler;
pub mod dispatch;
pub mod error;
pub mod response;
pub mod socket_manager;
pub mod wire;

pub use auth::{AuthFailure, Authenticator};
pub use client::ServiceClient;
pub use connection_handler::handle_connection;
pub use dispatch::{CommandError, Dispatcher, LabelWarning, Request};
pub use error::{MAX_RESPONSE_SIZE, ProtocolError, ProtocolResult};
pub use response::{FileInfo, Response, indicates_success};
pub use socket_manager::{ConnectionPermit, SocketManager, SocketManagerConfig};
pub use wire::{Command, HEADER_LEN, RequestHeader};
