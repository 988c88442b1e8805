//! sealkeep-daemon - file service enforcing replace-then-lock.
//!
//! The daemon listens on a Unix socket. Each connection carries one
//! request: a fixed-size header, authenticated by a shared token and a
//! timestamp, optionally followed by a payload. Files live under a managed
//! root; every write refreshes a sidecar metadata record and applies an
//! immutability label, and deletion waits out a retention period.
//!
//! # Modules
//!
//! - [`protocol`]: Wire format, authentication, dispatch, socket handling,
//!   and the client
//! - [`locks`]: Per-path exclusive locks
//! - [`state`]: Shared server context
//! - [`server`]: Accept loop and graceful shutdown

pub mod locks;
pub mod protocol;
pub mod server;
pub mod state;

pub use server::run_server;
pub use state::{ServerContext, SharedContext};
