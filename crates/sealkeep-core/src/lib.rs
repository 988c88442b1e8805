//! sealkeep-core - domain library for the sealkeep file service.
//!
//! sealkeep manages a directory of files under "replace-then-lock" rules:
//! every write is followed by an immutability label, and deletion is gated
//! by a minimum retention period counted from the file's first write.
//!
//! This crate holds everything the service needs that is independent of the
//! transport:
//!
//! - [`config`]: TOML configuration and shared-token resolution
//! - [`clock`]: Injectable wall clock for retention and replay checks
//! - [`paths`]: Resolution of request paths against the managed root
//! - [`metadata`]: Sidecar records (creation/modification time, checksum)
//! - [`retention`]: The deletion policy gate
//! - [`label`]: Immutability label application after mutations
//! - [`delta`]: In-place delta synchronization of a source into a target

pub mod clock;
pub mod config;
pub mod delta;
pub mod label;
pub mod metadata;
pub mod paths;
pub mod retention;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, SealkeepConfig};
pub use delta::{BlockDeltaSync, DeltaError, DeltaStats, DeltaSync};
pub use label::{LabelEnforcer, LabelError};
pub use metadata::{FileMetadata, MetadataError, MetadataLookup, MetadataStore};
pub use paths::{ManagedPath, ManagedRoot, PathError};
pub use retention::{RetentionDecision, RetentionGuard};
