//! Command dispatcher.
//!
//! Executes one authenticated, validated request against the managed root.
//! Every mutation follows the same sequence:
//!
//! ```text
//! load metadata -> write file -> checksum -> save metadata -> label file + sidecar
//! ```
//!
//! A failure before "save metadata" fails the request. Bytes already written
//! to the file are not rolled back, and a crash between the write and the
//! metadata rename leaves the record describing the previous contents.
//! Label failures come last and never fail the request; they are returned as
//! [`LabelWarning`]s and rendered after the `success` line.
//!
//! The dispatcher is synchronous and holds no locks of its own. Callers
//! serialize access per path (see [`PathLocks`](crate::locks::PathLocks)).

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use sealkeep_core::config::SealkeepConfig;
use sealkeep_core::label::{self, DisabledLabels};
use sealkeep_core::metadata::{INITIAL_CHECKSUM, file_checksum};
use sealkeep_core::paths::sidecar_path;
use sealkeep_core::{
    BlockDeltaSync, Clock, DeltaError, DeltaSync, FileMetadata, LabelEnforcer, ManagedPath,
    ManagedRoot, MetadataError, MetadataLookup, MetadataStore, PathError, RetentionDecision,
    RetentionGuard,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::response::{FileInfo, Response};
use super::wire::Command;

/// Default minimum retention (24 hours).
const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 3600);

/// Default payload limit (10 MiB, exclusive).
const DEFAULT_MAX_PAYLOAD_BYTES: u64 = 10 * 1024 * 1024;

/// Checksum reported when the metadata record cannot be read.
const UNAVAILABLE_CHECKSUM: &str = "unavailable";

/// Operation errors, returned to the client as `failure: <reason>`.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The request is well-formed but not acceptable.
    #[error("invalid request: {reason}")]
    Validation {
        /// What was wrong.
        reason: String,
    },

    /// A business rule denied the operation. Nothing was changed.
    #[error("{0}")]
    Policy(RetentionDecision),

    /// The target file does not exist.
    #[error("not found")]
    NotFound,

    /// A file operation failed.
    #[error("cannot {action} {}: {source}", path.display())]
    Io {
        /// What was being done.
        action: &'static str,
        /// Path relative to the managed root.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The metadata record could not be read or written.
    #[error(transparent)]
    Metadata(#[from] MetadataError),

    /// The delta merge failed.
    #[error(transparent)]
    Delta(#[from] DeltaError),
}

impl CommandError {
    /// Create a validation error.
    #[must_use]
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    fn io(action: &'static str, path: &Path, source: io::Error) -> Self {
        Self::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }

    /// Error class for logs: `validation`, `policy`, `not_found` or `io`.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::Policy(_) => "policy",
            Self::NotFound => "not_found",
            Self::Io { .. } | Self::Metadata(_) | Self::Delta(_) => "io",
        }
    }
}

impl From<PathError> for CommandError {
    fn from(err: PathError) -> Self {
        Self::validation(err.to_string())
    }
}

/// A label that could not be applied after a successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelWarning {
    /// Path relative to the managed root.
    pub target: PathBuf,
    /// Why the label was not applied.
    pub reason: String,
}

impl std::fmt::Display for LabelWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "immutability label not applied to {}: {}",
            self.target.display(),
            self.reason
        )
    }
}

/// A validated request ready for execution.
#[derive(Debug)]
pub struct Request {
    /// Operation.
    pub command: Command,
    /// Resolved target.
    pub path: ManagedPath,
    /// Payload for Modify and Incremental-Update, empty otherwise.
    pub payload: Vec<u8>,
}

/// Executes requests against the managed root.
pub struct Dispatcher {
    root: ManagedRoot,
    store: MetadataStore,
    retention: RetentionGuard,
    labels: Arc<dyn LabelEnforcer>,
    delta: Arc<dyn DeltaSync>,
    clock: Arc<dyn Clock>,
    max_payload_bytes: u64,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("root", &self.root)
            .field("retention", &self.retention)
            .field("labels", &self.labels.name())
            .field("max_payload_bytes", &self.max_payload_bytes)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Creates a dispatcher with default policy, no labels, and the block
    /// delta merger.
    #[must_use]
    pub fn new(root: ManagedRoot, clock: Arc<dyn Clock>) -> Self {
        Self {
            root,
            store: MetadataStore::new(Arc::clone(&clock)),
            retention: RetentionGuard::new(DEFAULT_RETENTION),
            labels: Arc::new(DisabledLabels),
            delta: Arc::new(BlockDeltaSync::default()),
            clock,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }

    /// Creates a dispatcher from the service configuration.
    #[must_use]
    pub fn from_config(config: &SealkeepConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(ManagedRoot::new(config.daemon.data_dir.clone()), clock)
            .with_retention(config.retention.min_retention())
            .with_labels(label::from_config(&config.label))
            .with_delta(Arc::new(BlockDeltaSync::new(config.delta.block_size)))
            .with_max_payload_bytes(config.limits.max_payload_bytes)
    }

    /// Sets the minimum retention period.
    #[must_use]
    pub fn with_retention(mut self, min_retention: Duration) -> Self {
        self.retention = RetentionGuard::new(min_retention);
        self
    }

    /// Sets the label backend.
    #[must_use]
    pub fn with_labels(mut self, labels: Arc<dyn LabelEnforcer>) -> Self {
        self.labels = labels;
        self
    }

    /// Sets the delta merger.
    #[must_use]
    pub fn with_delta(mut self, delta: Arc<dyn DeltaSync>) -> Self {
        self.delta = delta;
        self
    }

    /// Sets the exclusive payload size limit.
    #[must_use]
    pub const fn with_max_payload_bytes(mut self, max: u64) -> Self {
        self.max_payload_bytes = max;
        self
    }

    /// Returns the managed root.
    #[must_use]
    pub const fn root(&self) -> &ManagedRoot {
        &self.root
    }

    /// Returns the exclusive payload size limit.
    #[must_use]
    pub const fn max_payload_bytes(&self) -> u64 {
        self.max_payload_bytes
    }

    /// Checks the payload length and resolves the path.
    ///
    /// Runs before any payload byte is read, so an oversized `data_len`
    /// never causes an allocation.
    pub fn validate(
        &self,
        command: Command,
        path: &str,
        data_len: u64,
    ) -> Result<ManagedPath, CommandError> {
        if command.carries_payload() {
            if data_len == 0 {
                return Err(CommandError::validation(format!(
                    "{command} requires a payload"
                )));
            }
            if data_len >= self.max_payload_bytes {
                return Err(CommandError::validation(format!(
                    "payload of {data_len} bytes exceeds the {} byte limit",
                    self.max_payload_bytes.saturating_sub(1)
                )));
            }
        } else if data_len != 0 {
            return Err(CommandError::validation(format!(
                "{command} takes no payload"
            )));
        }

        Ok(self.root.resolve(path)?)
    }

    /// Executes a request and renders its outcome.
    #[must_use]
    pub fn execute(&self, request: &Request) -> Response {
        let path = &request.path;
        let result = match request.command {
            Command::Modify => self.modify(path, &request.payload).map(success),
            Command::Delete => self.delete(path).map(|()| Response::success()),
            Command::IncrementalUpdate => self
                .incremental_update(path, &request.payload)
                .map(success),
            Command::GetInfo => self.get_info(path).map(Response::Info),
        };

        match result {
            Ok(response) => {
                info!(
                    command = %request.command,
                    path = %path.relative().display(),
                    "Request completed"
                );
                response
            },
            Err(CommandError::NotFound) if request.command == Command::GetInfo => {
                debug!(path = %path.relative().display(), "Get-Info on missing file");
                Response::NotFound
            },
            Err(e) => {
                warn!(
                    command = %request.command,
                    path = %path.relative().display(),
                    kind = e.kind(),
                    error = %e,
                    "Request failed"
                );
                Response::failure(e.to_string())
            },
        }
    }

    /// Replaces the file contents with `data`.
    pub fn modify(
        &self,
        path: &ManagedPath,
        data: &[u8],
    ) -> Result<Vec<LabelWarning>, CommandError> {
        let record = self.load_for_write(path)?;
        self.ensure_parent(path)?;

        let write = || -> io::Result<()> {
            let mut file = File::create(path.absolute())?;
            file.write_all(data)?;
            file.sync_all()
        };
        write().map_err(|e| CommandError::io("write", path.relative(), e))?;

        self.commit(path, record)
    }

    /// Deletes the file if its retention period has elapsed.
    ///
    /// The sidecar is removed afterwards on a best-effort basis.
    pub fn delete(&self, path: &ManagedPath) -> Result<(), CommandError> {
        let now = self.clock.now_secs();
        let decision = self.retention.check(&self.store, path.absolute(), now);
        if !decision.is_allowed() {
            return Err(CommandError::Policy(decision));
        }

        let removed = match fs::remove_file(path.absolute()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(CommandError::NotFound),
            Err(e) => return Err(CommandError::io("delete", path.relative(), e)),
        };

        // A record without its file would hand its creation time to the
        // next write of this path.
        if let Err(e) = self.store.remove(path.absolute()) {
            warn!(path = %path.relative().display(), error = %e, "Failed to remove metadata sidecar");
        }
        removed
    }

    /// Makes the file byte-identical to `data`, rewriting only what changed.
    ///
    /// The payload is staged in an anonymous temp file next to the target,
    /// which is removed whether or not the merge succeeds. A missing target
    /// is created empty first.
    pub fn incremental_update(
        &self,
        path: &ManagedPath,
        data: &[u8],
    ) -> Result<Vec<LabelWarning>, CommandError> {
        let record = self.load_for_write(path)?;
        let dir = self.ensure_parent(path)?;

        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.absolute())
            .map_err(|e| CommandError::io("create", path.relative(), e))?;

        let mut source = tempfile::Builder::new()
            .prefix(".sealkeep-delta-")
            .tempfile_in(&dir)
            .map_err(|e| CommandError::io("stage update for", path.relative(), e))?;
        source
            .write_all(data)
            .and_then(|()| source.flush())
            .map_err(|e| CommandError::io("stage update for", path.relative(), e))?;

        let merged = self.delta.merge(source.path(), path.absolute());
        if let Err(e) = source.close() {
            warn!(path = %path.relative().display(), error = %e, "Failed to remove delta source");
        }
        let stats = merged?;
        debug!(
            path = %path.relative().display(),
            blocks_rewritten = stats.blocks_rewritten,
            bytes_written = stats.bytes_written,
            "Incremental update merged"
        );

        self.commit(path, record)
    }

    /// Reports the file's size, times, checksum and retention status.
    pub fn get_info(&self, path: &ManagedPath) -> Result<FileInfo, CommandError> {
        let meta = match fs::metadata(path.absolute()) {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => return Err(CommandError::validation("not a regular file")),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(CommandError::NotFound),
            Err(e) => return Err(CommandError::io("stat", path.relative(), e)),
        };

        let record = match self.store.load(path.absolute()) {
            Ok(MetadataLookup::Found(record)) => Some(record),
            Ok(MetadataLookup::Missing(_)) => None,
            Err(e) => {
                warn!(path = %path.relative().display(), error = %e, "Metadata unreadable");
                return Ok(FileInfo {
                    path: path.relative().display().to_string(),
                    size: meta.len(),
                    created: None,
                    modified: None,
                    retention_met: false,
                    checksum: UNAVAILABLE_CHECKSUM.to_string(),
                });
            },
        };

        let retention_met = self
            .retention
            .decide(record.as_ref(), self.clock.now_secs())
            .is_allowed();

        Ok(FileInfo {
            path: path.relative().display().to_string(),
            size: meta.len(),
            created: record.as_ref().map(|r| r.creation_time),
            modified: record.as_ref().map(|r| r.modification_time),
            retention_met,
            checksum: record.map_or_else(|| INITIAL_CHECKSUM.to_string(), |r| r.checksum),
        })
    }

    /// Loads the record a write will update.
    ///
    /// A record left behind by a file that no longer exists is discarded,
    /// so the new file's retention period starts now.
    fn load_for_write(&self, path: &ManagedPath) -> Result<FileMetadata, CommandError> {
        let lookup = self.store.load(path.absolute())?;
        if lookup.is_found() && !path.absolute().exists() {
            let stale = lookup.into_record();
            warn!(
                path = %path.relative().display(),
                creation_time = stale.creation_time,
                "Discarding metadata of a missing file"
            );
            return Ok(FileMetadata::initial(self.clock.now_secs()));
        }
        Ok(lookup.into_record())
    }

    /// Creates the target's parent directory and returns it.
    fn ensure_parent(&self, path: &ManagedPath) -> Result<PathBuf, CommandError> {
        let dir = path
            .absolute()
            .parent()
            .map_or_else(|| self.root.path().to_path_buf(), Path::to_path_buf);
        fs::create_dir_all(&dir)
            .map_err(|e| CommandError::io("create directory for", path.relative(), e))?;
        Ok(dir)
    }

    /// Refreshes checksum and modification time, saves the record, labels.
    fn commit(
        &self,
        path: &ManagedPath,
        mut record: FileMetadata,
    ) -> Result<Vec<LabelWarning>, CommandError> {
        record.checksum = file_checksum(path.absolute())
            .map_err(|e| CommandError::io("checksum", path.relative(), e))?;
        record.modification_time = self.clock.now_secs();
        self.store.save(path.absolute(), &record)?;

        Ok(self.apply_labels(path))
    }

    fn apply_labels(&self, path: &ManagedPath) -> Vec<LabelWarning> {
        let targets = [
            (path.absolute().to_path_buf(), path.relative().to_path_buf()),
            (path.sidecar(), sidecar_path(path.relative())),
        ];

        let mut warnings = Vec::new();
        for (absolute, relative) in targets {
            if let Err(e) = self.labels.apply_immutable_label(&absolute) {
                warn!(
                    path = %relative.display(),
                    backend = self.labels.name(),
                    error = %e,
                    "Failed to apply immutability label"
                );
                warnings.push(LabelWarning {
                    target: relative,
                    reason: e.to_string(),
                });
            }
        }
        warnings
    }
}

fn success(warnings: Vec<LabelWarning>) -> Response {
    Response::Success {
        warnings: warnings.iter().map(ToString::to_string).collect(),
    }
}
