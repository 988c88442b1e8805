//! Immutability labels.
//!
//! After every successful mutation the service labels both the managed file
//! and its sidecar. The label is what the rest of the system (for example an
//! SELinux policy that denies writes to `immutable_file_t`) enforces; this
//! crate only applies and reads it.
//!
//! A label failure never undoes the write it follows. Callers report it as
//! a warning alongside the successful result.

mod xattr;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

pub use self::xattr::{SELINUX_ATTRIBUTE, XattrLabelEnforcer, relabel_selinux_context};
use crate::config::{LabelBackend, LabelConfig};

/// Label application errors.
#[derive(Debug, Error)]
pub enum LabelError {
    /// Extended attributes are not available on this platform or filesystem.
    #[error("labels unsupported for {path}: {reason}")]
    Unsupported {
        /// Target path.
        path: PathBuf,
        /// Why.
        reason: String,
    },

    /// The file has no security context to derive a new one from.
    #[error("no security context on {path}")]
    NoContext {
        /// Target path.
        path: PathBuf,
    },

    /// The existing security context is not `user:role:type[:level]`.
    #[error("malformed security context on {path}: {context:?}")]
    MalformedContext {
        /// Target path.
        path: PathBuf,
        /// The context that was read.
        context: String,
    },

    /// Reading or writing the attribute failed.
    #[error("label I/O on {path}: {source}")]
    Io {
        /// Target path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

/// Applies and reads immutability labels.
pub trait LabelEnforcer: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Labels `path` as immutable.
    ///
    /// # Errors
    ///
    /// Returns a [`LabelError`] if the label could not be applied.
    fn apply_immutable_label(&self, path: &Path) -> Result<(), LabelError>;

    /// Reads the current label of `path`, `None` if it has none.
    ///
    /// # Errors
    ///
    /// Returns a [`LabelError`] if the label could not be read.
    fn read_label(&self, path: &Path) -> Result<Option<String>, LabelError>;
}

/// Backend that applies nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledLabels;

impl LabelEnforcer for DisabledLabels {
    fn name(&self) -> &'static str {
        "disabled"
    }

    fn apply_immutable_label(&self, _path: &Path) -> Result<(), LabelError> {
        Ok(())
    }

    fn read_label(&self, _path: &Path) -> Result<Option<String>, LabelError> {
        Ok(None)
    }
}

/// Builds the configured backend.
#[must_use]
pub fn from_config(config: &LabelConfig) -> Arc<dyn LabelEnforcer> {
    match config.backend {
        LabelBackend::Xattr => Arc::new(XattrLabelEnforcer::new(
            config.attribute.clone(),
            config.value.clone(),
        )),
        LabelBackend::Disabled => Arc::new(DisabledLabels),
    }
}
