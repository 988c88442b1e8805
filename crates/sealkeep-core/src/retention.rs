//! Deletion policy gate.
//!
//! A managed file may be deleted only once its minimum retention period has
//! elapsed since `creation_time`. A file whose metadata is missing or
//! unreadable cannot be checked and is never deletable.

use std::path::Path;
use std::time::Duration;

use tracing::warn;

use crate::metadata::{FileMetadata, MetadataStore};

/// Result of a retention check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionDecision {
    /// The retention period has elapsed.
    Allowed,
    /// The retention period has not elapsed yet.
    Retained {
        /// Seconds since creation (negative if creation is in the future).
        elapsed_secs: i64,
        /// Seconds required.
        required_secs: u64,
    },
    /// No readable metadata; the policy cannot be verified.
    Unverifiable,
}

impl RetentionDecision {
    /// Returns `true` only for [`RetentionDecision::Allowed`].
    #[must_use]
    pub const fn is_allowed(self) -> bool {
        matches!(self, Self::Allowed)
    }
}

impl std::fmt::Display for RetentionDecision {
    #[allow(clippy::cast_precision_loss)]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Allowed => write!(f, "retention period met"),
            Self::Retained {
                elapsed_secs,
                required_secs,
            } => write!(
                f,
                "retention period not met ({:.1}/{:.1} hours)",
                *elapsed_secs as f64 / 3600.0,
                *required_secs as f64 / 3600.0
            ),
            Self::Unverifiable => write!(f, "retention cannot be verified without metadata"),
        }
    }
}

/// Evaluates the minimum-retention rule.
#[derive(Debug, Clone)]
pub struct RetentionGuard {
    min_retention: Duration,
}

impl RetentionGuard {
    /// Creates a guard with the given minimum retention.
    #[must_use]
    pub const fn new(min_retention: Duration) -> Self {
        Self { min_retention }
    }

    /// Returns the configured minimum retention.
    #[must_use]
    pub const fn min_retention(&self) -> Duration {
        self.min_retention
    }

    /// Decides from a record and the current time. Pure.
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub fn decide(&self, record: Option<&FileMetadata>, now: i64) -> RetentionDecision {
        let Some(record) = record else {
            return RetentionDecision::Unverifiable;
        };

        let required_secs = self.min_retention.as_secs();
        let elapsed_secs = now.saturating_sub(record.creation_time);
        if elapsed_secs >= 0 && elapsed_secs as u64 >= required_secs {
            RetentionDecision::Allowed
        } else {
            RetentionDecision::Retained {
                elapsed_secs,
                required_secs,
            }
        }
    }

    /// Loads the record for `file` and decides.
    ///
    /// Load failures are logged and reported as
    /// [`RetentionDecision::Unverifiable`].
    #[must_use]
    pub fn check(&self, store: &MetadataStore, file: &Path, now: i64) -> RetentionDecision {
        match store.load(file) {
            Ok(lookup) => self.decide(lookup.found().as_ref(), now),
            Err(e) => {
                warn!(path = %file.display(), error = %e, "Metadata unreadable, deletion denied");
                RetentionDecision::Unverifiable
            },
        }
    }

    /// Returns `true` if `file` may be deleted at `now`.
    #[must_use]
    pub fn can_delete(&self, store: &MetadataStore, file: &Path, now: i64) -> bool {
        self.check(store, file, now).is_allowed()
    }
}
