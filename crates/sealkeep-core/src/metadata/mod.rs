//! Sidecar metadata records.
//!
//! Each managed file `P` has a record at `P.meta` holding three
//! `key=value` lines:
//!
//! ```text
//! creation_time=1760000000
//! modification_time=1760003600
//! checksum=blake3:9f86d0...
//! ```
//!
//! `creation_time` is fixed the first time a path is mutated and never
//! rewritten. `modification_time` and `checksum` are refreshed after every
//! successful mutation.
//!
//! # Consistency
//!
//! Records are written to an anonymous temp file in the same directory,
//! synced, and renamed over the old record, so a concurrent reader sees
//! either the old or the new record and never a torn one. The file and its
//! record are still two objects: a crash between the file write and the
//! record rename leaves the record describing the previous contents.

pub mod checksum;

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

pub use self::checksum::{INITIAL_CHECKSUM, bytes_checksum, file_checksum};
use crate::clock::Clock;
use crate::paths::sidecar_path;

/// Maximum size of a sidecar record accepted on load.
///
/// Real records are under 200 bytes.
pub const MAX_RECORD_SIZE: u64 = 4096;

/// Lifecycle record for one managed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    /// Seconds since epoch of the first mutation.
    pub creation_time: i64,
    /// Seconds since epoch of the latest mutation.
    pub modification_time: i64,
    /// Content fingerprint after the latest mutation.
    pub checksum: String,
}

impl FileMetadata {
    /// Record for a path that has never been mutated.
    #[must_use]
    pub fn initial(now: i64) -> Self {
        Self {
            creation_time: now,
            modification_time: now,
            checksum: INITIAL_CHECKSUM.to_string(),
        }
    }

    /// Serializes the record to its `key=value` text form.
    #[must_use]
    pub fn to_record(&self) -> String {
        format!(
            "creation_time={}\nmodification_time={}\nchecksum={}\n",
            self.creation_time, self.modification_time, self.checksum
        )
    }

    /// Parses a record from its `key=value` text form.
    ///
    /// Unknown keys are ignored. All three known keys are required.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::Corrupt`] for missing keys, bad integers, or
    /// lines without `=`.
    pub fn parse_record(text: &str) -> Result<Self, MetadataError> {
        let mut creation_time = None;
        let mut modification_time = None;
        let mut checksum = None;

        for line in text.lines().filter(|line| !line.trim().is_empty()) {
            let (key, value) = line.split_once('=').ok_or_else(|| MetadataError::Corrupt {
                reason: format!("line without '=': {line:?}"),
            })?;
            match key.trim() {
                "creation_time" => creation_time = Some(parse_time(key, value)?),
                "modification_time" => modification_time = Some(parse_time(key, value)?),
                "checksum" => checksum = Some(value.trim().to_string()),
                _ => {},
            }
        }

        Ok(Self {
            creation_time: creation_time.ok_or_else(|| missing("creation_time"))?,
            modification_time: modification_time.ok_or_else(|| missing("modification_time"))?,
            checksum: checksum
                .filter(|c| !c.is_empty())
                .ok_or_else(|| missing("checksum"))?,
        })
    }
}

fn parse_time(key: &str, value: &str) -> Result<i64, MetadataError> {
    value
        .trim()
        .parse::<i64>()
        .map_err(|e| MetadataError::Corrupt {
            reason: format!("{key}: {e}"),
        })
}

fn missing(key: &str) -> MetadataError {
    MetadataError::Corrupt {
        reason: format!("missing {key}"),
    }
}

/// Outcome of [`MetadataStore::load`].
///
/// Both variants carry a usable record; callers that need to know whether
/// the path has ever been mutated check [`MetadataLookup::is_found`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataLookup {
    /// A stored record.
    Found(FileMetadata),
    /// No record exists. Carries [`FileMetadata::initial`] for "now".
    Missing(FileMetadata),
}

impl MetadataLookup {
    /// Returns `true` if a stored record was found.
    #[must_use]
    pub const fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }

    /// Returns the stored record, or `None` if it was missing.
    #[must_use]
    pub fn found(self) -> Option<FileMetadata> {
        match self {
            Self::Found(record) => Some(record),
            Self::Missing(_) => None,
        }
    }

    /// Returns the record, stored or default.
    #[must_use]
    pub fn into_record(self) -> FileMetadata {
        match self {
            Self::Found(record) | Self::Missing(record) => record,
        }
    }
}

/// Metadata store errors.
#[derive(Debug, Error)]
pub enum MetadataError {
    /// The record exists but could not be parsed.
    #[error("corrupt metadata record: {reason}")]
    Corrupt {
        /// What was wrong with it.
        reason: String,
    },

    /// The record is larger than [`MAX_RECORD_SIZE`].
    #[error("metadata record too large: {size} bytes")]
    TooLarge {
        /// Size on disk.
        size: u64,
    },

    /// Reading or writing the record failed.
    #[error("metadata I/O on {path}: {source}")]
    Io {
        /// Sidecar path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

impl MetadataError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Reads and writes sidecar records.
#[derive(Clone)]
pub struct MetadataStore {
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for MetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataStore").finish_non_exhaustive()
    }
}

impl MetadataStore {
    /// Creates a store that stamps default records with `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Loads the record for `file`.
    ///
    /// # Errors
    ///
    /// A missing record is not an error (see [`MetadataLookup::Missing`]);
    /// unreadable or corrupt records are.
    pub fn load(&self, file: &Path) -> Result<MetadataLookup, MetadataError> {
        let sidecar = sidecar_path(file);

        let size = match std::fs::metadata(&sidecar) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(MetadataLookup::Missing(FileMetadata::initial(
                    self.clock.now_secs(),
                )));
            },
            Err(e) => return Err(MetadataError::io(&sidecar, e)),
        };
        if size > MAX_RECORD_SIZE {
            return Err(MetadataError::TooLarge { size });
        }

        let text = match std::fs::read_to_string(&sidecar) {
            Ok(text) => text,
            // Removed between stat and read.
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(MetadataLookup::Missing(FileMetadata::initial(
                    self.clock.now_secs(),
                )));
            },
            Err(e) => return Err(MetadataError::io(&sidecar, e)),
        };

        FileMetadata::parse_record(&text).map(MetadataLookup::Found)
    }

    /// Atomically replaces the record for `file`.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::Io`] if the temp file cannot be created,
    /// written, synced, or renamed into place.
    pub fn save(&self, file: &Path, record: &FileMetadata) -> Result<(), MetadataError> {
        let sidecar = sidecar_path(file);
        let dir = sidecar
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let mut temp =
            tempfile::NamedTempFile::new_in(dir).map_err(|e| MetadataError::io(&sidecar, e))?;
        temp.as_file_mut()
            .write_all(record.to_record().as_bytes())
            .map_err(|e| MetadataError::io(&sidecar, e))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| MetadataError::io(&sidecar, e))?;
        temp.persist(&sidecar)
            .map_err(|e| MetadataError::io(&sidecar, e.error))?;

        debug!(sidecar = %sidecar.display(), "Saved metadata record");
        Ok(())
    }

    /// Removes the record for `file`. A missing record is not an error.
    ///
    /// # Errors
    ///
    /// Returns any other I/O error from the removal.
    pub fn remove(&self, file: &Path) -> Result<(), MetadataError> {
        let sidecar = sidecar_path(file);
        match std::fs::remove_file(&sidecar) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(MetadataError::io(&sidecar, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use tempfile::TempDir;

    use super::*;
    use crate::clock::ManualClock;

    fn store_at(now: i64) -> MetadataStore {
        MetadataStore::new(Arc::new(ManualClock::new(now)))
    }

    #[test]
    fn missing_record_is_distinct_from_found() {
        let dir = TempDir::new().unwrap();
        let store = store_at(1_700_000_000);

        let lookup = store.load(&dir.path().join("a.txt")).unwrap();
        assert!(!lookup.is_found());
        assert_eq!(lookup.into_record(), FileMetadata::initial(1_700_000_000));
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.txt");
        let store = store_at(0);
        let record = FileMetadata {
            creation_time: 1_700_000_000,
            modification_time: 1_700_000_500,
            checksum: bytes_checksum(b"hello"),
        };

        store.save(&file, &record).unwrap();
        assert!(dir.path().join("a.txt.meta").exists());

        let lookup = store.load(&file).unwrap();
        assert!(lookup.is_found());
        assert_eq!(lookup.into_record(), record);
    }

    #[test]
    fn save_replaces_existing_record() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.txt");
        let store = store_at(0);

        let mut record = FileMetadata::initial(10);
        store.save(&file, &record).unwrap();
        record.modification_time = 20;
        record.checksum = "blake3:00".to_string();
        store.save(&file, &record).unwrap();

        assert_eq!(store.load(&file).unwrap().found(), Some(record));
    }

    #[test]
    fn corrupt_record_is_an_error() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.txt");
        let store = store_at(0);

        std::fs::write(dir.path().join("a.txt.meta"), "creation_time=abc\n").unwrap();
        assert!(matches!(
            store.load(&file),
            Err(MetadataError::Corrupt { .. })
        ));

        std::fs::write(dir.path().join("a.txt.meta"), "creation_time=1\n").unwrap();
        let err = store.load(&file).unwrap_err();
        assert!(err.to_string().contains("modification_time"));
    }

    #[test]
    fn oversized_record_is_rejected() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(dir.path().join("a.txt.meta"), vec![b'x'; 8192]).unwrap();

        assert!(matches!(
            store_at(0).load(&file),
            Err(MetadataError::TooLarge { size: 8192 })
        ));
    }

    #[test]
    fn parse_ignores_unknown_keys_and_blank_lines() {
        let record = FileMetadata::parse_record(
            "creation_time=5\n\nowner=ops\nmodification_time=6\nchecksum=initial\n",
        )
        .unwrap();
        assert_eq!(record, FileMetadata {
            creation_time: 5,
            modification_time: 6,
            checksum: "initial".to_string(),
        });
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.txt");
        let store = store_at(0);

        store.save(&file, &FileMetadata::initial(1)).unwrap();
        store.remove(&file).unwrap();
        store.remove(&file).unwrap();
        assert!(!store.load(&file).unwrap().is_found());
    }

    proptest! {
        #[test]
        fn record_text_round_trips(
            creation in any::<i64>(),
            modification in any::<i64>(),
            checksum in "[a-z0-9:]{1,80}",
        ) {
            let record = FileMetadata {
                creation_time: creation,
                modification_time: modification,
                checksum,
            };
            prop_assert_eq!(FileMetadata::parse_record(&record.to_record()).unwrap(), record);
        }
    }
}
