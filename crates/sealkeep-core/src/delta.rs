//! In-place delta synchronization.
//!
//! An incremental update makes a target file byte-identical to a source
//! file while rewriting as little of the target as possible. The merge is
//! done in-process: no external tool is spawned and no command line is
//! built from request data.
//!
//! [`BlockDeltaSync`] walks both files in fixed-size blocks, rewrites only
//! blocks that differ, then truncates or extends the target to the source
//! length. Unchanged prefixes (the common case for append-mostly files)
//! cost reads only.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

/// Delta synchronization errors.
#[derive(Debug, Error)]
pub enum DeltaError {
    /// The source could not be read.
    #[error("cannot read delta source {path}: {source}")]
    Source {
        /// Source path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The target could not be read or written.
    #[error("cannot update delta target {path}: {source}")]
    Target {
        /// Target path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

/// What a merge did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeltaStats {
    /// Blocks of the source compared against the target.
    pub blocks_compared: u64,
    /// Blocks written to the target.
    pub blocks_rewritten: u64,
    /// Bytes written to the target.
    pub bytes_written: u64,
    /// Final target length.
    pub final_len: u64,
}

/// Merges a source file into a target file in place.
pub trait DeltaSync: Send + Sync {
    /// Makes `target` byte-identical to `source`. `target` must exist.
    ///
    /// # Errors
    ///
    /// Returns a [`DeltaError`] if either file cannot be accessed. The
    /// target may be partially updated on error.
    fn merge(&self, source: &Path, target: &Path) -> Result<DeltaStats, DeltaError>;
}

/// Block-compare implementation of [`DeltaSync`].
#[derive(Debug, Clone)]
pub struct BlockDeltaSync {
    block_size: usize,
}

impl BlockDeltaSync {
    /// Default block size.
    pub const DEFAULT_BLOCK_SIZE: usize = 4096;

    /// Creates a merger comparing `block_size`-byte blocks. Zero is raised
    /// to one.
    #[must_use]
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size: block_size.max(1),
        }
    }
}

impl Default for BlockDeltaSync {
    fn default() -> Self {
        Self::new(Self::DEFAULT_BLOCK_SIZE)
    }
}

impl DeltaSync for BlockDeltaSync {
    fn merge(&self, source: &Path, target: &Path) -> Result<DeltaStats, DeltaError> {
        let source_err = |e| DeltaError::Source {
            path: source.to_path_buf(),
            source: e,
        };
        let target_err = |e| DeltaError::Target {
            path: target.to_path_buf(),
            source: e,
        };

        let mut src = File::open(source).map_err(source_err)?;
        let mut dst = OpenOptions::new()
            .read(true)
            .write(true)
            .open(target)
            .map_err(target_err)?;

        let mut src_block = vec![0u8; self.block_size];
        let mut dst_block = vec![0u8; self.block_size];
        let mut stats = DeltaStats::default();
        let mut offset: u64 = 0;

        loop {
            let n = read_full(&mut src, &mut src_block).map_err(source_err)?;
            if n == 0 {
                break;
            }
            stats.blocks_compared += 1;

            dst.seek(SeekFrom::Start(offset)).map_err(target_err)?;
            let existing = read_full(&mut dst, &mut dst_block[..n]).map_err(target_err)?;

            if existing != n || dst_block[..n] != src_block[..n] {
                dst.seek(SeekFrom::Start(offset)).map_err(target_err)?;
                dst.write_all(&src_block[..n]).map_err(target_err)?;
                stats.blocks_rewritten += 1;
                stats.bytes_written += n as u64;
            }

            offset += n as u64;
        }

        dst.set_len(offset).map_err(target_err)?;
        dst.sync_all().map_err(target_err)?;
        stats.final_len = offset;

        debug!(
            target = %target.display(),
            blocks_compared = stats.blocks_compared,
            blocks_rewritten = stats.blocks_rewritten,
            bytes_written = stats.bytes_written,
            "Delta merge complete"
        );
        Ok(stats)
    }
}

/// Reads until `buf` is full or EOF; returns bytes read.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn merge(block_size: usize, old: &[u8], new: &[u8]) -> (Vec<u8>, DeltaStats) {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("source");
        let target = dir.path().join("target");
        std::fs::write(&source, new).unwrap();
        std::fs::write(&target, old).unwrap();

        let stats = BlockDeltaSync::new(block_size)
            .merge(&source, &target)
            .unwrap();
        (std::fs::read(&target).unwrap(), stats)
    }

    #[test]
    fn append_rewrites_only_the_tail() {
        let (content, stats) = merge(4, b"hello", b"hello world");
        assert_eq!(content, b"hello world");
        assert_eq!(stats.blocks_compared, 3);
        // "hell" is unchanged; "o wo" and "rld" are new.
        assert_eq!(stats.blocks_rewritten, 2);
        assert_eq!(stats.bytes_written, 7);
        assert_eq!(stats.final_len, 11);
    }

    #[test]
    fn identical_files_write_nothing() {
        let (content, stats) = merge(4, b"same bytes", b"same bytes");
        assert_eq!(content, b"same bytes");
        assert_eq!(stats.blocks_rewritten, 0);
        assert_eq!(stats.bytes_written, 0);
    }

    #[test]
    fn shrinking_truncates_target() {
        let (content, stats) = merge(4, b"hello world", b"hello");
        assert_eq!(content, b"hello");
        assert_eq!(stats.blocks_rewritten, 1);
        assert_eq!(stats.final_len, 5);
    }

    #[test]
    fn empty_target_is_filled() {
        let (content, stats) = merge(4096, b"", b"fresh");
        assert_eq!(content, b"fresh");
        assert_eq!(stats.blocks_rewritten, 1);
    }

    #[test]
    fn empty_source_empties_target() {
        let (content, stats) = merge(4096, b"old", b"");
        assert!(content.is_empty());
        assert_eq!(stats.blocks_compared, 0);
    }

    #[test]
    fn middle_change_rewrites_one_block() {
        let old = b"aaaabbbbcccc";
        let new = b"aaaaXbbbcccc";
        let (content, stats) = merge(4, old, new);
        assert_eq!(content, new);
        assert_eq!(stats.blocks_rewritten, 1);
    }

    #[test]
    fn missing_target_is_target_error() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("source");
        std::fs::write(&source, b"x").unwrap();

        let err = BlockDeltaSync::default()
            .merge(&source, &dir.path().join("absent"))
            .unwrap_err();
        assert!(matches!(err, DeltaError::Target { .. }));
    }

    #[test]
    fn missing_source_is_source_error() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("target");
        std::fs::write(&target, b"x").unwrap();

        let err = BlockDeltaSync::default()
            .merge(&dir.path().join("absent"), &target)
            .unwrap_err();
        assert!(matches!(err, DeltaError::Source { .. }));
    }
}
