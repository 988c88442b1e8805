//! Content fingerprints for managed files.

use std::fs::File;
use std::io;
use std::path::Path;

/// Checksum recorded before any content has been fingerprinted.
pub const INITIAL_CHECKSUM: &str = "initial";

/// Prefix identifying the hash algorithm in a stored checksum.
pub const CHECKSUM_PREFIX: &str = "blake3:";

/// Computes the checksum of a file's current contents.
///
/// Streams the file so large payloads are not held twice in memory.
///
/// # Errors
///
/// Returns any I/O error from opening or reading the file.
pub fn file_checksum(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("{CHECKSUM_PREFIX}{}", hasher.finalize().to_hex()))
}

/// Computes the checksum of an in-memory buffer.
#[must_use]
pub fn bytes_checksum(bytes: &[u8]) -> String {
    format!("{CHECKSUM_PREFIX}{}", blake3::hash(bytes).to_hex())
}
