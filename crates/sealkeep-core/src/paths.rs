//! Resolution of request paths against the managed root.
//!
//! Requests carry a path relative to the managed root. Only plain relative
//! paths made of normal components are accepted, and no component may end
//! in the sidecar suffix. Rejection happens before any file is touched.

use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

/// Suffix appended to a managed file's path to name its metadata sidecar.
pub const SIDECAR_SUFFIX: &str = ".meta";

/// Errors from request path resolution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    /// The request path was empty.
    #[error("path is empty")]
    Empty,

    /// The request path was absolute.
    #[error("path must be relative to the managed root: {0}")]
    Absolute(String),

    /// The request path tried to leave the managed root.
    #[error("path escapes the managed root: {0}")]
    Traversal(String),

    /// The request path names a metadata sidecar.
    #[error("path names a reserved sidecar file: {0}")]
    Reserved(String),
}

/// The directory under which all managed files live.
#[derive(Debug, Clone)]
pub struct ManagedRoot {
    root: PathBuf,
}

impl ManagedRoot {
    /// Creates a managed root at `root`. The directory is not created.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Resolves a request path to a managed file.
    ///
    /// `.` components are dropped; anything other than normal components
    /// is refused.
    ///
    /// # Errors
    ///
    /// See [`PathError`].
    pub fn resolve(&self, relative: &str) -> Result<ManagedPath, PathError> {
        if relative.is_empty() {
            return Err(PathError::Empty);
        }

        let mut clean = PathBuf::new();
        for component in Path::new(relative).components() {
            match component {
                Component::Normal(part) => {
                    if part.to_string_lossy().ends_with(SIDECAR_SUFFIX) {
                        return Err(PathError::Reserved(relative.to_string()));
                    }
                    clean.push(part);
                },
                Component::CurDir => {},
                Component::ParentDir => return Err(PathError::Traversal(relative.to_string())),
                Component::RootDir | Component::Prefix(_) => {
                    return Err(PathError::Absolute(relative.to_string()));
                },
            }
        }

        if clean.as_os_str().is_empty() {
            return Err(PathError::Empty);
        }
        Ok(ManagedPath {
            relative: clean.clone(),
            absolute: self.root.join(clean),
        })
    }
}

/// A request path resolved inside the managed root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ManagedPath {
    relative: PathBuf,
    absolute: PathBuf,
}

impl ManagedPath {
    /// Path relative to the managed root, as shown to clients.
    #[must_use]
    pub fn relative(&self) -> &Path {
        &self.relative
    }

    /// Absolute path of the managed file.
    #[must_use]
    pub fn absolute(&self) -> &Path {
        &self.absolute
    }

    /// Path of the metadata sidecar for this file.
    #[must_use]
    pub fn sidecar(&self) -> PathBuf {
        sidecar_path(&self.absolute)
    }
}

/// Returns the sidecar path for `file` (`<file>.meta`).
#[must_use]
pub fn sidecar_path(file: &Path) -> PathBuf {
    let mut name = OsString::from(file.as_os_str());
    name.push(SIDECAR_SUFFIX);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_plain_and_nested_paths() {
        let root = ManagedRoot::new("/srv/data");

        let path = root.resolve("a.txt").unwrap();
        assert_eq!(path.relative(), Path::new("a.txt"));
        assert_eq!(path.absolute(), Path::new("/srv/data/a.txt"));
        assert_eq!(path.sidecar(), PathBuf::from("/srv/data/a.txt.meta"));

        let nested = root.resolve("./logs/2026/app.log").unwrap();
        assert_eq!(nested.relative(), Path::new("logs/2026/app.log"));
        assert_eq!(nested.absolute(), Path::new("/srv/data/logs/2026/app.log"));
    }

    #[test]
    fn rejects_escapes() {
        let root = ManagedRoot::new("/srv/data");

        assert_eq!(root.resolve(""), Err(PathError::Empty));
        assert_eq!(root.resolve("."), Err(PathError::Empty));
        assert!(matches!(root.resolve("/etc/passwd"), Err(PathError::Absolute(_))));
        assert!(matches!(root.resolve("../x"), Err(PathError::Traversal(_))));
        assert!(matches!(root.resolve("a/../../x"), Err(PathError::Traversal(_))));
    }

    #[test]
    fn rejects_sidecar_names() {
        let root = ManagedRoot::new("/srv/data");
        assert!(matches!(root.resolve("a.txt.meta"), Err(PathError::Reserved(_))));
        assert!(matches!(root.resolve("a.txt.meta/x"), Err(PathError::Reserved(_))));
        assert!(matches!(root.resolve("logs/b.meta/c/d.log"), Err(PathError::Reserved(_))));
        assert!(root.resolve("meta").is_ok());
        assert!(root.resolve("a.metadata").is_ok());
    }
}
