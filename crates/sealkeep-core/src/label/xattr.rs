//! Extended-attribute label backend.
//!
//! With the default attribute, `security.selinux`, the file's existing
//! context is read and only its type field is replaced, e.g.
//! `system_u:object_r:var_lib_t:s0` becomes
//! `system_u:object_r:immutable_file_t:s0`. Any other attribute name has the
//! configured value written verbatim.
#![allow(unsafe_code)]

use std::io;
use std::path::Path;

use tracing::info;

use super::{LabelEnforcer, LabelError};

/// Attribute that holds a file's SELinux security context.
pub const SELINUX_ATTRIBUTE: &str = "security.selinux";

/// Upper bound on attribute values read back.
const MAX_ATTRIBUTE_SIZE: usize = 4096;

/// Replaces the type field of an SELinux context.
///
/// Returns `None` if `context` is not `user:role:type[:level]`. The level
/// may itself contain colons (`s0:c0.c1023`) and is kept intact.
#[must_use]
pub fn relabel_selinux_context(context: &str, new_type: &str) -> Option<String> {
    let mut parts = context.splitn(4, ':');
    let user = parts.next().filter(|s| !s.is_empty())?;
    let role = parts.next().filter(|s| !s.is_empty())?;
    parts.next().filter(|s| !s.is_empty())?;
    Some(match parts.next() {
        Some(level) => format!("{user}:{role}:{new_type}:{level}"),
        None => format!("{user}:{role}:{new_type}"),
    })
}

/// Label backend storing the label in an extended attribute.
#[derive(Debug, Clone)]
pub struct XattrLabelEnforcer {
    attribute: String,
    value: String,
}

impl XattrLabelEnforcer {
    /// Creates a backend writing `value` (or the SELinux type `value`) to
    /// `attribute`.
    #[must_use]
    pub fn new(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    fn is_selinux(&self) -> bool {
        self.attribute == SELINUX_ATTRIBUTE
    }
}

impl LabelEnforcer for XattrLabelEnforcer {
    fn name(&self) -> &'static str {
        "xattr"
    }

    fn apply_immutable_label(&self, path: &Path) -> Result<(), LabelError> {
        let label = if self.is_selinux() {
            let current = sys::get(path, &self.attribute)
                .map_err(|e| classify(path, e))?
                .ok_or_else(|| LabelError::NoContext {
                    path: path.to_path_buf(),
                })?;
            let current = decode_value(&current);
            relabel_selinux_context(&current, &self.value).ok_or_else(|| {
                LabelError::MalformedContext {
                    path: path.to_path_buf(),
                    context: current.clone(),
                }
            })?
        } else {
            self.value.clone()
        };

        // setfilecon(3) stores contexts NUL-terminated.
        let mut bytes = label.clone().into_bytes();
        if self.is_selinux() {
            bytes.push(0);
        }
        sys::set(path, &self.attribute, &bytes).map_err(|e| classify(path, e))?;

        info!(path = %path.display(), attribute = %self.attribute, label = %label, "Applied immutability label");
        Ok(())
    }

    fn read_label(&self, path: &Path) -> Result<Option<String>, LabelError> {
        Ok(sys::get(path, &self.attribute)
            .map_err(|e| classify(path, e))?
            .map(|raw| decode_value(&raw)))
    }
}

fn decode_value(raw: &[u8]) -> String {
    let trimmed = raw.strip_suffix(&[0]).unwrap_or(raw);
    String::from_utf8_lossy(trimmed).into_owned()
}

fn classify(path: &Path, err: io::Error) -> LabelError {
    if err.kind() == io::ErrorKind::Unsupported {
        LabelError::Unsupported {
            path: path.to_path_buf(),
            reason: err.to_string(),
        }
    } else {
        LabelError::Io {
            path: path.to_path_buf(),
            source: err,
        }
    }
}

#[cfg(target_os = "linux")]
mod sys {
    use std::ffi::CString;
    use std::io;
    use std::os::unix::ffi::OsStrExt;
    use std::path::Path;

    use super::MAX_ATTRIBUTE_SIZE;

    fn c_strings(path: &Path, name: &str) -> io::Result<(CString, CString)> {
        let path = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains NUL"))?;
        let name = CString::new(name)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "attribute contains NUL"))?;
        Ok((path, name))
    }

    fn map_errno(err: io::Error) -> io::Error {
        match err.raw_os_error() {
            Some(libc::ENOTSUP) => io::Error::new(io::ErrorKind::Unsupported, err),
            _ => err,
        }
    }

    pub(super) fn get(path: &Path, name: &str) -> io::Result<Option<Vec<u8>>> {
        let (c_path, c_name) = c_strings(path, name)?;
        let mut buf = vec![0u8; MAX_ATTRIBUTE_SIZE];

        // SAFETY: both strings are NUL-terminated and outlive the call; `buf`
        // is valid for writes of `buf.len()` bytes.
        let len = unsafe {
            libc::getxattr(
                c_path.as_ptr(),
                c_name.as_ptr(),
                buf.as_mut_ptr().cast::<libc::c_void>(),
                buf.len(),
            )
        };
        if len < 0 {
            let err = io::Error::last_os_error();
            return if err.raw_os_error() == Some(libc::ENODATA) {
                Ok(None)
            } else {
                Err(map_errno(err))
            };
        }

        buf.truncate(len.unsigned_abs());
        Ok(Some(buf))
    }

    pub(super) fn set(path: &Path, name: &str, value: &[u8]) -> io::Result<()> {
        let (c_path, c_name) = c_strings(path, name)?;

        // SAFETY: both strings are NUL-terminated and outlive the call;
        // `value` is valid for reads of `value.len()` bytes.
        let rc = unsafe {
            libc::setxattr(
                c_path.as_ptr(),
                c_name.as_ptr(),
                value.as_ptr().cast::<libc::c_void>(),
                value.len(),
                0,
            )
        };
        if rc == 0 {
            Ok(())
        } else {
            Err(map_errno(io::Error::last_os_error()))
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod sys {
    use std::io;
    use std::path::Path;

    pub(super) fn get(_path: &Path, _name: &str) -> io::Result<Option<Vec<u8>>> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "extended attribute labels require Linux",
        ))
    }

    pub(super) fn set(_path: &Path, _name: &str, _value: &[u8]) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "extended attribute labels require Linux",
        ))
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn relabel_replaces_type_only() {
        assert_eq!(
            relabel_selinux_context("system_u:object_r:var_lib_t:s0", "immutable_file_t"),
            Some("system_u:object_r:immutable_file_t:s0".to_string())
        );
        assert_eq!(
            relabel_selinux_context("u:r:t:s0:c0.c1023", "immutable_file_t"),
            Some("u:r:immutable_file_t:s0:c0.c1023".to_string())
        );
        assert_eq!(
            relabel_selinux_context("u:r:t", "x_t"),
            Some("u:r:x_t".to_string())
        );
    }

    #[test]
    fn relabel_rejects_short_contexts() {
        assert_eq!(relabel_selinux_context("", "x_t"), None);
        assert_eq!(relabel_selinux_context("u:r", "x_t"), None);
        assert_eq!(relabel_selinux_context("u::t", "x_t"), None);
    }

    #[test]
    fn decode_strips_trailing_nul() {
        assert_eq!(decode_value(b"u:r:t:s0\0"), "u:r:t:s0");
        assert_eq!(decode_value(b"plain"), "plain");
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let labels = XattrLabelEnforcer::new("user.sealkeep.label", "immutable");
        assert!(labels
            .apply_immutable_label(&dir.path().join("absent"))
            .is_err());
    }

    /// User-namespace attributes work on most Linux filesystems; skip
    /// quietly where the test filesystem refuses them.
    #[test]
    fn user_attribute_round_trip() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, b"x").unwrap();
        let labels = XattrLabelEnforcer::new("user.sealkeep.label", "immutable");

        match labels.apply_immutable_label(&file) {
            Ok(()) => {
                assert_eq!(
                    labels.read_label(&file).unwrap(),
                    Some("immutable".to_string())
                );
            },
            Err(LabelError::Unsupported { .. } | LabelError::Io { .. }) => {},
            Err(other) => panic!("unexpected label error: {other}"),
        }
    }
}
