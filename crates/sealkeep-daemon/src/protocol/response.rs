//! Response rendering.
//!
//! Each connection gets exactly one plain-text response, after which the
//! server closes the connection. The client reads to EOF.

use chrono::DateTime;

/// Status line for a successful mutation.
pub const SUCCESS: &str = "success";

/// Status line for a rejected request.
pub const AUTHENTICATION_FAILED: &str = "authentication failed";

/// Status line for Get-Info on a missing file.
pub const NOT_FOUND: &str = "not found";

/// Prefix of an info record.
const INFO_PREFIX: &str = "file: ";

/// Snapshot of a managed file, as reported by Get-Info.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Path relative to the managed root.
    pub path: String,
    /// Current size in bytes.
    pub size: u64,
    /// Creation time, `None` without metadata.
    pub created: Option<i64>,
    /// Last modification time, `None` without metadata.
    pub modified: Option<i64>,
    /// Whether retention currently allows deletion.
    pub retention_met: bool,
    /// Checksum from metadata.
    pub checksum: String,
}

/// A response to one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// The mutation completed. Label problems are carried as warnings.
    Success {
        /// One line per label that could not be applied.
        warnings: Vec<String>,
    },
    /// The request was valid but the operation failed.
    Failure(String),
    /// Authentication failed; nothing was done.
    AuthenticationFailed,
    /// Get-Info on a file that does not exist.
    NotFound,
    /// Get-Info record.
    Info(FileInfo),
}

impl Response {
    /// Successful mutation without warnings.
    #[must_use]
    pub const fn success() -> Self {
        Self::Success {
            warnings: Vec::new(),
        }
    }

    /// Failure with a reason.
    #[must_use]
    pub fn failure(reason: impl Into<String>) -> Self {
        Self::Failure(reason.into())
    }

    /// Renders the response text sent over the socket.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Success { warnings } => {
                let mut text = SUCCESS.to_string();
                for warning in warnings {
                    text.push_str("\nwarning: ");
                    text.push_str(warning);
                }
                text
            },
            Self::Failure(reason) => format!("failure: {reason}"),
            Self::AuthenticationFailed => AUTHENTICATION_FAILED.to_string(),
            Self::NotFound => NOT_FOUND.to_string(),
            Self::Info(info) => format!(
                "{INFO_PREFIX}{}\nsize: {} bytes\ncreated: {}\nmodified: {}\nretention met: {}\nchecksum: {}",
                info.path,
                info.size,
                format_time(info.created),
                format_time(info.modified),
                if info.retention_met { "yes" } else { "no" },
                info.checksum,
            ),
        }
    }
}

impl std::fmt::Display for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render())
    }
}

/// Returns `true` if a rendered response reports success.
///
/// Both a mutation's `success` line and a Get-Info record count.
#[must_use]
pub fn indicates_success(text: &str) -> bool {
    text.starts_with(SUCCESS) || text.starts_with(INFO_PREFIX)
}

fn format_time(secs: Option<i64>) -> String {
    secs.and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map_or_else(
            || "unknown".to_string(),
            |time| time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        )
}
