//! Protocol error types for the socket layer.
//!
//! These cover failures of the channel itself, such as a bad header or a
//! peer that stops talking. Failures
//! of the requested operation are [`CommandError`](super::CommandError)s
//! and travel back to the client as a response instead.

use std::io;

use thiserror::Error;

/// Maximum response size a client will buffer (64 KiB).
///
/// Responses are a status line or a short info record; anything larger is
/// a misbehaving peer.
pub const MAX_RESPONSE_SIZE: usize = 64 * 1024;

/// Protocol errors for the socket layer.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The request header is malformed.
    ///
    /// Detected before any header field is trusted.
    #[error("invalid header: {reason}")]
    InvalidHeader {
        /// What was wrong with it.
        reason: String,
    },

    /// The command field holds a value outside the known commands.
    #[error("unknown command {value}")]
    UnknownCommand {
        /// Raw command value.
        value: u32,
    },

    /// The response exceeded [`MAX_RESPONSE_SIZE`].
    #[error("response exceeds {max} bytes")]
    ResponseTooLarge {
        /// Limit that was exceeded.
        max: usize,
    },

    /// The peer closed the connection before the exchange completed.
    #[error("connection closed")]
    ConnectionClosed,

    /// A read or write did not complete in time.
    #[error("operation timed out after {duration_ms} ms")]
    Timeout {
        /// Duration in milliseconds before timeout.
        duration_ms: u64,
    },

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ProtocolError {
    /// Create an invalid header error.
    #[must_use]
    pub fn invalid_header(reason: impl Into<String>) -> Self {
        Self::InvalidHeader {
            reason: reason.into(),
        }
    }

    /// Create a timeout error.
    #[must_use]
    pub const fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Returns `true` if the peer sent bytes that do not form a request.
    #[must_use]
    pub const fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::InvalidHeader { .. } | Self::UnknownCommand { .. } | Self::ResponseTooLarge { .. }
        )
    }

    /// Maps an I/O error from `read_exact` to [`ProtocolError::ConnectionClosed`]
    /// when the peer hung up mid-read.
    #[must_use]
    pub fn from_read(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            Self::ConnectionClosed
        } else {
            Self::Io(err)
        }
    }
}

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_errors_are_violations() {
        assert!(ProtocolError::invalid_header("short").is_protocol_violation());
        assert!(ProtocolError::UnknownCommand { value: 9 }.is_protocol_violation());
        assert!(!ProtocolError::timeout(100).is_protocol_violation());
        assert!(!ProtocolError::ConnectionClosed.is_protocol_violation());
    }

    #[test]
    fn eof_maps_to_connection_closed() {
        let eof = io::Error::new(io::ErrorKind::UnexpectedEof, "eof");
        assert!(matches!(
            ProtocolError::from_read(eof),
            ProtocolError::ConnectionClosed
        ));

        let reset = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        assert!(matches!(
            ProtocolError::from_read(reset),
            ProtocolError::Io(_)
        ));
    }

    #[test]
    fn timeout_message_includes_duration() {
        assert!(ProtocolError::timeout(30_000).to_string().contains("30000"));
    }
}
