//! Request authentication.
//!
//! A request is accepted only if all of these hold:
//!
//! 1. The token equals the configured shared secret (constant-time).
//! 2. The path is between 1 and 1023 bytes.
//! 3. `|now - timestamp|` is within the replay window.
//!
//! The window is symmetric: requests stamped too far in the future are
//! rejected the same way as stale ones. It is a coarse anti-replay control,
//! not a nonce scheme; a captured request can be replayed inside the window.

use std::sync::Arc;
use std::time::Duration;

use sealkeep_core::Clock;
use secrecy::{ExposeSecret, SecretString};
use subtle::ConstantTimeEq;
use thiserror::Error;

use super::wire::{PATH_FIELD_LEN, RequestHeader};

/// Why authentication failed.
///
/// Logged server-side only; the client always sees the same
/// `authentication failed` line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthFailure {
    /// Token mismatch.
    #[error("token mismatch")]
    BadToken,

    /// Path empty or too long.
    #[error("path length {len} outside 1..={max}")]
    BadPath {
        /// Path length in bytes.
        len: usize,
        /// Maximum allowed length.
        max: usize,
    },

    /// Timestamp outside the replay window.
    #[error("timestamp skew {skew_secs}s exceeds {window_secs}s")]
    Stale {
        /// `now - timestamp`; negative for future timestamps.
        skew_secs: i64,
        /// Allowed skew.
        window_secs: u64,
    },
}

/// Checks request headers against the shared secret and the clock.
pub struct Authenticator {
    token: SecretString,
    replay_window: Duration,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("replay_window", &self.replay_window)
            .finish_non_exhaustive()
    }
}

impl Authenticator {
    /// Creates an authenticator.
    #[must_use]
    pub fn new(token: SecretString, replay_window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            token,
            replay_window,
            clock,
        }
    }

    /// Returns `true` if the header passes every check.
    #[must_use]
    pub fn authenticate(&self, header: &RequestHeader) -> bool {
        self.check(header).is_ok()
    }

    /// Runs every check, reporting the first failure.
    ///
    /// The token is compared first so that timing does not reveal whether
    /// the other checks passed.
    pub fn check(&self, header: &RequestHeader) -> Result<(), AuthFailure> {
        let presented = header.token.expose_secret().as_bytes();
        let expected = self.token.expose_secret().as_bytes();
        if presented.ct_eq(expected).unwrap_u8() != 1 {
            return Err(AuthFailure::BadToken);
        }

        let max = PATH_FIELD_LEN - 1;
        let len = header.path.len();
        if len == 0 || len > max {
            return Err(AuthFailure::BadPath { len, max });
        }

        let window_secs = self.replay_window.as_secs();
        let skew_secs = self.clock.now_secs().saturating_sub(header.timestamp);
        if skew_secs.unsigned_abs() > window_secs {
            return Err(AuthFailure::Stale {
                skew_secs,
                window_secs,
            });
        }

        Ok(())
    }
}
