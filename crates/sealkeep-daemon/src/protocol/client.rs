//! Protocol client.
//!
//! Used by the `sealkeep` CLI and by the integration tests. Each call opens
//! a connection, sends one header (plus payload) and reads the single
//! response to EOF.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use sealkeep_core::{Clock, SystemClock};
use secrecy::{ExposeSecret, SecretString};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::debug;

use super::connection_handler::bounded;
use super::error::{MAX_RESPONSE_SIZE, ProtocolError, ProtocolResult};
use super::wire::{Command, RequestHeader};

/// Default bound on each step of a request.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for the sealkeep socket.
pub struct ServiceClient {
    socket_path: PathBuf,
    token: SecretString,
    timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for ServiceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceClient")
            .field("socket_path", &self.socket_path)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ServiceClient {
    /// Creates a client for the socket at `socket_path`.
    #[must_use]
    pub fn new(socket_path: impl Into<PathBuf>, token: SecretString) -> Self {
        Self {
            socket_path: socket_path.into(),
            token,
            timeout: DEFAULT_TIMEOUT,
            clock: Arc::new(SystemClock),
        }
    }

    /// Sets the per-step timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the clock used to stamp requests.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces the contents of `path`.
    pub async fn modify(&self, path: &str, data: &[u8]) -> ProtocolResult<String> {
        self.send(Command::Modify, path, data).await
    }

    /// Deletes `path`.
    pub async fn delete(&self, path: &str) -> ProtocolResult<String> {
        self.send(Command::Delete, path, &[]).await
    }

    /// Merges `data` into `path` in place.
    pub async fn incremental_update(&self, path: &str, data: &[u8]) -> ProtocolResult<String> {
        self.send(Command::IncrementalUpdate, path, data).await
    }

    /// Fetches the info record for `path`.
    pub async fn get_info(&self, path: &str) -> ProtocolResult<String> {
        self.send(Command::GetInfo, path, &[]).await
    }

    /// Sends one request and returns the raw response text.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] if the path or token do not fit the
    /// header, the socket is unreachable, a step times out, or the response
    /// is larger than [`MAX_RESPONSE_SIZE`].
    pub async fn send(&self, command: Command, path: &str, payload: &[u8]) -> ProtocolResult<String> {
        let header = RequestHeader::new(
            command,
            path,
            SecretString::from(self.token.expose_secret().to_owned()),
            payload.len() as u64,
            self.clock.now_secs(),
        )
        .encode()?;

        let mut stream = bounded(self.timeout, UnixStream::connect(&self.socket_path)).await?;
        bounded(self.timeout, stream.write_all(&header)).await?;

        if !payload.is_empty() {
            // The server may answer and close without reading a payload it
            // has already rejected; its response is still worth reading.
            if let Err(e) = bounded(self.timeout, stream.write_all(payload)).await {
                debug!(error = %e, "Payload not fully sent");
            }
        }

        let mut response = Vec::new();
        let limit = (MAX_RESPONSE_SIZE + 1) as u64;
        bounded(
            self.timeout,
            (&mut stream).take(limit).read_to_end(&mut response),
        )
        .await?;

        if response.len() > MAX_RESPONSE_SIZE {
            return Err(ProtocolError::ResponseTooLarge {
                max: MAX_RESPONSE_SIZE,
            });
        }
        if response.is_empty() {
            return Err(ProtocolError::ConnectionClosed);
        }

        Ok(String::from_utf8_lossy(&response).into_owned())
    }
}
