//! Per-connection request handling.
//!
//! One request per connection:
//!
//! ```text
//! Accepted -> HeaderRead -> Authenticated -> PayloadRead -> Executed -> ResponseSent -> Closed
//! ```
//!
//! Any failure jumps straight to `ResponseSent` with a failure line, then
//! the connection is closed. There is no retry within a connection.
//!
//! # Security Considerations
//!
//! - The header is decoded and every field checked before use
//! - Authentication runs before any file I/O
//! - `data_len` is validated before the payload buffer is allocated
//! - Every read and write is bounded by the configured I/O timeout

use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::{error, warn};

use super::dispatch::Request;
use super::error::{ProtocolError, ProtocolResult};
use super::response::Response;
use super::wire::{HEADER_LEN, RequestHeader};
use crate::state::SharedContext;

/// Handle one connection to completion.
///
/// # Errors
///
/// Returns a [`ProtocolError`] for transport failures: timeouts, early
/// disconnects, or a malformed header. Operation failures are not errors
/// here; they are sent to the client as a response.
pub async fn handle_connection(mut stream: UnixStream, ctx: SharedContext) -> ProtocolResult<()> {
    let limit = ctx.io_timeout();

    let mut raw = [0u8; HEADER_LEN];
    bounded(limit, stream.read_exact(&mut raw)).await?;

    let header = match RequestHeader::decode(&raw) {
        Ok(header) => header,
        Err(e) => {
            send(&mut stream, &Response::failure("malformed request header"), limit).await?;
            return Err(e);
        },
    };

    if let Err(reason) = ctx.authenticator().check(&header) {
        warn!(
            command = %header.command,
            path = %header.path,
            reason = %reason,
            "Authentication failed"
        );
        return finish(&mut stream, &Response::AuthenticationFailed, limit).await;
    }

    let path = match ctx
        .dispatcher()
        .validate(header.command, &header.path, header.data_len)
    {
        Ok(path) => path,
        Err(e) => {
            warn!(
                command = %header.command,
                path = %header.path,
                kind = e.kind(),
                error = %e,
                "Request rejected"
            );
            return finish(&mut stream, &Response::failure(e.to_string()), limit).await;
        },
    };

    let payload = if header.command.carries_payload() {
        let len = usize::try_from(header.data_len)
            .map_err(|_| ProtocolError::invalid_header("data_len exceeds address space"))?;
        let mut payload = vec![0u8; len];
        bounded(limit, stream.read_exact(&mut payload)).await?;
        payload
    } else {
        Vec::new()
    };

    let response = {
        let _guard = ctx.locks().lock(path.absolute()).await;
        let request = Request {
            command: header.command,
            path,
            payload,
        };
        let dispatcher = Arc::clone(ctx.dispatcher());
        tokio::task::spawn_blocking(move || dispatcher.execute(&request))
            .await
            .unwrap_or_else(|e| {
                error!(error = %e, "Dispatcher task failed");
                Response::failure("internal error")
            })
    };

    finish(&mut stream, &response, limit).await
}

/// Send the response and close the write half.
async fn finish(stream: &mut UnixStream, response: &Response, limit: Duration) -> ProtocolResult<()> {
    send(stream, response, limit).await?;
    bounded(limit, stream.shutdown()).await
}

async fn send(stream: &mut UnixStream, response: &Response, limit: Duration) -> ProtocolResult<()> {
    let text = response.render();
    bounded(limit, stream.write_all(text.as_bytes())).await
}

/// Runs an I/O future under `limit`.
pub(crate) async fn bounded<T>(
    limit: Duration,
    io: impl Future<Output = io::Result<T>>,
) -> ProtocolResult<T> {
    match tokio::time::timeout(limit, io).await {
        Ok(result) => result.map_err(ProtocolError::from_read),
        Err(_) => Err(ProtocolError::timeout(
            u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
        )),
    }
}

#[cfg(test)]
mod tests {
    use sealkeep_core::{ManagedRoot, ManualClock};
    use secrecy::SecretString;
    use tempfile::TempDir;

    use super::*;
    use crate::protocol::wire::Command;
    use crate::protocol::{Authenticator, Dispatcher};
    use crate::state::ServerContext;

    const NOW: i64 = 1_700_000_000;

    fn context(root: &std::path::Path) -> SharedContext {
        let clock = Arc::new(ManualClock::new(NOW));
        Arc::new(
            ServerContext::new(
                Authenticator::new(
                    SecretString::from("tok".to_string()),
                    Duration::from_secs(300),
                    clock.clone(),
                ),
                Dispatcher::new(ManagedRoot::new(root), clock),
            )
            .with_io_timeout(Duration::from_millis(200)),
        )
    }

    async fn exchange(ctx: SharedContext, request: Vec<u8>) -> (String, ProtocolResult<()>) {
        let (mut client, server) = UnixStream::pair().unwrap();
        let handler = tokio::spawn(handle_connection(server, ctx));

        client.write_all(&request).await.unwrap();
        let mut response = String::new();
        client.read_to_string(&mut response).await.unwrap();
        (response, handler.await.unwrap())
    }

    fn header(command: Command, token: &str, data_len: u64) -> Vec<u8> {
        RequestHeader::new(
            command,
            "a.txt",
            SecretString::from(token.to_string()),
            data_len,
            NOW,
        )
        .encode()
        .unwrap()
        .to_vec()
    }

    #[tokio::test]
    async fn modify_round_trip() {
        let tmp = TempDir::new().unwrap();
        let mut request = header(Command::Modify, "tok", 5);
        request.extend_from_slice(b"hello");

        let (response, result) = exchange(context(tmp.path()), request).await;
        assert_eq!(response, "success");
        result.unwrap();
        assert_eq!(std::fs::read(tmp.path().join("a.txt")).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn bad_token_touches_nothing() {
        let tmp = TempDir::new().unwrap();
        let mut request = header(Command::Modify, "wrong", 5);
        request.extend_from_slice(b"hello");

        let (response, result) = exchange(context(tmp.path()), request).await;
        assert_eq!(response, "authentication failed");
        result.unwrap();
        assert!(!tmp.path().join("a.txt").exists());
    }

    #[tokio::test]
    async fn oversized_payload_rejected_before_read() {
        let tmp = TempDir::new().unwrap();
        let request = header(Command::Modify, "tok", u64::MAX);

        let (response, result) = exchange(context(tmp.path()), request).await;
        assert!(response.starts_with("failure: invalid request"), "{response}");
        result.unwrap();
    }

    #[tokio::test]
    async fn malformed_header_gets_failure_line() {
        let tmp = TempDir::new().unwrap();
        let mut request = header(Command::GetInfo, "tok", 0);
        request[0..4].copy_from_slice(&99u32.to_le_bytes());

        let (response, result) = exchange(context(tmp.path()), request).await;
        assert_eq!(response, "failure: malformed request header");
        assert!(matches!(
            result,
            Err(ProtocolError::UnknownCommand { value: 99 })
        ));
    }

    #[tokio::test]
    async fn silent_peer_times_out() {
        let tmp = TempDir::new().unwrap();
        let (_client, server) = UnixStream::pair().unwrap();

        let result = handle_connection(server, context(tmp.path())).await;
        assert!(matches!(result, Err(ProtocolError::Timeout { .. })));
    }

    #[tokio::test]
    async fn short_payload_is_connection_closed() {
        let tmp = TempDir::new().unwrap();
        let (mut client, server) = UnixStream::pair().unwrap();
        let handler = tokio::spawn(handle_connection(server, context(tmp.path())));

        let mut request = header(Command::Modify, "tok", 10);
        request.extend_from_slice(b"abc");
        client.write_all(&request).await.unwrap();
        drop(client);

        assert!(matches!(
            handler.await.unwrap(),
            Err(ProtocolError::ConnectionClosed)
        ));
        assert!(!tmp.path().join("a.txt").exists());
    }
}
