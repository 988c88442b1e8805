//! Accept loop.

use std::time::Duration;

use anyhow::Result;
use tracing::{error, info, warn};

use crate::protocol::{ProtocolError, SocketManager, handle_connection};
use crate::state::SharedContext;

/// How often the accept loop checks the shutdown flag.
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Serve connections until shutdown is requested.
///
/// Each connection runs in its own task. On shutdown the loop stops
/// accepting, waits up to the context's grace period for in-flight
/// connections, then drops the socket manager, which removes the socket
/// file.
pub async fn run_server(socket_manager: SocketManager, ctx: SharedContext) -> Result<()> {
    info!(socket = %socket_manager.socket_path().display(), "Server started");

    loop {
        if ctx.is_shutdown_requested() {
            info!("Server shutting down");
            break;
        }

        // Accept with timeout to allow shutdown checks
        let accept_result =
            tokio::time::timeout(SHUTDOWN_POLL_INTERVAL, socket_manager.accept()).await;

        match accept_result {
            Ok(Ok((stream, permit))) => {
                let conn_ctx = SharedContext::clone(&ctx);
                tokio::spawn(async move {
                    let _permit = permit;
                    match handle_connection(stream, conn_ctx).await {
                        Ok(()) | Err(ProtocolError::ConnectionClosed) => {},
                        Err(e) if e.is_protocol_violation() => {
                            warn!(error = %e, "Rejected malformed request");
                        },
                        Err(e) => warn!(error = %e, "Connection handler error"),
                    }
                });
            },
            Ok(Err(e)) => {
                error!("Failed to accept connection: {e}");
            },
            Err(_) => {
                // Timeout, continue to check shutdown
            },
        }
    }

    let grace = ctx.shutdown_grace();
    if socket_manager.wait_idle(grace).await {
        info!("All connections finished");
    } else {
        warn!(
            grace_secs = grace.as_secs(),
            "Connections still open after grace period"
        );
    }

    drop(socket_manager);
    info!(uptime_secs = ctx.uptime_secs(), "Server stopped");
    Ok(())
}
