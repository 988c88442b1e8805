//! Listening socket lifecycle.
//!
//! # Security Considerations
//!
//! - Socket permissions are set AFTER binding
//! - A parent directory created here gets mode 0700; an existing one is
//!   left alone
//! - Symlinked parent directories are refused
//! - A stale socket file is removed before binding; any other file type at
//!   the socket path is an error
//! - The socket file is removed on [`SocketManager::cleanup`] and on drop

use std::io;
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use sealkeep_core::config::{DaemonConfig, default_socket_path};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use super::error::{ProtocolError, ProtocolResult};

/// Default maximum concurrent connections.
const MAX_CONNECTIONS: usize = 64;

/// Default socket permissions: any local peer may connect.
const SOCKET_MODE: u32 = 0o666;

/// Permissions for a socket directory created by the manager.
const DIRECTORY_MODE: u32 = 0o700;

/// Socket manager configuration.
#[derive(Debug, Clone)]
pub struct SocketManagerConfig {
    /// Socket path.
    pub socket_path: PathBuf,

    /// Permission bits applied after bind.
    pub socket_mode: u32,

    /// Maximum concurrent connections.
    pub max_connections: usize,
}

impl Default for SocketManagerConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            socket_mode: SOCKET_MODE,
            max_connections: MAX_CONNECTIONS,
        }
    }
}

impl SocketManagerConfig {
    /// Create a config for the given socket path.
    #[must_use]
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            ..Default::default()
        }
    }

    /// Create a config from the daemon section of the service config.
    #[must_use]
    pub fn from_daemon_config(config: &DaemonConfig) -> Self {
        Self {
            socket_path: config.socket_path.clone(),
            socket_mode: config.socket_mode,
            max_connections: config.max_connections,
        }
    }

    /// Set the socket permission bits.
    #[must_use]
    pub const fn with_mode(mut self, mode: u32) -> Self {
        self.socket_mode = mode;
        self
    }

    /// Set the maximum concurrent connections.
    #[must_use]
    pub const fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }
}

/// Permit held for the lifetime of one connection.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: OwnedSemaphorePermit,
}

/// Owns the listening socket and bounds concurrent connections.
#[derive(Debug)]
pub struct SocketManager {
    config: SocketManagerConfig,
    listener: UnixListener,
    connection_sem: Arc<Semaphore>,
}

impl SocketManager {
    /// Create and bind the listening socket.
    ///
    /// This will:
    /// 1. Create the parent directory if needed (mode 0700)
    /// 2. Remove a stale socket file
    /// 3. Bind the socket
    /// 4. Apply the configured permissions
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(config: SocketManagerConfig) -> ProtocolResult<Self> {
        let socket = config.socket_path.as_path();
        if let Some(parent) = socket.parent().filter(|p| !p.as_os_str().is_empty()) {
            prepare_socket_dir(parent)?;
        }
        remove_stale_socket(socket)?;

        let listener =
            UnixListener::bind(socket).map_err(|e| fs_error("bind socket to", socket, &e))?;
        std::fs::set_permissions(socket, std::fs::Permissions::from_mode(config.socket_mode))
            .map_err(|e| fs_error("chmod socket", socket, &e))?;

        info!(
            socket = %socket.display(),
            mode = %format!("{:o}", config.socket_mode),
            max_connections = config.max_connections,
            "Socket bound"
        );

        Ok(Self {
            connection_sem: Arc::new(Semaphore::new(config.max_connections)),
            config,
            listener,
        })
    }

    /// Accept the next connection.
    ///
    /// Waits for a free connection slot first, so at most
    /// `max_connections` connections are open at once.
    pub async fn accept(&self) -> ProtocolResult<(UnixStream, ConnectionPermit)> {
        let permit = self
            .connection_sem
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ProtocolError::Io(io::Error::other("connection semaphore closed")))?;

        let (stream, _addr) = self.listener.accept().await?;

        match stream.peer_cred() {
            Ok(cred) => debug!(uid = cred.uid(), pid = ?cred.pid(), "Accepted connection"),
            Err(e) => debug!(error = %e, "Accepted connection (peer credentials unavailable)"),
        }

        Ok((stream, ConnectionPermit { _permit: permit }))
    }

    /// Wait until every connection permit has been returned.
    ///
    /// Returns `false` if connections were still open after `grace`.
    pub async fn wait_idle(&self, grace: Duration) -> bool {
        let Ok(total) = u32::try_from(self.config.max_connections) else {
            return false;
        };
        matches!(
            tokio::time::timeout(grace, self.connection_sem.acquire_many(total)).await,
            Ok(Ok(_))
        )
    }

    /// Returns the socket path.
    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.config.socket_path
    }

    /// Returns the manager configuration.
    #[must_use]
    pub const fn config(&self) -> &SocketManagerConfig {
        &self.config
    }

    /// Remove the socket file.
    pub fn cleanup(&self) -> ProtocolResult<()> {
        match std::fs::remove_file(&self.config.socket_path) {
            Ok(()) => {
                info!(socket = %self.config.socket_path.display(), "Removed socket file");
                Ok(())
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(fs_error("remove socket", &self.config.socket_path, &e)),
        }
    }
}

impl Drop for SocketManager {
    fn drop(&mut self) {
        if let Err(e) = self.cleanup() {
            warn!("Failed to cleanup socket on drop: {e}");
        }
    }
}

/// Makes sure the socket's parent directory exists.
///
/// A directory created here gets mode 0700. An existing directory keeps its
/// permissions so a shared path such as `/tmp` is never clobbered, but it
/// must be a real directory and not a symlink.
fn prepare_socket_dir(dir: &Path) -> ProtocolResult<()> {
    match std::fs::symlink_metadata(dir) {
        Ok(meta) if meta.file_type().is_symlink() => Err(refuse(
            io::ErrorKind::InvalidInput,
            format!("socket directory {} is a symlink", dir.display()),
        )),
        Ok(meta) if !meta.is_dir() => Err(refuse(
            io::ErrorKind::AlreadyExists,
            format!("socket directory {} is not a directory", dir.display()),
        )),
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            std::fs::create_dir_all(dir).map_err(|e| fs_error("create", dir, &e))?;
            std::fs::set_permissions(dir, std::fs::Permissions::from_mode(DIRECTORY_MODE))
                .map_err(|e| fs_error("chmod", dir, &e))
        },
        Err(e) => Err(fs_error("inspect", dir, &e)),
    }
}

/// Removes a socket left behind by a previous run. Anything other than a
/// socket at that path is left alone and reported.
fn remove_stale_socket(path: &Path) -> ProtocolResult<()> {
    match std::fs::symlink_metadata(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(fs_error("inspect", path, &e)),
        Ok(meta) if !meta.file_type().is_socket() => {
            return Err(refuse(
                io::ErrorKind::AlreadyExists,
                format!("{} exists and is not a socket", path.display()),
            ));
        },
        Ok(_) => {},
    }

    std::fs::remove_file(path).map_err(|e| fs_error("remove stale socket", path, &e))?;
    debug!(path = %path.display(), "Removed stale socket file");
    Ok(())
}

fn fs_error(action: &str, path: &Path, err: &io::Error) -> ProtocolError {
    ProtocolError::Io(io::Error::new(
        err.kind(),
        format!("cannot {action} {}: {err}", path.display()),
    ))
}

fn refuse(kind: io::ErrorKind, message: String) -> ProtocolError {
    ProtocolError::Io(io::Error::new(kind, message))
}
