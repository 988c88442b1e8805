//! Shared server context.
//!
//! Everything a connection task needs, built once at startup and passed to
//! handlers behind an [`Arc`]. The listener itself is owned by the accept
//! loop so its socket file is removed on every exit path.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use sealkeep_core::{Clock, ConfigError, SealkeepConfig};

use crate::locks::PathLocks;
use crate::protocol::{Authenticator, Dispatcher};

/// Shared context handle.
pub type SharedContext = Arc<ServerContext>;

/// Server context with interior mutability for the shutdown flag.
#[derive(Debug)]
pub struct ServerContext {
    authenticator: Authenticator,
    dispatcher: Arc<Dispatcher>,
    locks: PathLocks,
    io_timeout: Duration,
    shutdown_grace: Duration,
    /// Shutdown flag (atomic for lock-free checking).
    shutdown: AtomicBool,
    started_at: DateTime<Utc>,
}

impl ServerContext {
    /// Create a new context.
    #[must_use]
    pub fn new(authenticator: Authenticator, dispatcher: Dispatcher) -> Self {
        Self {
            authenticator,
            dispatcher: Arc::new(dispatcher),
            locks: PathLocks::new(),
            io_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(5),
            shutdown: AtomicBool::new(false),
            started_at: Utc::now(),
        }
    }

    /// Build the context from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingToken`] if no shared token resolves, or
    /// [`ConfigError::TokenTooLong`] if it could never match a request.
    pub fn from_config(config: &SealkeepConfig, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        let token = config.auth.resolve_token()?;
        let authenticator =
            Authenticator::new(token, config.auth.replay_window(), Arc::clone(&clock));
        let dispatcher = Dispatcher::from_config(config, clock);

        Ok(Self::new(authenticator, dispatcher)
            .with_io_timeout(config.daemon.io_timeout())
            .with_shutdown_grace(config.daemon.shutdown_grace()))
    }

    /// Set the per-read/per-write timeout.
    #[must_use]
    pub const fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    /// Set how long shutdown waits for in-flight connections.
    #[must_use]
    pub const fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Request authenticator.
    #[must_use]
    pub const fn authenticator(&self) -> &Authenticator {
        &self.authenticator
    }

    /// Command dispatcher.
    #[must_use]
    pub const fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Per-path lock table.
    #[must_use]
    pub const fn locks(&self) -> &PathLocks {
        &self.locks
    }

    /// Bound on each read and write.
    #[must_use]
    pub const fn io_timeout(&self) -> Duration {
        self.io_timeout
    }

    /// Shutdown grace period.
    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        self.shutdown_grace
    }

    /// Check if shutdown has been requested.
    #[must_use]
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Request shutdown.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Get server uptime in seconds.
    #[must_use]
    #[allow(clippy::cast_sign_loss)] // max(0) ensures non-negative
    pub fn uptime_secs(&self) -> u64 {
        (Utc::now() - self.started_at).num_seconds().max(0) as u64
    }
}

#[cfg(test)]
mod tests {
    use sealkeep_core::{ManagedRoot, ManualClock};
    use secrecy::SecretString;

    use super::*;

    fn context() -> ServerContext {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(0));
        ServerContext::new(
            Authenticator::new(
                SecretString::from("t".to_string()),
                Duration::from_secs(300),
                Arc::clone(&clock),
            ),
            Dispatcher::new(ManagedRoot::new("/nonexistent"), clock),
        )
    }

    #[test]
    fn shutdown_flag() {
        let ctx = context();
        assert!(!ctx.is_shutdown_requested());
        ctx.request_shutdown();
        assert!(ctx.is_shutdown_requested());
    }

    #[test]
    fn builder_overrides_timeouts() {
        let ctx = context()
            .with_io_timeout(Duration::from_secs(2))
            .with_shutdown_grace(Duration::from_secs(1));
        assert_eq!(ctx.io_timeout(), Duration::from_secs(2));
        assert_eq!(ctx.shutdown_grace(), Duration::from_secs(1));
        assert!(ctx.uptime_secs() < 60);
    }

    #[test]
    fn from_config_requires_token() {
        let mut config = SealkeepConfig::from_toml(
            "[auth]\ntoken_env = \"SEALKEEP_TEST_TOKEN_THAT_IS_NEVER_SET\"\n",
        )
        .unwrap();
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(0));
        assert!(matches!(
            ServerContext::from_config(&config, Arc::clone(&clock)),
            Err(ConfigError::MissingToken { .. })
        ));

        config.auth.token = Some(SecretString::from("inline".to_string()));
        let ctx = ServerContext::from_config(&config, clock).unwrap();
        assert_eq!(ctx.io_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn from_config_refuses_token_that_cannot_fit_a_header() {
        let mut config = SealkeepConfig::default();
        config.auth.token = Some(SecretString::from("x".repeat(200)));

        assert!(matches!(
            ServerContext::from_config(&config, Arc::new(ManualClock::new(0))),
            Err(ConfigError::TokenTooLong { len: 200, .. })
        ));
    }
}
