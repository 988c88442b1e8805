//! CLI command implementations.

use std::path::PathBuf;
use std::time::Duration;

use sealkeep_daemon::protocol::ServiceClient;
use secrecy::{ExposeSecret, SecretString};

pub mod file;

/// Where and how to reach the daemon.
pub struct Target {
    pub socket_path: PathBuf,
    pub token: SecretString,
    pub timeout: Duration,
}

impl Target {
    fn client(&self) -> ServiceClient {
        ServiceClient::new(
            &self.socket_path,
            SecretString::from(self.token.expose_secret().to_owned()),
        )
        .with_timeout(self.timeout)
    }
}
