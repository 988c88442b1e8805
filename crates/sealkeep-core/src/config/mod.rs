//! Configuration parsing and management.
//!
//! The service reads a single TOML file (default `sealkeep.toml`). Every
//! field has a default except the shared token, which must come from the
//! file, from the environment variable named by `auth.token_env`, or from
//! `SEALKEEP_TOKEN`. A daemon without a resolvable token refuses to start.

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer};

/// Environment variable consulted when no token is configured.
pub const DEFAULT_TOKEN_ENV: &str = "SEALKEEP_TOKEN";

/// Longest token that fits the request header's NUL-terminated token field.
pub const MAX_TOKEN_BYTES: usize = 127;

/// Default subdirectory under the runtime directory.
const DEFAULT_SUBDIR: &str = "sealkeep";

/// Default socket file name.
const DEFAULT_SOCKET_NAME: &str = "sealkeep.sock";

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SealkeepConfig {
    /// Listener and managed-root settings.
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Request authentication.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Deletion policy.
    #[serde(default)]
    pub retention: RetentionConfig,

    /// Request size limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Immutability label backend.
    #[serde(default)]
    pub label: LabelConfig,

    /// Incremental update tuning.
    #[serde(default)]
    pub delta: DeltaConfig,
}

impl SealkeepConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or fails
    /// validation.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or a value is out of range.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] naming the offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.daemon.max_connections == 0 {
            return Err(ConfigError::Validation(
                "daemon.max_connections must be at least 1".to_string(),
            ));
        }
        if self.daemon.io_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "daemon.io_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.daemon.socket_mode > 0o777 {
            return Err(ConfigError::Validation(format!(
                "daemon.socket_mode {:o} is not a permission mode",
                self.daemon.socket_mode
            )));
        }
        if self.limits.max_payload_bytes == 0 {
            return Err(ConfigError::Validation(
                "limits.max_payload_bytes must be at least 1".to_string(),
            ));
        }
        if self.delta.block_size == 0 {
            return Err(ConfigError::Validation(
                "delta.block_size must be at least 1".to_string(),
            ));
        }
        if self.label.backend == LabelBackend::Xattr
            && (self.label.attribute.is_empty() || self.label.value.is_empty())
        {
            return Err(ConfigError::Validation(
                "label.attribute and label.value are required for the xattr backend".to_string(),
            ));
        }
        Ok(())
    }
}

/// Listener and managed-root settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DaemonConfig {
    /// Path of the listening Unix socket.
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    /// Permission bits applied to the socket after bind.
    ///
    /// Defaults to 0666: any local peer may connect, the shared token is
    /// what gates access.
    #[serde(default = "default_socket_mode")]
    pub socket_mode: u32,

    /// Managed root. Request paths are resolved relative to it.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Maximum connections handled concurrently.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Bound on each socket read or write, in seconds.
    #[serde(default = "default_io_timeout_secs")]
    pub io_timeout_secs: u64,

    /// How long shutdown waits for in-flight connections.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl DaemonConfig {
    /// I/O timeout as a [`Duration`].
    #[must_use]
    pub const fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }

    /// Shutdown grace period as a [`Duration`].
    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            socket_mode: default_socket_mode(),
            data_dir: default_data_dir(),
            max_connections: default_max_connections(),
            io_timeout_secs: default_io_timeout_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

/// Get the default socket path based on environment.
///
/// Priority:
/// 1. `XDG_RUNTIME_DIR/sealkeep/sealkeep.sock` if `XDG_RUNTIME_DIR` is set
/// 2. `/tmp/sealkeep/sealkeep.sock` as fallback
#[must_use]
pub fn default_socket_path() -> PathBuf {
    std::env::var("XDG_RUNTIME_DIR").map_or_else(
        |_| {
            PathBuf::from("/tmp")
                .join(DEFAULT_SUBDIR)
                .join(DEFAULT_SOCKET_NAME)
        },
        |runtime_dir| {
            PathBuf::from(runtime_dir)
                .join(DEFAULT_SUBDIR)
                .join(DEFAULT_SOCKET_NAME)
        },
    )
}

const fn default_socket_mode() -> u32 {
    0o666
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/sealkeep/data")
}

const fn default_max_connections() -> usize {
    64
}

const fn default_io_timeout_secs() -> u64 {
    30
}

const fn default_shutdown_grace_secs() -> u64 {
    5
}

/// Request authentication settings.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// Shared secret compared against the request token.
    #[serde(default, deserialize_with = "deserialize_secret")]
    pub token: Option<SecretString>,

    /// Environment variable holding the shared secret.
    #[serde(default)]
    pub token_env: Option<String>,

    /// Maximum allowed `|now - timestamp|` in seconds.
    #[serde(default = "default_replay_window_secs")]
    pub replay_window_secs: u64,
}

impl AuthConfig {
    /// Replay window as a [`Duration`].
    #[must_use]
    pub const fn replay_window(&self) -> Duration {
        Duration::from_secs(self.replay_window_secs)
    }

    /// Resolve the shared token.
    ///
    /// Order: inline `token`, then the variable named by `token_env`, then
    /// [`DEFAULT_TOKEN_ENV`]. Empty values are treated as absent.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingToken`] if nothing resolves, and
    /// [`ConfigError::TokenTooLong`] if the token cannot fit a request.
    pub fn resolve_token(&self) -> Result<SecretString, ConfigError> {
        self.resolve_token_with(|name| std::env::var(name).ok())
    }

    fn resolve_token_with(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<SecretString, ConfigError> {
        let token = match &self.token {
            Some(token) if !token.expose_secret().is_empty() => token.expose_secret().to_owned(),
            _ => {
                let env_name = self
                    .token_env
                    .as_deref()
                    .map_or(DEFAULT_TOKEN_ENV, |name| name.strip_prefix('$').unwrap_or(name));
                lookup(env_name)
                    .filter(|value| !value.is_empty())
                    .ok_or_else(|| ConfigError::MissingToken {
                        env_var: env_name.to_string(),
                    })?
            },
        };

        if token.len() > MAX_TOKEN_BYTES {
            return Err(ConfigError::TokenTooLong {
                len: token.len(),
                max: MAX_TOKEN_BYTES,
            });
        }
        Ok(SecretString::from(token))
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token: None,
            token_env: None,
            replay_window_secs: default_replay_window_secs(),
        }
    }
}

const fn default_replay_window_secs() -> u64 {
    300
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.map(SecretString::from))
}

/// Deletion policy settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetentionConfig {
    /// Minimum hours since creation before a file may be deleted.
    #[serde(default = "default_min_retention_hours")]
    pub min_retention_hours: u64,
}

impl RetentionConfig {
    /// Minimum retention as a [`Duration`].
    #[must_use]
    pub const fn min_retention(&self) -> Duration {
        Duration::from_secs(self.min_retention_hours.saturating_mul(3600))
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            min_retention_hours: default_min_retention_hours(),
        }
    }
}

const fn default_min_retention_hours() -> u64 {
    24
}

/// Request size limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LimitsConfig {
    /// Payloads must be strictly smaller than this.
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: default_max_payload_bytes(),
        }
    }
}

const fn default_max_payload_bytes() -> u64 {
    10 * 1024 * 1024
}

/// Which label mechanism to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelBackend {
    /// Extended attribute on the file.
    #[default]
    Xattr,
    /// No label is applied. Writes still succeed.
    Disabled,
}

/// Immutability label settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LabelConfig {
    /// Label mechanism.
    #[serde(default)]
    pub backend: LabelBackend,

    /// Extended attribute name.
    ///
    /// When this is `security.selinux` the existing context is kept and only
    /// its type field is replaced with [`LabelConfig::value`].
    #[serde(default = "default_label_attribute")]
    pub attribute: String,

    /// Label value (or SELinux type).
    #[serde(default = "default_label_value")]
    pub value: String,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            backend: LabelBackend::default(),
            attribute: default_label_attribute(),
            value: default_label_value(),
        }
    }
}

fn default_label_attribute() -> String {
    "security.selinux".to_string()
}

fn default_label_value() -> String {
    "immutable_file_t".to_string()
}

/// Incremental update tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeltaConfig {
    /// Block size used when comparing source and target.
    #[serde(default = "default_block_size")]
    pub block_size: usize,
}

impl Default for DeltaConfig {
    fn default() -> Self {
        Self {
            block_size: default_block_size(),
        }
    }
}

const fn default_block_size() -> usize {
    4096
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O error reading configuration file.
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// Validation error.
    #[error("configuration validation failed: {0}")]
    Validation(String),

    /// No shared token could be resolved.
    #[error("no shared token configured (set auth.token, auth.token_env, or ${env_var})")]
    MissingToken {
        /// The environment variable that was consulted last.
        env_var: String,
    },

    /// The resolved token is longer than a request can carry.
    #[error("shared token is {len} bytes, at most {max} fit in a request")]
    TokenTooLong {
        /// Token length in bytes.
        len: usize,
        /// Largest accepted length.
        max: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = SealkeepConfig::from_toml("").unwrap();

        assert_eq!(config.daemon.socket_mode, 0o666);
        assert_eq!(config.daemon.max_connections, 64);
        assert_eq!(config.auth.replay_window(), Duration::from_secs(300));
        assert_eq!(
            config.retention.min_retention(),
            Duration::from_secs(24 * 3600)
        );
        assert_eq!(config.limits.max_payload_bytes, 10 * 1024 * 1024);
        assert_eq!(config.label.backend, LabelBackend::Xattr);
        assert_eq!(config.label.attribute, "security.selinux");
        assert_eq!(config.label.value, "immutable_file_t");
        assert_eq!(config.delta.block_size, 4096);
        assert!(config.auth.token.is_none());
    }

    #[test]
    fn parses_full_file() {
        let config = SealkeepConfig::from_toml(
            r#"
            [daemon]
            socket_path = "/run/sk/sk.sock"
            socket_mode = 0o660
            data_dir = "/srv/sealed"
            max_connections = 8
            io_timeout_secs = 5
            shutdown_grace_secs = 1

            [auth]
            token = "hunter2"
            replay_window_secs = 60

            [retention]
            min_retention_hours = 48

            [limits]
            max_payload_bytes = 1024

            [label]
            backend = "disabled"

            [delta]
            block_size = 512
            "#,
        )
        .unwrap();

        assert_eq!(config.daemon.socket_path, PathBuf::from("/run/sk/sk.sock"));
        assert_eq!(config.daemon.socket_mode, 0o660);
        assert_eq!(config.daemon.data_dir, PathBuf::from("/srv/sealed"));
        assert_eq!(config.daemon.io_timeout(), Duration::from_secs(5));
        assert_eq!(config.auth.resolve_token().unwrap().expose_secret(), "hunter2");
        assert_eq!(config.retention.min_retention_hours, 48);
        assert_eq!(config.limits.max_payload_bytes, 1024);
        assert_eq!(config.label.backend, LabelBackend::Disabled);
        assert_eq!(config.delta.block_size, 512);
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = SealkeepConfig::from_toml("[daemon]\nsocket = \"/tmp/x.sock\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn rejects_zero_limits() {
        let err = SealkeepConfig::from_toml("[limits]\nmax_payload_bytes = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));

        let err = SealkeepConfig::from_toml("[delta]\nblock_size = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));

        let err = SealkeepConfig::from_toml("[daemon]\nmax_connections = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn rejects_empty_label_value_for_xattr() {
        let err = SealkeepConfig::from_toml("[label]\nvalue = \"\"\n").unwrap_err();
        assert!(err.to_string().contains("label.attribute"));
    }

    #[test]
    fn named_env_var_missing_reports_variable() {
        let config = SealkeepConfig::from_toml(
            "[auth]\ntoken_env = \"$SEALKEEP_TEST_TOKEN_CONFIG_ONLY_UNSET\"\n",
        )
        .unwrap();

        let err = config.auth.resolve_token().unwrap_err();
        match err {
            ConfigError::MissingToken { env_var } => {
                assert_eq!(env_var, "SEALKEEP_TEST_TOKEN_CONFIG_ONLY_UNSET");
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn token_falls_back_to_named_env_var() {
        let config =
            SealkeepConfig::from_toml("[auth]\ntoken_env = \"$APP_SECRET\"\n").unwrap();

        let token = config
            .auth
            .resolve_token_with(|name| (name == "APP_SECRET").then(|| "from-env".to_string()))
            .unwrap();
        assert_eq!(token.expose_secret(), "from-env");
    }

    #[test]
    fn inline_token_wins_over_environment() {
        let config = SealkeepConfig::from_toml("[auth]\ntoken = \"inline\"\n").unwrap();

        let token = config
            .auth
            .resolve_token_with(|_| Some("from-env".to_string()))
            .unwrap();
        assert_eq!(token.expose_secret(), "inline");
    }

    #[test]
    fn default_env_var_is_consulted_last() {
        let token = AuthConfig::default()
            .resolve_token_with(|name| (name == DEFAULT_TOKEN_ENV).then(|| "dflt".to_string()))
            .unwrap();
        assert_eq!(token.expose_secret(), "dflt");
    }

    #[test]
    fn token_longer_than_header_field_is_rejected() {
        let fits = AuthConfig::default()
            .resolve_token_with(|_| Some("k".repeat(MAX_TOKEN_BYTES)))
            .unwrap();
        assert_eq!(fits.expose_secret().len(), MAX_TOKEN_BYTES);

        let config = SealkeepConfig::from_toml(&format!(
            "[auth]\ntoken = \"{}\"\n",
            "k".repeat(MAX_TOKEN_BYTES + 1)
        ))
        .unwrap();
        assert!(matches!(
            config.auth.resolve_token(),
            Err(ConfigError::TokenTooLong { len: 128, max: MAX_TOKEN_BYTES })
        ));
    }

    #[test]
    fn empty_inline_token_is_absent() {
        let config = SealkeepConfig::from_toml(
            "[auth]\ntoken = \"\"\ntoken_env = \"SEALKEEP_TEST_TOKEN_EMPTY_UNSET\"\n",
        )
        .unwrap();
        assert!(config.auth.resolve_token().is_err());
    }
}
