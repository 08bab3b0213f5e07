//! Configuration management for the RAX FTP client
//!
//! Connection parameters, retry budget and synchronization options are read
//! from an optional TOML file with environment overrides
//! (`RAX_FTP__CONNECTION__HOST`, `RAX_FTP__RETRY__MAX_ATTEMPTS`, ...).

use config::{Config, Environment, File};
use serde::Deserialize;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::RetryPolicy;
use crate::sync::{SyncDirection, SyncOptions};
use crate::transfer::TransferMode;

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "rax-ftp-client";

/// Complete client configuration
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ClientConfig {
    pub connection: ConnectionParams,
    pub retry: RetryConfig,
    pub sync: SyncConfig,
}

/// Everything needed to open and authenticate a control connection.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,

    /// Connect timeout for control and data connections
    pub timeout_secs: u64,

    /// Maximum wait for a reply on the control connection
    pub reply_timeout_secs: u64,

    /// Maximum silence on a data connection before the transfer fails
    pub data_idle_timeout_secs: u64,

    pub use_passive: bool,

    /// Try active mode once when passive negotiation fails
    pub active_fallback: bool,

    /// Local address advertised in PORT/EPRT; defaults to the control
    /// connection's local address
    pub active_bind_address: Option<String>,

    /// Buffer size for data transfers
    pub buffer_size: usize,

    /// Representation type restored after every (re)connect
    pub transfer_mode: TransferMode,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 21,
            user: "anonymous".to_string(),
            password: String::new(),
            timeout_secs: 30,
            reply_timeout_secs: 30,
            data_idle_timeout_secs: 60,
            use_passive: true,
            active_fallback: true,
            active_bind_address: None,
            buffer_size: 64 * 1024,
            transfer_mode: TransferMode::Binary,
        }
    }
}

impl ConnectionParams {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = user.into();
        self.password = password.into();
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_secs(self.reply_timeout_secs)
    }

    pub fn data_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.data_idle_timeout_secs)
    }

    /// Parsed `active_bind_address`, if one is configured.
    pub fn active_bind_ip(&self) -> Option<IpAddr> {
        self.active_bind_address
            .as_deref()
            .and_then(|a| a.parse().ok())
    }
}

/// Retry budget for session operations
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.initial_backoff_ms),
            Duration::from_millis(self.max_backoff_ms),
        )
    }
}

/// Options for a synchronization pass
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SyncConfig {
    pub local_root: String,
    pub remote_root: String,
    pub direction: SyncDirection,

    /// Number of parallel sessions used for transfers
    pub workers: usize,

    /// Recursion limit for both trees
    pub max_depth: usize,

    /// Modification times closer than this are considered equal
    pub mtime_tolerance_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            local_root: ".".to_string(),
            remote_root: "/".to_string(),
            direction: SyncDirection::Both,
            workers: 1,
            max_depth: 32,
            mtime_tolerance_secs: 1,
        }
    }
}

impl SyncConfig {
    pub fn local_root_path(&self) -> PathBuf {
        PathBuf::from(&self.local_root)
    }

    pub fn options(&self) -> SyncOptions {
        SyncOptions {
            direction: self.direction,
            max_depth: self.max_depth,
            mtime_tolerance: Duration::from_secs(self.mtime_tolerance_secs),
        }
    }
}

impl ClientConfig {
    /// Load `rax-ftp-client.toml` (if present) with environment overrides
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::build(File::with_name(DEFAULT_CONFIG_FILE).required(false))
    }

    /// Load an explicit configuration file with environment overrides
    pub fn load_from(path: &Path) -> Result<Self, config::ConfigError> {
        Self::build(File::from(path).required(true))
    }

    fn build<S>(file: S) -> Result<Self, config::ConfigError>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let settings = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix("RAX_FTP")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: ClientConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validation for all configuration values
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if self.connection.host.trim().is_empty() {
            return Err(config::ConfigError::Message("host cannot be empty".into()));
        }

        if self.connection.port == 0 {
            return Err(config::ConfigError::Message("port cannot be 0".into()));
        }

        if self.connection.buffer_size == 0 {
            return Err(config::ConfigError::Message(
                "buffer_size must be greater than 0".into(),
            ));
        }

        if self.connection.timeout_secs == 0
            || self.connection.reply_timeout_secs == 0
            || self.connection.data_idle_timeout_secs == 0
        {
            return Err(config::ConfigError::Message(
                "timeouts must be greater than 0".into(),
            ));
        }

        if let Some(addr) = &self.connection.active_bind_address {
            if addr.parse::<IpAddr>().is_err() {
                return Err(config::ConfigError::Message(format!(
                    "active_bind_address is not an IP address: {}",
                    addr
                )));
            }
        }

        if self.retry.max_attempts == 0 {
            return Err(config::ConfigError::Message(
                "max_attempts must be greater than 0".into(),
            ));
        }

        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(config::ConfigError::Message(
                "initial_backoff_ms must not exceed max_backoff_ms".into(),
            ));
        }

        if self.sync.workers == 0 {
            return Err(config::ConfigError::Message(
                "workers must be greater than 0".into(),
            ));
        }

        Ok(())
    }
}
