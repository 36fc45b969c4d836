//! Configuration loading and types for the UBNS client.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  The `ubns` section drives the naming-authority
//! channel (endpoint, reconnect backoff, timeouts) and the bucket
//! create/delete flows; the `logging` section drives the binary's
//! tracing subscriber.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::errors::UbnsError;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Naming-authority client settings.
    #[serde(default)]
    pub ubns: UbnsConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Unique Bucket Naming System client settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UbnsConfig {
    /// Whether bucket create/delete coordinate with the naming authority.
    #[serde(default)]
    pub enabled: bool,

    /// Naming-authority endpoint (`http://host:port` or bare `host:port`).
    #[serde(default = "default_uri")]
    pub uri: String,

    /// Identifier of the storage cluster this gateway belongs to.
    #[serde(default = "default_cluster_id")]
    pub cluster_id: String,

    /// First reconnect backoff after a connection failure, in milliseconds.
    #[serde(default = "default_initial_reconnect_backoff_ms")]
    pub initial_reconnect_backoff_ms: u64,

    /// Lower bound of any reconnect backoff, in milliseconds.
    #[serde(default = "default_min_reconnect_backoff_ms")]
    pub min_reconnect_backoff_ms: u64,

    /// Upper bound of any reconnect backoff, in milliseconds.
    #[serde(default = "default_max_reconnect_backoff_ms")]
    pub max_reconnect_backoff_ms: u64,

    /// TCP/HTTP2 connection establishment timeout, in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Per-RPC deadline, in milliseconds.
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,

    /// How many times the gateway tries a confirming RPC (update after
    /// create, delete after mark-deleting) before giving up.
    #[serde(default = "default_max_confirm_attempts")]
    pub max_confirm_attempts: u32,
}

impl Default for UbnsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            uri: default_uri(),
            cluster_id: default_cluster_id(),
            initial_reconnect_backoff_ms: default_initial_reconnect_backoff_ms(),
            min_reconnect_backoff_ms: default_min_reconnect_backoff_ms(),
            max_reconnect_backoff_ms: default_max_reconnect_backoff_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            rpc_timeout_ms: default_rpc_timeout_ms(),
            max_confirm_attempts: default_max_confirm_attempts(),
        }
    }
}

impl UbnsConfig {
    pub fn initial_reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_reconnect_backoff_ms)
    }

    pub fn min_reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.min_reconnect_backoff_ms)
    }

    pub fn max_reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.max_reconnect_backoff_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    /// Whether `other` differs in any setting that shapes the channel.
    pub fn channel_settings_differ(&self, other: &UbnsConfig) -> bool {
        self.uri != other.uri
            || self.initial_reconnect_backoff_ms != other.initial_reconnect_backoff_ms
            || self.min_reconnect_backoff_ms != other.min_reconnect_backoff_ms
            || self.max_reconnect_backoff_ms != other.max_reconnect_backoff_ms
            || self.connect_timeout_ms != other.connect_timeout_ms
            || self.rpc_timeout_ms != other.rpc_timeout_ms
    }

    /// Reject settings the channel layer cannot work with.
    pub fn validate(&self) -> Result<(), UbnsError> {
        let invalid = |reason: &str| {
            Err(UbnsError::InvalidConfig {
                reason: reason.to_string(),
            })
        };

        if self.cluster_id.trim().is_empty() {
            return invalid("ubns.cluster_id must not be empty");
        }
        if self.initial_reconnect_backoff_ms == 0
            || self.min_reconnect_backoff_ms == 0
            || self.max_reconnect_backoff_ms == 0
        {
            return invalid("ubns reconnect backoffs must be greater than zero");
        }
        if self.min_reconnect_backoff_ms > self.max_reconnect_backoff_ms {
            return invalid("ubns.min_reconnect_backoff_ms exceeds ubns.max_reconnect_backoff_ms");
        }
        if self.initial_reconnect_backoff_ms > self.max_reconnect_backoff_ms {
            return invalid(
                "ubns.initial_reconnect_backoff_ms exceeds ubns.max_reconnect_backoff_ms",
            );
        }
        if self.connect_timeout_ms == 0 || self.rpc_timeout_ms == 0 {
            return invalid("ubns timeouts must be greater than zero");
        }
        if self.max_confirm_attempts == 0 {
            return invalid("ubns.max_confirm_attempts must be at least 1");
        }
        Ok(())
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_uri() -> String {
    "http://127.0.0.1:9095".to_string()
}

fn default_cluster_id() -> String {
    "default".to_string()
}

fn default_initial_reconnect_backoff_ms() -> u64 {
    1_000
}

fn default_min_reconnect_backoff_ms() -> u64 {
    1_000
}

fn default_max_reconnect_backoff_ms() -> u64 {
    120_000
}

fn default_connect_timeout_ms() -> u64 {
    20_000
}

fn default_rpc_timeout_ms() -> u64 {
    10_000
}

fn default_max_confirm_attempts() -> u32 {
    3
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load, parse and validate configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, UbnsError> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    config.ubns.validate()?;
    Ok(config)
}
