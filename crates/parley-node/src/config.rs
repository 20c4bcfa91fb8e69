//! Node configuration types.
//!
//! Values come from, in increasing precedence: built-in defaults, an
//! optional YAML file, `PARLEY_*` environment variables, and command-line
//! flags applied by the binary.

use parley_hub::{KeepaliveConfig, UserDirectory, DEFAULT_MAILBOX_SIZE};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Prefix for environment overrides, e.g. `PARLEY_LISTEN_ADDR`.
pub const ENV_PREFIX: &str = "PARLEY";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration sources could not be read or merged.
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// A user allowed to connect.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct UserConfig {
    /// User id.
    pub id: i64,
    /// Display name.
    pub name: String,
}

/// Configuration for the Parley node.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NodeConfig {
    /// HTTP listen address.
    pub listen_addr: SocketAddr,
    /// Log level.
    pub log_level: String,
    /// Log format (`pretty` or `json`).
    pub log_format: String,

    /// Seconds of silence tolerated before a connection is closed.
    pub liveness_window_secs: u64,
    /// Seconds allowed for a single write.
    pub write_wait_secs: u64,
    /// Largest inbound message accepted, in bytes.
    pub max_message_size: usize,

    /// Slots in each client's outbound queue.
    pub outbound_capacity: usize,
    /// Slots in each hub mailbox.
    pub mailbox_size: usize,

    /// Users allowed to connect.
    pub users: Vec<UserConfig>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            liveness_window_secs: 60,
            write_wait_secs: 10,
            max_message_size: 512,
            outbound_capacity: 1,
            mailbox_size: DEFAULT_MAILBOX_SIZE,
            users: vec![
                UserConfig {
                    id: 1,
                    name: "Clement".to_string(),
                },
                UserConfig {
                    id: 2,
                    name: "LockStar".to_string(),
                },
            ],
        }
    }
}

impl NodeConfig {
    /// Load configuration from an optional file plus the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let cfg: NodeConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.liveness_window_secs < 2 {
            return Err(ConfigError::Invalid(
                "liveness_window_secs must be at least 2".to_string(),
            ));
        }
        if self.write_wait_secs == 0 {
            return Err(ConfigError::Invalid(
                "write_wait_secs must be positive".to_string(),
            ));
        }
        if self.max_message_size == 0 {
            return Err(ConfigError::Invalid(
                "max_message_size must be positive".to_string(),
            ));
        }
        if self.outbound_capacity == 0 || self.mailbox_size == 0 {
            return Err(ConfigError::Invalid(
                "queue sizes must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Keepalive settings for every connection.
    pub fn keepalive(&self) -> KeepaliveConfig {
        KeepaliveConfig {
            write_wait: Duration::from_secs(self.write_wait_secs),
            max_message_size: self.max_message_size,
            ..KeepaliveConfig::with_liveness_window(Duration::from_secs(
                self.liveness_window_secs,
            ))
        }
    }

    /// Directory of users allowed to connect.
    pub fn directory(&self) -> UserDirectory {
        UserDirectory::new(self.users.iter().map(|u| (u.id, u.name.clone())))
    }
}
