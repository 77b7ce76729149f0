//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use std::time::Duration;

use crate::{Error, Result};

/// Default interface name.
pub const DEFAULT_INTERFACE: &str = "tun0";

/// Bytes allocated per device read. Exceeds a typical MTU plus headers.
pub const PACKET_SIZE: usize = 2048;

/// Packets buffered per direction.
pub const QUEUE_CAPACITY: usize = 10;

/// Longest interface name the kernel accepts (`IFNAMSIZ` minus the NUL).
pub const MAX_INTERFACE_NAME: usize = libc::IFNAMSIZ - 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Requested TUN interface name
    #[serde(default = "default_interface")]
    pub interface: String,

    /// Size of the buffer allocated for every device read
    #[serde(default = "default_packet_size")]
    pub packet_size: usize,

    /// Capacity of the incoming and outgoing queues
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Back-off applied when device reads or writes fail
    #[serde(default)]
    pub retry: RetryPolicy,
}

/// How the pumps react to failed device I/O.
///
/// Each consecutive failure doubles the delay (with jitter) up to
/// `max_backoff_ms`. A successful transfer resets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Stop the pump after this many failures in a row. `None` retries forever.
    #[serde(default)]
    pub max_consecutive_failures: Option<u32>,
}

impl RetryPolicy {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            max_consecutive_failures: None,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            interface: default_interface(),
            packet_size: default_packet_size(),
            queue_capacity: default_queue_capacity(),
            retry: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Default configuration for the named interface.
    pub fn for_interface(name: impl Into<String>) -> Self {
        Self {
            interface: name.into(),
            ..Self::default()
        }
    }

    /// Parse a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Checks the settings before anything is opened.
    ///
    /// An unusable interface name is reported as [`Error::Config`], the same
    /// error the kernel request would produce.
    pub fn validate(&self) -> Result<()> {
        let bad_name = if self.interface.len() > MAX_INTERFACE_NAME {
            Some("interface name too long")
        } else if self.interface.contains('\0') {
            Some("interface name contains a NUL byte")
        } else {
            None
        };
        if let Some(reason) = bad_name {
            return Err(Error::Config {
                name: self.interface.clone(),
                source: io::Error::new(io::ErrorKind::InvalidInput, reason),
            });
        }
        if self.packet_size == 0 {
            return Err(Error::InvalidConfig(
                "packet_size must be greater than 0".into(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(Error::InvalidConfig(
                "queue_capacity must be greater than 0".into(),
            ));
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(Error::InvalidConfig(
                "retry.initial_backoff_ms must not exceed retry.max_backoff_ms".into(),
            ));
        }
        if self.retry.max_backoff_ms == 0 && self.retry.max_consecutive_failures.is_none() {
            return Err(Error::InvalidConfig(
                "retry.max_backoff_ms must be greater than 0 when retries are unlimited".into(),
            ));
        }
        Ok(())
    }
}

fn default_interface() -> String {
    DEFAULT_INTERFACE.to_string()
}

fn default_packet_size() -> usize {
    PACKET_SIZE
}

fn default_queue_capacity() -> usize {
    QUEUE_CAPACITY
}

fn default_initial_backoff() -> u64 {
    1
}

fn default_max_backoff() -> u64 {
    1000
}
