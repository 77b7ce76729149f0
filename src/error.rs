//! Error types for the packet engine.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The TUN control device could not be opened.
    #[error("failed to open TUN control device: {0}")]
    Open(#[source] io::Error),

    /// The kernel rejected the interface configuration request.
    #[error("failed to configure TUN interface {name:?}: {source}")]
    Config { name: String, source: io::Error },

    /// A single raw read from the device failed.
    #[error("read error: {0}")]
    Read(#[source] io::Error),

    /// A single raw write to the device failed.
    #[error("write error: {0}")]
    Write(#[source] io::Error),

    /// The engine was closed while (or before) a packet was being submitted.
    #[error("device is closed")]
    DeviceClosed,

    /// The incoming queue is closed and has no packets left.
    #[error("incoming queue is closed")]
    QueueClosed,

    /// Releasing the device handle failed.
    #[error("failed to close TUN device: {0}")]
    Close(#[source] io::Error),

    #[error("packet pumps are already running")]
    AlreadyStarted,

    #[error("failed to spawn packet pump: {0}")]
    Spawn(#[source] io::Error),

    #[error("invalid packet: length {len} exceeds buffer capacity {capacity}")]
    InvalidPacket { len: usize, capacity: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to read configuration file {path}: {source}")]
    ConfigRead { path: PathBuf, source: io::Error },

    #[error("invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),
}
