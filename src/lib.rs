//! User-space packet engine for Linux TUN devices.
//!
//! An [`Engine`] opens a TUN interface and runs two background pumps: one
//! reads raw IP packets from the device into a bounded incoming queue, the
//! other drains a bounded outgoing queue into the device. Callers only deal
//! with the queues through [`Engine::read`] and [`Engine::write`].
//!
//! Packets are opaque bytes; nothing here parses them.

#[cfg(not(target_os = "linux"))]
compile_error!("tunpump only supports Linux TUN devices.");

pub mod cancel;
pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod packet;
mod pump;

#[cfg(test)]
mod test;

pub use cancel::CancellationToken;
pub use config::{EngineConfig, RetryPolicy};
pub use device::{Device, Tun};
pub use engine::Engine;
pub use error::{Error, Result};
pub use packet::Packet;
