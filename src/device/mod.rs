mod tun;

pub use self::tun::{Tun, CONTROL_PATH, TUN_FLAGS};

#[cfg(test)]
pub use self::mock::MockDevice;

/// Raw packet I/O against a network device.
///
/// Both calls may block. The engine calls `recv` from exactly one thread
/// and `send` from exactly one other thread.
pub trait Device: Send + Sync {
    /// Receive one packet into `buf`, returning the number of bytes read.
    fn recv(&self, buf: &mut [u8]) -> std::io::Result<usize>;

    /// Send the whole of `buf` as one packet, returning the bytes written.
    fn send(&self, buf: &[u8]) -> std::io::Result<usize>;

    /// Release the underlying handle. Called once by the engine on shutdown.
    fn close(&self) -> std::io::Result<()>;
}
